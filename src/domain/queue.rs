use serde::{Deserialize, Serialize};

/// Transport binding for one endpoint: the exchange plus the inbound and
/// outbound queue names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub exchange_name: String,
    pub inbound_queue_name: String,
    pub outbound_queue_name: String,
}

impl QueueInfo {
    pub fn new(
        exchange_name: impl Into<String>,
        inbound_queue_name: impl Into<String>,
        outbound_queue_name: impl Into<String>,
    ) -> Self {
        QueueInfo {
            exchange_name: exchange_name.into(),
            inbound_queue_name: inbound_queue_name.into(),
            outbound_queue_name: outbound_queue_name.into(),
        }
    }

    /// Name of the first empty field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.exchange_name.is_empty() {
            Some("exchange_name")
        } else if self.inbound_queue_name.is_empty() {
            Some("inbound_queue_name")
        } else if self.outbound_queue_name.is_empty() {
            Some("outbound_queue_name")
        } else {
            None
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.missing_field().is_none()
    }
}
