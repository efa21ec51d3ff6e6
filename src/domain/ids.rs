use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one simulated counterparty endpoint.
///
/// Rules, adapters and queue configuration are all keyed by this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectivityId(String);

impl ConnectivityId {
    pub fn new(id: impl Into<String>) -> Self {
        ConnectivityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectivityId {
    fn from(id: &str) -> Self {
        ConnectivityId::new(id)
    }
}

/// Identity assigned to a rule by the registry.
///
/// Identities are positive and never reused within one registry.
/// [`RuleId::FAILED`] is returned when a rule could not be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub i64);

impl RuleId {
    /// Sentinel for a registration that did not succeed.
    pub const FAILED: RuleId = RuleId(-1);

    #[inline]
    pub fn value(&self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        *self == RuleId::FAILED
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
