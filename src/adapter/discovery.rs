use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{DiscoveryAddress, EndpointSettings};
use crate::domain::{ConnectivityId, QueueInfo};

use super::AdapterError;

/// Path served by a connectivity service that reports its queue binding.
pub const QUEUE_INFO_PATH: &str = "/v1/queue-info";

/// Errors that can occur while asking a connectivity service for its queues.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("discovery service returned status {0}")]
    Status(u16),

    #[error("discovery response is missing {0}")]
    Incomplete(&'static str),
}

/// Wire shape of the discovery response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueInfoResponse {
    #[serde(default)]
    pub exchange_name: String,
    #[serde(default)]
    pub inbound_queue_name: String,
    #[serde(default)]
    pub outbound_queue_name: String,
}

impl From<QueueInfo> for QueueInfoResponse {
    fn from(info: QueueInfo) -> Self {
        QueueInfoResponse {
            exchange_name: info.exchange_name,
            inbound_queue_name: info.inbound_queue_name,
            outbound_queue_name: info.outbound_queue_name,
        }
    }
}

impl From<QueueInfoResponse> for QueueInfo {
    fn from(resp: QueueInfoResponse) -> Self {
        QueueInfo::new(
            resp.exchange_name,
            resp.inbound_queue_name,
            resp.outbound_queue_name,
        )
    }
}

/// Source of queue bindings for remote endpoints.
#[async_trait]
pub trait QueueDiscovery: Send + Sync {
    /// One attempt, no retries. Incomplete answers are errors.
    async fn discover(&self, address: &DiscoveryAddress) -> Result<QueueInfo, DiscoveryError>;
}

/// Discovery over plain HTTP with a per-request timeout.
pub struct HttpQueueDiscovery {
    client: Client,
}

impl HttpQueueDiscovery {
    pub fn new(timeout: Duration) -> Result<Self, DiscoveryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpQueueDiscovery { client })
    }
}

#[async_trait]
impl QueueDiscovery for HttpQueueDiscovery {
    async fn discover(&self, address: &DiscoveryAddress) -> Result<QueueInfo, DiscoveryError> {
        let url = format!("http://{}:{}{}", address.host, address.port, QUEUE_INFO_PATH);
        debug!(url = %url, "Requesting queue info");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status().as_u16()));
        }

        let info: QueueInfo = response.json::<QueueInfoResponse>().await?.into();
        if let Some(field) = info.missing_field() {
            return Err(DiscoveryError::Incomplete(field));
        }

        Ok(info)
    }
}

/// Work out the queue binding for an endpoint.
///
/// A configured discovery address is tried once; any failure falls back to
/// the static names. If those are incomplete too, construction cannot go on.
pub async fn resolve_queue_info(
    connectivity_id: &ConnectivityId,
    settings: &EndpointSettings,
    discovery: &dyn QueueDiscovery,
) -> Result<QueueInfo, AdapterError> {
    if let Some(ref address) = settings.discovery {
        match discovery.discover(address).await {
            Ok(info) => {
                info!(
                    connectivity_id = %connectivity_id,
                    address = %address,
                    "Queue info discovered"
                );
                return Ok(info);
            }
            Err(e) => warn!(
                connectivity_id = %connectivity_id,
                address = %address,
                error = %e,
                "Queue discovery failed, using static configuration"
            ),
        }
    }

    settings
        .static_queue_info()
        .map_err(|field| AdapterError::MissingConfig {
            connectivity_id: connectivity_id.clone(),
            field,
        })
}
