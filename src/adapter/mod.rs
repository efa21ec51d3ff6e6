//! Per-endpoint transport adapters and their lifecycle.

pub mod discovery;
pub mod manager;
pub mod queue;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{ConnectivityId, QueueInfo};
use crate::transport::TransportError;

pub use discovery::{
    resolve_queue_info, DiscoveryError, HttpQueueDiscovery, QueueDiscovery, QUEUE_INFO_PATH,
};
pub use manager::AdapterManager;
pub use queue::{QueueAdapter, QueueAdapterFactory};

/// Errors raised while building or closing an adapter.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("missing required queue configuration for {connectivity_id}: {field}")]
    MissingConfig {
        connectivity_id: ConnectivityId,
        field: &'static str,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("adapter for {connectivity_id} did not close cleanly ({failures} resource(s) failed)")]
    Close {
        connectivity_id: ConnectivityId,
        failures: usize,
    },

    #[error("adapters are shutting down, not building one for {0}")]
    ShuttingDown(ConnectivityId),
}

/// Transport binding owned by one endpoint.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn connectivity_id(&self) -> &ConnectivityId;

    fn queue_info(&self) -> &QueueInfo;

    /// Release the subscription and publisher. Later calls are no-ops.
    async fn close(&self) -> Result<(), AdapterError>;
}

/// Capability to build the adapter for an endpoint.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn construct(
        &self,
        connectivity_id: &ConnectivityId,
    ) -> Result<Arc<dyn Adapter>, AdapterError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Adapter that only counts closes.
    pub struct StubAdapter {
        pub connectivity_id: ConnectivityId,
        pub queue_info: QueueInfo,
        pub closes: AtomicUsize,
        pub fail_close: bool,
    }

    #[async_trait]
    impl Adapter for StubAdapter {
        fn connectivity_id(&self) -> &ConnectivityId {
            &self.connectivity_id
        }

        fn queue_info(&self) -> &QueueInfo {
            &self.queue_info
        }

        async fn close(&self) -> Result<(), AdapterError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(AdapterError::Close {
                    connectivity_id: self.connectivity_id.clone(),
                    failures: 1,
                });
            }
            Ok(())
        }
    }

    /// Factory that records constructions and can be told to fail.
    #[derive(Default)]
    pub struct StubFactory {
        constructions: Mutex<HashMap<ConnectivityId, usize>>,
        failing: Vec<ConnectivityId>,
        failing_close: Vec<ConnectivityId>,
        built: Mutex<Vec<Arc<StubAdapter>>>,
    }

    impl StubFactory {
        pub fn new() -> Self {
            StubFactory::default()
        }

        pub fn failing_for(endpoints: &[&str]) -> Self {
            StubFactory {
                failing: endpoints.iter().map(|e| ConnectivityId::new(*e)).collect(),
                ..Default::default()
            }
        }

        pub fn failing_close_for(endpoints: &[&str]) -> Self {
            StubFactory {
                failing_close: endpoints.iter().map(|e| ConnectivityId::new(*e)).collect(),
                ..Default::default()
            }
        }

        pub fn constructions(&self, id: &ConnectivityId) -> usize {
            self.constructions.lock().get(id).copied().unwrap_or(0)
        }

        pub fn built(&self) -> Vec<Arc<StubAdapter>> {
            self.built.lock().clone()
        }
    }

    #[async_trait]
    impl AdapterFactory for StubFactory {
        async fn construct(&self, id: &ConnectivityId) -> Result<Arc<dyn Adapter>, AdapterError> {
            *self.constructions.lock().entry(id.clone()).or_insert(0) += 1;

            // Widen the window for concurrent callers
            tokio::time::sleep(Duration::from_millis(20)).await;

            if self.failing.contains(id) {
                return Err(AdapterError::MissingConfig {
                    connectivity_id: id.clone(),
                    field: "exchange_name",
                });
            }

            let adapter = Arc::new(StubAdapter {
                connectivity_id: id.clone(),
                queue_info: QueueInfo::new("ex", "in", "out"),
                closes: AtomicUsize::new(0),
                fail_close: self.failing_close.contains(id),
            });
            self.built.lock().push(adapter.clone());
            Ok(adapter)
        }
    }
}
