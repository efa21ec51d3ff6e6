use ahash::AHashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::domain::ConnectivityId;
use crate::observability::MetricsRegistry;

use super::{Adapter, AdapterError, AdapterFactory};

type AdapterSlot = Arc<OnceCell<Arc<dyn Adapter>>>;

/// Owns one adapter per endpoint, built lazily on first use.
///
/// Each endpoint gets its own slot. Concurrent callers for the same endpoint
/// wait on a single construction; callers for other endpoints are never
/// blocked by it. A failed construction leaves the slot empty, so the next
/// call tries again.
///
/// Once [`close_all`](AdapterManager::close_all) starts, no new adapter is
/// built and constructions already in flight are closed when they finish.
pub struct AdapterManager {
    factory: Arc<dyn AdapterFactory>,
    adapters: Mutex<AHashMap<ConnectivityId, AdapterSlot>>,
    closing: AtomicBool,
    metrics: Arc<MetricsRegistry>,
}

impl AdapterManager {
    pub fn new(factory: Arc<dyn AdapterFactory>, metrics: Arc<MetricsRegistry>) -> Self {
        AdapterManager {
            factory,
            adapters: Mutex::new(AHashMap::new()),
            closing: AtomicBool::new(false),
            metrics,
        }
    }

    /// Return the adapter for `connectivity_id`, building it if needed.
    pub async fn ensure_adapter(
        &self,
        connectivity_id: &ConnectivityId,
    ) -> Result<Arc<dyn Adapter>, AdapterError> {
        let slot = {
            let mut adapters = self.adapters.lock();
            // Checked under the map lock so close_all cannot drain in between
            if self.closing.load(Ordering::SeqCst) {
                return Err(AdapterError::ShuttingDown(connectivity_id.clone()));
            }
            adapters.entry(connectivity_id.clone()).or_default().clone()
        };

        let adapter = slot
            .get_or_try_init(|| async {
                // The slot may already be drained if shutdown began after we got it
                if self.closing.load(Ordering::SeqCst) {
                    return Err(AdapterError::ShuttingDown(connectivity_id.clone()));
                }

                let result = self.factory.construct(connectivity_id).await;
                self.metrics.record_adapter_creation(result.is_ok());
                match result {
                    Ok(ref adapter) => info!(
                        connectivity_id = %connectivity_id,
                        exchange = %adapter.queue_info().exchange_name,
                        inbound = %adapter.queue_info().inbound_queue_name,
                        outbound = %adapter.queue_info().outbound_queue_name,
                        "Adapter created"
                    ),
                    Err(ref e) => error!(
                        connectivity_id = %connectivity_id,
                        error = %e,
                        "Cannot create adapter"
                    ),
                }
                result
            })
            .await?;

        Ok(adapter.clone())
    }

    /// Existing adapter, without building one.
    pub fn get(&self, connectivity_id: &ConnectivityId) -> Option<Arc<dyn Adapter>> {
        self.adapters
            .lock()
            .get(connectivity_id)
            .and_then(|slot| slot.get().cloned())
    }

    /// Endpoints with a live adapter.
    pub fn endpoints(&self) -> Vec<ConnectivityId> {
        let mut ids: Vec<ConnectivityId> = self
            .adapters
            .lock()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Close every live adapter and refuse to build new ones.
    ///
    /// A construction still in flight is awaited and its adapter closed with
    /// the rest. A failure on one adapter is logged and does not stop the
    /// others. Returns the number of adapters that failed to close.
    pub async fn close_all(&self) -> usize {
        let slots: Vec<(ConnectivityId, AdapterSlot)> = {
            let mut adapters = self.adapters.lock();
            self.closing.store(true, Ordering::SeqCst);
            adapters.drain().collect()
        };

        let mut failures = 0;
        for (connectivity_id, slot) in slots {
            // Waits for an in-flight construction; an idle empty slot yields nothing
            let adapter = match slot.get_or_try_init(|| async { Err(()) }).await {
                Ok(adapter) => adapter.clone(),
                Err(()) => {
                    debug!(connectivity_id = %connectivity_id, "No adapter to close");
                    continue;
                }
            };

            match adapter.close().await {
                Ok(()) => info!(connectivity_id = %connectivity_id, "Adapter closed"),
                Err(e) => {
                    failures += 1;
                    self.metrics.record_adapter_close_failure();
                    error!(
                        connectivity_id = %connectivity_id,
                        error = %e,
                        "Cannot close adapter"
                    );
                }
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::StubFactory;
    use std::time::Duration;

    fn manager(factory: Arc<StubFactory>) -> (Arc<AdapterManager>, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        (
            Arc::new(AdapterManager::new(factory, metrics.clone())),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_adapter_is_built_once() {
        let factory = Arc::new(StubFactory::new());
        let (manager, _) = manager(factory.clone());
        let c1 = ConnectivityId::new("C1");

        let first = manager.ensure_adapter(&c1).await.unwrap();
        let second = manager.ensure_adapter(&c1).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.constructions(&c1), 1);
        assert_eq!(manager.adapter_count(), 1);
        assert!(manager.get(&c1).is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_join_one_construction() {
        let factory = Arc::new(StubFactory::new());
        let (manager, metrics) = manager(factory.clone());

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let manager = manager.clone();
                // Half the callers target a second endpoint
                let id = ConnectivityId::new(if i % 2 == 0 { "C1" } else { "C2" });
                tokio::spawn(async move { manager.ensure_adapter(&id).await.is_ok() })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(factory.constructions(&ConnectivityId::new("C1")), 1);
        assert_eq!(factory.constructions(&ConnectivityId::new("C2")), 1);
        assert_eq!(metrics.adapters_created.load(Ordering::Relaxed), 2);
        assert_eq!(
            manager.endpoints(),
            vec![ConnectivityId::new("C1"), ConnectivityId::new("C2")]
        );
    }

    #[tokio::test]
    async fn test_failure_is_surfaced_and_retried_later() {
        let factory = Arc::new(StubFactory::failing_for(&["C3"]));
        let (manager, metrics) = manager(factory.clone());
        let c3 = ConnectivityId::new("C3");

        let err = manager.ensure_adapter(&c3).await.err().unwrap();
        assert!(matches!(err, AdapterError::MissingConfig { .. }));
        assert!(manager.get(&c3).is_none());
        assert_eq!(manager.adapter_count(), 0);

        assert!(manager.ensure_adapter(&c3).await.is_err());
        assert_eq!(factory.constructions(&c3), 2);
        assert_eq!(metrics.adapter_failures.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_close_all_isolates_failures() {
        let factory = Arc::new(StubFactory::failing_close_for(&["C1"]));
        let (manager, metrics) = manager(factory.clone());

        for id in ["C1", "C2", "C3"] {
            manager.ensure_adapter(&ConnectivityId::new(id)).await.unwrap();
        }

        let failures = manager.close_all().await;

        assert_eq!(failures, 1);
        assert_eq!(metrics.adapter_close_failures.load(Ordering::Relaxed), 1);
        for adapter in factory.built() {
            assert_eq!(adapter.closes.load(Ordering::SeqCst), 1);
        }
        assert_eq!(manager.adapter_count(), 0);

        // Already drained: nothing is closed twice
        assert_eq!(manager.close_all().await, 0);
        for adapter in factory.built() {
            assert_eq!(adapter.closes.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_close_all_waits_for_construction_in_flight() {
        let factory = Arc::new(StubFactory::new());
        let (manager, _) = manager(factory.clone());
        let c1 = ConnectivityId::new("C1");

        let pending = {
            let manager = manager.clone();
            let c1 = c1.clone();
            tokio::spawn(async move { manager.ensure_adapter(&c1).await.is_ok() })
        };

        // Construction takes 20ms; shut down while it is running
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(manager.close_all().await, 0);

        assert!(pending.await.unwrap());
        let built = factory.built();
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].closes.load(Ordering::SeqCst), 1);
        assert_eq!(manager.adapter_count(), 0);
    }

    #[tokio::test]
    async fn test_no_adapter_is_built_after_close_all() {
        let factory = Arc::new(StubFactory::new());
        let (manager, metrics) = manager(factory.clone());
        let c1 = ConnectivityId::new("C1");

        manager.close_all().await;

        let err = manager.ensure_adapter(&c1).await.err().unwrap();
        assert!(matches!(err, AdapterError::ShuttingDown(_)));
        assert!(manager.is_closing());
        assert_eq!(factory.constructions(&c1), 0);
        assert_eq!(metrics.adapter_failures.load(Ordering::Relaxed), 0);
        assert_eq!(manager.adapter_count(), 0);
    }
}
