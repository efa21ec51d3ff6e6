use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::adapter::{AdapterError, AdapterManager};
use crate::domain::RuleId;
use crate::observability::MetricsRegistry;
use crate::rules::Rule;

use super::store::RuleStore;

/// Owns the active rules and hands out their identities.
///
/// A rule is only accepted once an adapter exists for its endpoint, so every
/// registered rule can actually receive traffic.
pub struct RuleRegistry {
    store: Arc<RuleStore>,
    adapters: Arc<AdapterManager>,
    next_id: AtomicI64,
    metrics: Arc<MetricsRegistry>,
}

impl RuleRegistry {
    pub fn new(
        store: Arc<RuleStore>,
        adapters: Arc<AdapterManager>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        RuleRegistry {
            store,
            adapters,
            next_id: AtomicI64::new(0),
            metrics,
        }
    }

    /// Register a rule, returning [`RuleId::FAILED`] if no adapter could be
    /// created for its endpoint.
    pub async fn register(&self, rule: Arc<dyn Rule>) -> RuleId {
        let connectivity_id = rule.connectivity_id().clone();
        match self.try_register(rule).await {
            Ok(id) => id,
            Err(e) => {
                error!(
                    connectivity_id = %connectivity_id,
                    error = %e,
                    "Cannot register rule, adapter unavailable"
                );
                RuleId::FAILED
            }
        }
    }

    /// Register a rule, surfacing the adapter error on failure.
    pub async fn try_register(&self, rule: Arc<dyn Rule>) -> Result<RuleId, AdapterError> {
        self.adapters.ensure_adapter(rule.connectivity_id()).await?;

        let id = RuleId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let connectivity_id = rule.connectivity_id().clone();
        self.store.insert(id, rule);
        self.metrics.record_rule_registered();

        info!(connectivity_id = %connectivity_id, rule_id = %id, "Rule registered");
        Ok(id)
    }

    /// Remove a rule. Unknown identities are a no-op.
    ///
    /// Returns true if a rule was removed.
    pub fn remove(&self, id: RuleId) -> bool {
        match self.store.remove(id) {
            Some(rule) => {
                self.metrics.record_rule_removed();
                info!(connectivity_id = %rule.connectivity_id(), rule_id = %id, "Rule removed");
                true
            }
            None => {
                debug!(rule_id = %id, "Remove requested for unknown rule");
                false
            }
        }
    }

    /// Snapshot of registered identities in ascending order.
    pub fn list(&self) -> Vec<RuleId> {
        let mut ids = self.store.ids();
        ids.sort_unstable();
        ids
    }

    pub fn get(&self, id: RuleId) -> Option<Arc<dyn Rule>> {
        self.store.rule(id)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
