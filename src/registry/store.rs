use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::domain::{ConnectivityId, RuleId};
use crate::rules::Rule;

/// Identities of the rules bound to one endpoint.
pub type RuleIndex = Arc<Mutex<AHashSet<RuleId>>>;

/// Rule storage shared by the registry (writer) and the dispatcher (reader).
///
/// Lock order for every mutation is `rules` then an index entry. Insertion
/// holds the `rules` write lock while it touches the index, so a reader that
/// finds an identity in an index and then takes the `rules` read lock always
/// sees the finished registration.
pub struct RuleStore {
    rules: RwLock<AHashMap<RuleId, Arc<dyn Rule>>>,
    index: RwLock<AHashMap<ConnectivityId, RuleIndex>>,
}

impl RuleStore {
    pub fn new() -> Self {
        RuleStore {
            rules: RwLock::new(AHashMap::new()),
            index: RwLock::new(AHashMap::new()),
        }
    }

    /// Look up a rule by identity.
    pub fn rule(&self, id: RuleId) -> Option<Arc<dyn Rule>> {
        self.rules.read().get(&id).cloned()
    }

    /// Index for an endpoint, if any rule was ever registered for it.
    pub fn index(&self, connectivity_id: &ConnectivityId) -> Option<RuleIndex> {
        self.index.read().get(connectivity_id).cloned()
    }

    /// Snapshot of all registered identities.
    pub fn ids(&self) -> Vec<RuleId> {
        self.rules.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    pub(super) fn insert(&self, id: RuleId, rule: Arc<dyn Rule>) {
        let mut rules = self.rules.write();
        let index = self.index_or_create(rule.connectivity_id());
        index.lock().insert(id);
        rules.insert(id, rule);
    }

    pub(super) fn remove(&self, id: RuleId) -> Option<Arc<dyn Rule>> {
        let mut rules = self.rules.write();
        let rule = rules.remove(&id)?;
        if let Some(index) = self.index(rule.connectivity_id()) {
            index.lock().remove(&id);
        }
        Some(rule)
    }

    /// Drop a rule from the identity map only, leaving its index entry stale.
    #[cfg(test)]
    pub(super) fn forget_rule(&self, id: RuleId) {
        self.rules.write().remove(&id);
    }

    fn index_or_create(&self, connectivity_id: &ConnectivityId) -> RuleIndex {
        // Fast path: index exists
        if let Some(index) = self.index.read().get(connectivity_id) {
            return index.clone();
        }

        let mut write_guard = self.index.write();
        write_guard
            .entry(connectivity_id.clone())
            .or_default()
            .clone()
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        RuleStore::new()
    }
}
