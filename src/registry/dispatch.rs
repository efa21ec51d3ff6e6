use smallvec::SmallVec;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{ConnectivityId, Message, RuleId};
use crate::observability::MetricsRegistry;
use crate::rules::{Rule, RuleError};

use super::store::RuleStore;

/// Anything that turns an inbound message for an endpoint into responses.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, connectivity_id: &ConnectivityId, message: &Message) -> Vec<Message>;
}

/// Evaluates every rule indexed under an endpoint and aggregates the output.
///
/// Rules are visited in no particular order. More than one rule firing on the
/// same message is allowed but logged, since it usually means two rules
/// overlap.
pub struct DispatchEngine {
    store: Arc<RuleStore>,
    metrics: Arc<MetricsRegistry>,
}

impl DispatchEngine {
    pub fn new(store: Arc<RuleStore>, metrics: Arc<MetricsRegistry>) -> Self {
        DispatchEngine { store, metrics }
    }
}

impl Dispatcher for DispatchEngine {
    fn dispatch(&self, connectivity_id: &ConnectivityId, message: &Message) -> Vec<Message> {
        let Some(index) = self.store.index(connectivity_id) else {
            return Vec::new();
        };

        // Snapshot so no lock is held while handlers run
        let ids: SmallVec<[RuleId; 8]> = index.lock().iter().copied().collect();

        let mut responses = Vec::new();
        let mut evaluated = 0u64;
        let mut triggered = 0u64;

        for id in ids {
            let Some(rule) = self.store.rule(id) else {
                // Removed since the snapshot; identities are never reused.
                index.lock().remove(&id);
                self.metrics.record_stale_prune();
                debug!(connectivity_id = %connectivity_id, rule_id = %id, "Pruned stale rule");
                continue;
            };

            evaluated += 1;
            if !rule.check_triggered(message) {
                continue;
            }

            triggered += 1;
            if triggered > 1 {
                warn!(
                    connectivity_id = %connectivity_id,
                    rule_id = %id,
                    message_type = message.message_type(),
                    "More than one rule triggered on message"
                );
            }

            match handle_isolated(rule.as_ref(), message) {
                Ok(out) => responses.extend(out),
                Err(e) => {
                    self.metrics.record_handler_failure();
                    warn!(
                        connectivity_id = %connectivity_id,
                        rule_id = %id,
                        error = %e,
                        "Rule handler failed, skipping its output"
                    );
                }
            }
        }

        self.metrics.record_dispatch(evaluated, triggered);
        debug!(
            connectivity_id = %connectivity_id,
            message_type = message.message_type(),
            evaluated,
            triggered,
            responses = responses.len(),
            "Dispatched message"
        );

        responses
    }
}

/// Run a handler, turning a panic into [`RuleError::Panicked`] so one rule
/// cannot take down the subscriber task.
fn handle_isolated(rule: &dyn Rule, message: &Message) -> Result<Vec<Message>, RuleError> {
    catch_unwind(AssertUnwindSafe(|| rule.handle(message)))
        .unwrap_or_else(|payload| Err(RuleError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::tracing::init_test_tracing;
    use crate::rules::{MessageCompareRule, Rule, RuleError};
    use std::sync::atomic::Ordering;

    fn engine() -> (Arc<RuleStore>, Arc<MetricsRegistry>, DispatchEngine) {
        init_test_tracing();
        let store = Arc::new(RuleStore::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let engine = DispatchEngine::new(store.clone(), metrics.clone());
        (store, metrics, engine)
    }

    fn reply_rule(endpoint: &str, side: &str, reply: &'static str) -> Arc<dyn Rule> {
        Arc::new(
            MessageCompareRule::builder(endpoint, "NewOrderSingle")
                .field("Side", side)
                .handler(move |_| Ok(vec![Message::new(reply)]))
                .build(),
        )
    }

    fn order(side: &str) -> Message {
        Message::new("NewOrderSingle").with_field("Side", side)
    }

    #[test]
    fn test_unknown_endpoint_yields_nothing() {
        let (_store, _metrics, engine) = engine();

        assert!(engine.dispatch(&ConnectivityId::new("C9"), &order("1")).is_empty());
    }

    #[test]
    fn test_single_trigger() {
        let (store, metrics, engine) = engine();
        store.insert(RuleId(1), reply_rule("C1", "1", "ExecutionReport"));

        let responses = engine.dispatch(&ConnectivityId::new("C1"), &order("1"));

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].message_type(), "ExecutionReport");
        assert_eq!(metrics.rules_triggered_total.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.multi_trigger_total.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_no_trigger_is_empty() {
        let (store, _metrics, engine) = engine();
        store.insert(RuleId(1), reply_rule("C1", "1", "ExecutionReport"));

        assert!(engine.dispatch(&ConnectivityId::new("C1"), &order("2")).is_empty());
    }

    #[test]
    fn test_multiple_triggers_aggregate_and_are_counted() {
        let (store, metrics, engine) = engine();
        store.insert(RuleId(1), reply_rule("C1", "1", "ExecutionReport"));
        store.insert(RuleId(2), reply_rule("C1", "1", "OrderAck"));

        let responses = engine.dispatch(&ConnectivityId::new("C1"), &order("1"));

        let mut types: Vec<&str> = responses.iter().map(|m| m.message_type()).collect();
        types.sort_unstable();
        assert_eq!(types, vec!["ExecutionReport", "OrderAck"]);
        assert_eq!(metrics.multi_trigger_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_rules_for_other_endpoints_are_ignored() {
        let (store, _metrics, engine) = engine();
        store.insert(RuleId(1), reply_rule("C2", "1", "ExecutionReport"));

        assert!(engine.dispatch(&ConnectivityId::new("C1"), &order("1")).is_empty());
    }

    #[test]
    fn test_stale_identity_is_pruned() {
        let (store, metrics, engine) = engine();
        store.insert(RuleId(1), reply_rule("C1", "1", "ExecutionReport"));
        store.insert(RuleId(2), reply_rule("C1", "1", "OrderAck"));

        // Simulate a removal that raced ahead of the index cleanup
        let index = store.index(&ConnectivityId::new("C1")).unwrap();
        store.forget_rule(RuleId(2));
        assert!(index.lock().contains(&RuleId(2)));

        let responses = engine.dispatch(&ConnectivityId::new("C1"), &order("1"));

        assert_eq!(responses.len(), 1);
        assert!(!index.lock().contains(&RuleId(2)));
        assert_eq!(metrics.stale_rules_pruned.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_failing_handler_is_isolated() {
        let (store, metrics, engine) = engine();
        store.insert(RuleId(1), reply_rule("C1", "1", "ExecutionReport"));
        store.insert(
            RuleId(2),
            Arc::new(
                MessageCompareRule::builder("C1", "NewOrderSingle")
                    .handler(|_| Err(RuleError::handler("boom")))
                    .build(),
            ),
        );

        let responses = engine.dispatch(&ConnectivityId::new("C1"), &order("1"));

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].message_type(), "ExecutionReport");
        assert_eq!(metrics.handler_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let (store, metrics, engine) = engine();
        store.insert(RuleId(1), reply_rule("C1", "1", "ExecutionReport"));
        store.insert(
            RuleId(2),
            Arc::new(
                MessageCompareRule::builder("C1", "NewOrderSingle")
                    .handler(|_| panic!("handler bug"))
                    .build(),
            ),
        );

        // Twice: the engine stays usable after a panic
        for round in 1..=2 {
            let responses = engine.dispatch(&ConnectivityId::new("C1"), &order("1"));
            assert_eq!(responses.len(), 1);
            assert_eq!(responses[0].message_type(), "ExecutionReport");
            assert_eq!(metrics.handler_failures.load(Ordering::Relaxed), round);
        }
    }

    #[test]
    fn test_panic_message_is_kept() {
        let rule = MessageCompareRule::builder("C1", "NewOrderSingle")
            .handler(|_| panic!("bad field {}", "Side"))
            .build();

        match handle_isolated(&rule, &order("1")) {
            Err(RuleError::Panicked(msg)) => assert_eq!(msg, "bad field Side"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
