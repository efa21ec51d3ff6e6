use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the simulator.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Inbound deliveries received by all adapters
    pub messages_received: AtomicU64,
    pub decode_failures: AtomicU64,

    /// Dispatch calls and per-rule outcomes
    pub dispatches_total: AtomicU64,
    pub rules_evaluated_total: AtomicU64,
    pub rules_triggered_total: AtomicU64,
    pub multi_trigger_total: AtomicU64,
    pub stale_rules_pruned: AtomicU64,
    pub handler_failures: AtomicU64,

    /// Outbound publishing
    pub messages_published: AtomicU64,
    pub publish_failures: AtomicU64,

    /// Adapter lifecycle
    pub adapters_created: AtomicU64,
    pub adapter_failures: AtomicU64,
    pub adapter_close_failures: AtomicU64,

    /// Registry mutations
    pub rules_registered: AtomicU64,
    pub rules_removed: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        MetricsRegistry::default()
    }

    /// Record an inbound delivery and whether it decoded.
    pub fn record_delivery(&self, decoded: bool) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        if !decoded {
            self.decode_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a finished dispatch.
    pub fn record_dispatch(&self, evaluated: u64, triggered: u64) {
        self.dispatches_total.fetch_add(1, Ordering::Relaxed);
        self.rules_evaluated_total.fetch_add(evaluated, Ordering::Relaxed);
        self.rules_triggered_total.fetch_add(triggered, Ordering::Relaxed);
        if triggered > 1 {
            self.multi_trigger_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_stale_prune(&self) {
        self.stale_rules_pruned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish(&self, success: bool) {
        if success {
            self.messages_published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.publish_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_adapter_creation(&self, success: bool) {
        if success {
            self.adapters_created.fetch_add(1, Ordering::Relaxed);
        } else {
            self.adapter_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_adapter_close_failure(&self) {
        self.adapter_close_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rule_registered(&self) {
        self.rules_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rule_removed(&self) {
        self.rules_removed.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        format!(
            r#"# HELP msgsim_messages_received_total Inbound deliveries received
# TYPE msgsim_messages_received_total counter
msgsim_messages_received_total {}

# HELP msgsim_decode_failures_total Inbound deliveries dropped as malformed
# TYPE msgsim_decode_failures_total counter
msgsim_decode_failures_total {}

# HELP msgsim_dispatches_total Dispatch calls
# TYPE msgsim_dispatches_total counter
msgsim_dispatches_total {}

# HELP msgsim_rules_evaluated_total Rule trigger evaluations
# TYPE msgsim_rules_evaluated_total counter
msgsim_rules_evaluated_total {}

# HELP msgsim_rules_triggered_total Rules that triggered
# TYPE msgsim_rules_triggered_total counter
msgsim_rules_triggered_total {}

# HELP msgsim_multi_trigger_total Messages that triggered more than one rule
# TYPE msgsim_multi_trigger_total counter
msgsim_multi_trigger_total {}

# HELP msgsim_stale_rules_pruned_total Stale rule identities pruned from indices
# TYPE msgsim_stale_rules_pruned_total counter
msgsim_stale_rules_pruned_total {}

# HELP msgsim_handler_failures_total Rule handlers that returned an error
# TYPE msgsim_handler_failures_total counter
msgsim_handler_failures_total {}

# HELP msgsim_messages_published_total Responses published
# TYPE msgsim_messages_published_total counter
msgsim_messages_published_total {}

# HELP msgsim_publish_failures_total Responses that failed to publish
# TYPE msgsim_publish_failures_total counter
msgsim_publish_failures_total {}

# HELP msgsim_adapters_created_total Adapters constructed
# TYPE msgsim_adapters_created_total counter
msgsim_adapters_created_total {}

# HELP msgsim_adapter_failures_total Adapter constructions that failed
# TYPE msgsim_adapter_failures_total counter
msgsim_adapter_failures_total {}

# HELP msgsim_adapter_close_failures_total Adapters that failed to close cleanly
# TYPE msgsim_adapter_close_failures_total counter
msgsim_adapter_close_failures_total {}

# HELP msgsim_rules_registered_total Rules registered
# TYPE msgsim_rules_registered_total counter
msgsim_rules_registered_total {}

# HELP msgsim_rules_removed_total Rules removed
# TYPE msgsim_rules_removed_total counter
msgsim_rules_removed_total {}
"#,
            self.messages_received.load(Ordering::Relaxed),
            self.decode_failures.load(Ordering::Relaxed),
            self.dispatches_total.load(Ordering::Relaxed),
            self.rules_evaluated_total.load(Ordering::Relaxed),
            self.rules_triggered_total.load(Ordering::Relaxed),
            self.multi_trigger_total.load(Ordering::Relaxed),
            self.stale_rules_pruned.load(Ordering::Relaxed),
            self.handler_failures.load(Ordering::Relaxed),
            self.messages_published.load(Ordering::Relaxed),
            self.publish_failures.load(Ordering::Relaxed),
            self.adapters_created.load(Ordering::Relaxed),
            self.adapter_failures.load(Ordering::Relaxed),
            self.adapter_close_failures.load(Ordering::Relaxed),
            self.rules_registered.load(Ordering::Relaxed),
            self.rules_removed.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_dispatch() {
        let metrics = MetricsRegistry::new();

        metrics.record_dispatch(3, 1);
        metrics.record_dispatch(2, 2);
        metrics.record_dispatch(0, 0);

        assert_eq!(metrics.dispatches_total.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.rules_evaluated_total.load(Ordering::Relaxed), 5);
        assert_eq!(metrics.rules_triggered_total.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.multi_trigger_total.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_record_delivery_and_publish() {
        let metrics = MetricsRegistry::new();

        metrics.record_delivery(true);
        metrics.record_delivery(false);
        metrics.record_publish(true);
        metrics.record_publish(false);

        assert_eq!(metrics.messages_received.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.decode_failures.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.messages_published.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.publish_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = MetricsRegistry::new();
        metrics.record_rule_registered();
        metrics.record_adapter_creation(true);

        let output = metrics.to_prometheus();

        assert!(output.contains("msgsim_rules_registered_total 1"));
        assert!(output.contains("msgsim_adapters_created_total 1"));
        assert!(output.contains("msgsim_dispatches_total 0"));
    }
}
