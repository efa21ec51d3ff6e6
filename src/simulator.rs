use std::sync::Arc;
use tracing::{info, warn};

use crate::adapter::{
    Adapter, AdapterError, AdapterFactory, AdapterManager, QueueAdapterFactory, QueueDiscovery,
};
use crate::config::EndpointsConfig;
use crate::domain::{ConnectivityId, Message, RuleId};
use crate::observability::MetricsRegistry;
use crate::registry::{DispatchEngine, Dispatcher, RuleRegistry, RuleStore};
use crate::rules::Rule;
use crate::transport::{Transport, TransportSettings};

/// Rule registry, dispatch engine and adapters wired together.
///
/// The dispatcher is built first so the adapter factory can hand it to every
/// adapter it creates; the registry then sits on top of both.
pub struct Simulator {
    registry: RuleRegistry,
    adapters: Arc<AdapterManager>,
    dispatcher: Arc<dyn Dispatcher>,
    metrics: Arc<MetricsRegistry>,
}

impl Simulator {
    /// Build a simulator whose adapters come from `make_factory`.
    pub fn new<F>(metrics: Arc<MetricsRegistry>, make_factory: F) -> Self
    where
        F: FnOnce(Arc<dyn Dispatcher>) -> Arc<dyn AdapterFactory>,
    {
        let store = Arc::new(RuleStore::new());
        let dispatcher: Arc<dyn Dispatcher> =
            Arc::new(DispatchEngine::new(store.clone(), metrics.clone()));
        let factory = make_factory(dispatcher.clone());
        let adapters = Arc::new(AdapterManager::new(factory, metrics.clone()));
        let registry = RuleRegistry::new(store, adapters.clone(), metrics.clone());

        Simulator {
            registry,
            adapters,
            dispatcher,
            metrics,
        }
    }

    /// Build a simulator that binds endpoints to queues on `transport`.
    pub fn with_transport(
        endpoints: EndpointsConfig,
        transport: Arc<dyn Transport>,
        settings: TransportSettings,
        discovery: Arc<dyn QueueDiscovery>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let factory_metrics = metrics.clone();
        Simulator::new(metrics, move |dispatcher| {
            Arc::new(QueueAdapterFactory::new(
                endpoints,
                transport,
                settings,
                discovery,
                dispatcher,
                factory_metrics,
            ))
        })
    }

    /// Register a rule. Returns [`RuleId::FAILED`] if its endpoint has no
    /// usable adapter.
    pub async fn add_rule<R: Rule + 'static>(&self, rule: R) -> RuleId {
        self.registry.register(Arc::new(rule)).await
    }

    pub fn remove_rule(&self, id: RuleId) -> bool {
        self.registry.remove(id)
    }

    pub fn list_rules(&self) -> Vec<RuleId> {
        self.registry.list()
    }

    /// Run a message through the rules of an endpoint without a transport.
    pub fn handle(&self, connectivity_id: &ConnectivityId, message: &Message) -> Vec<Message> {
        self.dispatcher.dispatch(connectivity_id, message)
    }

    /// Create the adapter for an endpoint ahead of any rule.
    pub async fn ensure_adapter(
        &self,
        connectivity_id: &ConnectivityId,
    ) -> Result<Arc<dyn Adapter>, AdapterError> {
        self.adapters.ensure_adapter(connectivity_id).await
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn adapters(&self) -> &AdapterManager {
        &self.adapters
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Close every adapter. Rules stay registered.
    pub async fn close(&self) {
        let failures = self.adapters.close_all().await;
        if failures > 0 {
            warn!(failures, "Some adapters did not close cleanly");
        } else {
            info!("All adapters closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{DiscoveryError, HttpQueueDiscovery};
    use crate::config::{DiscoveryAddress, EndpointSettings};
    use crate::domain::QueueInfo;
    use crate::observability::tracing::init_test_tracing;
    use crate::rules::MessageCompareRule;
    use crate::transport::{MemoryBroker, Subscriber};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::time::timeout;

    struct NoDiscovery;

    #[async_trait]
    impl QueueDiscovery for NoDiscovery {
        async fn discover(&self, _address: &DiscoveryAddress) -> Result<QueueInfo, DiscoveryError> {
            Err(DiscoveryError::Status(404))
        }
    }

    fn simulator(broker: Arc<MemoryBroker>) -> Simulator {
        let endpoints = EndpointsConfig::default()
            .with_endpoint("C1", EndpointSettings::fixed("ex1", "in1", "out1"))
            .with_endpoint("C2", EndpointSettings::fixed("ex2", "in2", "out2"));
        Simulator::with_transport(
            endpoints,
            broker,
            TransportSettings::default(),
            Arc::new(NoDiscovery),
            Arc::new(MetricsRegistry::new()),
        )
    }

    fn execution_report_rule(side: &str, exec_id: &str) -> MessageCompareRule {
        let exec_id = exec_id.to_string();
        MessageCompareRule::builder("C1", "NewOrderSingle")
            .field("Side", side)
            .handler(move |order| {
                Ok(vec![Message::new("ExecutionReport")
                    .with_copied_fields(order, &["ClOrdID", "Side"])
                    .with_field("ExecID", exec_id.as_str())])
            })
            .build()
    }

    fn order(side: &str) -> Message {
        Message::new("NewOrderSingle")
            .with_field("ClOrdID", "order-1")
            .with_field("Side", side)
    }

    async fn receive(sub: &mut Box<dyn Subscriber>) -> Message {
        let delivery = timeout(Duration::from_secs(2), sub.next_delivery())
            .await
            .expect("timed out waiting for response")
            .expect("queue closed");
        Message::decode(&delivery.body).unwrap()
    }

    #[tokio::test]
    async fn test_matching_order_gets_execution_report() {
        init_test_tracing();
        let broker = Arc::new(MemoryBroker::new());
        let sim = simulator(broker.clone());

        let id = sim.add_rule(execution_report_rule("1", "E1")).await;
        assert_eq!(id, RuleId(1));

        let responses = sim.handle(&ConnectivityId::new("C1"), &order("1"));
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].message_type(), "ExecutionReport");
        assert_eq!(responses[0].field_or_null("ClOrdID").as_simple(), Some("order-1"));

        sim.close().await;
    }

    #[tokio::test]
    async fn test_non_matching_order_gets_nothing() {
        let sim = simulator(Arc::new(MemoryBroker::new()));
        sim.add_rule(execution_report_rule("1", "E1")).await;

        let responses = sim.handle(&ConnectivityId::new("C1"), &order("2"));
        assert!(responses.is_empty());

        sim.close().await;
    }

    #[tokio::test]
    async fn test_overlapping_rules_both_respond() {
        let sim = simulator(Arc::new(MemoryBroker::new()));
        sim.add_rule(execution_report_rule("1", "E1")).await;
        sim.add_rule(execution_report_rule("1", "E2")).await;

        let responses = sim.handle(&ConnectivityId::new("C1"), &order("1"));

        let mut exec_ids: Vec<&str> = responses
            .iter()
            .filter_map(|m| m.field_or_null("ExecID").as_simple())
            .collect();
        exec_ids.sort_unstable();
        assert_eq!(exec_ids, vec!["E1", "E2"]);
        assert_eq!(sim.metrics().multi_trigger_total.load(Ordering::Relaxed), 1);

        sim.close().await;
    }

    #[tokio::test]
    async fn test_remove_unknown_rule_changes_nothing() {
        let sim = simulator(Arc::new(MemoryBroker::new()));
        sim.add_rule(execution_report_rule("1", "E1")).await;
        let before = sim.list_rules();

        assert!(!sim.remove_rule(RuleId(999)));
        assert_eq!(sim.list_rules(), before);

        sim.close().await;
    }

    #[tokio::test]
    async fn test_responses_flow_through_queues() {
        let broker = Arc::new(MemoryBroker::new());
        let sim = simulator(broker.clone());
        sim.add_rule(execution_report_rule("1", "E1")).await;

        let mut out = broker
            .subscribe(&TransportSettings::default(), "ex1", "out1")
            .await
            .unwrap();
        broker.inject("ex1", "in1", order("1").encode().unwrap()).unwrap();

        let report = receive(&mut out).await;
        assert_eq!(report.message_type(), "ExecutionReport");
        assert_eq!(report.field_or_null("ExecID").as_simple(), Some("E1"));

        sim.close().await;
        assert_eq!(sim.adapters().adapter_count(), 0);
    }

    #[tokio::test]
    async fn test_removed_rule_stops_responding() {
        let sim = simulator(Arc::new(MemoryBroker::new()));
        let id = sim.add_rule(execution_report_rule("1", "E1")).await;

        assert!(sim.remove_rule(id));
        assert!(sim.handle(&ConnectivityId::new("C1"), &order("1")).is_empty());
        assert!(sim.list_rules().is_empty());

        sim.close().await;
    }

    #[tokio::test]
    async fn test_rule_for_unconfigured_endpoint_fails() {
        let broker = Arc::new(MemoryBroker::new());
        let sim = Simulator::with_transport(
            EndpointsConfig::default(),
            broker,
            TransportSettings::default(),
            Arc::new(HttpQueueDiscovery::new(Duration::from_millis(200)).unwrap()),
            Arc::new(MetricsRegistry::new()),
        );

        let rule = MessageCompareRule::builder("C3", "NewOrderSingle").build();
        assert_eq!(sim.add_rule(rule).await, RuleId::FAILED);
        assert!(sim.list_rules().is_empty());
        assert_eq!(sim.metrics().adapter_failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_endpoints_are_isolated() {
        let broker = Arc::new(MemoryBroker::new());
        let sim = simulator(broker.clone());
        sim.add_rule(execution_report_rule("1", "E1")).await;
        sim.ensure_adapter(&ConnectivityId::new("C2")).await.unwrap();

        assert!(sim.handle(&ConnectivityId::new("C2"), &order("1")).is_empty());
        assert_eq!(
            sim.adapters().endpoints(),
            vec![ConnectivityId::new("C1"), ConnectivityId::new("C2")]
        );

        sim.close().await;
    }
}
