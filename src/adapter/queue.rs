use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::EndpointsConfig;
use crate::domain::{ConnectivityId, Message, QueueInfo};
use crate::observability::MetricsRegistry;
use crate::registry::Dispatcher;
use crate::transport::{
    Delivery, Publisher, Subscriber, Transport, TransportError, TransportSettings,
};

use super::discovery::{resolve_queue_info, QueueDiscovery};
use super::{Adapter, AdapterError, AdapterFactory};

/// Everything the subscriber task needs to turn a delivery into responses.
struct DeliveryHandler {
    connectivity_id: ConnectivityId,
    dispatcher: Arc<dyn Dispatcher>,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<MetricsRegistry>,
}

impl DeliveryHandler {
    async fn process(&self, delivery: Delivery) {
        let message = match Message::decode(&delivery.body) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.record_delivery(false);
                warn!(
                    connectivity_id = %self.connectivity_id,
                    consumer_tag = %delivery.consumer_tag,
                    error = %e,
                    "Dropping malformed delivery"
                );
                return;
            }
        };
        self.metrics.record_delivery(true);

        debug!(
            connectivity_id = %self.connectivity_id,
            message_type = message.message_type(),
            "Handling message"
        );
        trace!(connectivity_id = %self.connectivity_id, message = ?message, "Message body");

        for response in self.dispatcher.dispatch(&self.connectivity_id, &message) {
            // Each response stands alone; a failure never stops the batch
            let sent = match response.encode() {
                Ok(payload) => self.publisher.publish(payload).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            self.metrics.record_publish(sent.is_ok());
            if let Err(e) = sent {
                error!(
                    connectivity_id = %self.connectivity_id,
                    message_type = response.message_type(),
                    error = %e,
                    "Cannot send message"
                );
            }
        }
    }
}

/// Consume until shutdown is signalled, then release the subscription.
async fn consume(
    mut subscriber: Box<dyn Subscriber>,
    mut shutdown: watch::Receiver<bool>,
    handler: DeliveryHandler,
) -> Result<(), TransportError> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            delivery = subscriber.next_delivery() => match delivery {
                Some(delivery) => handler.process(delivery).await,
                None => {
                    warn!(connectivity_id = %handler.connectivity_id, "Inbound queue closed");
                    break;
                }
            },
        }
    }

    subscriber.close().await
}

/// Adapter binding one endpoint to an inbound/outbound queue pair.
pub struct QueueAdapter {
    connectivity_id: ConnectivityId,
    queue_info: QueueInfo,
    publisher: Arc<dyn Publisher>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<Result<(), TransportError>>>>,
    closed: AtomicBool,
}

impl QueueAdapter {
    /// Open the publisher and subscription and start consuming.
    pub async fn start(
        connectivity_id: ConnectivityId,
        queue_info: QueueInfo,
        transport: &dyn Transport,
        settings: &TransportSettings,
        dispatcher: Arc<dyn Dispatcher>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, AdapterError> {
        let publisher = transport
            .publisher(settings, &queue_info.exchange_name, &queue_info.outbound_queue_name)
            .await?;

        let subscriber = match transport
            .subscribe(settings, &queue_info.exchange_name, &queue_info.inbound_queue_name)
            .await
        {
            Ok(subscriber) => subscriber,
            Err(e) => {
                if let Err(close_err) = publisher.close().await {
                    warn!(
                        connectivity_id = %connectivity_id,
                        error = %close_err,
                        "Cannot close publisher"
                    );
                }
                return Err(e.into());
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handler = DeliveryHandler {
            connectivity_id: connectivity_id.clone(),
            dispatcher,
            publisher: publisher.clone(),
            metrics,
        };
        let task = tokio::spawn(consume(subscriber, shutdown_rx, handler));

        info!(
            connectivity_id = %connectivity_id,
            exchange = %queue_info.exchange_name,
            inbound = %queue_info.inbound_queue_name,
            outbound = %queue_info.outbound_queue_name,
            "Listening on inbound queue"
        );

        Ok(QueueAdapter {
            connectivity_id,
            queue_info,
            publisher,
            shutdown,
            task: Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Adapter for QueueAdapter {
    fn connectivity_id(&self) -> &ConnectivityId {
        &self.connectivity_id
    }

    fn queue_info(&self) -> &QueueInfo {
        &self.queue_info
    }

    async fn close(&self) -> Result<(), AdapterError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // The task may already be gone, in which case nobody listens
        let _ = self.shutdown.send(true);

        let mut failures = 0;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let released = match task.await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(join_err) => Err(join_err.to_string()),
            };
            if let Err(e) = released {
                failures += 1;
                warn!(
                    connectivity_id = %self.connectivity_id,
                    error = %e,
                    "Cannot close subscriber"
                );
            }
        }

        if let Err(e) = self.publisher.close().await {
            failures += 1;
            warn!(connectivity_id = %self.connectivity_id, error = %e, "Cannot close publisher");
        }

        if failures > 0 {
            return Err(AdapterError::Close {
                connectivity_id: self.connectivity_id.clone(),
                failures,
            });
        }
        Ok(())
    }
}

/// Builds [`QueueAdapter`]s from endpoint configuration.
pub struct QueueAdapterFactory {
    endpoints: EndpointsConfig,
    transport: Arc<dyn Transport>,
    settings: TransportSettings,
    discovery: Arc<dyn QueueDiscovery>,
    dispatcher: Arc<dyn Dispatcher>,
    metrics: Arc<MetricsRegistry>,
}

impl QueueAdapterFactory {
    pub fn new(
        endpoints: EndpointsConfig,
        transport: Arc<dyn Transport>,
        settings: TransportSettings,
        discovery: Arc<dyn QueueDiscovery>,
        dispatcher: Arc<dyn Dispatcher>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        QueueAdapterFactory {
            endpoints,
            transport,
            settings,
            discovery,
            dispatcher,
            metrics,
        }
    }
}

#[async_trait]
impl AdapterFactory for QueueAdapterFactory {
    async fn construct(
        &self,
        connectivity_id: &ConnectivityId,
    ) -> Result<Arc<dyn Adapter>, AdapterError> {
        let endpoint = self.endpoints.settings_for(connectivity_id);
        let queue_info =
            resolve_queue_info(connectivity_id, &endpoint, self.discovery.as_ref()).await?;

        let adapter = QueueAdapter::start(
            connectivity_id.clone(),
            queue_info,
            self.transport.as_ref(),
            &self.settings,
            self.dispatcher.clone(),
            self.metrics.clone(),
        )
        .await?;

        Ok(Arc::new(adapter))
    }
}
