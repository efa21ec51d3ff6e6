use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Delivery, Publisher, Subscriber, Transport, TransportError, TransportSettings};

const REPLY_SUCCESS: u16 = 200;

/// Transport over an AMQP 0-9-1 broker such as RabbitMQ.
///
/// One connection is opened on first use with the settings of that call and
/// shared afterwards. Every subscription and publisher gets its own channel.
/// Exchanges, queues and bindings must already exist on the broker.
#[derive(Default)]
pub struct AmqpTransport {
    connection: OnceCell<Connection>,
}

impl AmqpTransport {
    pub fn new() -> Self {
        AmqpTransport::default()
    }

    async fn channel(&self, settings: &TransportSettings) -> Result<Channel, TransportError> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let connection =
                    Connection::connect_uri(amqp_uri(settings), ConnectionProperties::default())
                        .await
                        .map_err(|e| TransportError::Connection(e.to_string()))?;
                info!(
                    host = %settings.host,
                    port = settings.port,
                    vhost = %settings.virtual_host,
                    "Connected to broker"
                );
                Ok::<_, TransportError>(connection)
            })
            .await?;

        connection
            .create_channel()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }
}

/// Broker address and credentials as an AMQP URI.
fn amqp_uri(settings: &TransportSettings) -> AMQPUri {
    AMQPUri {
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: settings.username.clone(),
                password: settings.password.clone(),
            },
            host: settings.host.clone(),
            port: settings.port,
        },
        vhost: settings.virtual_host.clone(),
        ..Default::default()
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn subscribe(
        &self,
        settings: &TransportSettings,
        exchange: &str,
        queue: &str,
    ) -> Result<Box<dyn Subscriber>, TransportError> {
        let channel = self.channel(settings).await?;
        let tag = format!("msgsim-{}", Uuid::new_v4().simple());

        let options = BasicConsumeOptions {
            no_ack: true,
            ..Default::default()
        };
        let consumer = channel
            .basic_consume(queue, &tag, options, FieldTable::default())
            .await
            .map_err(|e| TransportError::Connection(format!("cannot consume {queue}: {e}")))?;

        debug!(
            exchange = exchange,
            queue = queue,
            consumer_tag = %tag,
            "Subscribed to broker queue"
        );

        Ok(Box::new(AmqpSubscriber {
            channel,
            consumer,
            tag,
            closed: false,
        }))
    }

    async fn publisher(
        &self,
        settings: &TransportSettings,
        exchange: &str,
        queue: &str,
    ) -> Result<Arc<dyn Publisher>, TransportError> {
        let channel = self.channel(settings).await?;
        Ok(Arc::new(AmqpPublisher {
            channel,
            exchange: exchange.to_string(),
            routing_key: queue.to_string(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct AmqpSubscriber {
    channel: Channel,
    consumer: Consumer,
    tag: String,
    closed: bool,
}

#[async_trait]
impl Subscriber for AmqpSubscriber {
    async fn next_delivery(&mut self) -> Option<Delivery> {
        match self.consumer.next().await? {
            Ok(delivery) => Some(Delivery {
                consumer_tag: self.tag.clone(),
                body: delivery.data,
            }),
            Err(e) => {
                warn!(consumer_tag = %self.tag, error = %e, "Consumer failed");
                None
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.closed = true;

        // Both steps run even if the consumer is already gone
        let cancelled = self
            .channel
            .basic_cancel(&self.tag, BasicCancelOptions::default())
            .await;
        let closed = self.channel.close(REPLY_SUCCESS, "OK").await;

        cancelled
            .and(closed)
            .map_err(|e| TransportError::Connection(e.to_string()))
    }
}

/// Publishes to one exchange with the outbound queue name as routing key.
struct AmqpPublisher {
    channel: Channel,
    exchange: String,
    routing_key: String,
    closed: AtomicBool,
}

#[async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        self.channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }
        self.channel
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }
}
