//! Transport boundary: queue subscription and publishing.
//!
//! The simulator only depends on these traits. [`AmqpTransport`] talks to a
//! real broker; [`MemoryBroker`] keeps everything in-process for tests and
//! local demos.

pub mod amqp;
pub mod memory;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use amqp::AmqpTransport;
pub use memory::MemoryBroker;

/// Errors raised by a transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("queue {queue} on exchange {exchange} already has a consumer")]
    ConsumerBusy { exchange: String, queue: String },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("channel closed")]
    Closed,
}

/// Connection parameters for the message broker.
#[derive(Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub host: String,
    pub virtual_host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportSettings {
            host: "localhost".to_string(),
            virtual_host: "/".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
        }
    }
}

impl fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSettings")
            .field("host", &self.host)
            .field("virtual_host", &self.virtual_host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One message taken off a queue.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub consumer_tag: String,
    pub body: Vec<u8>,
}

/// Live consumer on one queue.
#[async_trait]
pub trait Subscriber: Send {
    /// Wait for the next delivery. `None` means the queue is gone.
    ///
    /// Must be cancel-safe: the adapter races it against shutdown.
    async fn next_delivery(&mut self) -> Option<Delivery>;

    /// Release the subscription.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Sender bound to one outbound queue.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Factory for subscriptions and publishers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(
        &self,
        settings: &TransportSettings,
        exchange: &str,
        queue: &str,
    ) -> Result<Box<dyn Subscriber>, TransportError>;

    async fn publisher(
        &self,
        settings: &TransportSettings,
        exchange: &str,
        queue: &str,
    ) -> Result<Arc<dyn Publisher>, TransportError>;
}
