use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{Delivery, Publisher, Subscriber, Transport, TransportError, TransportSettings};

/// A single in-process queue. At most one consumer holds the receiver.
struct Queue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Queue {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

/// In-process broker keyed by (exchange, queue).
///
/// Queues are created on first use by either side, so a publisher may run
/// ahead of its consumer.
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<AHashMap<(String, String), Arc<Queue>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        MemoryBroker::default()
    }

    fn queue(&self, exchange: &str, queue: &str) -> Arc<Queue> {
        let mut queues = self.queues.lock();
        queues
            .entry((exchange.to_string(), queue.to_string()))
            .or_insert_with(|| Arc::new(Queue::new()))
            .clone()
    }

    /// Put a raw payload on a queue, bypassing any publisher.
    pub fn inject(
        &self,
        exchange: &str,
        queue: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.queue(exchange, queue)
            .tx
            .send(payload)
            .map_err(|_| TransportError::Closed)
    }

    /// Number of queues created so far.
    pub fn queue_count(&self) -> usize {
        self.queues.lock().len()
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn subscribe(
        &self,
        settings: &TransportSettings,
        exchange: &str,
        queue: &str,
    ) -> Result<Box<dyn Subscriber>, TransportError> {
        let q = self.queue(exchange, queue);
        let rx = q.rx.lock().take().ok_or_else(|| TransportError::ConsumerBusy {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
        })?;

        let tag = format!("mem-{}", Uuid::new_v4().simple());
        debug!(
            host = %settings.host,
            vhost = %settings.virtual_host,
            exchange = exchange,
            queue = queue,
            consumer_tag = %tag,
            "Subscribed to in-memory queue"
        );

        Ok(Box::new(MemorySubscriber {
            queue: q,
            rx: Some(rx),
            tag,
        }))
    }

    async fn publisher(
        &self,
        _settings: &TransportSettings,
        exchange: &str,
        queue: &str,
    ) -> Result<Arc<dyn Publisher>, TransportError> {
        Ok(Arc::new(MemoryPublisher {
            queue: self.queue(exchange, queue),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemorySubscriber {
    queue: Arc<Queue>,
    rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    tag: String,
}

#[async_trait]
impl Subscriber for MemorySubscriber {
    async fn next_delivery(&mut self) -> Option<Delivery> {
        let rx = self.rx.as_mut()?;
        let body = rx.recv().await?;
        Some(Delivery {
            consumer_tag: self.tag.clone(),
            body,
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Hand the receiver back so the queue can be consumed again.
        let rx = self.rx.take().ok_or(TransportError::Closed)?;
        *self.queue.rx.lock() = Some(rx);
        Ok(())
    }
}

struct MemoryPublisher {
    queue: Arc<Queue>,
    closed: AtomicBool,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.queue
            .tx
            .send(payload)
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}
