use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::warn;

use crate::config::{DispatchMode, ProducerConfig};
use crate::{Error, Result};

/// How often a blocked async enqueue re-checks the send queue.
const ENQUEUE_POLL_MS: u64 = 10;

/// A transient outbound unit: destination topic, optional key, payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload,
        }
    }
}

/// The publish capability the dispatch loop depends on.
///
/// Implementations must tolerate concurrent `publish` calls; `close` must be
/// safe to call once, and `publish` after `close` must fail with
/// [`Error::ClosedHandle`] rather than silently drop data.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn publish(&self, message: OutboundMessage) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Opens producer handles. Injected into the sink so tests can substitute a
/// fake producer.
#[async_trait]
pub trait ProducerFactory: Send + Sync {
    async fn open(
        &self,
        config: &ProducerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<dyn Producer>>;
}

/// A producer handle backed by the rdkafka client.
pub struct KafkaProducer {
    producer: FutureProducer,
    mode: DispatchMode,
    request_timeout: Duration,
    enqueue_timeout_ms: i64,
    shutdown: watch::Receiver<bool>,
    closed: AtomicBool,
}

impl KafkaProducer {
    /// Build the underlying client from the full option set. Construction
    /// failures are fatal [`Error::Connection`] errors.
    pub fn open(config: &ProducerConfig, shutdown: watch::Receiver<bool>) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.brokers.join(","))
            .set(
                "request.required.acks",
                i64::from(config.required_acks).to_string(),
            )
            .set(
                "compression.codec",
                config.compression_for(&config.topic).as_str(),
            )
            .set("request.timeout.ms", config.request_timeout_ms.to_string())
            .set("message.send.max.retries", config.max_retries.to_string())
            .set("retry.backoff.ms", config.retry_backoff_ms.to_string())
            // librdkafka only accepts -1 as the only-on-failure sentinel;
            // the config allows any negative value with the same meaning.
            .set(
                "topic.metadata.refresh.interval.ms",
                config.metadata_refresh_interval_ms.max(-1).to_string(),
            )
            .set("queue.buffering.max.ms", config.buffering_max_ms.to_string())
            .set(
                "queue.buffering.max.messages",
                config.queue_capacity.to_string(),
            )
            .set("batch.num.messages", config.batch_size.to_string())
            .set(
                "socket.send.buffer.bytes",
                config.send_buffer_bytes.to_string(),
            )
            .set("client.id", config.client_id.clone());
        if !config.partitioner.is_empty() {
            client_config.set("partitioner", config.partitioner.clone());
        }

        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Self {
            producer,
            mode: config.dispatch_mode,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            enqueue_timeout_ms: config.enqueue_timeout_ms,
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    fn record_for<'a>(message: &'a OutboundMessage) -> FutureRecord<'a, String, Vec<u8>> {
        let mut record = FutureRecord::to(&message.topic).payload(&message.payload);
        if let Some(key) = &message.key {
            record = record.key(key);
        }
        record
    }

    /// Block until the broker client accepts or rejects the send, racing the
    /// cooperative shutdown signal.
    async fn publish_sync(&self, message: &OutboundMessage) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            result = self.producer.send(
                Self::record_for(message),
                Timeout::After(self.request_timeout),
            ) => {
                result.map(|_| ()).map_err(|(e, _)| Error::Kafka(e))
            }
            _ = shutdown.wait_for(|stop| *stop) => Err(Error::Shutdown),
        }
    }

    /// Enqueue and return immediately, subject to the enqueue timeout policy:
    /// -1 blocks indefinitely, 0 fails at once on a full queue, a positive
    /// value blocks up to that bound.
    async fn publish_async(&self, message: &OutboundMessage) -> Result<()> {
        let deadline = if self.enqueue_timeout_ms > 0 {
            Some(Instant::now() + Duration::from_millis(self.enqueue_timeout_ms as u64))
        } else {
            None
        };
        let mut shutdown = self.shutdown.clone();

        loop {
            match self.producer.send_result(Self::record_for(message)) {
                Ok(delivery) => {
                    let topic = message.topic.clone();
                    // Delivery resolves in the background; failures are
                    // observed here so they are not lost.
                    tokio::spawn(async move {
                        match delivery.await {
                            Ok(Ok(_)) => {}
                            Ok(Err((e, _))) => {
                                warn!(topic = %topic, error = %e, "Background delivery failed");
                            }
                            Err(_) => {}
                        }
                    });
                    return Ok(());
                }
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), _)) => {
                    let give_up = match self.enqueue_timeout_ms {
                        0 => true,
                        t if t > 0 => Instant::now() >= deadline.unwrap_or_else(Instant::now),
                        _ => false,
                    };
                    if give_up {
                        return Err(Error::QueueFull {
                            topic: message.topic.clone(),
                        });
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(ENQUEUE_POLL_MS)) => {}
                        _ = shutdown.wait_for(|stop| *stop) => return Err(Error::Shutdown),
                    }
                }
                Err((e, _)) => return Err(Error::Kafka(e)),
            }
        }
    }
}

#[async_trait]
impl Producer for KafkaProducer {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ClosedHandle);
        }
        match self.mode {
            DispatchMode::Sync => self.publish_sync(&message).await,
            DispatchMode::Async => self.publish_async(&message).await,
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let producer = self.producer.clone();
        let timeout = self.request_timeout;
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| Error::Connection(format!("flush task failed: {e}")))?
            .map_err(Error::Kafka)
    }
}

/// The default factory, producing [`KafkaProducer`] handles.
pub struct KafkaProducerFactory;

#[async_trait]
impl ProducerFactory for KafkaProducerFactory {
    async fn open(
        &self,
        config: &ProducerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<dyn Producer>> {
        Ok(Arc::new(KafkaProducer::open(config, shutdown)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProducerConfig;

    /// An async-mode config whose broker list points at a port that never
    /// hosts a broker, so nothing drains the client's local send queue.
    fn undrained_async_config(enqueue_timeout_ms: i64) -> ProducerConfig {
        let mut config = ProducerConfig::new("orders");
        config.brokers = vec!["localhost:1".to_string()];
        config.dispatch_mode = DispatchMode::Async;
        config.queue_capacity = 1;
        config.enqueue_timeout_ms = enqueue_timeout_ms;
        config
    }

    #[tokio::test]
    async fn test_async_enqueue_drops_immediately_when_queue_full() {
        let config = undrained_async_config(0);
        let (_tx, rx) = watch::channel(false);
        let producer = KafkaProducer::open(&config, rx).unwrap();

        producer
            .publish(OutboundMessage::new("orders", b"first".to_vec()))
            .await
            .unwrap();

        let start = Instant::now();
        let second = producer
            .publish(OutboundMessage::new("orders", b"second".to_vec()))
            .await;
        assert!(matches!(second, Err(Error::QueueFull { .. })));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_async_enqueue_blocks_up_to_deadline_then_drops() {
        let config = undrained_async_config(120);
        let (_tx, rx) = watch::channel(false);
        let producer = KafkaProducer::open(&config, rx).unwrap();

        producer
            .publish(OutboundMessage::new("orders", b"first".to_vec()))
            .await
            .unwrap();

        let start = Instant::now();
        let second = producer
            .publish(OutboundMessage::new("orders", b"second".to_vec()))
            .await;
        assert!(matches!(second, Err(Error::QueueFull { .. })));

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_async_enqueue_blocking_indefinitely_yields_to_shutdown() {
        let config = undrained_async_config(-1);
        let (tx, rx) = watch::channel(false);
        let producer = Arc::new(KafkaProducer::open(&config, rx).unwrap());

        producer
            .publish(OutboundMessage::new("orders", b"first".to_vec()))
            .await
            .unwrap();

        let blocked = producer.clone();
        let handle = tokio::spawn(async move {
            blocked
                .publish(OutboundMessage::new("orders", b"second".to_vec()))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        tx.send(true).unwrap();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(Error::Shutdown)));
    }

    #[tokio::test]
    async fn test_negative_metadata_refresh_builds_producer() {
        // Any negative value means only-on-failure; the client accepts it.
        let mut config = ProducerConfig::new("orders");
        config.metadata_refresh_interval_ms = -600_000;
        let (_tx, rx) = watch::channel(false);
        assert!(KafkaProducer::open(&config, rx).is_ok());
    }

    #[tokio::test]
    async fn test_producer_creation() {
        // Creating the client does not contact the broker.
        let config = ProducerConfig::new("orders");
        let (_tx, rx) = watch::channel(false);
        assert!(KafkaProducer::open(&config, rx).is_ok());
    }

    #[tokio::test]
    async fn test_publish_after_close_fails_loudly() {
        let config = ProducerConfig::new("orders");
        let (_tx, rx) = watch::channel(false);
        let producer = KafkaProducer::open(&config, rx).unwrap();

        producer.close().await.unwrap();
        let result = producer
            .publish(OutboundMessage::new("orders", b"x".to_vec()))
            .await;
        assert!(matches!(result, Err(Error::ClosedHandle)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let config = ProducerConfig::new("orders");
        let (_tx, rx) = watch::channel(false);
        let producer = KafkaProducer::open(&config, rx).unwrap();

        producer.close().await.unwrap();
        producer.close().await.unwrap();
    }
}
