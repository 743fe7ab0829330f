use async_trait::async_trait;
use kafka_sink::config::ProducerConfig;
use kafka_sink::producer::{OutboundMessage, Producer, ProducerFactory};
use kafka_sink::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// In-memory producer standing in for the Kafka client. An optional per-send
/// delay races the shutdown watch the same way the real sync publish does.
pub struct MockProducer {
    published: Mutex<Vec<OutboundMessage>>,
    delay: Option<Duration>,
    shutdown: Mutex<Option<watch::Receiver<bool>>>,
    fail_next: AtomicBool,
    queue_full_next: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl MockProducer {
    pub fn new() -> Arc<Self> {
        Self::with_delay(None)
    }

    /// A producer that takes `delay` per publish, abandoning the send with
    /// [`Error::Shutdown`] if the watch fires first.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::with_delay(Some(delay))
    }

    fn with_delay(delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            published: Mutex::new(Vec::new()),
            delay,
            shutdown: Mutex::new(None),
            fail_next: AtomicBool::new(false),
            queue_full_next: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        })
    }

    fn attach_shutdown(&self, shutdown: watch::Receiver<bool>) {
        *self.shutdown.lock().unwrap() = Some(shutdown);
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Make the next publish fail with a generic error.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Make the next publish fail as if the send queue were full.
    pub fn queue_full_next(&self) {
        self.queue_full_next.store(true, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Producer for MockProducer {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ClosedHandle);
        }
        if let Some(delay) = self.delay {
            let shutdown = self.shutdown.lock().unwrap().clone();
            match shutdown {
                Some(mut shutdown) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.wait_for(|stop| *stop) => return Err(Error::Shutdown),
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
        if self.queue_full_next.swap(false, Ordering::SeqCst) {
            return Err(Error::QueueFull {
                topic: message.topic,
            });
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Connection("simulated send failure".to_string()));
        }
        self.published.lock().unwrap().push(message);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out a shared [`MockProducer`], optionally refusing to open.
pub struct MockFactory {
    producer: Arc<MockProducer>,
    fail_open: bool,
}

impl MockFactory {
    pub fn new(producer: Arc<MockProducer>) -> Self {
        Self {
            producer,
            fail_open: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            producer: MockProducer::new(),
            fail_open: true,
        }
    }
}

#[async_trait]
impl ProducerFactory for MockFactory {
    async fn open(
        &self,
        _config: &ProducerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<dyn Producer>> {
        if self.fail_open {
            return Err(Error::Connection("connection refused".to_string()));
        }
        self.producer.attach_shutdown(shutdown);
        Ok(self.producer.clone())
    }
}
