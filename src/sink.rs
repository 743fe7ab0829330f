use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ProducerConfig;
use crate::encoder::{encoder_for, Encoder, EncoderBridge};
use crate::event::Event;
use crate::producer::{KafkaProducerFactory, OutboundMessage, Producer, ProducerFactory};
use crate::{Error, Result};

/// Upstream output-filter predicate. Events it rejects are dropped silently;
/// the decision belongs to the host pipeline, not the sink.
pub type OutputFilter = Box<dyn Fn(&Value) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Unregistered,
    Registered,
    Draining,
    Closed,
}

/// Adapts pipeline events into messages published to a Kafka topic.
///
/// Lifecycle is `register` → `receive`* → `teardown`. Exactly one producer
/// handle exists per sink instance, owned here and closed exactly once.
pub struct KafkaSink {
    config: ProducerConfig,
    factory: Box<dyn ProducerFactory>,
    encoder: Option<Box<dyn Encoder>>,
    filter: OutputFilter,
    state: SinkState,
    producer: Option<Arc<dyn Producer>>,
    bridge: Option<EncoderBridge>,
    dispatcher: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl KafkaSink {
    /// A sink backed by the real Kafka client.
    pub fn new(config: ProducerConfig) -> Self {
        Self::with_factory(config, Box::new(KafkaProducerFactory))
    }

    /// A sink with an injected producer factory.
    pub fn with_factory(config: ProducerConfig, factory: Box<dyn ProducerFactory>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            factory,
            encoder: None,
            filter: Box::new(|_| true),
            state: SinkState::Unregistered,
            producer: None,
            bridge: None,
            dispatcher: None,
            shutdown_tx,
        }
    }

    /// Override the encoder resolved from the configured value serializer.
    pub fn encoder(mut self, encoder: Box<dyn Encoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn filter(mut self, filter: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    /// Validate the configuration, open the producer handle and start the
    /// dispatch loop. Any failure here is fatal to the sink instance and
    /// propagates to the caller.
    pub async fn register(&mut self) -> Result<()> {
        if self.state != SinkState::Unregistered {
            return Err(Error::Config(format!(
                "register called in state {:?}",
                self.state
            )));
        }
        self.config.validate()?;

        let encoder = match self.encoder.take() {
            Some(encoder) => encoder,
            None => encoder_for(&self.config.value_serializer)?,
        };

        let producer = self
            .factory
            .open(&self.config, self.shutdown_tx.subscribe())
            .await?;

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        self.bridge = Some(EncoderBridge::new(encoder, tx));
        self.dispatcher = Some(tokio::spawn(dispatch_loop(
            rx,
            producer.clone(),
            self.config.topic.clone(),
            self.config.brokers.clone(),
        )));
        self.producer = Some(producer);
        self.state = SinkState::Registered;

        info!(
            topic = %self.config.topic,
            brokers = ?self.config.brokers,
            mode = ?self.config.dispatch_mode,
            "Kafka sink registered"
        );
        Ok(())
    }

    /// Accept one inbound event. Ordinary events are filtered then forwarded
    /// to the encoder; the distinguished shutdown marker drains the sink and
    /// stops it accepting further events. Never fails the caller.
    pub async fn receive(&mut self, event: Event) {
        if self.state != SinkState::Registered {
            debug!(state = ?self.state, "Dropping event outside accepting state");
            return;
        }

        match event {
            Event::Shutdown => {
                info!(topic = %self.config.topic, "Shutdown event received, draining");
                if let Some(bridge) = self.bridge.take() {
                    match bridge.flush().await {
                        Ok(()) | Err(Error::Shutdown) => {}
                        Err(e) => warn!(error = %e, "Failed to flush encoder"),
                    }
                }
                // Dropping the bridge closed the channel; the dispatch loop
                // drains what is queued and stops.
                self.state = SinkState::Draining;
            }
            Event::Record(value) => {
                if !(self.filter)(&value) {
                    return;
                }
                if let Some(bridge) = &self.bridge {
                    match bridge.encode(&value).await {
                        Ok(()) => {}
                        Err(Error::Shutdown) => {
                            debug!("Dispatch loop already stopped, event dropped");
                        }
                        Err(e) => warn!(error = %e, "Failed to encode event"),
                    }
                }
            }
        }
    }

    /// Close the sink. Lets the dispatch loop finish draining the payloads
    /// it has already accepted, then closes the producer handle. In-flight
    /// sends are cancelled cooperatively only if the drain outlives the
    /// grace period. Idempotent: calling it twice is a no-op the second time.
    pub async fn teardown(&mut self) -> Result<()> {
        if self.state == SinkState::Closed {
            return Ok(());
        }

        self.bridge = None;

        if let Some(mut handle) = self.dispatcher.take() {
            // The channel is closed now, so the dispatch loop stops once it
            // has drained what was already accepted, each send bounded by
            // the request timeout.
            let grace = Duration::from_millis(self.config.request_timeout_ms);
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(joined) => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Dispatch task failed");
                    }
                }
                Err(_) => {
                    warn!(
                        grace_ms = self.config.request_timeout_ms,
                        "Drain grace period elapsed, cancelling in-flight sends"
                    );
                    let _ = self.shutdown_tx.send(true);
                    if let Err(e) = handle.await {
                        warn!(error = %e, "Dispatch task failed");
                    }
                }
            }
        }
        if let Some(producer) = self.producer.take() {
            producer.close().await?;
        }

        self.state = SinkState::Closed;
        info!(topic = %self.config.topic, "Kafka sink closed");
        Ok(())
    }
}

/// Consume payloads in delivery order and publish them, containing
/// per-message failures so one failed send never stops the next.
async fn dispatch_loop(
    mut rx: mpsc::Receiver<Vec<u8>>,
    producer: Arc<dyn Producer>,
    topic: String,
    brokers: Vec<String>,
) {
    while let Some(payload) = rx.recv().await {
        let message = OutboundMessage::new(topic.clone(), payload);
        match producer.publish(message).await {
            Ok(()) => {}
            Err(Error::Shutdown) => {
                info!(topic = %topic, "Send interrupted by shutdown");
            }
            Err(e) => {
                warn!(
                    topic = %topic,
                    brokers = ?brokers,
                    error = %e,
                    "Failed to publish message, continuing"
                );
            }
        }
    }
}
