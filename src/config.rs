use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Error, Result};

/// Top-level configuration, loadable from a file with environment overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub producer: ProducerConfig,
}

/// The full producer option set, validated once and never mutated after the
/// producer handle is built.
///
/// Every field is handed to the broker client verbatim; optional fields left
/// at their "unset" sentinel let the client apply its own default.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerConfig {
    /// Ordered host:port bootstrap addresses.
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
    /// Destination topic. Required, must be non-empty.
    pub topic: String,
    #[serde(default)]
    pub required_acks: RequiredAcks,
    #[serde(default)]
    pub compression: Compression,
    /// Comma-separated topics the codec applies to; empty means all topics.
    #[serde(default)]
    pub compressed_topics: String,
    /// Wire-encoding identifier for message values.
    #[serde(default = "default_value_serializer")]
    pub value_serializer: String,
    /// Wire-encoding identifier for message keys; falls back to the value
    /// serializer when unset.
    #[serde(default)]
    pub key_serializer: Option<String>,
    #[serde(default = "default_partitioner")]
    pub partitioner: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub dispatch_mode: DispatchMode,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Negative = refresh only on failure, 0 = refresh after every message,
    /// positive = periodic refresh.
    #[serde(default = "default_metadata_refresh_interval_ms")]
    pub metadata_refresh_interval_ms: i64,
    #[serde(default = "default_buffering_max_ms")]
    pub buffering_max_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// -1 = block indefinitely when the queue is full, 0 = drop immediately,
    /// positive = block up to this many milliseconds.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_send_buffer_bytes")]
    pub send_buffer_bytes: usize,
    #[serde(default)]
    pub client_id: String,
}

/// How many broker replicas must confirm a write: 0 = none, 1 = leader only,
/// -1 = all in-sync replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum RequiredAcks {
    #[default]
    None,
    Leader,
    All,
}

impl TryFrom<i64> for RequiredAcks {
    type Error = String;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(RequiredAcks::None),
            1 => Ok(RequiredAcks::Leader),
            -1 => Ok(RequiredAcks::All),
            other => Err(format!("invalid required_acks {other}, expected -1, 0 or 1")),
        }
    }
}

impl From<RequiredAcks> for i64 {
    fn from(acks: RequiredAcks) -> i64 {
        match acks {
            RequiredAcks::None => 0,
            RequiredAcks::Leader => 1,
            RequiredAcks::All => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Snappy,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Snappy => "snappy",
        }
    }
}

/// Whether sends block until acknowledged (sync) or are queued for
/// background delivery (async).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Sync,
    Async,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("KAFKA_SINK")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.producer.validate()?;
        Ok(config)
    }
}

impl ProducerConfig {
    /// A config for `topic` with every other option at its default.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            brokers: default_brokers(),
            topic: topic.into(),
            required_acks: RequiredAcks::default(),
            compression: Compression::default(),
            compressed_topics: String::new(),
            value_serializer: default_value_serializer(),
            key_serializer: None,
            partitioner: default_partitioner(),
            request_timeout_ms: default_request_timeout_ms(),
            dispatch_mode: DispatchMode::default(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            metadata_refresh_interval_ms: default_metadata_refresh_interval_ms(),
            buffering_max_ms: default_buffering_max_ms(),
            queue_capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            batch_size: default_batch_size(),
            send_buffer_bytes: default_send_buffer_bytes(),
            client_id: String::new(),
        }
    }

    /// Check option invariants. Pure data assembly, no network access.
    pub fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(Error::Config("topic must not be empty".to_string()));
        }
        if self.brokers.is_empty() {
            return Err(Error::Config("brokers must not be empty".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config(
                "queue_capacity must be positive".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }
        if self.enqueue_timeout_ms < -1 {
            return Err(Error::Config(format!(
                "enqueue_timeout_ms must be >= -1, got {}",
                self.enqueue_timeout_ms
            )));
        }
        Ok(())
    }

    /// The serializer identifier used for message keys, with the documented
    /// fallback to the value serializer.
    pub fn key_serializer(&self) -> &str {
        self.key_serializer
            .as_deref()
            .unwrap_or(&self.value_serializer)
    }

    /// The compression codec effective for `topic`, honoring the
    /// compressed-topics filter.
    pub fn compression_for(&self, topic: &str) -> Compression {
        if self.compressed_topics.is_empty() {
            return self.compression;
        }
        let listed = self
            .compressed_topics
            .split(',')
            .any(|t| t.trim() == topic);
        if listed {
            self.compression
        } else {
            Compression::None
        }
    }
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_value_serializer() -> String {
    "string".to_string()
}

fn default_partitioner() -> String {
    "consistent_random".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_metadata_refresh_interval_ms() -> i64 {
    600_000
}

fn default_buffering_max_ms() -> u64 {
    5_000
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_enqueue_timeout_ms() -> i64 {
    -1
}

fn default_batch_size() -> usize {
    200
}

fn default_send_buffer_bytes() -> usize {
    102_400
}
