//! Error types and result handling for kafka-sink.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use kafka_sink::{Error, Result};
//!
//! fn open_producer() -> Result<()> {
//!     // Simulating a connection error
//!     Err(Error::Connection("Failed to connect".to_string()))
//! }
//!
//! match open_producer() {
//!     Ok(()) => println!("Connected"),
//!     Err(Error::Connection(msg)) => eprintln!("Connection error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for kafka-sink operations.
///
/// Fatal variants ([`Error::Config`], [`Error::Connection`]) surface during
/// registration, before any event is accepted. Per-message variants
/// ([`Error::Kafka`], [`Error::QueueFull`], [`Error::Serialization`]) are
/// contained by the dispatch loop: logged and suppressed so a single failed
/// send never stops subsequent sends.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing producer option, raised before any connection attempt.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Producer construction or connect failure during registration.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Kafka client or producer error on a single send.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Async enqueue rejected because the send queue is full and the
    /// configured enqueue timeout forbids blocking any longer.
    #[error("Send queue full for topic '{topic}'")]
    QueueFull {
        /// Topic the rejected message was addressed to
        topic: String,
    },

    /// Publish attempted on a producer handle that was already closed.
    ///
    /// This is a programming error in the caller and fails loudly rather
    /// than silently dropping data.
    #[error("Producer handle is closed")]
    ClosedHandle,

    /// JSON serialization error when encoding an event.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cooperative shutdown was signalled while a send was in flight.
    ///
    /// This is not really an error but uses the error mechanism so the
    /// dispatch loop can branch on it and treat it as a clean stop.
    #[error("Shutdown requested")]
    Shutdown,
}

/// A convenient Result type alias for kafka-sink operations.
///
/// This is equivalent to `std::result::Result<T, kafka_sink::Error>`.
///
/// # Example
///
/// ```rust
/// use kafka_sink::Result;
///
/// fn do_something() -> Result<String> {
///     Ok("Success".to_string())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;
