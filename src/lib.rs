pub mod config;
pub mod encoder;
pub mod error;
pub mod event;
pub mod producer;
pub mod sink;

pub use config::{Config, ProducerConfig};
pub use error::{Error, Result};
pub use event::Event;
pub use sink::KafkaSink;
