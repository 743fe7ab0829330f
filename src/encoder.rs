use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::{Error, Result};

/// A pluggable encoding strategy.
///
/// `encode` may return zero payloads (the encoder is buffering) or several (a
/// buffered batch was released); each returned payload is exactly one logical
/// record on the wire. `flush` releases anything still buffered at drain time.
pub trait Encoder: Send + Sync {
    fn encode(&self, event: &Value) -> Result<Vec<Vec<u8>>>;

    fn flush(&self) -> Result<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }
}

/// Emits string events verbatim and any other JSON value in compact form.
pub struct StringEncoder;

impl Encoder for StringEncoder {
    fn encode(&self, event: &Value) -> Result<Vec<Vec<u8>>> {
        let payload = match event {
            Value::String(s) => s.clone().into_bytes(),
            other => serde_json::to_vec(other)?,
        };
        Ok(vec![payload])
    }
}

/// Always emits the compact JSON encoding of the event.
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, event: &Value) -> Result<Vec<Vec<u8>>> {
        Ok(vec![serde_json::to_vec(event)?])
    }
}

/// Buffers payloads from an inner encoder and releases them `capacity` at a
/// time, so payload delivery is decoupled from event arrival.
pub struct BatchEncoder {
    inner: Box<dyn Encoder>,
    capacity: usize,
    buffer: Mutex<Vec<Vec<u8>>>,
}

impl BatchEncoder {
    pub fn new(inner: Box<dyn Encoder>, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            buffer: Mutex::new(Vec::new()),
        }
    }
}

impl Encoder for BatchEncoder {
    fn encode(&self, event: &Value) -> Result<Vec<Vec<u8>>> {
        let payloads = self.inner.encode(event)?;
        let mut buffer = self.buffer.lock().expect("batch buffer poisoned");
        buffer.extend(payloads);
        if buffer.len() >= self.capacity {
            Ok(std::mem::take(&mut *buffer))
        } else {
            Ok(Vec::new())
        }
    }

    fn flush(&self) -> Result<Vec<Vec<u8>>> {
        let mut released = {
            let mut buffer = self.buffer.lock().expect("batch buffer poisoned");
            std::mem::take(&mut *buffer)
        };
        released.extend(self.inner.flush()?);
        Ok(released)
    }
}

/// Resolve a serializer identifier from the configuration to an encoder.
pub fn encoder_for(id: &str) -> Result<Box<dyn Encoder>> {
    match id {
        "string" => Ok(Box::new(StringEncoder)),
        "json" => Ok(Box::new(JsonEncoder)),
        other => Err(Error::Config(format!("unknown serializer '{other}'"))),
    }
}

/// Connects an encoder to the dispatch loop through a bounded channel.
///
/// Payloads are delivered to the consuming side in the order the encoder
/// releases them; dropping the bridge closes the channel, which lets the
/// dispatch loop drain and stop.
pub struct EncoderBridge {
    encoder: Box<dyn Encoder>,
    tx: mpsc::Sender<Vec<u8>>,
}

impl EncoderBridge {
    pub fn new(encoder: Box<dyn Encoder>, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { encoder, tx }
    }

    pub async fn encode(&self, event: &Value) -> Result<()> {
        let payloads = self.encoder.encode(event)?;
        self.forward(payloads).await
    }

    pub async fn flush(&self) -> Result<()> {
        let payloads = self.encoder.flush()?;
        self.forward(payloads).await
    }

    async fn forward(&self, payloads: Vec<Vec<u8>>) -> Result<()> {
        for payload in payloads {
            if self.tx.send(payload).await.is_err() {
                // Receiver gone: the dispatch loop already stopped.
                return Err(Error::Shutdown);
            }
        }
        Ok(())
    }
}
