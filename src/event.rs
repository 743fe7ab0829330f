use serde_json::Value;

/// An inbound pipeline unit.
///
/// The sink treats the payload as opaque; the only value it interprets is the
/// distinguished [`Event::Shutdown`] marker, which drains the adapter instead
/// of being published.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Record(Value),
    Shutdown,
}

impl Event {
    pub fn record(value: Value) -> Self {
        Event::Record(value)
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, Event::Shutdown)
    }
}

impl From<Value> for Event {
    fn from(value: Value) -> Self {
        Event::Record(value)
    }
}
