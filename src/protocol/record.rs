//! Records exchanged with the broker

use bytes::Bytes;

/// MQTT v5 user property that carries a record key
pub const RECORD_KEY_PROPERTY: &str = "key";

/// One record received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub topic: String,
    pub key: Option<Bytes>,
    pub value: Bytes,
}

impl InboundRecord {
    pub fn new(topic: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: value.into(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Key decoded as UTF-8, or `None` if it is absent or not valid text
    pub fn key_str(&self) -> Option<&str> {
        self.key
            .as_ref()
            .and_then(|key| std::str::from_utf8(key).ok())
    }
}
