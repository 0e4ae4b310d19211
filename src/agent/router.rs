//! Inbound record classification
//!
//! A record on the control topic is only for this device when its key
//! equals the device's group id; a shared control topic is multiplexed
//! across many devices that way.

use crate::protocol::InboundRecord;

/// Where an inbound record goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Control record addressed to this device
    Control,
    /// Record on any other topic
    Data,
    /// Control record for someone else, or unaddressed
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    MissingKey,
    KeyNotUtf8,
    AddressedElsewhere(String),
}

/// Pure routing decisions for inbound records
#[derive(Debug, Clone)]
pub struct MessageRouter {
    control_topic: String,
    group_id: String,
}

impl MessageRouter {
    pub fn new(control_topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            control_topic: control_topic.into(),
            group_id: group_id.into(),
        }
    }

    pub fn route(&self, record: &InboundRecord) -> Route {
        if record.topic != self.control_topic {
            return Route::Data;
        }

        let Some(key) = record.key.as_ref() else {
            return Route::Ignored(IgnoreReason::MissingKey);
        };

        match std::str::from_utf8(key) {
            Ok(key) if key == self.group_id => Route::Control,
            Ok(key) => Route::Ignored(IgnoreReason::AddressedElsewhere(key.to_string())),
            Err(_) => Route::Ignored(IgnoreReason::KeyNotUtf8),
        }
    }
}
