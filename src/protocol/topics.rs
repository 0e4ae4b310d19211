//! Topic and group identifier validation
//!
//! Topics are plain broker topic names. The agent never subscribes with
//! wildcards, so `+` and `#` are rejected up front rather than letting a
//! control command widen the subscription set by accident.

use thiserror::Error;

/// Control topic used when the configuration does not name one
pub const DEFAULT_CONTROL_TOPIC: &str = "status";

/// Maximum encoded topic length accepted by MQTT
pub const MAX_TOPIC_LEN: usize = 65_535;

pub fn validate_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }

    if topic.len() > MAX_TOPIC_LEN {
        return Err(ValidationError::TopicTooLong(topic.len()));
    }

    if let Some(ch) = topic.chars().find(|c| matches!(c, '+' | '#' | '\0')) {
        return Err(ValidationError::InvalidTopicChar(ch));
    }

    Ok(())
}

pub fn validate_group_id(group_id: &str) -> Result<(), ValidationError> {
    if group_id.is_empty() {
        return Err(ValidationError::EmptyGroupId);
    }

    for ch in group_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidGroupIdChar(ch));
        }
    }

    Ok(())
}

/// Broker subscription filter for a topic.
///
/// With shared subscriptions enabled every instance started with the same
/// group id shares one MQTT v5 subscription group, which is how a consumer
/// group behaves.
pub fn subscription_filter(group_id: &str, topic: &str, shared: bool) -> String {
    if shared {
        format!("$share/{group_id}/{topic}")
    } else {
        topic.to_string()
    }
}

/// Validation errors for topics and agent identity
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Topic cannot be empty")]
    EmptyTopic,
    #[error("Topic is {0} bytes long, maximum is 65535")]
    TopicTooLong(usize),
    #[error("Topic contains invalid character: {0:?}")]
    InvalidTopicChar(char),
    #[error("Group ID cannot be empty")]
    EmptyGroupId,
    #[error("Group ID contains invalid character: '{0}'")]
    InvalidGroupIdChar(char),
}
