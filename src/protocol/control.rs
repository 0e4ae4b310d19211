//! Control message codec
//!
//! A control record value is the text `ACTION_TOPIC`. Decoding splits on the
//! first underscore only. Action tokens never contain an underscore, so any
//! further underscores belong to the topic (`SUBSCRIBE_cam_front` targets
//! `cam_front`) and every message produced by [`ControlMessage::encode`]
//! decodes back to itself.

use crate::error::{AgentError, AgentResult};
use crate::protocol::topics::validate_topic;
use std::fmt;
use std::str::FromStr;

/// Separator between the action token and the target topic
pub const CONTROL_SEPARATOR: char = '_';

/// Actions an agent accepts on the control topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    Subscribe,
    Publish,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Subscribe => "SUBSCRIBE",
            ControlAction::Publish => "PUBLISH",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlAction {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBSCRIBE" => Ok(ControlAction::Subscribe),
            "PUBLISH" => Ok(ControlAction::Publish),
            other => Err(AgentError::unknown_control_action(other)),
        }
    }
}

/// Decoded control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub action: ControlAction,
    pub topic: String,
}

impl ControlMessage {
    pub fn new(action: ControlAction, topic: impl Into<String>) -> Self {
        Self {
            action,
            topic: topic.into(),
        }
    }

    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self::new(ControlAction::Subscribe, topic)
    }

    pub fn publish(topic: impl Into<String>) -> Self {
        Self::new(ControlAction::Publish, topic)
    }

    /// Decode a raw control record value
    pub fn decode(value: &[u8]) -> AgentResult<Self> {
        let text = std::str::from_utf8(value)
            .map_err(|e| AgentError::malformed_control(format!("value is not UTF-8: {e}")))?;

        let (action, topic) = text.split_once(CONTROL_SEPARATOR).ok_or_else(|| {
            AgentError::malformed_control(format!("no '{CONTROL_SEPARATOR}' separator in {text:?}"))
        })?;

        if action.is_empty() {
            return Err(AgentError::malformed_control("empty action"));
        }
        if topic.is_empty() {
            return Err(AgentError::malformed_control("empty target topic"));
        }

        let action = action.parse::<ControlAction>()?;
        validate_topic(topic).map_err(|source| AgentError::InvalidTopic {
            topic: topic.to_string(),
            source,
        })?;

        Ok(Self::new(action, topic))
    }

    /// Encode to the wire form `ACTION_TOPIC`
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.action, CONTROL_SEPARATOR, self.topic)
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_subscribe() {
        let msg = ControlMessage::decode(b"SUBSCRIBE_topicA").unwrap();
        assert_eq!(msg, ControlMessage::subscribe("topicA"));
    }

    #[test]
    fn test_decode_publish() {
        let msg = ControlMessage::decode(b"PUBLISH_data0").unwrap();
        assert_eq!(msg.action, ControlAction::Publish);
        assert_eq!(msg.topic, "data0");
    }

    #[test]
    fn test_decode_splits_on_first_separator() {
        let msg = ControlMessage::decode(b"SUBSCRIBE_cam_front_left").unwrap();
        assert_eq!(msg.topic, "cam_front_left");
    }

    #[test]
    fn test_decode_without_separator_is_malformed() {
        let err = ControlMessage::decode(b"SUBSCRIBE").unwrap_err();
        assert!(matches!(err, AgentError::MalformedControlMessage { .. }));
    }

    #[test]
    fn test_decode_empty_parts_are_malformed() {
        assert!(matches!(
            ControlMessage::decode(b"_data0").unwrap_err(),
            AgentError::MalformedControlMessage { .. }
        ));
        assert!(matches!(
            ControlMessage::decode(b"PUBLISH_").unwrap_err(),
            AgentError::MalformedControlMessage { .. }
        ));
        assert!(matches!(
            ControlMessage::decode(b"").unwrap_err(),
            AgentError::MalformedControlMessage { .. }
        ));
    }

    #[test]
    fn test_decode_unknown_action() {
        let err = ControlMessage::decode(b"DELETE_data0").unwrap_err();
        match err {
            AgentError::UnknownControlAction { action } => assert_eq!(action, "DELETE"),
            other => panic!("expected UnknownControlAction, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_is_case_sensitive() {
        assert!(matches!(
            ControlMessage::decode(b"subscribe_data0").unwrap_err(),
            AgentError::UnknownControlAction { .. }
        ));
    }

    #[test]
    fn test_decode_invalid_utf8_is_malformed() {
        let err = ControlMessage::decode(&[0xff, b'_', b'a']).unwrap_err();
        assert!(matches!(err, AgentError::MalformedControlMessage { .. }));
    }

    #[test]
    fn test_decode_wildcard_topic_rejected() {
        let err = ControlMessage::decode(b"SUBSCRIBE_sensors/#").unwrap_err();
        assert!(matches!(err, AgentError::InvalidTopic { .. }));
    }

    #[test]
    fn test_encode() {
        assert_eq!(ControlMessage::subscribe("topicA").encode(), "SUBSCRIBE_topicA");
        assert_eq!(ControlMessage::publish("data1").to_string(), "PUBLISH_data1");
    }

    proptest! {
        #[test]
        fn encoded_messages_decode_to_themselves(
            publish in any::<bool>(),
            topic in "[a-zA-Z0-9_/.-]{1,48}",
        ) {
            let action = if publish { ControlAction::Publish } else { ControlAction::Subscribe };
            let msg = ControlMessage::new(action, topic);
            let decoded = ControlMessage::decode(msg.encode().as_bytes()).unwrap();
            prop_assert_eq!(decoded, msg);
        }
    }
}
