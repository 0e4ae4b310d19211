//! Subscription registry
//!
//! Pure bookkeeping of the topics a device receives. The registry never talks
//! to the broker itself; [`crate::agent::DeviceAgent`] pushes the full set to
//! the transport after each change and rolls the change back if that fails.

use crate::error::{AgentError, AgentResult};
use std::collections::BTreeSet;

/// Authoritative set of subscribed topics; always contains the control topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRegistry {
    control_topic: String,
    topics: BTreeSet<String>,
}

impl SubscriptionRegistry {
    pub fn new(control_topic: impl Into<String>) -> Self {
        let control_topic = control_topic.into();
        let topics = BTreeSet::from([control_topic.clone()]);
        Self {
            control_topic,
            topics,
        }
    }

    pub fn control_topic(&self) -> &str {
        &self.control_topic
    }

    pub fn topics(&self) -> &BTreeSet<String> {
        &self.topics
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// True when only the control topic is subscribed
    pub fn is_baseline(&self) -> bool {
        self.topics.len() == 1 && self.contains(&self.control_topic)
    }

    /// Add a topic. Returns false if it was already present.
    pub fn insert(&mut self, topic: &str) -> bool {
        if self.topics.contains(topic) {
            return false;
        }
        self.topics.insert(topic.to_string())
    }

    /// Remove a topic. The control topic and absent topics are refused.
    pub fn remove(&mut self, topic: &str) -> AgentResult<()> {
        if topic == self.control_topic {
            return Err(AgentError::ControlTopicProtected {
                topic: topic.to_string(),
            });
        }
        if !self.topics.remove(topic) {
            return Err(AgentError::UnsubscribeOfAbsentTopic {
                topic: topic.to_string(),
            });
        }
        Ok(())
    }

    /// Drop everything except the control topic, returning the previous set
    pub fn reset(&mut self) -> BTreeSet<String> {
        let baseline = BTreeSet::from([self.control_topic.clone()]);
        std::mem::replace(&mut self.topics, baseline)
    }

    /// Put back a set captured by [`Self::reset`] or a cloned snapshot
    pub(crate) fn restore(&mut self, topics: BTreeSet<String>) {
        debug_assert!(topics.contains(&self.control_topic));
        self.topics = topics;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_starts_at_baseline() {
        let registry = SubscriptionRegistry::new("status");
        assert!(registry.is_baseline());
        assert_eq!(registry.control_topic(), "status");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut registry = SubscriptionRegistry::new("status");
        assert!(registry.insert("topicA"));
        let after_first = registry.clone();

        assert!(!registry.insert("topicA"));
        assert_eq!(registry, after_first);
        assert!(!registry.insert("status"));
    }

    #[test]
    fn test_remove_absent_topic() {
        let mut registry = SubscriptionRegistry::new("status");
        registry.insert("topicA");
        let before = registry.clone();

        let err = registry.remove("topicZ").unwrap_err();
        assert!(matches!(err, AgentError::UnsubscribeOfAbsentTopic { .. }));
        assert_eq!(registry, before);
    }

    #[test]
    fn test_control_topic_cannot_be_removed() {
        let mut registry = SubscriptionRegistry::new("status");
        let err = registry.remove("status").unwrap_err();
        assert!(matches!(err, AgentError::ControlTopicProtected { .. }));
        assert!(registry.contains("status"));
    }

    #[test]
    fn test_reset_returns_previous_set() {
        let mut registry = SubscriptionRegistry::new("status");
        registry.insert("a");
        registry.insert("b");

        let previous = registry.reset();
        assert!(registry.is_baseline());
        assert_eq!(previous.len(), 3);

        registry.restore(previous);
        assert!(registry.contains("a"));
        assert!(registry.contains("b"));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(String),
        Remove(String),
        Reset,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let topic = prop_oneof![
            Just("status".to_string()),
            "[a-c]{1,2}",
        ];
        prop_oneof![
            topic.clone().prop_map(Op::Insert),
            topic.prop_map(Op::Remove),
            Just(Op::Reset),
        ]
    }

    proptest! {
        #[test]
        fn control_topic_survives_any_sequence(ops in prop::collection::vec(op_strategy(), 0..40)) {
            let mut registry = SubscriptionRegistry::new("status");
            for op in ops {
                match op {
                    Op::Insert(topic) => { registry.insert(&topic); }
                    Op::Remove(topic) => { let _ = registry.remove(&topic); }
                    Op::Reset => { registry.reset(); }
                }
                prop_assert!(registry.contains("status"));
            }
        }
    }
}
