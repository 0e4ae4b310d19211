//! Mock implementations for testing
//!
//! Provides a mock Transport and a mock AnalysisHook so the device agent can
//! be exercised without a broker or an analyzer program.

use crate::agent::analysis::{AnalysisError, AnalysisHook};
use crate::error::AgentError;
use crate::protocol::InboundRecord;
use crate::transport::{mqtt::ConnectionState, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One record handed to [`MockTransport::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub topic: String,
    pub key: Option<String>,
    pub value: Bytes,
}

/// Mock transport for testing.
///
/// Clones share state, so a test keeps one clone to inspect while the agent
/// owns the other.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    pub sent: Arc<Mutex<Vec<SentRecord>>>,
    pub subscription_calls: Arc<Mutex<Vec<BTreeSet<String>>>>,
    pub clear_calls: Arc<AtomicUsize>,
    pub disconnect_calls: Arc<AtomicUsize>,
    pub connected: Arc<AtomicBool>,
    pub should_fail: bool,
    /// Fail subscription changes while set
    pub fail_subscriptions: Arc<AtomicBool>,
    /// Fail only `set_subscriptions` while set; clearing still succeeds
    pub fail_set_subscriptions: Arc<AtomicBool>,
    /// Set restored after a reconnect; follows every request, failed or not
    pub replay_set: Arc<Mutex<BTreeSet<String>>>,
    /// Fail every send once this many records were sent
    pub fail_sends_after: Arc<std::sync::Mutex<Option<usize>>>,
    pub record_sender: Arc<std::sync::Mutex<Option<mpsc::Sender<InboundRecord>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn fail_subscriptions(&self, fail: bool) {
        self.fail_subscriptions.store(fail, Ordering::SeqCst);
    }

    pub fn fail_set_subscriptions(&self, fail: bool) {
        self.fail_set_subscriptions.store(fail, Ordering::SeqCst);
    }

    /// Subscriptions a reconnect would restore
    pub async fn replay_subscriptions(&self) -> BTreeSet<String> {
        self.replay_set.lock().await.clone()
    }

    pub fn fail_sends_after(&self, records: usize) {
        *self
            .fail_sends_after
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(records);
    }

    pub async fn get_sent(&self) -> Vec<SentRecord> {
        self.sent.lock().await.clone()
    }

    /// Values sent to one topic, in order
    pub async fn sent_values(&self, topic: &str) -> Vec<Bytes> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|record| record.topic == topic)
            .map(|record| record.value.clone())
            .collect()
    }

    pub async fn get_subscription_calls(&self) -> Vec<BTreeSet<String>> {
        self.subscription_calls.lock().await.clone()
    }

    /// Subscription set most recently pushed to the broker
    pub async fn broker_subscriptions(&self) -> Option<BTreeSet<String>> {
        self.subscription_calls.lock().await.last().cloned()
    }

    pub fn clear_count(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub async fn clear_history(&self) {
        self.sent.lock().await.clear();
        self.subscription_calls.lock().await.clear();
        self.clear_calls.store(0, Ordering::SeqCst);
    }

    /// Records delivered but not yet taken by the receiving agent
    pub fn pending_records(&self) -> usize {
        self.record_sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(0, |sender| sender.max_capacity() - sender.capacity())
    }

    /// Deliver a record as if the broker had pushed it
    pub async fn inject(&self, record: InboundRecord) -> Result<(), AgentError> {
        let sender = self
            .record_sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| AgentError::internal_error("No record sender configured"))?;
        sender
            .send(record)
            .await
            .map_err(|_| AgentError::AgentStopped)
    }

    fn check_failure(&self, operation: &str) -> Result<(), AgentError> {
        if self.should_fail {
            return Err(AgentError::internal_error(format!(
                "Mock {operation} failure"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = AgentError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.check_failure("connection")?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn set_subscriptions(&self, topics: &BTreeSet<String>) -> Result<(), Self::Error> {
        *self.replay_set.lock().await = topics.clone();
        self.check_failure("subscribe")?;
        if self.fail_subscriptions.load(Ordering::SeqCst)
            || self.fail_set_subscriptions.load(Ordering::SeqCst)
        {
            return Err(AgentError::internal_error("Mock subscribe failure"));
        }
        self.subscription_calls.lock().await.push(topics.clone());
        Ok(())
    }

    async fn clear_subscriptions(&self) -> Result<(), Self::Error> {
        self.replay_set.lock().await.clear();
        self.check_failure("unsubscribe")?;
        if self.fail_subscriptions.load(Ordering::SeqCst) {
            return Err(AgentError::internal_error("Mock unsubscribe failure"));
        }
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        self.subscription_calls.lock().await.push(BTreeSet::new());
        Ok(())
    }

    async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        value: Bytes,
    ) -> Result<(), Self::Error> {
        self.check_failure("send")?;

        let mut sent = self.sent.lock().await;
        let limit = *self
            .fail_sends_after
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if matches!(limit, Some(limit) if sent.len() >= limit) {
            return Err(AgentError::internal_error("Mock send failure"));
        }

        sent.push(SentRecord {
            topic: topic.to_string(),
            key: key.map(str::to_string),
            value,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        Some(if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected("mock".to_string())
        })
    }

    fn is_permanently_disconnected(&self) -> bool {
        false
    }

    fn set_record_sender(&self, sender: mpsc::Sender<InboundRecord>) {
        *self
            .record_sender
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(sender);
    }
}

/// Analysis hook that records every value it sees
#[derive(Debug, Default, Clone)]
pub struct MockAnalysisHook {
    pub calls: Arc<Mutex<Vec<Bytes>>>,
    pub should_fail: bool,
}

impl MockAnalysisHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub async fn get_calls(&self) -> Vec<Bytes> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl AnalysisHook for MockAnalysisHook {
    async fn analyze(&self, value: &[u8]) -> Result<String, AnalysisError> {
        self.calls.lock().await.push(Bytes::copy_from_slice(value));
        if self.should_fail {
            return Err(AnalysisError::Rejected("Mock analysis failure".to_string()));
        }
        Ok(format!("analyzed {} bytes", value.len()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
