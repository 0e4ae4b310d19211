//! Publish path for data held by the agent
//!
//! The engine is the only part of the agent that calls the transport's send
//! primitive. A sequence payload fans out to one record per element, sent in
//! order; the first failed send aborts the rest.

use crate::agent::payload::{DataStore, Payload};
use crate::error::{AgentError, AgentResult};
use crate::observability::metrics::metrics;
use crate::publish_span;
use crate::transport::Transport;
use std::time::Instant;
use tracing::{debug, error, info, Instrument};

/// Sends held payloads to their topics
#[derive(Debug, Clone, Default)]
pub struct PublishEngine {
    data: DataStore,
}

impl PublishEngine {
    pub fn new(data: DataStore) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &DataStore {
        &self.data
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.data.contains_key(topic)
    }

    /// Send every record held for `topic`, returning how many were sent
    pub async fn publish<T: Transport>(&self, transport: &T, topic: &str) -> AgentResult<usize> {
        let payload = self
            .data
            .get(topic)
            .ok_or_else(|| AgentError::missing_topic_data(topic))?;

        let span = publish_span!(topic = %topic, records = payload.record_count());
        Self::send_payload(transport, topic, payload)
            .instrument(span)
            .await
    }

    async fn send_payload<T: Transport>(
        transport: &T,
        topic: &str,
        payload: &Payload,
    ) -> AgentResult<usize> {
        let started = Instant::now();
        let mut sent = 0;

        for value in payload.records() {
            if let Err(e) = transport.send(topic, None, value.clone()).await {
                error!(
                    topic = %topic,
                    sent,
                    remaining = payload.record_count() - sent,
                    error = %e,
                    "Send failed, aborting publish"
                );
                metrics().publish_failed(sent);
                return Err(AgentError::transport(e));
            }
            sent += 1;
            debug!(topic = %topic, index = sent, bytes = value.len(), "Record sent");
        }

        let elapsed = started.elapsed();
        metrics().publish_completed(sent, payload.total_bytes(), elapsed);
        info!(
            topic = %topic,
            records = sent,
            elapsed_ms = elapsed.as_millis() as u64,
            "Publish complete"
        );
        Ok(sent)
    }
}
