//! Streaming data source
//!
//! Pushes the items of a stream to one topic. Each item passes through a gate
//! function that turns it into the record value; the default gate sends text
//! as UTF-8. The transport is connected on open and released by
//! [`DataSource::close`].

use crate::error::{AgentError, AgentResult};
use crate::protocol::topics::validate_topic;
use crate::transport::Transport;
use bytes::Bytes;
use tracing::{debug, info, warn};

/// Default topic for sources
pub const DEFAULT_SOURCE_TOPIC: &str = "src";

/// Default gate: text as UTF-8 bytes
pub fn utf8_gate(item: String) -> Bytes {
    Bytes::from(item)
}

/// Sends each item of a stream as one record
pub struct DataSource<T, S, G>
where
    T: Transport,
    S: Iterator,
    G: Fn(S::Item) -> Bytes,
{
    transport: T,
    topic: String,
    stream: S,
    gate: G,
    sent: usize,
}

impl<T, S> DataSource<T, S, fn(String) -> Bytes>
where
    T: Transport,
    S: Iterator<Item = String>,
{
    /// Open a source of text items
    pub async fn open(
        transport: T,
        topic: impl Into<String>,
        stream: impl IntoIterator<IntoIter = S>,
    ) -> AgentResult<Self> {
        Self::open_with_gate(transport, topic, stream, utf8_gate as fn(String) -> Bytes).await
    }
}

impl<T, S, G> DataSource<T, S, G>
where
    T: Transport,
    S: Iterator,
    G: Fn(S::Item) -> Bytes,
{
    /// Open a source whose items are converted by `gate`
    pub async fn open_with_gate(
        mut transport: T,
        topic: impl Into<String>,
        stream: impl IntoIterator<IntoIter = S>,
        gate: G,
    ) -> AgentResult<Self> {
        let topic = topic.into();
        validate_topic(&topic).map_err(|source| AgentError::InvalidTopic {
            topic: topic.clone(),
            source,
        })?;

        transport.connect().await.map_err(AgentError::transport)?;
        info!(topic = %topic, "Data source opened");

        Ok(Self {
            transport,
            topic,
            stream: stream.into_iter(),
            gate,
            sent: 0,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Records sent so far
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Gate and send the next item, yielding the value that was sent.
    ///
    /// Returns `None` once the stream is exhausted.
    pub async fn next_record(&mut self) -> Option<AgentResult<Bytes>> {
        let item = self.stream.next()?;
        let value = (self.gate)(item);

        let result = self
            .transport
            .send(&self.topic, None, value.clone())
            .await
            .map(|()| {
                self.sent += 1;
                debug!(topic = %self.topic, index = self.sent, bytes = value.len(), "Item sent");
                value
            })
            .map_err(AgentError::transport);
        Some(result)
    }

    /// Send every remaining item, stopping at the first failure
    pub async fn drain(&mut self) -> AgentResult<usize> {
        while let Some(result) = self.next_record().await {
            result?;
        }
        Ok(self.sent)
    }

    /// Disconnect the transport, returning how many records were sent
    pub async fn close(mut self) -> AgentResult<usize> {
        if let Err(e) = self.transport.disconnect().await {
            warn!(topic = %self.topic, error = %e, "Data source disconnect failed");
            return Err(AgentError::transport(e));
        }
        info!(topic = %self.topic, records = self.sent, "Data source closed");
        Ok(self.sent)
    }
}
