//! Command queue into a running agent
//!
//! Every externally triggered subscription change or publish goes through
//! this queue, so only the receive loop ever mutates the registry.

use crate::error::{AgentError, AgentResult};
use std::collections::BTreeSet;
use tokio::sync::{mpsc, oneshot};

/// Commands queue capacity
pub const COMMAND_QUEUE_CAPACITY: usize = 32;

/// One request to the receive loop, carrying its reply channel
#[derive(Debug)]
pub enum AgentCommand {
    Subscribe {
        topic: String,
        reply: oneshot::Sender<AgentResult<bool>>,
    },
    Unsubscribe {
        topic: String,
        reply: oneshot::Sender<AgentResult<()>>,
    },
    Reset {
        reply: oneshot::Sender<AgentResult<()>>,
    },
    Publish {
        topic: String,
        reply: oneshot::Sender<AgentResult<usize>>,
    },
    SubscribedTopics {
        reply: oneshot::Sender<BTreeSet<String>>,
    },
}

impl AgentCommand {
    pub fn name(&self) -> &'static str {
        match self {
            AgentCommand::Subscribe { .. } => "subscribe",
            AgentCommand::Unsubscribe { .. } => "unsubscribe",
            AgentCommand::Reset { .. } => "reset",
            AgentCommand::Publish { .. } => "publish",
            AgentCommand::SubscribedTopics { .. } => "subscribed_topics",
        }
    }
}

/// Cloneable handle for driving an agent from other tasks.
///
/// Calls resolve once the receive loop has executed the command. They fail
/// with [`AgentError::AgentStopped`] when the loop is gone.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    commands: mpsc::Sender<AgentCommand>,
}

impl AgentHandle {
    pub(crate) fn new(commands: mpsc::Sender<AgentCommand>) -> Self {
        Self { commands }
    }

    /// Returns true when the topic was newly added
    pub async fn subscribe(&self, topic: impl Into<String>) -> AgentResult<bool> {
        let topic = topic.into();
        self.request(|reply| AgentCommand::Subscribe { topic, reply })
            .await?
    }

    pub async fn unsubscribe(&self, topic: impl Into<String>) -> AgentResult<()> {
        let topic = topic.into();
        self.request(|reply| AgentCommand::Unsubscribe { topic, reply })
            .await?
    }

    pub async fn reset_to_baseline(&self) -> AgentResult<()> {
        self.request(|reply| AgentCommand::Reset { reply }).await?
    }

    /// Returns the number of records sent
    pub async fn publish(&self, topic: impl Into<String>) -> AgentResult<usize> {
        let topic = topic.into();
        self.request(|reply| AgentCommand::Publish { topic, reply })
            .await?
    }

    pub async fn subscribed_topics(&self) -> AgentResult<BTreeSet<String>> {
        self.request(|reply| AgentCommand::SubscribedTopics { reply })
            .await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> AgentCommand,
    ) -> AgentResult<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| AgentError::AgentStopped)?;
        response.await.map_err(|_| AgentError::AgentStopped)
    }
}
