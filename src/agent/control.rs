//! Control message dispatch

use crate::agent::device::DeviceAgent;
use crate::control_span;
use crate::error::AgentResult;
use crate::protocol::{ControlAction, ControlMessage};
use crate::transport::Transport;
use tracing::{info, Instrument};

/// What a dispatched control message did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// `added` is false when the topic was already subscribed
    Subscribed { topic: String, added: bool },
    Published { topic: String, records: usize },
}

impl<T: Transport> DeviceAgent<T> {
    /// Decode and execute a control record value
    pub async fn handle_control(&mut self, value: &[u8]) -> AgentResult<ControlOutcome> {
        let message = ControlMessage::decode(value)?;
        self.dispatch(message).await
    }

    /// Execute a decoded control message
    pub async fn dispatch(&mut self, message: ControlMessage) -> AgentResult<ControlOutcome> {
        let span = control_span!(action = %message.action, topic = %message.topic);

        async move {
            info!("Control message received");
            let ControlMessage { action, topic } = message;
            match action {
                ControlAction::Subscribe => {
                    let added = self.subscribe(&topic).await?;
                    Ok(ControlOutcome::Subscribed { topic, added })
                }
                ControlAction::Publish => {
                    let records = self.publish(&topic).await?;
                    Ok(ControlOutcome::Published { topic, records })
                }
            }
        }
        .instrument(span)
        .await
    }
}
