//! Outbound publishing on a fixed topic.

use tracing::debug;

use crate::channel::{Channel, Connection};
use crate::types::{Error, OutboundMessage, Result};

/// Sends payloads to one topic under one sender identity.
///
/// Never renews on its own; an expired token surfaces as an
/// [`Error::Publish`] whose [`is_auth`](Error::is_auth) is `true`.
#[derive(Debug, Clone)]
pub struct Publisher {
    topic: String,
    identity: String,
}

impl Publisher {
    pub fn new(topic: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            identity: identity.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn message(&self, payload: Vec<u8>) -> OutboundMessage {
        OutboundMessage {
            topic: self.topic.clone(),
            publisher: self.identity.clone(),
            payload,
        }
    }

    pub async fn publish<C: Connection>(&self, channel: &Channel<C>, payload: &[u8]) -> Result<()> {
        let message = self.message(payload.to_vec());
        channel.publish(&message).await.map_err(Error::publish)?;
        debug!(topic = %self.topic, bytes = payload.len(), "published");
        Ok(())
    }
}
