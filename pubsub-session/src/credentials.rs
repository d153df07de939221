//! Credential manager: login and authenticated channel construction.

use std::sync::Arc;

use tracing::{debug, info};

use crate::channel::{Channel, Connector};
use crate::types::{AccessToken, Credential, Result};

/// Exchanges a [`Credential`] for tokens and builds channels from them.
///
/// Holds no mutable state; clones share the connector and are safe to use
/// from both session flows at once.
pub struct CredentialManager<K: Connector> {
    connector: Arc<K>,
    credential: Credential,
}

impl<K: Connector> Clone for CredentialManager<K> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            credential: self.credential.clone(),
        }
    }
}

impl<K: Connector> CredentialManager<K> {
    pub fn new(connector: K, credential: Credential) -> Self {
        Self::from_shared(Arc::new(connector), credential)
    }

    pub fn from_shared(connector: Arc<K>, credential: Credential) -> Self {
        Self {
            connector,
            credential,
        }
    }

    pub fn username(&self) -> &str {
        self.credential.username()
    }

    /// Log in over `channel` (expected to be unauthenticated).
    pub async fn login(&self, channel: &Channel<K::Connection>) -> Result<AccessToken> {
        debug!(username = self.credential.username(), "logging in");
        channel.login(&self.credential).await
    }

    /// Open a fresh channel. The caller owns it and must let it go.
    pub async fn open_channel(
        &self,
        token: Option<&AccessToken>,
    ) -> Result<Channel<K::Connection>> {
        let conn = self.connector.open(token).await?;
        Ok(Channel::new(conn, token.is_some()))
    }

    /// Log in with the stored credential and return a channel bound to the new
    /// token. The intermediate unauthenticated channel is closed on every path.
    pub async fn renew(&self) -> Result<Channel<K::Connection>> {
        let bootstrap = self.open_channel(None).await?;
        let token = self.login(&bootstrap).await;
        bootstrap.close();
        let channel = self.open_channel(Some(&token?)).await?;
        info!(username = self.credential.username(), "credentials renewed");
        Ok(channel)
    }
}
