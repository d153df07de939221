//! Stream consumer: keeps one logical subscription alive across token expiry
//! and server-side stream closure.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::backoff::{Backoff, RetryPolicy};
use crate::channel::{BatchStream, Channel, Connector};
use crate::credentials::CredentialManager;
use crate::types::{BoxError, Envelope, Result, Subscription};

/// Receives each delivered envelope before it is acknowledged.
///
/// A handler error is logged and the envelope is acknowledged anyway.
#[async_trait]
pub trait EnvelopeHandler: Send + 'static {
    async fn handle(&mut self, envelope: &Envelope) -> std::result::Result<(), BoxError>;
}

#[async_trait]
impl<F> EnvelopeHandler for F
where
    F: FnMut(&Envelope) -> std::result::Result<(), BoxError> + Send + 'static,
{
    async fn handle(&mut self, envelope: &Envelope) -> std::result::Result<(), BoxError> {
        (self)(envelope)
    }
}

enum ConsumerState {
    Connecting,
    Streaming(BatchStream),
    Reauthenticating,
}

/// Owns its own channel; replaces it after every successful renewal.
pub struct StreamConsumer<K: Connector, H: EnvelopeHandler> {
    credentials: CredentialManager<K>,
    subscription: Subscription,
    channel: Channel<K::Connection>,
    handler: H,
    backoff: Backoff,
}

impl<K: Connector, H: EnvelopeHandler> StreamConsumer<K, H> {
    pub fn new(
        credentials: CredentialManager<K>,
        subscription: Subscription,
        channel: Channel<K::Connection>,
        handler: H,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            credentials,
            subscription,
            channel,
            handler,
            backoff: Backoff::new(retry),
        }
    }

    /// Consume until `shutdown` fires (`Ok`) or a non-authentication error
    /// occurs (`Err`). Authentication failures renew and reconnect.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let mut state = ConsumerState::Connecting;
        loop {
            state = match state {
                ConsumerState::Connecting => {
                    let opened = tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        opened = self.channel.stream(&self.subscription) => opened,
                    };
                    match opened {
                        Ok(stream) => {
                            debug!(subscription = %self.subscription.name, "stream opened");
                            ConsumerState::Streaming(stream)
                        }
                        Err(e) if e.is_auth() => {
                            info!(reason = %e, "stream open rejected, renewing credentials");
                            ConsumerState::Reauthenticating
                        }
                        Err(e) => {
                            error!(error = %e, "stream open failed");
                            return Err(e);
                        }
                    }
                }

                ConsumerState::Streaming(mut stream) => {
                    let item = tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        item = stream.next() => item,
                    };
                    match item {
                        Some(Ok(batch)) => {
                            // Only delivery resets; a successful open alone does not.
                            self.backoff.on_success();
                            match self.deliver(batch).await {
                                Ok(()) => ConsumerState::Streaming(stream),
                                Err(e) if e.is_auth() => {
                                    info!(reason = %e, "acknowledge rejected, renewing credentials");
                                    ConsumerState::Reauthenticating
                                }
                                Err(e) => {
                                    error!(error = %e, "acknowledge failed");
                                    return Err(e);
                                }
                            }
                        }
                        Some(Err(e)) if e.is_auth() => {
                            info!(reason = %e, "stream rejected token, renewing credentials");
                            ConsumerState::Reauthenticating
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "stream failed");
                            return Err(e);
                        }
                        None => {
                            debug!("stream ended by server, reconnecting");
                            let delay = self.backoff.on_failure();
                            if !sleep_or_cancel(delay, &shutdown).await {
                                return Ok(());
                            }
                            ConsumerState::Connecting
                        }
                    }
                }

                ConsumerState::Reauthenticating => {
                    let delay = self.backoff.on_failure();
                    if !sleep_or_cancel(delay, &shutdown).await {
                        return Ok(());
                    }
                    let renewed = tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        renewed = self.credentials.renew() => renewed,
                    };
                    match renewed {
                        Ok(channel) => {
                            // The previous channel is released here unless
                            // another flow still holds a clone of it.
                            self.channel = channel;
                            ConsumerState::Connecting
                        }
                        Err(e) if e.is_auth() => {
                            warn!(
                                error = %e,
                                attempt = self.backoff.failures(),
                                "renewal rejected, retrying"
                            );
                            ConsumerState::Reauthenticating
                        }
                        Err(e) => {
                            error!(error = %e, "renewal failed");
                            return Err(e);
                        }
                    }
                }
            };
        }
    }

    /// Handle then acknowledge each envelope in delivery order.
    async fn deliver(&mut self, batch: Vec<Envelope>) -> Result<()> {
        if batch.is_empty() {
            trace!("empty batch");
            return Ok(());
        }
        debug!(count = batch.len(), "batch received");
        for envelope in batch {
            if let Err(e) = self.handler.handle(&envelope).await {
                warn!(id = %envelope.id, error = %e, "handler failed, acknowledging anyway");
            }
            self.channel
                .acknowledge(&self.subscription, std::slice::from_ref(&envelope.id))
                .await?;
        }
        Ok(())
    }
}

/// Returns `false` if `shutdown` fired first.
async fn sleep_or_cancel(delay: std::time::Duration, shutdown: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !shutdown.is_cancelled();
    }
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
