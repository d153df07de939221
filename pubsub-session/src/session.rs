//! Session coordinator: brings up the first channel, runs the inbound and
//! outbound flows side by side, and tears both down on shutdown.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backoff::RetryPolicy;
use crate::channel::{Channel, Connector};
use crate::consumer::{EnvelopeHandler, StreamConsumer};
use crate::credentials::CredentialManager;
use crate::publisher::Publisher;
use crate::source::OutboundSource;
use crate::types::{Error, Result, Subscription};

pub const DEFAULT_INCOMING_TOPIC: &str = "cloud:door/out";
pub const DEFAULT_OUTGOING_TOPIC: &str = "cloud:door/in";
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub subscription: Subscription,
    pub outgoing_topic: String,
    /// Sender identity attached to every publish.
    pub publisher_name: String,
    pub retry: RetryPolicy,
    /// How long shutdown waits for the consumer before aborting it.
    pub shutdown_timeout: Duration,
}

impl SessionConfig {
    /// Defaults for everything except the subscription name and sender identity.
    pub fn new(subscription: impl Into<String>, publisher_name: impl Into<String>) -> Self {
        Self {
            subscription: Subscription::new(subscription, DEFAULT_INCOMING_TOPIC),
            outgoing_topic: DEFAULT_OUTGOING_TOPIC.to_string(),
            publisher_name: publisher_name.into(),
            retry: RetryPolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

pub struct Session<K: Connector> {
    credentials: CredentialManager<K>,
    config: SessionConfig,
}

enum Outcome {
    Cancelled,
    ConsumerExited(Result<()>),
    Failed(Error),
}

impl<K: Connector> Session<K> {
    pub fn new(credentials: CredentialManager<K>, config: SessionConfig) -> Self {
        Self {
            credentials,
            config,
        }
    }

    /// Run until `shutdown` fires or either flow fails.
    ///
    /// A failed initial login is returned immediately. Cancellation is not an
    /// error: a cancelled session returns `Ok(())` once every channel it
    /// opened has been closed.
    pub async fn run<H, S>(&self, handler: H, mut source: S, shutdown: CancellationToken) -> Result<()>
    where
        H: EnvelopeHandler,
        S: OutboundSource,
    {
        let channel = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            renewed = self.credentials.renew() => renewed?,
        };
        info!(
            username = self.credentials.username(),
            subscription = %self.config.subscription.name,
            topic = %self.config.subscription.topic,
            "session started"
        );

        let consumer_shutdown = shutdown.child_token();
        let consumer = StreamConsumer::new(
            self.credentials.clone(),
            self.config.subscription.clone(),
            channel.clone(),
            handler,
            self.config.retry,
        );
        let mut consumer_task = tokio::spawn(consumer.run(consumer_shutdown.clone()));

        let mut outbound = OutboundFlow {
            publisher: Publisher::new(
                self.config.outgoing_topic.clone(),
                self.config.publisher_name.clone(),
            ),
            credentials: self.credentials.clone(),
            channel,
        };

        let outcome = drive(&mut outbound, &mut source, &mut consumer_task, &shutdown).await;

        consumer_shutdown.cancel();
        let result = match outcome {
            Outcome::ConsumerExited(result) => result,
            Outcome::Cancelled => join_consumer(consumer_task, self.config.shutdown_timeout).await,
            Outcome::Failed(e) => {
                // The consumer's own exit status is secondary to this failure.
                let _ = join_consumer(consumer_task, self.config.shutdown_timeout).await;
                Err(e)
            }
        };
        drop(outbound);

        match result {
            Ok(()) | Err(Error::Cancelled) => {
                info!("session stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "session failed");
                Err(e)
            }
        }
    }
}

/// Outbound loop: one publish per source message, in source order.
async fn drive<K, S>(
    outbound: &mut OutboundFlow<K>,
    source: &mut S,
    consumer_task: &mut JoinHandle<Result<()>>,
    shutdown: &CancellationToken,
) -> Outcome
where
    K: Connector,
    S: OutboundSource,
{
    let mut input_open = true;
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Outcome::Cancelled,
            joined = &mut *consumer_task => return Outcome::ConsumerExited(flatten(joined)),
            next = source.next_message(), if input_open => match next {
                Ok(Some(payload)) => {
                    let sent = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return Outcome::Cancelled,
                        sent = outbound.send(&payload) => sent,
                    };
                    if let Err(e) = sent {
                        warn!(error = %e, "publish failed");
                    }
                }
                Ok(None) => {
                    info!("outbound input closed");
                    input_open = false;
                }
                Err(e) => return Outcome::Failed(e),
            },
        }
    }
}

struct OutboundFlow<K: Connector> {
    publisher: Publisher,
    credentials: CredentialManager<K>,
    channel: Channel<K::Connection>,
}

impl<K: Connector> OutboundFlow<K> {
    /// Publish once; on an authentication rejection renew this flow's own
    /// channel and retry a single time.
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        match self.publisher.publish(&self.channel, payload).await {
            Err(e) if e.is_auth() => {
                info!(reason = %e, "publish rejected token, renewing outbound channel");
                self.channel = self.credentials.renew().await.map_err(Error::publish)?;
                self.publisher.publish(&self.channel, payload).await
            }
            other => other,
        }
    }
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(Error::Cancelled),
        Err(e) => Err(Error::Task(e.to_string())),
    }
}

/// Wait for the consumer to observe cancellation, aborting it after `timeout`.
/// Aborting drops the task's future, which releases its channel.
async fn join_consumer(mut task: JoinHandle<Result<()>>, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(joined) => flatten(joined),
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "consumer did not stop in time, aborting");
            task.abort();
            flatten(task.await)
        }
    }
}
