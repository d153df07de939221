//! Credential-bearing publish/subscribe session client.
//!
//! Logs in against a message-bus control plane, keeps a server-streaming
//! subscription alive across token expiry, acknowledges every delivered
//! envelope after handling it, and publishes outbound messages from an
//! independent source at the same time.
//!
//! # Features
//! - Username/password login exchanged for a bearer-token channel
//! - Automatic renewal and stream reopen when the token is rejected
//! - At-least-once acknowledgment, in delivery order within a batch
//! - Independent inbound and outbound flows, each owning its channel
//! - Single cancellation path that closes every channel exactly once
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), pubsub_session::Error> {
//! use pubsub_session::{
//!     BoxError, Credential, CredentialManager, Envelope, GrpcConnector, LineSource, Session,
//!     SessionConfig,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let connector = GrpcConnector::new(
//!     pubsub_session::DEFAULT_ENDPOINT,
//!     pubsub_session::DEFAULT_REQUEST_TIMEOUT,
//! )?;
//! let credentials = CredentialManager::new(connector, Credential::new("user", "secret"));
//! let session = Session::new(credentials, SessionConfig::new("my-subscription", "my-host"));
//!
//! let handler = |env: &Envelope| -> Result<(), BoxError> {
//!     println!("received: '{}'", env.payload_text());
//!     Ok(())
//! };
//! let source = LineSource::new(tokio::io::BufReader::new(tokio::io::stdin()));
//! session.run(handler, source, CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod channel;
mod consumer;
mod credentials;
mod grpc;
pub mod protocol;
mod publisher;
mod session;
mod source;
mod types;

pub use backoff::{DEFAULT_RETRY_INITIAL, DEFAULT_RETRY_MAX, RetryPolicy};
pub use channel::{BatchStream, Channel, Connection, Connector};
pub use consumer::{EnvelopeHandler, StreamConsumer};
pub use credentials::CredentialManager;
pub use grpc::{BearerAuth, DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT, GrpcConnection, GrpcConnector};
pub use publisher::Publisher;
pub use session::{
    DEFAULT_INCOMING_TOPIC, DEFAULT_OUTGOING_TOPIC, DEFAULT_SHUTDOWN_TIMEOUT, Session,
    SessionConfig,
};
pub use source::{LineSource, OutboundSource};
pub use types::{
    AccessToken, BoxError, Credential, Envelope, EnvelopeId, Error, OutboundMessage, Result,
    Subscription,
};
