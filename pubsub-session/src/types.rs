//! Public types for the pubsub-session crate.

use std::borrow::Cow;
use std::fmt;

/// A boxed error type for handler and source callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Login credentials supplied at startup.
///
/// Only ever sent in the login call; the password is redacted from `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    username: String,
    password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opaque bearer token issued by the control plane.
///
/// Expiry is server-defined and never checked locally; a rejected call is the
/// only signal.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// A durable, named pull-point on a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub name: String,
    pub topic: String,
}

impl Subscription {
    pub fn new(name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
        }
    }
}

/// Acknowledgment id of a delivered envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvelopeId(Vec<u8>);

impl EnvelopeId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for EnvelopeId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for EnvelopeId {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// A message delivered on a subscription stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub id: EnvelopeId,
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Payload as text, with invalid UTF-8 replaced.
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// A single outbound publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    /// Sender identity reported to subscribers.
    pub publisher: String,
    pub payload: Vec<u8>,
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid credentials, or a token the server no longer accepts.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("publish failed: {source}")]
    Publish { source: Box<Error> },

    /// Orderly shutdown, not a failure.
    #[error("session cancelled")]
    Cancelled,

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("input error: {0}")]
    Input(#[from] std::io::Error),

    #[error("consumer task failed: {0}")]
    Task(String),
}

impl Error {
    /// `true` when the failure (or the failure a publish wraps) is an
    /// authentication rejection that a renewal can fix.
    pub fn is_auth(&self) -> bool {
        match self {
            Error::Auth(_) => true,
            Error::Publish { source } => source.is_auth(),
            _ => false,
        }
    }

    pub(crate) fn publish(source: Error) -> Self {
        Error::Publish {
            source: Box::new(source),
        }
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::Unauthenticated => Error::Auth(status.message().to_string()),
            code => Error::Transport(format!("{code:?}: {}", status.message())),
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(e: tonic::transport::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_hides_password() {
        let cred = Credential::new("alice", "hunter2");
        let dbg = format!("{cred:?}");
        assert!(dbg.contains("alice"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn access_token_debug_hides_value() {
        let token = AccessToken::new("secret-token");
        assert!(!format!("{token:?}").contains("secret-token"));
        assert_eq!(token.as_str(), "secret-token");
    }

    #[test]
    fn envelope_id_displays_as_hex() {
        let id = EnvelopeId::from(vec![0x0a, 0xff, 0x10]);
        assert_eq!(id.to_string(), "0aff10");
    }

    #[test]
    fn payload_text_replaces_invalid_utf8() {
        let env = Envelope {
            id: EnvelopeId::from("e1"),
            topic: "t".into(),
            payload: vec![b'h', b'i', 0xff],
        };
        assert_eq!(env.payload_text(), "hi\u{fffd}");
    }

    #[test]
    fn unauthenticated_status_maps_to_auth() {
        let err = Error::from(tonic::Status::unauthenticated("token expired"));
        assert!(err.is_auth());
        assert!(matches!(err, Error::Auth(ref m) if m == "token expired"));
    }

    #[test]
    fn other_status_maps_to_transport() {
        let err = Error::from(tonic::Status::unavailable("connection reset"));
        assert!(!err.is_auth());
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn publish_error_reports_wrapped_auth() {
        let err = Error::publish(Error::Auth("expired".into()));
        assert!(err.is_auth());
        assert_eq!(err.to_string(), "publish failed: authentication failed: expired");

        let err = Error::publish(Error::Transport("down".into()));
        assert!(!err.is_auth());
    }
}
