use std::path::Path;
use std::time::Duration;

use pubsub_session::{RetryPolicy, SessionConfig, Subscription};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};

pub(crate) const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
pub(crate) const DEFAULT_RETRY_INITIAL_MS: u64 = 1_000;
pub(crate) const DEFAULT_RETRY_MAX_MS: u64 = 15_000;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub endpoint: String,
    pub incoming_topic: String,
    pub outgoing_topic: String,
    /// Sender identity on published messages. Defaults to the host name.
    pub publisher_name: Option<String>,
    pub request_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: pubsub_session::DEFAULT_ENDPOINT.to_string(),
            incoming_topic: pubsub_session::DEFAULT_INCOMING_TOPIC.to_string(),
            outgoing_topic: pubsub_session::DEFAULT_OUTGOING_TOPIC.to_string(),
            publisher_name: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_ms: DEFAULT_RETRY_INITIAL_MS,
            max_ms: DEFAULT_RETRY_MAX_MS,
        }
    }
}

impl RelayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Build the session settings for `subscription`, resolving the sender
    /// identity from the host name when none is configured.
    pub fn session_config(&self, subscription: &str) -> RelayResult<SessionConfig> {
        let publisher_name = match &self.publisher_name {
            Some(name) => name.clone(),
            None => hostname()?,
        };
        Ok(SessionConfig {
            subscription: Subscription::new(subscription, self.incoming_topic.clone()),
            outgoing_topic: self.outgoing_topic.clone(),
            publisher_name,
            retry: RetryPolicy {
                initial: Duration::from_millis(self.retry.initial_ms),
                max: Duration::from_millis(self.retry.max_ms),
            },
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        })
    }

    fn validate(&self) -> RelayResult<()> {
        if self.endpoint.is_empty() {
            return Err(RelayError::Config("endpoint must not be empty".into()));
        }
        if self.incoming_topic.is_empty() || self.outgoing_topic.is_empty() {
            return Err(RelayError::Config("topics must not be empty".into()));
        }
        if self.publisher_name.as_deref() == Some("") {
            return Err(RelayError::Config("publisher_name must not be empty".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(RelayError::Config("request_timeout_secs must be > 0".into()));
        }
        if self.retry.initial_ms == 0 || self.retry.max_ms < self.retry.initial_ms {
            return Err(RelayError::Config(format!(
                "retry: need 0 < initial_ms <= max_ms (got {} and {})",
                self.retry.initial_ms, self.retry.max_ms
            )));
        }
        Ok(())
    }
}

/// Load and validate a relay config from a YAML file, or use the defaults
/// when no file is given.
pub async fn load(path: Option<&Path>) -> RelayResult<RelayConfig> {
    let Some(path) = path else {
        return Ok(RelayConfig::default());
    };
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RelayError::Config(format!("read {}: {e}", path.display())))?;
    let config: RelayConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| RelayError::Config(format!("parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

fn hostname() -> RelayResult<String> {
    nix::unistd::gethostname()
        .map_err(|e| RelayError::Internal(format!("gethostname: {e}")))?
        .into_string()
        .map_err(|raw| RelayError::Internal(format!("host name is not UTF-8: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn load_yaml(yaml: &str) -> RelayResult<RelayConfig> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.yaml");
        tokio::fs::write(&path, yaml).await.unwrap();
        load(Some(&path)).await
    }

    #[tokio::test]
    async fn no_file_uses_defaults() {
        let config = load(None).await.unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.endpoint, "https://api.toit.io:443");
        assert_eq!(config.incoming_topic, "cloud:door/out");
        assert_eq!(config.outgoing_topic, "cloud:door/in");
    }

    #[tokio::test]
    async fn load_full_config() {
        let config = load_yaml(
            r#"
endpoint: http://127.0.0.1:50051
incoming_topic: cloud:lights/out
outgoing_topic: cloud:lights/in
publisher_name: relay-7
request_timeout_secs: 10
shutdown_timeout_secs: 2
retry:
  initial_ms: 250
  max_ms: 4000
"#,
        )
        .await
        .unwrap();

        assert_eq!(config.endpoint, "http://127.0.0.1:50051");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));

        let session = config.session_config("lights-sub").unwrap();
        assert_eq!(session.subscription.name, "lights-sub");
        assert_eq!(session.subscription.topic, "cloud:lights/out");
        assert_eq!(session.outgoing_topic, "cloud:lights/in");
        assert_eq!(session.publisher_name, "relay-7");
        assert_eq!(session.retry.initial, Duration::from_millis(250));
        assert_eq!(session.retry.max, Duration::from_secs(4));
        assert_eq!(session.shutdown_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn partial_config_keeps_defaults() {
        let config = load_yaml("outgoing_topic: cloud:custom/in\n").await.unwrap();
        assert_eq!(config.outgoing_topic, "cloud:custom/in");
        assert_eq!(config.incoming_topic, "cloud:door/out");
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[tokio::test]
    async fn unknown_field_is_rejected() {
        let err = load_yaml("endpointt: x\n").await.unwrap_err();
        assert!(matches!(err, RelayError::Config(ref m) if m.contains("parse")));
    }

    #[tokio::test]
    async fn invalid_retry_is_rejected() {
        let err = load_yaml("retry:\n  initial_ms: 500\n  max_ms: 100\n")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(ref m) if m.starts_with("retry")));
    }

    #[tokio::test]
    async fn missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(Some(&dir.path().join("absent.yaml"))).await.unwrap_err();
        assert!(matches!(err, RelayError::Config(ref m) if m.starts_with("read")));
    }

    #[test]
    fn publisher_name_defaults_to_host_name() {
        let session = RelayConfig::default().session_config("sub").unwrap();
        assert!(!session.publisher_name.is_empty());
    }
}
