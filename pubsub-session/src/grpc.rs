//! gRPC transport over tonic.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use http::uri::PathAndQuery;
use tonic::codec::ProstCodec;
use tonic::metadata::AsciiMetadataValue;
use tonic::service::Interceptor;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{ClientTlsConfig, Endpoint};
use tracing::debug;

use crate::channel::{BatchStream, Connection, Connector};
use crate::protocol::{
    AcknowledgeRequest, AcknowledgeResponse, AuthResponse, LoginRequest, PublishRequest,
    PublishResponse, StreamRequest, StreamResponse, path,
};
use crate::types::{
    AccessToken, Credential, EnvelopeId, Error, OutboundMessage, Result, Subscription,
};

pub const DEFAULT_ENDPOINT: &str = "https://api.toit.io:443";
/// Deadline for connecting and for each unary call. The stream pull has none.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Service = InterceptedService<tonic::transport::Channel, BearerAuth>;

/// Adds `authorization: Bearer <token>` to every call, or nothing for an
/// unauthenticated channel.
#[derive(Clone)]
pub struct BearerAuth {
    header: Option<AsciiMetadataValue>,
}

impl BearerAuth {
    pub fn new(token: Option<&AccessToken>) -> Result<Self> {
        let header = token
            .map(|t| format!("Bearer {}", t.as_str()).parse::<AsciiMetadataValue>())
            .transpose()
            .map_err(|_| Error::Auth("access token is not valid header text".to_string()))?;
        Ok(Self { header })
    }
}

impl fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuth")
            .field("authenticated", &self.header.is_some())
            .finish()
    }
}

impl Interceptor for BearerAuth {
    fn call(
        &mut self,
        mut request: tonic::Request<()>,
    ) -> std::result::Result<tonic::Request<()>, tonic::Status> {
        if let Some(header) = &self.header {
            request
                .metadata_mut()
                .insert("authorization", header.clone());
        }
        Ok(request)
    }
}

/// Opens one HTTP/2 connection per [`open`](Connector::open) call.
pub struct GrpcConnector {
    endpoint: Endpoint,
    request_timeout: Duration,
}

impl GrpcConnector {
    /// `url` must be absolute; `https://` URLs use TLS with the platform's
    /// native root certificates.
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self> {
        let invalid = |e: &dyn std::fmt::Display| Error::InvalidEndpoint(format!("{url}: {e}"));
        let mut endpoint = Endpoint::from_shared(url.to_string())
            .map_err(|e| invalid(&e))?
            .connect_timeout(request_timeout);
        if url.starts_with("https://") {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| invalid(&e))?;
        }
        Ok(Self {
            endpoint,
            request_timeout,
        })
    }
}

#[async_trait]
impl Connector for GrpcConnector {
    type Connection = GrpcConnection;

    async fn open(&self, token: Option<&AccessToken>) -> Result<GrpcConnection> {
        let auth = BearerAuth::new(token)?;
        let channel = self.endpoint.connect().await?;
        debug!(uri = %self.endpoint.uri(), authenticated = token.is_some(), "channel connected");
        Ok(GrpcConnection {
            service: Mutex::new(Some(InterceptedService::new(channel, auth))),
            request_timeout: self.request_timeout,
        })
    }
}

pub struct GrpcConnection {
    /// `None` once closed.
    service: Mutex<Option<Service>>,
    request_timeout: Duration,
}

impl GrpcConnection {
    async fn client(&self) -> std::result::Result<tonic::client::Grpc<Service>, tonic::Status> {
        let service = self
            .service
            .lock()
            .map_err(|_| tonic::Status::internal("connection state poisoned"))?
            .clone()
            .ok_or_else(|| tonic::Status::unavailable("connection closed"))?;
        let mut grpc = tonic::client::Grpc::new(service);
        grpc.ready().await.map_err(|e| {
            let e: tonic::codegen::StdError = e.into();
            tonic::Status::unavailable(format!("service not ready: {e}"))
        })?;
        Ok(grpc)
    }

    async fn unary<Req, Resp>(
        &self,
        path: &'static str,
        message: Req,
    ) -> std::result::Result<Resp, tonic::Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.client().await?;
        let codec = ProstCodec::<Req, Resp>::default();
        let call = grpc.unary(
            tonic::Request::new(message),
            PathAndQuery::from_static(path),
            codec,
        );
        let response = tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| {
                tonic::Status::deadline_exceeded(format!(
                    "{path} timed out after {}ms",
                    self.request_timeout.as_millis()
                ))
            })??;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl Connection for GrpcConnection {
    async fn login(&self, credential: &Credential) -> Result<AccessToken> {
        let request = LoginRequest {
            username: credential.username().to_string(),
            password: credential.password().to_string(),
        };
        let response: AuthResponse = self
            .unary(path::LOGIN, request)
            .await
            .map_err(|status| match status.code() {
                // Rejected credentials come back as either code.
                tonic::Code::PermissionDenied => Error::Auth(status.message().to_string()),
                _ => Error::from(status),
            })?;
        response.token()
    }

    async fn stream(&self, subscription: &Subscription) -> Result<BatchStream> {
        let mut grpc = self.client().await?;
        let request = tonic::Request::new(StreamRequest {
            subscription: Some(subscription.into()),
        });
        let codec = ProstCodec::<StreamRequest, StreamResponse>::default();
        let streaming = grpc
            .server_streaming(request, PathAndQuery::from_static(path::STREAM), codec)
            .await?
            .into_inner();
        let topic = subscription.topic.clone();
        let batches = streaming.map(move |item| {
            item.map(|response| {
                response
                    .messages
                    .into_iter()
                    .map(|envelope| envelope.into_envelope(&topic))
                    .collect::<Vec<_>>()
            })
            .map_err(Error::from)
        });
        Ok(batches.boxed())
    }

    async fn acknowledge(&self, subscription: &Subscription, ids: &[EnvelopeId]) -> Result<()> {
        let request = AcknowledgeRequest {
            subscription: Some(subscription.into()),
            envelope_ids: ids.iter().map(|id| id.as_bytes().to_vec()).collect(),
        };
        let _: AcknowledgeResponse = self.unary(path::ACKNOWLEDGE, request).await?;
        Ok(())
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<()> {
        let _: PublishResponse = self
            .unary(path::PUBLISH, PublishRequest::from(message))
            .await?;
        Ok(())
    }

    fn close(&self) {
        if let Ok(mut service) = self.service.lock() {
            service.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intercept(auth: &mut BearerAuth) -> tonic::Request<()> {
        auth.call(tonic::Request::new(())).unwrap()
    }

    #[test]
    fn bearer_auth_sets_authorization_header() {
        let token = AccessToken::new("tok-123");
        let mut auth = BearerAuth::new(Some(&token)).unwrap();
        let req = intercept(&mut auth);
        let header = req.metadata().get("authorization").unwrap();
        assert_eq!(header.to_str().unwrap(), "Bearer tok-123");
    }

    #[test]
    fn unauthenticated_channel_sends_no_header() {
        let mut auth = BearerAuth::new(None).unwrap();
        let req = intercept(&mut auth);
        assert!(req.metadata().get("authorization").is_none());
    }

    #[test]
    fn bearer_auth_rejects_non_header_token() {
        let token = AccessToken::new("bad\ntoken");
        assert!(BearerAuth::new(Some(&token)).unwrap_err().is_auth());
    }

    #[test]
    fn bearer_auth_debug_hides_token() {
        let token = AccessToken::new("tok-123");
        let auth = BearerAuth::new(Some(&token)).unwrap();
        let dbg = format!("{auth:?}");
        assert!(!dbg.contains("tok-123"));
        assert!(dbg.contains("authenticated: true"));
    }

    #[test]
    fn connector_rejects_invalid_url() {
        let err = GrpcConnector::new("not a url", DEFAULT_REQUEST_TIMEOUT)
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidEndpoint(_)));
    }

    #[test]
    fn connector_accepts_plaintext_url() {
        assert!(GrpcConnector::new("http://127.0.0.1:50051", DEFAULT_REQUEST_TIMEOUT).is_ok());
    }
}
