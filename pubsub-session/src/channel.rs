//! Channel abstraction: the transport seam and the crate-owned channel handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::types::{
    AccessToken, Credential, Envelope, EnvelopeId, Error, OutboundMessage, Result, Subscription,
};

/// Server-streaming pull: one item per delivered batch.
pub type BatchStream = BoxStream<'static, Result<Vec<Envelope>>>;

/// Secure-channel factory.
///
/// Every call to [`open`](Connector::open) yields an independent connection;
/// nothing is cached.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    /// Open a connection carrying `token` as bearer credentials, or an
    /// unauthenticated one (usable only for login) when `token` is `None`.
    async fn open(&self, token: Option<&AccessToken>) -> Result<Self::Connection>;
}

/// The control-plane RPCs available over one connection.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    async fn login(&self, credential: &Credential) -> Result<AccessToken>;
    async fn stream(&self, subscription: &Subscription) -> Result<BatchStream>;
    async fn acknowledge(&self, subscription: &Subscription, ids: &[EnvelopeId]) -> Result<()>;
    async fn publish(&self, message: &OutboundMessage) -> Result<()>;
    /// Release the underlying resources. Called exactly once per connection
    /// by [`Channel`].
    fn close(&self);
}

/// Handle to one open connection.
///
/// Clones share the connection. It is closed exactly once: on the first
/// explicit [`close`](Channel::close), or when the last clone is dropped.
pub struct Channel<C: Connection> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: Connection> {
    conn: C,
    authenticated: bool,
    closed: AtomicBool,
}

impl<C: Connection> Inner<C> {
    fn close_once(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.conn.close();
        }
    }
}

impl<C: Connection> Drop for Inner<C> {
    fn drop(&mut self) {
        self.close_once();
    }
}

impl<C: Connection> Clone for Channel<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> Channel<C> {
    pub(crate) fn new(conn: C, authenticated: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                conn,
                authenticated,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.authenticated
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the connection for every clone. Safe to call repeatedly.
    pub fn close(&self) {
        self.inner.close_once();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Transport("channel is closed".to_string()));
        }
        Ok(())
    }

    pub async fn login(&self, credential: &Credential) -> Result<AccessToken> {
        self.ensure_open()?;
        self.inner.conn.login(credential).await
    }

    pub async fn stream(&self, subscription: &Subscription) -> Result<BatchStream> {
        self.ensure_open()?;
        self.inner.conn.stream(subscription).await
    }

    pub async fn acknowledge(&self, subscription: &Subscription, ids: &[EnvelopeId]) -> Result<()> {
        self.ensure_open()?;
        self.inner.conn.acknowledge(subscription, ids).await
    }

    pub async fn publish(&self, message: &OutboundMessage) -> Result<()> {
        self.ensure_open()?;
        self.inner.conn.publish(message).await
    }
}
