//! Application handlers
//!
//! A [`Handler`] receives every text and binary payload a connection reads.
//! It gets a [`Sender`] to answer on; returning an error closes the
//! connection with an internal-error status.

use crate::connection::{DataKind, Sender};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::future::Future;

/// Trait for handling data frames
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Called once per received text or binary frame
    async fn on_data(&self, payload: Bytes, kind: DataKind, sender: Sender) -> Result<()>;
}

/// Sends every payload straight back with the same kind
#[derive(Debug, Clone, Default)]
pub struct EchoHandler;

impl EchoHandler {
    /// Create a new echo handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Handler for EchoHandler {
    async fn on_data(&self, payload: Bytes, kind: DataKind, sender: Sender) -> Result<()> {
        sender.send(payload, kind).await
    }
}

/// Handler backed by an async closure, see [`from_fn`]
#[derive(Clone)]
pub struct FnHandler<F> {
    f: F,
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Build a handler from an async closure
///
/// ```no_run
/// use ripplesock_core::handler::from_fn;
///
/// let handler = from_fn(|payload, kind, sender| async move {
///     sender.send(payload, kind).await
/// });
/// # let _ = handler;
/// ```
pub fn from_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Bytes, DataKind, Sender) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Bytes, DataKind, Sender) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn on_data(&self, payload: Bytes, kind: DataKind, sender: Sender) -> Result<()> {
        (self.f)(payload, kind, sender).await
    }
}

#[async_trait]
impl<H> Handler for std::sync::Arc<H>
where
    H: Handler + ?Sized,
{
    async fn on_data(&self, payload: Bytes, kind: DataKind, sender: Sender) -> Result<()> {
        (**self).on_data(payload, kind, sender).await
    }
}
