//! Contracts between the HTTP listener and its owner.

use std::sync::Arc;

use async_trait::async_trait;
use upnp_requester::HttpRequest;

use crate::error::Result;

/// Receives NOTIFY requests from a [`NotifyServer`].
#[async_trait]
pub trait NotifyHandler: Send + Sync {
    /// Process one NOTIFY request and return the HTTP status to answer with.
    async fn handle_notify(&self, request: HttpRequest) -> u16;

    /// Cancel every subscription that points at this server.
    ///
    /// Called by [`NotifyServer::stop`] before the listener goes away.
    async fn unsubscribe_all(&self);
}

/// An HTTP endpoint that devices send NOTIFY requests to.
#[async_trait]
pub trait NotifyServer: Send + Sync {
    /// URL to put in the `CALLBACK` header of a SUBSCRIBE request.
    fn callback_url(&self) -> &str;

    /// Start accepting requests and deliver NOTIFYs to `handler`.
    async fn start(&mut self, handler: Arc<dyn NotifyHandler>) -> Result<()>;

    /// Unsubscribe through the handler, then release the port.
    async fn stop(&mut self) -> Result<()>;
}
