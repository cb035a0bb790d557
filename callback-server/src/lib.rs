//! HTTP callback server for receiving UPnP event notifications.
//!
//! A device that accepted a `SUBSCRIBE` sends its state changes as HTTP
//! `NOTIFY` requests to the URL given in the `CALLBACK` header. This crate
//! provides that endpoint.
//!
//! - [`NotifyHandler`]: what to do with a NOTIFY and how to clean up on stop.
//!   The event handler in `upnp-sdk-events` implements it.
//! - [`NotifyServer`]: an endpoint with a callback URL that can be started
//!   and stopped.
//! - [`CallbackServer`]: the default [`NotifyServer`], a warp server bound to
//!   a port from a configurable range.
//!
//! The server knows nothing about subscriptions or property sets. It turns
//! each request into an [`upnp_requester::HttpRequest`], hands it to the
//! handler and answers with the status the handler returns.

mod error;
mod handler;
mod server;

pub use error::{CallbackServerError, Result};
pub use handler::{NotifyHandler, NotifyServer};
pub use server::{detect_local_ip, CallbackServer};
