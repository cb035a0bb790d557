//! SSDP discovery for UPnP devices
//!
//! This crate contains the SSDP wire codec plus the two UDP roles a control
//! point needs: an active [`SsdpSearch`] that sends an M-SEARCH and collects
//! responses, and a passive [`SsdpAdvertisementListener`] that reports
//! `ssdp:alive`, `ssdp:byebye` and `ssdp:update` announcements.
//!
//! [`SsdpListener`] combines both and keeps an [`SsdpDeviceTracker`] of the
//! devices seen, expiring each one after its `CACHE-CONTROL` `max-age`.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use upnp_discovery::{search, SSDP_ST_ROOTDEVICE};
//!
//! # async fn run() -> upnp_discovery::Result<()> {
//! search(None, SSDP_ST_ROOTDEVICE, Duration::from_secs(4), |response| {
//!     println!("{:?} at {:?}", response.usn(), response.location());
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Listening for advertisements
//!
//! ```no_run
//! use upnp_discovery::SsdpAdvertisementListener;
//!
//! # async fn run() -> upnp_discovery::Result<()> {
//! let mut listener = SsdpAdvertisementListener::new(None, None)?
//!     .on_alive(|msg| println!("alive: {:?}", msg.udn()))
//!     .on_byebye(|msg| println!("gone: {:?}", msg.udn()));
//! listener.start().await?;
//! // ...
//! listener.stop().await;
//! # Ok(())
//! # }
//! ```

mod advertisement;
mod error;
mod headers;
mod listener;
mod search;
pub mod ssdp;
mod tracker;
pub mod transport;

pub use advertisement::{AdvertisementCallback, SsdpAdvertisementListener};
pub use error::{DiscoveryError, Result};
pub use headers::SsdpHeaders;
pub use listener::{SsdpListener, SsdpListenerCallback};
pub use search::{search, SsdpSearch};
pub use ssdp::{
    DecodeCache, SsdpMessage, SsdpMessageKind, SSDP_IP_V4, SSDP_IP_V6, SSDP_MX, SSDP_PORT,
    SSDP_ST_ALL, SSDP_ST_ROOTDEVICE,
};
pub use tracker::{
    is_valid_location, max_age, SsdpChange, SsdpDevice, SsdpDeviceTracker, SsdpSource, DEFAULT_MAX_AGE,
};
