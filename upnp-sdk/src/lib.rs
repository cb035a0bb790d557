//! # UPnP SDK - async UPnP control point
//!
//! One dependency for the whole stack:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use upnp_sdk::{DeviceFactory, ReqwestRequester, SSDP_ST_ROOTDEVICE};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     upnp_sdk::logging::init_logging_from_env()?;
//!
//!     let mut locations = Vec::new();
//!     upnp_sdk::search(None, SSDP_ST_ROOTDEVICE, Duration::from_secs(4), |message| {
//!         if let Some(location) = message.location() {
//!             locations.push(location.to_string());
//!         }
//!     })
//!     .await?;
//!
//!     let factory = DeviceFactory::new(Arc::new(ReqwestRequester::new()?));
//!     for location in locations {
//!         let device = factory.create_device(&location).await?;
//!         println!("{} ({})", device.friendly_name(), device.device_type());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! upnp-sdk (facade + logging)
//!     ↓
//! upnp-events (subscriptions, resubscription, profile devices)
//!     ↓                        ↓
//! callback-server (NOTIFY)   upnp-description (devices, services, state variables)
//!     ↓                        ↓
//! upnp-requester (HTTP)      upnp-discovery (SSDP)
//! ```
//!
//! Each layer is re-exported as a module (`upnp_sdk::events`, ...) and the
//! commonly used types are available at the crate root.

pub mod logging;

pub use callback_server as notify;
pub use upnp_description as description;
pub use upnp_discovery as discovery;
pub use upnp_events as events;
pub use upnp_requester as requester;

// HTTP
pub use upnp_requester::{HttpRequest, HttpResponse, Requester, RequesterError, ReqwestRequester};

// Discovery
pub use upnp_discovery::{
    search, DiscoveryError, SsdpAdvertisementListener, SsdpDevice, SsdpDeviceTracker, SsdpListener,
    SsdpMessage, SsdpSearch, SsdpSource, SSDP_ST_ALL, SSDP_ST_ROOTDEVICE,
};

// Description
pub use upnp_description::{
    Action, DataType, DescriptionError, Device, DeviceFactory, EventCallback, Service,
    StateVariable, Value,
};

// Eventing
pub use callback_server::{CallbackServer, NotifyServer};
pub use upnp_events::{
    DeviceUpdater, EventConfig, EventError, EventHandler, EventHandlerRegister, ProfileDevice,
};

pub use logging::{init_logging, init_logging_from_env, LoggingError, LoggingMode};
