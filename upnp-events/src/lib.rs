//! # upnp-events
//!
//! GENA event subscriptions for UPnP services.
//!
//! - [`EventHandler`] sends SUBSCRIBE, RESUBSCRIBE and UNSUBSCRIBE requests,
//!   keeps one record per SID and dispatches incoming NOTIFY property sets
//!   to the subscribed [`upnp_description::Service`].
//! - [`EventHandlerRegister`] shares one callback server and handler among
//!   all devices reached through the same local address.
//! - [`ProfileDevice`] subscribes to the services a consumer cares about and
//!   renews the subscriptions in the background with a [`ResubscribeTask`].
//! - [`DeviceUpdater`] follows a device's SSDP advertisements, marking it
//!   unavailable on byebye and rebuilding it after a reboot or move.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use upnp_description::{DeviceFactory, EventCallback, Service, StateVariable};
//! use upnp_events::{EventConfig, EventHandlerRegister, ProfileDevice};
//! use upnp_requester::ReqwestRequester;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let requester = Arc::new(ReqwestRequester::new()?);
//! let device = DeviceFactory::new(requester.clone())
//!     .create_device("http://192.168.1.10:1400/xml/device_description.xml")
//!     .await?;
//!
//! let register = EventHandlerRegister::new(requester, EventConfig::default());
//! let handler = register.add_device(&device).await?;
//!
//! let mut service_types = HashMap::new();
//! service_types.insert(
//!     "RC".to_string(),
//!     vec!["urn:schemas-upnp-org:service:RenderingControl:1".to_string()],
//! );
//! let on_event: EventCallback = Arc::new(|service: &Service, changed: &[Arc<StateVariable>]| {
//!     for variable in changed {
//!         println!("{} {} = {:?}", service.service_id(), variable.name(), variable.value());
//!     }
//! });
//! let mut profile = ProfileDevice::new(device.clone(), Some(handler), service_types, Some(on_event));
//! profile.subscribe_services(true).await?;
//! // ...
//! profile.unsubscribe_services().await;
//! register.remove_device(&device).await?;
//! # Ok(())
//! # }
//! ```

mod backlog;
mod config;
mod error;
mod handler;
mod profile;
mod propertyset;
mod register;
mod updater;

pub use config::EventConfig;
pub use error::{EventError, Result};
pub use handler::{
    EventHandler, SubscriptionRecord, SubscriptionTarget, STATUS_BAD_REQUEST, STATUS_OK,
    STATUS_PRECONDITION_FAILED,
};
pub use profile::{
    find_device_of_type, is_profile_device, ProfileDevice, ResubscribeTask, RESUBSCRIBE_TOLERANCE,
    SUBSCRIBE_TIMEOUT,
};
pub use propertyset::parse_propertyset;
pub use register::{EventHandlerRegister, NotifyServerFactory};
pub use updater::{DeviceReplacedCallback, DeviceUpdater};
