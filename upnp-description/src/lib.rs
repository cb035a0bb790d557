//! UPnP device descriptions
//!
//! Turns a description URL into a linked, typed [`Device`] graph: services
//! with their state variables and actions, embedded devices and icons. State
//! variables keep the last value received from events and validate updates
//! against the rules from the service description.
//!
//! ```no_run
//! use std::sync::Arc;
//! use upnp_description::{DeviceFactory, Value};
//! use upnp_requester::ReqwestRequester;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = DeviceFactory::new(Arc::new(ReqwestRequester::new()?));
//! let device = factory.create_device("http://192.168.1.10:1400/xml/device_description.xml").await?;
//!
//! if let Some(rendering) = device.find_service("urn:schemas-upnp-org:service:RenderingControl:1") {
//!     let volume = rendering.state_variable("Volume").expect("declared by the SCPD");
//!     volume.set_upnp_value("30")?;
//!     assert_eq!(volume.value(), Some(Value::UnsignedInteger(30)));
//! }
//! # Ok(())
//! # }
//! ```

mod data_type;
mod device;
mod error;
mod factory;
mod hooks;
mod service;
mod state_variable;
pub mod xml;

pub use data_type::{parse_date_time, CoercionError, DataType, UnknownDataType, Value};
pub use device::{Device, DeviceIcon, DeviceInfo};
pub use error::{DescriptionError, Result};
pub use factory::DeviceFactory;
pub use hooks::{DefaultSpecHooks, SpecHooks};
pub use service::{absolute_url, Action, Argument, Direction, EventCallback, Service, ServiceInfo, ServiceKey};
pub use state_variable::{AllowedValueRange, StateValue, StateVariable, StateVariableSpec};
