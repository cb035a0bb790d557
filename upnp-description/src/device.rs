//! Devices and their icons.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::service::Service;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIcon {
    pub mimetype: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Absolute URL
    pub url: String,
}

/// Fields of a `device` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_type: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub manufacturer_url: String,
    pub model_description: Option<String>,
    pub model_name: String,
    pub model_number: Option<String>,
    pub model_url: Option<String>,
    pub serial_number: Option<String>,
    pub udn: String,
    pub upc: String,
    pub presentation_url: String,
    /// URL the description document was fetched from
    pub description_url: String,
    pub icons: Vec<DeviceIcon>,
}

/// A UPnP device with its services and embedded devices.
///
/// Everything except the availability flag is fixed after construction.
#[derive(Debug)]
pub struct Device {
    info: DeviceInfo,
    services: Vec<Arc<Service>>,
    embedded_devices: Vec<Arc<Device>>,
    available: AtomicBool,
}

impl Device {
    pub fn new(info: DeviceInfo, services: Vec<Arc<Service>>, embedded_devices: Vec<Arc<Device>>) -> Self {
        Self {
            info,
            services,
            embedded_devices,
            available: AtomicBool::new(true),
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn udn(&self) -> &str {
        &self.info.udn
    }

    pub fn device_type(&self) -> &str {
        &self.info.device_type
    }

    pub fn friendly_name(&self) -> &str {
        &self.info.friendly_name
    }

    pub fn description_url(&self) -> &str {
        &self.info.description_url
    }

    pub fn icons(&self) -> &[DeviceIcon] {
        &self.info.icons
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn embedded_devices(&self) -> &[Arc<Device>] {
        &self.embedded_devices
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// This device followed by all embedded devices, depth first.
    pub fn all_devices(&self) -> Vec<&Device> {
        let mut devices = vec![self];
        for embedded in &self.embedded_devices {
            devices.extend(embedded.all_devices());
        }
        devices
    }

    /// Services of this device and all embedded devices.
    pub fn all_services(&self) -> Vec<Arc<Service>> {
        self.all_devices()
            .into_iter()
            .flat_map(|device| device.services.iter().cloned())
            .collect()
    }

    /// First device in [`all_devices`](Self::all_devices) order with the given type.
    pub fn find_device(&self, device_type: &str) -> Option<&Device> {
        self.all_devices()
            .into_iter()
            .find(|device| device.info.device_type == device_type)
    }

    /// First service of the given type on this device or any embedded device.
    pub fn find_service(&self, service_type: &str) -> Option<Arc<Service>> {
        self.all_services()
            .into_iter()
            .find(|service| service.service_type() == service_type)
    }

    /// Service of the given type on this device only.
    pub fn service(&self, service_type: &str) -> Option<&Arc<Service>> {
        self.services
            .iter()
            .find(|service| service.service_type() == service_type)
    }

    pub fn service_by_id(&self, service_id: &str) -> Option<&Arc<Service>> {
        self.services
            .iter()
            .find(|service| service.service_id() == service_id)
    }

    pub fn has_service(&self, service_type: &str) -> bool {
        self.service(service_type).is_some()
    }
}
