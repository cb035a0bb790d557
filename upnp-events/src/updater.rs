//! Keeps a device's availability in step with its SSDP advertisements.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use upnp_description::{Device, DeviceFactory};
use upnp_discovery::{SsdpAdvertisementListener, SsdpHeaders, SsdpMessage, SSDP_ST_ROOTDEVICE};

use crate::error::Result;

const NTS_BYEBYE: &str = "ssdp:byebye";
const BOOT_ID: &str = "BOOTID.UPNP.ORG";
const CONFIG_ID: &str = "CONFIGID.UPNP.ORG";

/// Called with the rebuilt device after it rebooted, changed configuration or moved.
pub type DeviceReplacedCallback = Arc<dyn Fn(Arc<Device>) + Send + Sync>;

struct UpdaterState {
    device: Mutex<Arc<Device>>,
    ssdp_headers: Mutex<SsdpHeaders>,
    factory: DeviceFactory,
    on_replaced: Mutex<Option<DeviceReplacedCallback>>,
}

impl UpdaterState {
    /// Location to rebuild the device from, when the advertisement says it changed.
    fn reinit_location(&self, device: &Device, message: &SsdpMessage) -> Option<String> {
        let headers = self.ssdp_headers.lock();
        let mut reinit = false;

        for name in [BOOT_ID, CONFIG_ID] {
            if let Some(value) = message.header(name) {
                let known = headers.get(name);
                if known != Some(value) {
                    tracing::debug!("New {}: {}, old: {:?}", name, value, known);
                    reinit = true;
                }
            }
        }

        let location = message.location()?;
        if location != device.description_url() {
            tracing::debug!("New location: {}, old location: {}", location, device.description_url());
            reinit = true;
        }

        reinit.then(|| location.to_string())
    }

    async fn handle(&self, message: SsdpMessage) -> upnp_description::Result<()> {
        let device = self.device.lock().clone();
        if message.udn() != Some(device.udn()) {
            return Ok(());
        }

        if message.nts() == Some(NTS_BYEBYE) {
            tracing::debug!("Device {} said byebye", device.udn());
            device.set_available(false);
            return Ok(());
        }

        if message.nt() != Some(SSDP_ST_ROOTDEVICE) {
            return Ok(());
        }

        if let Some(location) = self.reinit_location(&device, &message) {
            tracing::debug!("Reinitializing device, location: {}", location);
            let replacement = self.factory.create_device(&location).await?;
            *self.device.lock() = Arc::clone(&replacement);
            *self.ssdp_headers.lock() = message.headers().clone();
            let on_replaced = self.on_replaced.lock().clone();
            if let Some(on_replaced) = on_replaced {
                on_replaced(Arc::clone(&replacement));
            }
            replacement.set_available(true);
            return Ok(());
        }

        // We heard from it
        device.set_available(true);
        Ok(())
    }
}

/// Listens for advertisements of one root device.
///
/// - `ssdp:byebye` marks the device unavailable
/// - `ssdp:alive` / `ssdp:update` for `upnp:rootdevice` mark it available
///   again, and rebuild it when `BOOTID.UPNP.ORG`, `CONFIGID.UPNP.ORG` or the
///   location changed
///
/// A rebuilt device is a new [`Device`]; hold on to [`device`](Self::device)
/// or register [`on_replaced`](Self::on_replaced) rather than keeping the old one.
pub struct DeviceUpdater {
    state: Arc<UpdaterState>,
    source: Option<SocketAddr>,
    target: Option<SocketAddr>,
    listener: Option<SsdpAdvertisementListener>,
}

impl DeviceUpdater {
    pub fn new(device: Arc<Device>, factory: DeviceFactory) -> Self {
        Self {
            state: Arc::new(UpdaterState {
                device: Mutex::new(device),
                ssdp_headers: Mutex::new(SsdpHeaders::new()),
                factory,
                on_replaced: Mutex::new(None),
            }),
            source: None,
            target: None,
            listener: None,
        }
    }

    /// Headers the device was discovered with, for boot and config id comparison.
    pub fn with_ssdp_headers(self, headers: SsdpHeaders) -> Self {
        *self.state.ssdp_headers.lock() = headers;
        self
    }

    pub fn with_addresses(mut self, source: Option<SocketAddr>, target: Option<SocketAddr>) -> Self {
        self.source = source;
        self.target = target;
        self
    }

    pub fn on_replaced<F>(self, callback: F) -> Self
    where
        F: Fn(Arc<Device>) + Send + Sync + 'static,
    {
        *self.state.on_replaced.lock() = Some(Arc::new(callback));
        self
    }

    /// The current device, replaced after a reinitialization.
    pub fn device(&self) -> Arc<Device> {
        self.state.device.lock().clone()
    }

    /// Apply one advertisement.
    pub async fn handle_advertisement(&self, message: SsdpMessage) -> upnp_description::Result<()> {
        self.state.handle(message).await
    }

    pub fn is_running(&self) -> bool {
        self.listener.is_some()
    }

    /// Start listening for advertisements.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        tracing::debug!("Start listening for notifications");

        let mut listener = SsdpAdvertisementListener::new(self.source, self.target)?
            .on_alive(spawn_handler(Arc::clone(&self.state)))
            .on_update(spawn_handler(Arc::clone(&self.state)))
            .on_byebye(spawn_handler(Arc::clone(&self.state)));
        listener.start().await?;
        self.listener = Some(listener);
        Ok(())
    }

    pub async fn stop(&mut self) {
        tracing::debug!("Stop listening for notifications");
        if let Some(mut listener) = self.listener.take() {
            listener.stop().await;
        }
    }
}

/// Listener callback handing each advertisement to a task, as reinitializing fetches documents.
fn spawn_handler(state: Arc<UpdaterState>) -> impl Fn(SsdpMessage) + Send + Sync + 'static {
    move |message: SsdpMessage| {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = state.handle(message).await {
                tracing::warn!("Failed reinitializing device: {}", e);
            }
        });
    }
}
