//! Profile devices: a device plus the subscriptions a consumer cares about.
//!
//! A [`ProfileDevice`] subscribes to the services listed in its service-type
//! table and can keep those subscriptions alive with a background
//! [`ResubscribeTask`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use upnp_description::{Action, Device, DeviceIcon, EventCallback, Service, StateVariable};
use upnp_discovery::{SsdpMessage, SSDP_ST_ALL};

use crate::config::EventConfig;
use crate::error::{EventError, Result};
use crate::handler::EventHandler;

/// Timeout requested for profile subscriptions
pub const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(9 * 60);

/// Subscriptions are renewed this long before they expire
pub const RESUBSCRIBE_TOLERANCE: Duration = Duration::from_secs(60);

/// First device in `device`'s tree whose type is one of `device_types`.
pub fn find_device_of_type(device: &Arc<Device>, device_types: &[&str]) -> Option<Arc<Device>> {
    if device_types.contains(&device.device_type()) {
        return Some(Arc::clone(device));
    }
    device
        .embedded_devices()
        .iter()
        .find_map(|embedded| find_device_of_type(embedded, device_types))
}

/// True when `device` has a device of one of `device_types` that provides every service in `service_ids`.
pub fn is_profile_device(device: &Arc<Device>, device_types: &[&str], service_ids: &[&str]) -> bool {
    let Some(profile_device) = find_device_of_type(device, device_types) else {
        return false;
    };
    let available: Vec<Arc<Service>> = profile_device.all_services();
    service_ids
        .iter()
        .all(|id| available.iter().any(|service| service.service_id() == *id))
}

/// State shared between a profile device and its resubscription loop.
struct Subscriptions {
    device: Arc<Device>,
    on_event: Option<EventCallback>,
    /// SID to renewal deadline
    deadlines: Mutex<HashMap<String, Instant>>,
    subscribe_timeout: Duration,
    tolerance: Duration,
}

impl Subscriptions {
    fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.lock().values().min().copied()
    }

    fn is_empty(&self) -> bool {
        self.deadlines.lock().is_empty()
    }

    /// Remove `sid` if its deadline is still at or before `threshold`.
    fn take_due(&self, sid: &str, threshold: Option<Instant>) -> bool {
        let mut deadlines = self.deadlines.lock();
        match deadlines.get(sid) {
            Some(deadline) if threshold.map_or(true, |t| *deadline <= t) => {
                deadlines.remove(sid);
                true
            }
            _ => false,
        }
    }

    fn notify_failure(&self, service: &Service) {
        if let Some(on_event) = &self.on_event {
            on_event(service, &[]);
        }
    }

    /// Renew every subscription due by `threshold`, or all of them when `None`.
    async fn resubscribe(
        &self,
        event_handler: &EventHandler,
        threshold: Option<Instant>,
        notify_errors: bool,
    ) -> Result<()> {
        let now = Instant::now();
        let sids: Vec<String> = self.deadlines.lock().keys().cloned().collect();

        for sid in sids {
            if !self.take_due(&sid, threshold) {
                tracing::trace!("Skipping {}, renewal not due", sid);
                continue;
            }
            let Some(service) = event_handler.service_for_sid(&sid) else {
                tracing::error!("Subscription for {} was lost", sid);
                continue;
            };

            match event_handler
                .resubscribe(sid.as_str(), Some(self.subscribe_timeout))
                .await
            {
                Ok((new_sid, timeout)) => {
                    self.deadlines.lock().insert(new_sid, now + timeout);
                }
                Err(e) => {
                    if e.is_connectivity() {
                        self.device.set_available(false);
                    }
                    tracing::warn!("Failed (re-)subscribing to: {}, reason: {}", sid, e);
                    if notify_errors {
                        self.notify_failure(&service);
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Handle to a running resubscription loop.
///
/// The loop renews subscriptions shortly before they expire and ends by
/// itself once there are no subscriptions left.
pub struct ResubscribeTask {
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl ResubscribeTask {
    fn start(subscriptions: Arc<Subscriptions>, event_handler: Arc<EventHandler>, notify_errors: bool) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(Self::resubscribe_loop(
            subscriptions,
            event_handler,
            notify_errors,
            shutdown_rx,
        ));
        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the loop and wait for it to exit, including any renewal in flight.
    ///
    /// Returns the error that ended the loop, if any.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(()).await;
        }

        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| EventError::Shutdown(format!("Resubscribe task failed: {e}")))?,
            None => Ok(()),
        }
    }

    async fn resubscribe_loop(
        subscriptions: Arc<Subscriptions>,
        event_handler: Arc<EventHandler>,
        notify_errors: bool,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        tracing::debug!("Resubscribe loop started");

        while let Some(next_deadline) = subscriptions.next_deadline() {
            let now = Instant::now();
            let wake_at = next_deadline
                .checked_sub(subscriptions.tolerance)
                .unwrap_or(now);

            if wake_at > now {
                tracing::debug!("Resubscribing in {:?}", wake_at - now);
                tokio::select! {
                    _ = tokio::time::sleep_until(wake_at) => {}
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Resubscribe loop stopped");
                        return Ok(());
                    }
                }
            } else if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
                tracing::debug!("Resubscribe loop stopped");
                return Ok(());
            }

            let threshold = Instant::now() + subscriptions.tolerance;
            subscriptions
                .resubscribe(&event_handler, Some(threshold), notify_errors)
                .await?;
        }

        tracing::debug!("Resubscribe loop ended because of no subscriptions");
        Ok(())
    }
}

impl Drop for ResubscribeTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// A device together with the services a consumer subscribes to.
///
/// `service_types` maps a short alias (e.g. `"RC"`) to the service types
/// accepted for it, so one profile can cover several service versions.
pub struct ProfileDevice {
    device: Arc<Device>,
    event_handler: Option<Arc<EventHandler>>,
    service_types: HashMap<String, Vec<String>>,
    subscriptions: Arc<Subscriptions>,
    notify_errors: bool,
    resubscriber: Option<ResubscribeTask>,
}

impl ProfileDevice {
    pub fn new(
        device: Arc<Device>,
        event_handler: Option<Arc<EventHandler>>,
        service_types: HashMap<String, Vec<String>>,
        on_event: Option<EventCallback>,
    ) -> Self {
        Self::with_config(device, event_handler, service_types, on_event, &EventConfig::default())
    }

    /// Like [`new`](Self::new), taking timeouts and error reporting from `config`.
    pub fn with_config(
        device: Arc<Device>,
        event_handler: Option<Arc<EventHandler>>,
        service_types: HashMap<String, Vec<String>>,
        on_event: Option<EventCallback>,
        config: &EventConfig,
    ) -> Self {
        let subscriptions = Arc::new(Subscriptions {
            device: Arc::clone(&device),
            on_event,
            deadlines: Mutex::new(HashMap::new()),
            subscribe_timeout: config.subscribe_timeout,
            tolerance: config.resubscribe_tolerance,
        });
        Self {
            device,
            event_handler,
            service_types,
            subscriptions,
            notify_errors: config.notify_errors,
            resubscriber: None,
        }
    }

    /// Search for devices of `device_types`, calling `on_match` for each matching response.
    ///
    /// Responses are matched on their `ST` header, or `NT` when there is no `ST`.
    pub async fn search<F>(device_types: &[&str], timeout: Duration, mut on_match: F) -> Result<()>
    where
        F: FnMut(SsdpMessage) + Send,
    {
        let device_types: Vec<String> = device_types.iter().map(|t| t.to_string()).collect();
        upnp_discovery::search(None, SSDP_ST_ALL, timeout, move |message: SsdpMessage| {
            let matches = message
                .st()
                .or_else(|| message.nt())
                .map_or(false, |t| device_types.iter().any(|d| d == t));
            if matches {
                on_match(message);
            }
        })
        .await?;
        Ok(())
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn name(&self) -> &str {
        self.device.friendly_name()
    }

    pub fn manufacturer(&self) -> &str {
        &self.device.info().manufacturer
    }

    pub fn model_name(&self) -> &str {
        &self.device.info().model_name
    }

    pub fn udn(&self) -> &str {
        self.device.udn()
    }

    pub fn device_type(&self) -> &str {
        self.device.device_type()
    }

    /// URL of the largest icon, preferring deeper colour and then PNG over JPEG over GIF.
    pub fn icon(&self) -> Option<&str> {
        self.device
            .icons()
            .iter()
            .filter(|icon| !icon.url.is_empty())
            .max_by_key(|icon| icon_rank(icon))
            .map(|icon| icon.url.as_str())
    }

    /// First service matching one of the types registered under `alias`.
    pub fn service(&self, alias: &str) -> Option<Arc<Service>> {
        self.service_types
            .get(alias)?
            .iter()
            .find_map(|service_type| self.device.find_service(service_type))
    }

    pub fn state_variable(&self, alias: &str, name: &str) -> Option<Arc<StateVariable>> {
        self.service(alias)?.state_variable(name).cloned()
    }

    pub fn action(&self, alias: &str, name: &str) -> Option<Action> {
        self.service(alias)?.action(name).cloned()
    }

    pub fn interesting_service(&self, service: &Service) -> bool {
        self.service_types
            .values()
            .any(|types| types.iter().any(|t| t == service.service_type()))
    }

    pub fn is_subscribed(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Subscribe to all interesting services, or renew existing subscriptions.
    ///
    /// With `auto_resubscribe` a background loop keeps the subscriptions alive
    /// and `None` is returned. Otherwise the returned duration is how long the
    /// caller can wait before calling this again. On failure every subscription
    /// is cancelled before the error is returned.
    pub async fn subscribe_services(&mut self, auto_resubscribe: bool) -> Result<Option<Duration>> {
        let Some(event_handler) = self.event_handler.clone() else {
            tracing::info!("No event handler, event handling disabled");
            return Ok(None);
        };

        let now = Instant::now();
        let result = if self.is_subscribed() {
            self.subscriptions.resubscribe(&event_handler, None, false).await
        } else {
            self.subscribe_interesting(&event_handler, now).await
        };

        if let Err(e) = result {
            if e.is_response() && !self.is_subscribed() {
                tracing::info!("Device rejected subscription request: {}", e);
            } else {
                tracing::warn!("Failed subscribing to service: {}", e);
            }
            self.unsubscribe_services().await;
            return Err(e);
        }

        let Some(next_deadline) = self.subscriptions.next_deadline() else {
            return Ok(None);
        };

        if auto_resubscribe {
            self.ensure_resubscriber(event_handler);
            return Ok(None);
        }

        Ok(Some(
            next_deadline
                .saturating_duration_since(now)
                .saturating_sub(self.subscriptions.tolerance),
        ))
    }

    async fn subscribe_interesting(&self, event_handler: &EventHandler, now: Instant) -> Result<()> {
        for service in self.device.all_services() {
            if !self.interesting_service(&service) {
                continue;
            }

            tracing::debug!("Subscribing to service: {}", service.key());
            service.set_on_event(self.subscriptions.on_event.clone());
            let (sid, timeout) = event_handler
                .subscribe(&service, Some(self.subscriptions.subscribe_timeout))
                .await?;
            self.subscriptions.deadlines.lock().insert(sid, now + timeout);
        }
        Ok(())
    }

    fn ensure_resubscriber(&mut self, event_handler: Arc<EventHandler>) {
        if self.resubscriber.as_ref().map_or(false, |task| !task.is_finished()) {
            return;
        }
        tracing::debug!("Creating resubscribe task for {}", self.udn());
        self.resubscriber = Some(ResubscribeTask::start(
            Arc::clone(&self.subscriptions),
            event_handler,
            self.notify_errors,
        ));
    }

    /// Stop the resubscription loop, then unsubscribe from every service, ignoring failures.
    pub async fn unsubscribe_services(&mut self) {
        if let Some(task) = self.resubscriber.take() {
            if let Err(e) = task.stop().await {
                tracing::debug!("Resubscribe loop ended with: {}", e);
            }
        }

        let sids: Vec<String> = self
            .subscriptions
            .deadlines
            .lock()
            .drain()
            .map(|(sid, _)| sid)
            .collect();

        let Some(event_handler) = &self.event_handler else {
            return;
        };

        join_all(sids.iter().map(|sid| async move {
            match event_handler.unsubscribe(sid.as_str()).await {
                Ok(()) => {}
                Err(EventError::UnknownSubscription(_)) => tracing::warn!(
                    "{} was already unsubscribed, the notify server was probably stopped first",
                    sid
                ),
                Err(e) => tracing::debug!("Failed unsubscribing from: {}, reason: {}", sid, e),
            }
        }))
        .await;
    }
}

fn icon_rank(icon: &DeviceIcon) -> (u64, u32, u8) {
    let mime_preference = match icon.mimetype.as_str() {
        "image/png" => 3,
        "image/jpeg" => 2,
        "image/gif" => 1,
        _ => 0,
    };
    (
        u64::from(icon.width) * u64::from(icon.height),
        icon.depth,
        mime_preference,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use upnp_description::{DeviceInfo, ServiceInfo};

    fn icon(mimetype: &str, size: u32, depth: u32, url: &str) -> DeviceIcon {
        DeviceIcon {
            mimetype: mimetype.to_string(),
            width: size,
            height: size,
            depth,
            url: url.to_string(),
        }
    }

    fn service(service_type: &str, service_id: &str) -> Arc<Service> {
        Arc::new(Service::new(
            ServiceInfo {
                service_id: service_id.to_string(),
                service_type: service_type.to_string(),
                ..Default::default()
            },
            "uuid:x",
            "http://10.0.0.1/desc.xml",
            Vec::new(),
            Vec::new(),
        ))
    }

    fn device(device_type: &str, icons: Vec<DeviceIcon>, services: Vec<Arc<Service>>, embedded: Vec<Arc<Device>>) -> Arc<Device> {
        Arc::new(Device::new(
            DeviceInfo {
                device_type: device_type.to_string(),
                udn: format!("uuid:{device_type}"),
                icons,
                ..Default::default()
            },
            services,
            embedded,
        ))
    }

    fn renderer_tree() -> Arc<Device> {
        let renderer = device(
            "urn:schemas-upnp-org:device:MediaRenderer:1",
            Vec::new(),
            vec![
                service("urn:schemas-upnp-org:service:RenderingControl:1", "urn:upnp-org:serviceId:RenderingControl"),
                service("urn:schemas-upnp-org:service:AVTransport:1", "urn:upnp-org:serviceId:AVTransport"),
            ],
            Vec::new(),
        );
        device("urn:schemas-upnp-org:device:ZonePlayer:1", Vec::new(), Vec::new(), vec![renderer])
    }

    #[test]
    fn test_icon_preference() {
        let root = device(
            "root",
            vec![
                icon("image/gif", 120, 24, "/big.gif"),
                icon("image/png", 48, 24, "/small.png"),
                icon("image/png", 120, 24, "/big.png"),
                icon("image/jpeg", 120, 24, "/big.jpg"),
                icon("image/png", 240, 8, ""),
            ],
            Vec::new(),
            Vec::new(),
        );
        let profile = ProfileDevice::new(root, None, HashMap::new(), None);
        assert_eq!(profile.icon(), Some("/big.png"));

        let bare = ProfileDevice::new(device("root", Vec::new(), Vec::new(), Vec::new()), None, HashMap::new(), None);
        assert_eq!(bare.icon(), None);
    }

    #[test]
    fn test_find_device_of_type() {
        let root = renderer_tree();
        let found = find_device_of_type(&root, &["urn:schemas-upnp-org:device:MediaRenderer:1"]).unwrap();
        assert_eq!(found.udn(), "uuid:urn:schemas-upnp-org:device:MediaRenderer:1");
        assert!(find_device_of_type(&root, &["urn:schemas-upnp-org:device:MediaServer:1"]).is_none());

        let renderer_types = ["urn:schemas-upnp-org:device:MediaRenderer:1"];
        assert!(is_profile_device(&root, &renderer_types, &["urn:upnp-org:serviceId:RenderingControl"]));
        assert!(!is_profile_device(&root, &renderer_types, &["urn:upnp-org:serviceId:ConnectionManager"]));
    }

    #[test]
    fn test_service_aliases() {
        let root = renderer_tree();
        let mut service_types = HashMap::new();
        service_types.insert(
            "RC".to_string(),
            vec![
                "urn:schemas-upnp-org:service:RenderingControl:3".to_string(),
                "urn:schemas-upnp-org:service:RenderingControl:1".to_string(),
            ],
        );
        let profile = ProfileDevice::new(root, None, service_types, None);

        let rc = profile.service("RC").unwrap();
        assert_eq!(rc.service_type(), "urn:schemas-upnp-org:service:RenderingControl:1");
        assert!(profile.interesting_service(&rc));
        assert!(profile.service("AVT").is_none());
        assert!(profile.state_variable("RC", "Volume").is_none());

        let avt = profile.device().find_service("urn:schemas-upnp-org:service:AVTransport:1").unwrap();
        assert!(!profile.interesting_service(&avt));
    }

    #[tokio::test]
    async fn test_subscribe_without_event_handler() {
        let mut profile = ProfileDevice::new(renderer_tree(), None, HashMap::new(), None);
        assert_eq!(profile.subscribe_services(true).await.unwrap(), None);
        assert!(!profile.is_subscribed());
        profile.unsubscribe_services().await;
    }
}
