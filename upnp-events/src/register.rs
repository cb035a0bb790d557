//! One event handler per local network interface.
//!
//! Devices on different networks reach us through different local addresses,
//! so each local IP gets its own callback server and [`EventHandler`]. The
//! entry lives as long as at least one device uses it.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use callback_server::{detect_local_ip, CallbackServer, NotifyHandler, NotifyServer};
use tokio::sync::Mutex;
use upnp_description::Device;
use upnp_requester::Requester;

use crate::config::EventConfig;
use crate::error::Result;
use crate::handler::EventHandler;

/// Creates the notify server for a local IP.
pub type NotifyServerFactory =
    Arc<dyn Fn(IpAddr, &EventConfig) -> callback_server::Result<Box<dyn NotifyServer>> + Send + Sync>;

struct RegisterEntry {
    event_handler: Arc<EventHandler>,
    server: Box<dyn NotifyServer>,
    devices: HashSet<String>,
}

/// Event handlers keyed by the local IP used to reach each device.
pub struct EventHandlerRegister {
    requester: Arc<dyn Requester>,
    config: EventConfig,
    server_factory: NotifyServerFactory,
    entries: Mutex<HashMap<IpAddr, RegisterEntry>>,
}

impl EventHandlerRegister {
    /// Register backed by [`CallbackServer`]s on `config.callback_port_range`.
    pub fn new(requester: Arc<dyn Requester>, config: EventConfig) -> Self {
        let server_factory: NotifyServerFactory = Arc::new(
            |local_ip: IpAddr, config: &EventConfig| -> callback_server::Result<Box<dyn NotifyServer>> {
                let server = CallbackServer::with_local_ip(local_ip, config.callback_port_range)?;
                Ok(Box::new(server))
            },
        );
        Self::with_server_factory(requester, config, server_factory)
    }

    pub fn with_server_factory(
        requester: Arc<dyn Requester>,
        config: EventConfig,
        server_factory: NotifyServerFactory,
    ) -> Self {
        Self {
            requester,
            config,
            server_factory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get the event handler for `device`, creating and starting one if needed.
    pub async fn add_device(&self, device: &Device) -> Result<Arc<EventHandler>> {
        let local_ip = detect_local_ip(Some(device.description_url()))?;
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(&local_ip) {
            entry.devices.insert(device.udn().to_string());
            return Ok(Arc::clone(&entry.event_handler));
        }

        let mut server = (self.server_factory)(local_ip, &self.config)?;
        let event_handler = Arc::new(EventHandler::new(
            server.callback_url(),
            Arc::clone(&self.requester),
            self.config.clone(),
        ));
        let notify_handler: Arc<dyn NotifyHandler> = event_handler.clone();
        server.start(notify_handler).await?;
        tracing::info!(
            "Started event handler for {} with callback URL {}",
            local_ip,
            event_handler.callback_url()
        );

        entries.insert(
            local_ip,
            RegisterEntry {
                event_handler: Arc::clone(&event_handler),
                server,
                devices: HashSet::from([device.udn().to_string()]),
            },
        );
        Ok(event_handler)
    }

    /// Release `device`; the handler is stopped and returned when no device uses it anymore.
    pub async fn remove_device(&self, device: &Device) -> Result<Option<Arc<EventHandler>>> {
        let local_ip = detect_local_ip(Some(device.description_url()))?;
        let mut entries = self.entries.lock().await;

        let Some(entry) = entries.get_mut(&local_ip) else {
            tracing::warn!("No event handler registered for {}", device.udn());
            return Ok(None);
        };
        if !entry.devices.remove(device.udn()) {
            tracing::warn!("Device {} was not registered", device.udn());
            return Ok(None);
        }
        if !entry.devices.is_empty() {
            return Ok(None);
        }

        let Some(mut entry) = entries.remove(&local_ip) else {
            return Ok(None);
        };
        // Stopping the server unsubscribes everything through the handler.
        entry.server.stop().await?;
        tracing::info!("Stopped event handler for {}", local_ip);
        Ok(Some(entry.event_handler))
    }

    pub async fn has_event_handler_for_device(&self, device: &Device) -> bool {
        let Ok(local_ip) = detect_local_ip(Some(device.description_url())) else {
            return false;
        };
        self.entries
            .lock()
            .await
            .get(&local_ip)
            .map_or(false, |entry| entry.devices.contains(device.udn()))
    }

    pub async fn handler_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use upnp_description::DeviceInfo;
    use upnp_requester::{HttpRequest, HttpResponse};

    struct NoopRequester;

    #[async_trait]
    impl Requester for NoopRequester {
        async fn http_request(&self, _request: HttpRequest) -> upnp_requester::Result<HttpResponse> {
            Ok(HttpResponse::new(200))
        }
    }

    /// Records start/stop calls instead of binding a port.
    struct FakeServer {
        url: String,
        started: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
        handler: Option<Arc<dyn NotifyHandler>>,
    }

    #[async_trait]
    impl NotifyServer for FakeServer {
        fn callback_url(&self) -> &str {
            &self.url
        }

        async fn start(&mut self, handler: Arc<dyn NotifyHandler>) -> callback_server::Result<()> {
            self.handler = Some(handler);
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&mut self) -> callback_server::Result<()> {
            if let Some(handler) = self.handler.take() {
                handler.unsubscribe_all().await;
            }
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn device(udn: &str) -> Device {
        Device::new(
            DeviceInfo {
                udn: udn.to_string(),
                description_url: "http://127.0.0.1:1400/xml/device_description.xml".to_string(),
                ..Default::default()
            },
            Vec::new(),
            Vec::new(),
        )
    }

    fn register(started: Arc<AtomicUsize>, stopped: Arc<AtomicUsize>) -> EventHandlerRegister {
        let factory: NotifyServerFactory = Arc::new(
            move |local_ip: IpAddr, _config: &EventConfig| -> callback_server::Result<Box<dyn NotifyServer>> {
                Ok(Box::new(FakeServer {
                    url: format!("http://{local_ip}:3400/notify"),
                    started: Arc::clone(&started),
                    stopped: Arc::clone(&stopped),
                    handler: None,
                }))
            },
        );
        EventHandlerRegister::with_server_factory(Arc::new(NoopRequester), EventConfig::default(), factory)
    }

    #[tokio::test]
    async fn test_handler_shared_and_reference_counted() {
        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let register = register(Arc::clone(&started), Arc::clone(&stopped));
        let (first, second) = (device("uuid:one"), device("uuid:two"));

        let handler_a = register.add_device(&first).await.unwrap();
        let handler_b = register.add_device(&second).await.unwrap();
        assert!(Arc::ptr_eq(&handler_a, &handler_b));
        assert_eq!(handler_a.callback_url(), "http://127.0.0.1:3400/notify");
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(register.has_event_handler_for_device(&first).await);

        assert!(register.remove_device(&first).await.unwrap().is_none());
        assert!(!register.has_event_handler_for_device(&first).await);
        assert_eq!(stopped.load(Ordering::SeqCst), 0);

        let removed = register.remove_device(&second).await.unwrap();
        assert!(removed.is_some());
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert_eq!(register.handler_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_unknown_device() {
        let register = register(Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
        assert!(register.remove_device(&device("uuid:ghost")).await.unwrap().is_none());
    }
}
