//! Combined search and advertisement listener backed by a device tracker.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::advertisement::SsdpAdvertisementListener;
use crate::error::Result;
use crate::search::SsdpSearch;
use crate::ssdp::{DecodeCache, SsdpMessage, SSDP_MX, SSDP_ST_ALL};
use crate::tracker::{SsdpChange, SsdpDevice, SsdpDeviceTracker};
use crate::transport;

/// Called with every device change worth reporting.
pub type SsdpListenerCallback = Arc<dyn Fn(SsdpChange) + Send + Sync>;

/// Feeds search responses and advertisements into a shared
/// [`SsdpDeviceTracker`] and reports what changed.
///
/// Advertisements are received in the background between [`start`](Self::start)
/// and [`stop`](Self::stop); each [`search`](Self::search) sends one M-SEARCH
/// and waits for its responses.
pub struct SsdpListener {
    source: SocketAddr,
    target: SocketAddr,
    search_timeout: Duration,
    callback: SsdpListenerCallback,
    tracker: Arc<Mutex<SsdpDeviceTracker>>,
    cache: Arc<DecodeCache>,
    advertisement_listener: Option<SsdpAdvertisementListener>,
}

impl SsdpListener {
    pub fn new<F>(callback: F, source: Option<SocketAddr>, target: Option<SocketAddr>) -> Result<Self>
    where
        F: Fn(SsdpChange) + Send + Sync + 'static,
    {
        let (source, target) = transport::resolve_source_target(source, target)?;
        Ok(Self {
            source,
            target,
            search_timeout: Duration::from_secs(SSDP_MX),
            callback: Arc::new(callback),
            tracker: Arc::new(Mutex::new(SsdpDeviceTracker::new())),
            cache: Arc::new(DecodeCache::new()),
            advertisement_listener: None,
        })
    }

    /// Share a tracker with other listeners, e.g. one per interface.
    pub fn with_tracker(mut self, tracker: Arc<Mutex<SsdpDeviceTracker>>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub fn with_cache(mut self, cache: Arc<DecodeCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn tracker(&self) -> &Arc<Mutex<SsdpDeviceTracker>> {
        &self.tracker
    }

    /// Snapshot of the known devices, keyed by UDN.
    pub fn devices(&self) -> HashMap<String, SsdpDevice> {
        self.tracker.lock().devices().clone()
    }

    pub fn is_running(&self) -> bool {
        self.advertisement_listener
            .as_ref()
            .map_or(false, SsdpAdvertisementListener::is_running)
    }

    /// Start receiving advertisements.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            tracing::debug!("SSDP listener already running");
            return Ok(());
        }

        let mut listener = SsdpAdvertisementListener::new(Some(self.source), Some(self.target))?
            .with_cache(Arc::clone(&self.cache))
            .on_alive(self.track(SsdpDeviceTracker::see_advertisement))
            .on_update(self.track(SsdpDeviceTracker::see_advertisement))
            .on_byebye(self.track(SsdpDeviceTracker::unsee_advertisement));
        listener.start().await?;

        self.advertisement_listener = Some(listener);
        Ok(())
    }

    /// Search for all devices and services, feeding the responses to the tracker.
    pub async fn search(&self) -> Result<()> {
        self.search_with_override(self.target).await
    }

    /// Like [`search`](Self::search), sending the packet to `override_target`.
    pub async fn search_with_override(&self, override_target: SocketAddr) -> Result<()> {
        let search = SsdpSearch::new(SSDP_ST_ALL, self.search_timeout, Some(self.source), Some(self.target))?
            .with_cache(Arc::clone(&self.cache));
        search
            .search_with_override(override_target, |message| self.on_search(&message))
            .await
    }

    /// Drop expired devices, reporting nothing; returns the purged devices.
    pub fn purge_devices(&self) -> Vec<SsdpDevice> {
        self.tracker.lock().purge_devices(chrono::Utc::now())
    }

    pub async fn stop(&mut self) {
        if let Some(mut listener) = self.advertisement_listener.take() {
            listener.stop().await;
        }
    }

    /// Advertisement callback that applies `see` to the tracker and reports the change.
    fn track<F>(&self, see: F) -> impl Fn(SsdpMessage) + Send + Sync + 'static
    where
        F: Fn(&mut SsdpDeviceTracker, &SsdpMessage) -> Option<SsdpChange> + Send + Sync + 'static,
    {
        let tracker = Arc::clone(&self.tracker);
        let callback = Arc::clone(&self.callback);
        move |message: SsdpMessage| {
            let change = {
                let mut tracker = tracker.lock();
                see(&mut *tracker, &message)
            };
            if let Some(change) = change {
                callback(change);
            }
        }
    }

    fn on_search(&self, message: &SsdpMessage) {
        let change = self.tracker.lock().see_search(message);
        if let Some(change) = change {
            (self.callback)(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::SsdpSource;
    use tokio::net::UdpSocket;
    use tokio::sync::mpsc;

    fn notify(nts: &str) -> Vec<u8> {
        format!(
            "NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nCACHE-CONTROL: max-age=1800\r\nNT: upnp:rootdevice\r\nNTS: {nts}\r\nUSN: uuid:dev::upnp:rootdevice\r\nLOCATION: http://10.0.0.2/desc.xml\r\n\r\n"
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn test_alive_and_byebye_update_tracker() {
        let port = std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let target: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut listener = SsdpListener::new(
            move |change: SsdpChange| {
                let _ = tx.send((change.device.udn().to_string(), change.source));
            },
            None,
            Some(target),
        )
        .unwrap();
        listener.start().await.unwrap();
        assert!(listener.is_running());

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        sender.send_to(&notify("ssdp:alive"), target).await.unwrap();
        let seen = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, ("uuid:dev".to_string(), SsdpSource::AdvertisementAlive));
        assert!(listener.devices().contains_key("uuid:dev"));

        sender.send_to(&notify("ssdp:byebye"), target).await.unwrap();
        let gone = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gone, ("uuid:dev".to_string(), SsdpSource::AdvertisementByebye));
        assert!(listener.devices().is_empty());
        assert!(rx.try_recv().is_err());

        listener.stop().await;
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn test_listeners_share_a_tracker() {
        let tracker = Arc::new(Mutex::new(SsdpDeviceTracker::new()));
        let first = SsdpListener::new(|_| {}, None, Some("127.0.0.1:1900".parse().unwrap()))
            .unwrap()
            .with_tracker(Arc::clone(&tracker));
        let second = SsdpListener::new(|_| {}, None, Some("127.0.0.1:1900".parse().unwrap()))
            .unwrap()
            .with_tracker(Arc::clone(&tracker));

        let message = crate::ssdp::decode(&notify("ssdp:alive"), None, "10.0.0.2:1900".parse().unwrap()).unwrap();
        first.tracker().lock().see_advertisement(&message);
        assert_eq!(second.devices().len(), 1);
        assert!(second.purge_devices().is_empty());
    }
}
