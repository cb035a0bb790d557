//! Passive listener for SSDP NOTIFY advertisements.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::ssdp::{unspecified_like, DecodeCache, SsdpMessage, NTS_ALIVE, NTS_BYEBYE, NTS_UPDATE};
use crate::transport;

const RECV_BUFFER_SIZE: usize = 8192;

/// Callback invoked with each matching advertisement.
pub type AdvertisementCallback = Arc<dyn Fn(SsdpMessage) + Send + Sync>;

#[derive(Clone, Default)]
struct Callbacks {
    on_alive: Option<AdvertisementCallback>,
    on_byebye: Option<AdvertisementCallback>,
    on_update: Option<AdvertisementCallback>,
}

impl Callbacks {
    fn dispatch(&self, message: SsdpMessage) {
        if message.is_discover() {
            return;
        }

        let callback = match message.nts() {
            Some(NTS_ALIVE) => &self.on_alive,
            Some(NTS_BYEBYE) => &self.on_byebye,
            Some(NTS_UPDATE) => &self.on_update,
            Some(other) => {
                tracing::debug!("Ignoring advertisement with NTS {}", other);
                return;
            }
            None => {
                tracing::debug!("Got non-advertisement packet: {}", message.request_line());
                return;
            }
        };

        if let Some(callback) = callback {
            tracing::debug!(
                "Received advertisement, NTS: {}, USN: {}, remote: {}",
                message.nts().unwrap_or_default(),
                message.usn().unwrap_or("<no USN>"),
                message.remote_addr()
            );
            callback(message);
        }
    }
}

/// Listens on the SSDP port for `ssdp:alive`, `ssdp:byebye` and
/// `ssdp:update` announcements.
///
/// The socket is bound to the unspecified address on the target's port and
/// joins the target multicast group on the source interface.
pub struct SsdpAdvertisementListener {
    source: SocketAddr,
    target: SocketAddr,
    callbacks: Callbacks,
    cache: Arc<DecodeCache>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SsdpAdvertisementListener {
    pub fn new(source: Option<SocketAddr>, target: Option<SocketAddr>) -> Result<Self> {
        let (source, target) = transport::resolve_source_target(source, target)?;
        Ok(Self {
            source,
            target,
            callbacks: Callbacks::default(),
            cache: Arc::new(DecodeCache::new()),
            shutdown_tx: None,
            task: None,
        })
    }

    pub fn on_alive<F>(mut self, callback: F) -> Self
    where
        F: Fn(SsdpMessage) + Send + Sync + 'static,
    {
        self.callbacks.on_alive = Some(Arc::new(callback));
        self
    }

    pub fn on_byebye<F>(mut self, callback: F) -> Self
    where
        F: Fn(SsdpMessage) + Send + Sync + 'static,
    {
        self.callbacks.on_byebye = Some(Arc::new(callback));
        self
    }

    pub fn on_update<F>(mut self, callback: F) -> Self
    where
        F: Fn(SsdpMessage) + Send + Sync + 'static,
    {
        self.callbacks.on_update = Some(Arc::new(callback));
        self
    }

    pub fn with_cache(mut self, cache: Arc<DecodeCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Address the listening socket is bound to.
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(unspecified_like(&self.source), self.target.port())
    }

    /// Open the socket and start receiving in a background task.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            tracing::debug!("Advertisement listener already running");
            return Ok(());
        }

        let socket = transport::open_socket(&self.source, &self.target)?;
        let socket = transport::bind(socket, self.bind_address())?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let callbacks = self.callbacks.clone();
        let cache = Arc::clone(&self.cache);

        tracing::debug!(
            "Started advertisement listener, source: {}, target: {}",
            self.source,
            self.target
        );

        self.task = Some(tokio::spawn(receive_loop(socket, callbacks, cache, shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);
        Ok(())
    }

    /// Stop receiving and close the socket.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Advertisement listener task ended abnormally: {}", e);
            }
        }
        tracing::debug!("Stopped advertisement listener");
    }
}

impl Drop for SsdpAdvertisementListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn receive_loop(
    socket: UdpSocket,
    callbacks: Callbacks,
    cache: Arc<DecodeCache>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let local_addr = socket.local_addr().ok();
    let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            received = socket.recv_from(&mut buffer) => match received {
                Ok((len, remote_addr)) => {
                    if let Some(message) = cache.decode(&buffer[..len], local_addr, remote_addr) {
                        callbacks.dispatch(message);
                    }
                }
                Err(e) => tracing::debug!("Error receiving advertisement: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssdp::decode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn notify(nts: &str) -> Vec<u8> {
        format!(
            "NOTIFY * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nNT: upnp:rootdevice\r\nNTS: {nts}\r\nUSN: uuid:dev::upnp:rootdevice\r\nLOCATION: http://10.0.0.2/desc.xml\r\n\r\n"
        )
        .into_bytes()
    }

    fn counting_callbacks() -> (Callbacks, [Arc<AtomicUsize>; 3]) {
        let counters = [
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        ];
        let make = |counter: &Arc<AtomicUsize>| -> AdvertisementCallback {
            let counter = Arc::clone(counter);
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };
        let callbacks = Callbacks {
            on_alive: Some(make(&counters[0])),
            on_byebye: Some(make(&counters[1])),
            on_update: Some(make(&counters[2])),
        };
        (callbacks, counters)
    }

    #[test]
    fn test_dispatch_by_nts() {
        let (callbacks, counters) = counting_callbacks();
        let remote: SocketAddr = "10.0.0.2:1900".parse().unwrap();

        for nts in [NTS_ALIVE, NTS_ALIVE, NTS_BYEBYE, NTS_UPDATE, "ssdp:other"] {
            callbacks.dispatch(decode(&notify(nts), None, remote).unwrap());
        }
        let response = decode(b"HTTP/1.1 200 OK\r\nST: ssdp:all\r\n\r\n", None, remote).unwrap();
        callbacks.dispatch(response);

        let counts: Vec<usize> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(counts, vec![2, 1, 1]);
    }

    #[test]
    fn test_missing_callback_is_ignored() {
        let remote: SocketAddr = "10.0.0.2:1900".parse().unwrap();
        Callbacks::default().dispatch(decode(&notify(NTS_ALIVE), None, remote).unwrap());
    }

    #[tokio::test]
    async fn test_listener_receives_unicast_notify() {
        let port = std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let target: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut listener = SsdpAdvertisementListener::new(None, Some(target))
            .unwrap()
            .on_byebye(move |msg| {
                let _ = tx.send(msg.udn().map(str::to_string));
            });
        listener.start().await.unwrap();
        assert!(listener.is_running());

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&notify(NTS_BYEBYE), target).await.unwrap();

        let udn = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(udn.as_deref(), Some("uuid:dev"));

        listener.stop().await;
        assert!(!listener.is_running());
    }
}
