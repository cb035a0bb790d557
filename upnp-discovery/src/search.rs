//! Active SSDP search (M-SEARCH).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::Result;
use crate::ssdp::{build_search_packet, host_string, DecodeCache, SsdpMessage};
use crate::transport;

const RECV_BUFFER_SIZE: usize = 8192;

/// One M-SEARCH exchange from a resolved source towards a target.
///
/// Each call to [`SsdpSearch::search`] opens its own socket, which is closed
/// when the call returns or its future is dropped, so cancelling a search
/// stops the OS from delivering further responses.
pub struct SsdpSearch {
    source: SocketAddr,
    target: SocketAddr,
    search_target: String,
    timeout: Duration,
    cache: Arc<DecodeCache>,
}

impl SsdpSearch {
    /// Prepare a search for `search_target` (e.g. `ssdp:all`).
    ///
    /// Missing `source`/`target` are filled in by
    /// [`transport::resolve_source_target`].
    pub fn new(
        search_target: impl Into<String>,
        timeout: Duration,
        source: Option<SocketAddr>,
        target: Option<SocketAddr>,
    ) -> Result<Self> {
        let (source, target) = transport::resolve_source_target(source, target)?;
        Ok(Self {
            source,
            target,
            search_target: search_target.into(),
            timeout,
            cache: Arc::new(DecodeCache::new()),
        })
    }

    /// Share a decode cache with other searches or listeners.
    pub fn with_cache(mut self, cache: Arc<DecodeCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn source(&self) -> SocketAddr {
        self.source
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send one M-SEARCH and report every valid response until the timeout.
    pub async fn search<F>(&self, on_response: F) -> Result<()>
    where
        F: FnMut(SsdpMessage) + Send,
    {
        self.search_with_override(self.target, on_response).await
    }

    /// Like [`search`](Self::search), but send the packet to `override_target`.
    ///
    /// The `HOST` header and the unicast response filter still use the
    /// configured target.
    pub async fn search_with_override<F>(
        &self,
        override_target: SocketAddr,
        mut on_response: F,
    ) -> Result<()>
    where
        F: FnMut(SsdpMessage) + Send,
    {
        let socket = transport::open_socket(&self.source, &self.target)?;
        let socket = transport::bind(socket, self.source)?;
        let local_addr = socket.local_addr().ok();

        let mx = self.timeout.as_secs().max(1);
        let packet = build_search_packet(&self.target, mx, &self.search_target);
        tracing::debug!(
            "Sending SEARCH packet, st: {}, target: {}",
            self.search_target,
            override_target
        );
        socket.send_to(&packet, override_target).await?;

        let target_host = if self.target.ip().is_multicast() {
            None
        } else {
            Some(host_string(&self.target))
        };

        let deadline = Instant::now() + self.timeout;
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            let received =
                match tokio::time::timeout_at(deadline, socket.recv_from(&mut buffer)).await {
                    Err(_) => break,
                    Ok(received) => received,
                };

            let (len, remote_addr) = match received {
                Ok(received) => received,
                Err(e) => {
                    tracing::debug!("Error receiving search response: {}", e);
                    continue;
                }
            };

            let Some(message) = self.cache.decode(&buffer[..len], local_addr, remote_addr) else {
                tracing::debug!("Dropping invalid packet from {}", remote_addr);
                continue;
            };

            if accepts_response(&message, target_host.as_deref()) {
                tracing::debug!(
                    "Received search response, remote: {}, USN: {}, location: {}",
                    remote_addr,
                    message.usn().unwrap_or("<no USN>"),
                    message.location().unwrap_or_default()
                );
                on_response(message);
            }
        }

        tracing::debug!("Search for {} finished", self.search_target);
        Ok(())
    }
}

/// Filter applied to every decoded datagram received during a search.
fn accepts_response(message: &SsdpMessage, target_host: Option<&str>) -> bool {
    if message.is_discover() {
        return false;
    }
    if message.nts().is_some() {
        tracing::debug!("Got non-search response packet: {}", message.request_line());
        return false;
    }
    match target_host {
        Some(host) => message.host() == host,
        None => true,
    }
}

/// Search once for `search_type`, calling `on_response` for each response.
///
/// `target` defaults to the IPv4 SSDP multicast group.
pub async fn search<F>(
    target: Option<SocketAddr>,
    search_type: &str,
    timeout: Duration,
    on_response: F,
) -> Result<()>
where
    F: FnMut(SsdpMessage) + Send,
{
    SsdpSearch::new(search_type, timeout, None, target)?
        .search(on_response)
        .await
}
