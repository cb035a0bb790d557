//! HTTP server for receiving UPnP event notifications.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, UdpSocket};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use upnp_requester::HttpRequest;
use warp::http::StatusCode;
use warp::Filter;

use crate::error::{CallbackServerError, Result};
use crate::handler::{NotifyHandler, NotifyServer};

/// Probe used to pick a local address when no device URL is known.
const EXTERNAL_IP: &str = "8.8.8.8";
const EXTERNAL_PORT: u16 = 80;

/// Path component of the callback URL. Requests on any path are accepted.
const CALLBACK_PATH: &str = "/notify";

/// HTTP callback server for receiving UPnP event notifications.
///
/// The server picks its port and callback URL when constructed, so the URL can
/// be handed to an event handler before the listener starts. Every request is
/// answered: non-NOTIFY methods get 405, NOTIFY requests get whatever status
/// the [`NotifyHandler`] returns.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use callback_server::{CallbackServer, NotifyHandler, NotifyServer};
/// use upnp_requester::HttpRequest;
///
/// struct Printer;
///
/// #[async_trait::async_trait]
/// impl NotifyHandler for Printer {
///     async fn handle_notify(&self, request: HttpRequest) -> u16 {
///         println!("{:?}", request.body);
///         200
///     }
///     async fn unsubscribe_all(&self) {}
/// }
///
/// # async fn run() -> callback_server::Result<()> {
/// let mut server = CallbackServer::new((0, 0), Some("http://192.168.1.10:1400/"))?;
/// println!("Subscribe with CALLBACK: <{}>", server.callback_url());
/// server.start(Arc::new(Printer)).await?;
/// // ...
/// server.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct CallbackServer {
    local_ip: IpAddr,
    port: u16,
    callback_url: String,
    handler: Option<Arc<dyn NotifyHandler>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl CallbackServer {
    /// Pick a local address towards `target` and a port from `port_range`.
    ///
    /// `target` is a URL or `host[:port]` of the device that will send
    /// events. A range of `(0, 0)` lets the OS choose the port.
    pub fn new(port_range: (u16, u16), target: Option<&str>) -> Result<Self> {
        let local_ip = detect_local_ip(target)?;
        Self::with_local_ip(local_ip, port_range)
    }

    /// Like [`new`](Self::new) with a known local address.
    pub fn with_local_ip(local_ip: IpAddr, port_range: (u16, u16)) -> Result<Self> {
        let port = find_available_port(local_ip, port_range.0, port_range.1).ok_or(
            CallbackServerError::NoAvailablePort {
                start: port_range.0,
                end: port_range.1,
            },
        )?;

        let callback_url = match local_ip {
            IpAddr::V4(ip) => format!("http://{ip}:{port}{CALLBACK_PATH}"),
            IpAddr::V6(ip) => format!("http://[{ip}]:{port}{CALLBACK_PATH}"),
        };

        Ok(Self {
            local_ip,
            port,
            callback_url,
            handler: None,
            shutdown_tx: None,
            server_handle: None,
        })
    }

    pub fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&self) -> bool {
        self.server_handle.is_some()
    }

    fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(unspecified_like(self.local_ip), self.port)
    }
}

#[async_trait]
impl NotifyServer for CallbackServer {
    fn callback_url(&self) -> &str {
        &self.callback_url
    }

    async fn start(&mut self, handler: Arc<dyn NotifyHandler>) -> Result<()> {
        if self.is_running() {
            return Err(CallbackServerError::AlreadyRunning);
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let routes = notify_route(Arc::clone(&handler));

        let (addr, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(self.bind_address(), async move {
                shutdown_rx.recv().await;
            })
            .map_err(|e| CallbackServerError::Startup(e.to_string()))?;

        tracing::info!("CallbackServer listening on {}, callback URL {}", addr, self.callback_url);

        self.server_handle = Some(tokio::spawn(server));
        self.shutdown_tx = Some(shutdown_tx);
        self.handler = Some(handler);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(handler) = self.handler.take() {
            handler.unsubscribe_all().await;
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(handle) = self.server_handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!("CallbackServer task ended abnormally: {}", e);
            }
        }

        tracing::info!("CallbackServer on port {} stopped", self.port);
        Ok(())
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}

/// Single catch-all route: any method, any path, all headers and the body.
fn notify_route(
    handler: Arc<dyn NotifyHandler>,
) -> impl Filter<Extract = (warp::reply::WithStatus<&'static str>,), Error = warp::Rejection> + Clone {
    warp::method()
        .and(warp::path::full())
        .and(warp::header::headers_cloned())
        .and(warp::body::bytes())
        .and_then(
            move |method: warp::http::Method,
                  path: warp::path::FullPath,
                  headers: warp::http::HeaderMap,
                  body: bytes::Bytes| {
                let handler = Arc::clone(&handler);
                async move {
                    if method.as_str() != "NOTIFY" {
                        tracing::debug!("Rejecting {} request on callback server", method);
                        return Ok::<_, warp::Rejection>(warp::reply::with_status(
                            "",
                            StatusCode::METHOD_NOT_ALLOWED,
                        ));
                    }

                    let mut request = HttpRequest::new(method.as_str(), path.as_str())
                        .with_body(String::from_utf8_lossy(&body).into_owned());
                    for (name, value) in headers.iter() {
                        match value.to_str() {
                            Ok(value) => request = request.with_header(name.as_str(), value),
                            Err(_) => tracing::debug!("Dropping non-ASCII header {}", name),
                        }
                    }

                    let status = handler.handle_notify(request).await;
                    tracing::debug!("NOTIFY on {} answered with {}", path.as_str(), status);

                    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                    Ok(warp::reply::with_status("", status))
                }
            },
        )
}

fn unspecified_like(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Find an available port in the given range; `(0, 0)` asks the OS for one.
fn find_available_port(local_ip: IpAddr, start: u16, end: u16) -> Option<u16> {
    let unspecified = unspecified_like(local_ip);
    if start == 0 && end == 0 {
        let listener = TcpListener::bind(SocketAddr::new(unspecified, 0)).ok()?;
        return listener.local_addr().ok().map(|addr| addr.port());
    }
    (start..=end).find(|&port| is_port_available(unspecified, port))
}

fn is_port_available(ip: IpAddr, port: u16) -> bool {
    TcpListener::bind(SocketAddr::new(ip, port)).is_ok()
}

/// Split a URL or `host[:port]` into the host and port to probe.
fn target_host_port(target: Option<&str>) -> (String, u16) {
    let Some(target) = target else {
        return (EXTERNAL_IP.to_string(), EXTERNAL_PORT);
    };

    let with_scheme = if target.contains("//") {
        target.to_string()
    } else {
        format!("http://{target}")
    };

    match url::Url::parse(&with_scheme) {
        Ok(parsed) => {
            let host = match parsed.host() {
                Some(url::Host::Ipv6(ip)) => ip.to_string(),
                Some(host) => host.to_string(),
                None => EXTERNAL_IP.to_string(),
            };
            (host, parsed.port().unwrap_or(EXTERNAL_PORT))
        }
        Err(_) => (EXTERNAL_IP.to_string(), EXTERNAL_PORT),
    }
}

/// Local address the OS would use to reach `target`.
///
/// Connects a UDP socket without sending anything and reads back the
/// socket's local address.
pub fn detect_local_ip(target: Option<&str>) -> Result<IpAddr> {
    let (host, port) = target_host_port(target);
    let bind_addr = match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => "[::]:0",
        _ => "0.0.0.0:0",
    };

    let socket = UdpSocket::bind(bind_addr).map_err(|e| CallbackServerError::LocalIp(e.to_string()))?;
    socket
        .connect((host.as_str(), port))
        .map_err(|e| CallbackServerError::LocalIp(format!("{host}:{port}: {e}")))?;
    let local_addr = socket
        .local_addr()
        .map_err(|e| CallbackServerError::LocalIp(e.to_string()))?;
    Ok(local_addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_is_port_available() {
        let listener = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_port_available(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
        drop(listener);
    }

    #[test]
    fn test_find_available_port() {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let port = find_available_port(ip, 50000, 50100).unwrap();
        assert!((50000..=50100).contains(&port));

        let ephemeral = find_available_port(ip, 0, 0).unwrap();
        assert_ne!(ephemeral, 0);
    }

    #[test]
    fn test_no_port_in_range() {
        let listener = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let result = CallbackServer::with_local_ip(IpAddr::V4(Ipv4Addr::LOCALHOST), (port, port));
        assert!(matches!(result, Err(CallbackServerError::NoAvailablePort { .. })));
    }

    #[rstest]
    #[case(None, "8.8.8.8", 80)]
    #[case(Some("http://192.168.1.10:1400/xml/device_description.xml"), "192.168.1.10", 1400)]
    #[case(Some("192.168.1.10:1400"), "192.168.1.10", 1400)]
    #[case(Some("http://[fe80::1]:49152/desc.xml"), "fe80::1", 49152)]
    #[case(Some("http://device.local/desc.xml"), "device.local", 80)]
    fn test_target_host_port(#[case] target: Option<&str>, #[case] host: &str, #[case] port: u16) {
        assert_eq!(target_host_port(target), (host.to_string(), port));
    }

    #[test]
    fn test_detect_local_ip_towards_loopback() {
        let ip = detect_local_ip(Some("http://127.0.0.1:1400/")).unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_callback_url_format() {
        let server = CallbackServer::with_local_ip(IpAddr::V4(Ipv4Addr::LOCALHOST), (0, 0)).unwrap();
        assert_eq!(
            server.callback_url(),
            format!("http://127.0.0.1:{}/notify", server.port())
        );
        assert!(!server.is_running());
    }
}
