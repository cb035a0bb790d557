//! SSDP wire codec.
//!
//! Turns raw datagrams into [`SsdpMessage`] values and builds outgoing
//! packets. Nothing in here touches a socket. Datagrams that do not look like
//! SSDP are rejected by returning `None`; the network is untrusted and noisy,
//! so invalid input is dropped rather than reported.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::headers::SsdpHeaders;

pub const SSDP_PORT: u16 = 1900;
pub const SSDP_IP_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
/// Link-local scope SSDP group
pub const SSDP_IP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xc);
pub const SSDP_ST_ALL: &str = "ssdp:all";
pub const SSDP_ST_ROOTDEVICE: &str = "upnp:rootdevice";
/// Default MX, in seconds
pub const SSDP_MX: u64 = 4;
/// Value of the `MAN` header on M-SEARCH requests, quotes included
pub const SSDP_DISCOVER: &str = "\"ssdp:discover\"";

pub const NTS_ALIVE: &str = "ssdp:alive";
pub const NTS_BYEBYE: &str = "ssdp:byebye";
pub const NTS_UPDATE: &str = "ssdp:update";

const NOTIFY_LINE: &[u8] = b"NOTIFY * HTTP/1.1";
const SEARCH_LINE: &[u8] = b"M-SEARCH * HTTP/1.1";
const RESPONSE_LINE: &[u8] = b"HTTP/1.1 200 OK";

const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Which of the three SSDP datagram kinds a message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsdpMessageKind {
    Notify,
    Search,
    Response,
}

/// Header-derived part of a datagram. Depends only on the bytes and the
/// sender address without port, which makes it safe to share between
/// re-deliveries of the same packet.
#[derive(Debug, PartialEq, Eq)]
struct DecodedPacket {
    request_line: String,
    headers: SsdpHeaders,
    udn: Option<String>,
    location: Option<String>,
    location_original: Option<String>,
    host: String,
}

/// A decoded SSDP datagram.
#[derive(Debug, Clone)]
pub struct SsdpMessage {
    packet: Arc<DecodedPacket>,
    local_addr: Option<SocketAddr>,
    remote_addr: SocketAddr,
    timestamp: DateTime<Utc>,
}

impl SsdpMessage {
    pub fn request_line(&self) -> &str {
        &self.packet.request_line
    }

    pub fn kind(&self) -> SsdpMessageKind {
        let line = self.packet.request_line.as_bytes();
        if line.starts_with(NOTIFY_LINE) {
            SsdpMessageKind::Notify
        } else if line.starts_with(SEARCH_LINE) {
            SsdpMessageKind::Search
        } else {
            SsdpMessageKind::Response
        }
    }

    pub fn headers(&self) -> &SsdpHeaders {
        &self.packet.headers
    }

    /// Raw header lookup, any case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.packet.headers.get(name)
    }

    pub fn usn(&self) -> Option<&str> {
        self.packet.headers.get_lower("usn")
    }

    /// UDN part of the USN, when the USN is `uuid:` based.
    pub fn udn(&self) -> Option<&str> {
        self.packet.udn.as_deref()
    }

    /// `LOCATION`, corrected with the sender's IPv6 scope id when needed.
    pub fn location(&self) -> Option<&str> {
        self.packet.location.as_deref()
    }

    /// `LOCATION` exactly as sent.
    pub fn location_original(&self) -> Option<&str> {
        self.packet.location_original.as_deref()
    }

    pub fn st(&self) -> Option<&str> {
        self.packet.headers.get_lower("st")
    }

    pub fn nt(&self) -> Option<&str> {
        self.packet.headers.get_lower("nt")
    }

    pub fn nts(&self) -> Option<&str> {
        self.packet.headers.get_lower("nts")
    }

    pub fn man(&self) -> Option<&str> {
        self.packet.headers.get_lower("man")
    }

    /// Sender host, with `%scope` for scoped IPv6 senders.
    pub fn host(&self) -> &str {
        &self.packet.host
    }

    pub fn port(&self) -> u16 {
        self.remote_addr.port()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// True for M-SEARCH requests, which other control points multicast.
    pub(crate) fn is_discover(&self) -> bool {
        self.man() == Some(SSDP_DISCOVER)
    }
}

/// Check that `data` is non-empty, line based and starts with a known request line.
pub fn is_valid_packet(data: &[u8]) -> bool {
    !data.is_empty()
        && data.contains(&b'\n')
        && (data.starts_with(NOTIFY_LINE)
            || data.starts_with(SEARCH_LINE)
            || data.starts_with(RESPONSE_LINE))
}

/// UDN from a USN such as `uuid:abc::urn:schemas-upnp-org:device:Basic:1`.
pub fn udn_from_usn(usn: &str) -> Option<&str> {
    let lower_prefix = usn.get(..5)?;
    if !lower_prefix.eq_ignore_ascii_case("uuid:") {
        return None;
    }
    Some(usn.split_once("::").map_or(usn, |(udn, _)| udn))
}

/// Host string for an address: the IP, plus `%scope` for scoped IPv6.
pub fn host_string(addr: &SocketAddr) -> String {
    match addr {
        SocketAddr::V6(v6) if v6.scope_id() != 0 => format!("{}%{}", v6.ip(), v6.scope_id()),
        other => other.ip().to_string(),
    }
}

/// `ip:port`, bracketing IPv6 addresses. Used for the `HOST` header.
pub fn host_port_string(addr: &SocketAddr) -> String {
    match addr {
        SocketAddr::V4(v4) => format!("{}:{}", v4.ip(), v4.port()),
        SocketAddr::V6(v6) => format!("[{}]:{}", v6.ip(), v6.port()),
    }
}

fn is_ipv6_link_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Add the sender's scope id to a link-local IPv6 `LOCATION` host.
///
/// Returns the URL unchanged when the remote address is IPv4 or unscoped, when
/// the URL host is not an IP literal, or when it is not link-local.
pub fn adjusted_location(location: &str, remote_addr: &SocketAddr) -> String {
    let scope_id = match remote_addr {
        SocketAddr::V6(v6) if v6.scope_id() != 0 => v6.scope_id(),
        _ => return location.to_string(),
    };

    let parsed = match url::Url::parse(location) {
        Ok(parsed) => parsed,
        Err(_) => return location.to_string(),
    };
    let ip = match parsed.host() {
        Some(url::Host::Ipv6(ip)) if is_ipv6_link_local(&ip) => ip,
        _ => return location.to_string(),
    };

    let mut adjusted = format!("{}://[{}%{}]", parsed.scheme(), ip, scope_id);
    if let Some(port) = parsed.port() {
        adjusted.push_str(&format!(":{}", port));
    }
    adjusted.push_str(&parsed[url::Position::BeforePath..]);
    adjusted
}

/// Serialize a packet: request line, `name:value` headers, blank line.
pub fn encode<'a, I>(request_line: &str, headers: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut packet = String::with_capacity(128);
    packet.push_str(request_line);
    packet.push_str("\r\n");
    for (name, value) in headers {
        packet.push_str(name);
        packet.push(':');
        packet.push_str(value);
        packet.push_str("\r\n");
    }
    packet.push_str("\r\n");
    packet.into_bytes()
}

/// Build an M-SEARCH packet for `search_target` addressed to `target`.
pub fn build_search_packet(target: &SocketAddr, mx: u64, search_target: &str) -> Vec<u8> {
    let host = host_port_string(target);
    let mx = mx.to_string();
    encode(
        "M-SEARCH * HTTP/1.1",
        [
            ("HOST", host.as_str()),
            ("MAN", SSDP_DISCOVER),
            ("MX", mx.as_str()),
            ("ST", search_target),
        ],
    )
}

fn without_port(addr: &SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(v4) => SocketAddr::V4(SocketAddrV4::new(*v4.ip(), 0)),
        SocketAddr::V6(v6) => SocketAddr::V6(SocketAddrV6::new(
            *v6.ip(),
            0,
            v6.flowinfo(),
            v6.scope_id(),
        )),
    }
}

fn parse_packet(data: &[u8], remote_without_port: &SocketAddr) -> DecodedPacket {
    let text = String::from_utf8_lossy(data).replace("\r\n", "\n");
    let mut lines = text.split('\n');
    let request_line = lines.next().unwrap_or_default().trim().to_string();

    let mut headers = SsdpHeaders::new();
    for line in lines {
        if line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() {
                headers.append(name, value.trim());
            }
        }
    }

    let udn = headers
        .get_lower("usn")
        .and_then(udn_from_usn)
        .map(str::to_string);

    let (location, location_original) = match headers.get_lower("location") {
        Some(location) if !location.trim().is_empty() => (
            Some(adjusted_location(location, remote_without_port)),
            Some(location.to_string()),
        ),
        _ => (None, None),
    };

    DecodedPacket {
        request_line,
        headers,
        udn,
        location,
        location_original,
        host: host_string(remote_without_port),
    }
}

fn message(
    packet: Arc<DecodedPacket>,
    local_addr: Option<SocketAddr>,
    remote_addr: SocketAddr,
) -> SsdpMessage {
    SsdpMessage {
        packet,
        local_addr,
        remote_addr,
        timestamp: Utc::now(),
    }
}

/// Decode a datagram without memoization.
pub fn decode(
    data: &[u8],
    local_addr: Option<SocketAddr>,
    remote_addr: SocketAddr,
) -> Option<SsdpMessage> {
    if !is_valid_packet(data) {
        return None;
    }
    let packet = parse_packet(data, &without_port(&remote_addr));
    Some(message(Arc::new(packet), local_addr, remote_addr))
}

/// Bounded memo of decoded packets.
///
/// Keyed by `(bytes, sender address without port)`: a device announcing on
/// several interfaces re-sends identical datagrams, and nothing derived from
/// the headers depends on the source port. The oldest entry is evicted first.
pub struct DecodeCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<(Vec<u8>, SocketAddr), Arc<DecodedPacket>>,
    order: VecDeque<(Vec<u8>, SocketAddr)>,
}

impl DecodeCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Same contract as [`decode`], reusing previous parses.
    pub fn decode(
        &self,
        data: &[u8],
        local_addr: Option<SocketAddr>,
        remote_addr: SocketAddr,
    ) -> Option<SsdpMessage> {
        if !is_valid_packet(data) {
            return None;
        }

        let key = (data.to_vec(), without_port(&remote_addr));
        let packet = {
            let mut inner = self.inner.lock();
            match inner.entries.get(&key) {
                Some(packet) => packet.clone(),
                None => {
                    let packet = Arc::new(parse_packet(data, &key.1));
                    if inner.entries.len() >= self.capacity {
                        if let Some(oldest) = inner.order.pop_front() {
                            inner.entries.remove(&oldest);
                        }
                    }
                    inner.order.push_back(key.clone());
                    inner.entries.insert(key, packet.clone());
                    packet
                }
            }
        };

        Some(message(packet, local_addr, remote_addr))
    }
}

impl Default for DecodeCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Unspecified address of the same family as `addr`.
pub(crate) fn unspecified_like(addr: &SocketAddr) -> IpAddr {
    match addr {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}
