//! UDP socket setup for SSDP.
//!
//! Resolves the source/target address pair for an operation and creates a
//! socket with the options SSDP needs:
//! - SO_REUSEADDR, and SO_REUSEPORT on Unix, so several listeners can share port 1900
//! - SO_BROADCAST
//! - for multicast targets, group membership plus a TTL/hop limit of 2

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::{DiscoveryError, Result};
use crate::ssdp::{SSDP_IP_V4, SSDP_IP_V6, SSDP_PORT};

const MULTICAST_TTL: u32 = 2;

/// Default IPv4 multicast target, `239.255.255.250:1900`.
pub fn ssdp_target_v4() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(SSDP_IP_V4, SSDP_PORT))
}

/// IPv6 link-local multicast target on the interface `scope_id`.
pub fn ssdp_target_v6(scope_id: u32) -> SocketAddr {
    SocketAddr::V6(SocketAddrV6::new(SSDP_IP_V6, SSDP_PORT, 0, scope_id))
}

/// Fill in whichever of `source`/`target` is missing.
///
/// With neither given, the socket binds to `0.0.0.0:0` and talks to the IPv4
/// SSDP group. An IPv6 source implies the IPv6 group on the source's scope,
/// and an IPv6 target implies `[::]:0` on the target's scope. Mixing address
/// families is an error.
pub fn resolve_source_target(
    source: Option<SocketAddr>,
    target: Option<SocketAddr>,
) -> Result<(SocketAddr, SocketAddr)> {
    let any_v4 = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));

    match (source, target) {
        (None, None) => Ok((any_v4, ssdp_target_v4())),
        (Some(source @ SocketAddr::V4(_)), None) => Ok((source, ssdp_target_v4())),
        (Some(SocketAddr::V6(source)), None) => {
            Ok((SocketAddr::V6(source), ssdp_target_v6(source.scope_id())))
        }
        (None, Some(target @ SocketAddr::V4(_))) => Ok((any_v4, target)),
        (None, Some(SocketAddr::V6(target))) => Ok((
            SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, target.scope_id())),
            SocketAddr::V6(target),
        )),
        (Some(source), Some(target)) if source.is_ipv4() != target.is_ipv4() => Err(
            DiscoveryError::InvalidAddress("Source and target do not match protocol".to_string()),
        ),
        (Some(source), Some(target)) => Ok((source, target)),
    }
}

fn require_scope(addr: &SocketAddr, role: &str) -> Result<()> {
    match addr {
        SocketAddr::V6(v6) if v6.scope_id() == 0 => Err(DiscoveryError::InvalidAddress(format!(
            "{role} missing scope_id, {role}: {addr}"
        ))),
        _ => Ok(()),
    }
}

/// Create an unbound SSDP socket for talking from `source` to `target`.
///
/// IPv6 addresses must carry a non-zero scope id. When `target` is a
/// multicast group the socket joins it on the interface chosen by `source`.
pub fn open_socket(source: &SocketAddr, target: &SocketAddr) -> Result<Socket> {
    require_scope(source, "Source")?;
    require_scope(target, "Target")?;

    tracing::debug!("Creating socket, source: {}, target: {}", source, target);

    let socket = Socket::new(Domain::for_address(*source), Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;

    #[cfg(unix)]
    if let Err(e) = socket.set_reuse_port(true) {
        tracing::warn!("Failed to set SO_REUSEPORT on {}: {}", source, e);
    }

    socket.set_broadcast(true)?;

    if target.ip().is_multicast() {
        match (source, target.ip()) {
            (SocketAddr::V6(source), IpAddr::V6(group)) => {
                socket.set_multicast_hops_v6(MULTICAST_TTL)?;
                let scope_id = source.scope_id();
                socket.join_multicast_v6(&group, scope_id)?;
                socket.set_multicast_if_v6(scope_id)?;
            }
            (SocketAddr::V4(source), IpAddr::V4(group)) => {
                socket.set_multicast_if_v4(source.ip())?;
                socket.set_multicast_ttl_v4(MULTICAST_TTL)?;
                socket.join_multicast_v4(&group, source.ip())?;
            }
            _ => {
                return Err(DiscoveryError::InvalidAddress(
                    "Source and target do not match protocol".to_string(),
                ))
            }
        }
    }

    Ok(socket)
}

/// Bind a prepared socket and hand it to tokio.
pub(crate) fn bind(socket: Socket, address: SocketAddr) -> Result<UdpSocket> {
    tracing::debug!("Binding socket to {}", address);
    socket.set_nonblocking(true)?;
    socket.bind(&address.into())?;
    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v6(ip: &str, port: u16, scope: u32) -> SocketAddr {
        SocketAddr::V6(SocketAddrV6::new(ip.parse().unwrap(), port, 0, scope))
    }

    #[test]
    fn test_defaults() {
        let (source, target) = resolve_source_target(None, None).unwrap();
        assert_eq!(source, "0.0.0.0:0".parse::<SocketAddr>().unwrap());
        assert_eq!(target, "239.255.255.250:1900".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_ipv6_source_picks_group_on_same_scope() {
        let source = v6("fe80::10", 0, 4);
        let (resolved_source, target) = resolve_source_target(Some(source), None).unwrap();
        assert_eq!(resolved_source, source);
        assert_eq!(target, v6("ff02::c", 1900, 4));
    }

    #[test]
    fn test_ipv6_target_picks_unspecified_source() {
        let target = v6("ff02::c", 1900, 9);
        let (source, resolved_target) = resolve_source_target(None, Some(target)).unwrap();
        assert_eq!(source, v6("::", 0, 9));
        assert_eq!(resolved_target, target);
    }

    #[test]
    fn test_ipv4_target_only() {
        let target: SocketAddr = "192.168.1.20:1900".parse().unwrap();
        let (source, resolved) = resolve_source_target(None, Some(target)).unwrap();
        assert_eq!(source, "0.0.0.0:0".parse::<SocketAddr>().unwrap());
        assert_eq!(resolved, target);
    }

    #[test]
    fn test_family_mismatch() {
        let result = resolve_source_target(
            Some("0.0.0.0:0".parse().unwrap()),
            Some(v6("ff02::c", 1900, 1)),
        );
        assert!(matches!(result, Err(DiscoveryError::InvalidAddress(_))));
    }

    #[test]
    fn test_ipv6_without_scope_rejected() {
        let result = open_socket(&v6("::", 0, 0), &v6("ff02::c", 1900, 2));
        assert!(matches!(result, Err(DiscoveryError::InvalidAddress(_))));

        let result = open_socket(&v6("::", 0, 2), &v6("ff02::c", 1900, 0));
        assert!(matches!(result, Err(DiscoveryError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_unicast_socket_binds() {
        let source: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let target: SocketAddr = "127.0.0.1:1900".parse().unwrap();
        let socket = open_socket(&source, &target).unwrap();
        let socket = bind(socket, source).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }
}
