//! The subset of multiaddresses a host binds and dials:
//! `/ip4|ip6|dns|dns4|dns6/<host>/tcp/<port>`, optionally ending in `/p2p/<id>`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};

/// `/ip4/127.0.0.1/tcp/{port}`.
pub fn tcp_loopback(port: u16) -> Multiaddr {
    Multiaddr::empty()
        .with(Protocol::Ip4(Ipv4Addr::LOCALHOST))
        .with(Protocol::Tcp(port))
}

pub fn from_socket_addr(addr: SocketAddr) -> Multiaddr {
    Multiaddr::from(addr.ip()).with(Protocol::Tcp(addr.port()))
}

/// Socket address of an `/ip4|ip6/../tcp/..` address. DNS names are not resolved here.
pub fn socket_addr(addr: &Multiaddr) -> Option<SocketAddr> {
    let mut it = addr.iter();
    let ip: IpAddr = match it.next()? {
        Protocol::Ip4(ip) => ip.into(),
        Protocol::Ip6(ip) => ip.into(),
        _ => return None,
    };
    let Protocol::Tcp(port) = it.next()? else {
        return None;
    };
    it.all(|p| matches!(p, Protocol::P2p(_)))
        .then(|| SocketAddr::new(ip, port))
}

/// Host name and port of a `/dns*/../tcp/..` address.
pub fn dns_target(addr: &Multiaddr) -> Option<(String, u16)> {
    let mut it = addr.iter();
    let name = match it.next()? {
        Protocol::Dns(n) | Protocol::Dns4(n) | Protocol::Dns6(n) => n.into_owned(),
        _ => return None,
    };
    let Protocol::Tcp(port) = it.next()? else {
        return None;
    };
    it.all(|p| matches!(p, Protocol::P2p(_)))
        .then_some((name, port))
}

/// Peer ID of a trailing `/p2p/<id>` component.
pub fn peer_id(addr: &Multiaddr) -> Option<PeerId> {
    match addr.iter().last()? {
        Protocol::P2p(id) => Some(id),
        _ => None,
    }
}

/// Whether the address routes through a relay (`/p2p-circuit`).
pub fn is_relayed(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| matches!(p, Protocol::P2pCircuit))
}
