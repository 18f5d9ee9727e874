//! Relayer p2p configuration: listen port and the static peer set.

use std::collections::HashSet;
use std::time::Duration;

use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};

use crate::addr;

/// Default bound on host construction.
pub const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(30);

/// A counterpart node and the addresses it can be reached at. Only the first
/// address is used by bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerDescriptor {
    pub id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl PeerDescriptor {
    pub fn new(id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        Self { id, addrs }
    }

    /// The address bootstrap seeds into the address book.
    pub fn primary_addr(&self) -> Option<&Multiaddr> {
        self.addrs.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayerConfig {
    /// Loopback TCP port to listen on.
    pub port: u16,
    #[serde(default)]
    pub peers: Vec<PeerDescriptor>,
    #[serde(
        default = "default_bootstrap_timeout",
        rename = "bootstrap_timeout_secs",
        with = "duration_secs"
    )]
    pub bootstrap_timeout: Duration,
}

fn default_bootstrap_timeout() -> Duration {
    DEFAULT_BOOTSTRAP_TIMEOUT
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(v: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(v.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

impl RelayerConfig {
    pub fn new(port: u16, peers: Vec<PeerDescriptor>) -> Self {
        Self {
            port,
            peers,
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
        }
    }

    /// Check the peer set: every peer has an address, no peer is listed twice,
    /// and no address is relayed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for peer in &self.peers {
            if peer.addrs.is_empty() {
                return Err(ConfigError::NoAddresses(peer.id));
            }
            if !seen.insert(peer.id) {
                return Err(ConfigError::DuplicatePeer(peer.id));
            }
            if let Some(addr) = peer.addrs.iter().find(|a| addr::is_relayed(a)) {
                return Err(ConfigError::RelayedAddr {
                    peer: peer.id,
                    addr: addr.clone(),
                });
            }
        }
        if self.bootstrap_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("peer {0} has no address")]
    NoAddresses(PeerId),
    #[error("peer {0} listed more than once")]
    DuplicatePeer(PeerId),
    #[error("peer {peer} has relayed address {addr}; relay is not supported")]
    RelayedAddr { peer: PeerId, addr: Multiaddr },
    #[error("bootstrap timeout must be greater than zero")]
    ZeroTimeout,
}
