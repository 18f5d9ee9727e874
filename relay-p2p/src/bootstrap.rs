//! Host bootstrap: identity + relayer config -> running, seeded host.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::addr;
use crate::config::{PeerDescriptor, RelayerConfig};
use crate::host::{Host, HostError};
use crate::identity::Keypair;
use crate::peerstore::{AddrTtl, AddressBook};
use crate::protocol::SecurityProtocol;

/// Build the node's host.
///
/// Listens on loopback only, at `config.port`, with Noise as the sole channel
/// security and no relaying. Each configured peer is then added to the address
/// book under its first address with a permanent TTL; further addresses are
/// ignored. Either a fully seeded host is returned or nothing is.
pub async fn create_host(
    identity: Option<Keypair>,
    config: &RelayerConfig,
) -> Result<Host, BootstrapError> {
    let identity = identity.ok_or_else(|| {
        BootstrapError::Configuration("identity key not defined".to_string())
    })?;

    let builder = Host::builder()
        .listen_addr(addr::tcp_loopback(config.port))
        .identity(identity)
        .security(SecurityProtocol::Noise);
    let host = bounded(config.bootstrap_timeout, builder.build()).await?;

    info!(
        peer_id = %host.id(),
        "new p2p host created with address: {}",
        host.addrs().first().map(ToString::to_string).unwrap_or_default()
    );

    seed_address_book(host.peerstore().as_ref(), &config.peers);
    Ok(host)
}

/// Insert each peer's first address with a permanent TTL. Returns how many
/// peers were seeded.
pub fn seed_address_book(book: &dyn AddressBook, peers: &[PeerDescriptor]) -> usize {
    let mut seeded = 0;
    for peer in peers {
        match peer.primary_addr() {
            Some(addr) => {
                book.add_addr(peer.id, addr.clone(), AddrTtl::Permanent);
                seeded += 1;
            }
            None => warn!(peer_id = %peer.id, "peer has no address, not seeded"),
        }
    }
    seeded
}

async fn bounded<F>(limit: Duration, build: F) -> Result<Host, BootstrapError>
where
    F: Future<Output = Result<Host, HostError>>,
{
    tokio::time::timeout(limit, build)
        .await
        .map_err(|_| BootstrapError::Timeout(limit))?
        .map_err(BootstrapError::from)
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("unable to create p2p host: {0}")]
    Configuration(String),
    #[error("unable to create p2p host: {0}")]
    HostConstruction(#[from] HostError),
    #[error("unable to create p2p host: timed out after {0:?}")]
    Timeout(Duration),
}
