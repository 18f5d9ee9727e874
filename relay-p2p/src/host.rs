//! Network host: identity, listening sockets, address book, and Noise-secured
//! connections in both directions.
//!
//! The host only speaks over direct connections. It never acts as a relay for
//! third parties and refuses to dial relayed (`/p2p-circuit`) addresses.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use libp2p::multiaddr;
use libp2p::Multiaddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::addr::{dns_target, from_socket_addr, is_relayed, socket_addr};
use crate::identity::{Keypair, PeerId, PublicKey};
use crate::noise::{AuthenticKeypair, NoiseError};
use crate::peerstore::Peerstore;
use crate::protocol::SecurityProtocol;
use crate::stream::{SecureStream, StreamError};

/// Upper bound on the Noise handshake of a single connection.
pub const NOISE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Inbound handshakes allowed in flight at once. Further connections wait in
/// the listen backlog until a slot frees up.
pub const MAX_PENDING_HANDSHAKES: usize = 64;

/// Default upper bound on TCP connect + handshake when dialing.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Secured inbound connections waiting for `Host::accept`.
const INBOUND_QUEUE: usize = 64;

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Collects host options; `build` binds the listeners and starts accepting.
#[derive(Debug, Default)]
pub struct HostBuilder {
    identity: Option<Keypair>,
    listen_addrs: Vec<Multiaddr>,
    security: Option<SecurityProtocol>,
    dial_timeout: Option<Duration>,
    handshake_timeout: Option<Duration>,
    max_pending_handshakes: Option<usize>,
}

impl HostBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host identity. A random one is generated when never set.
    pub fn identity(mut self, keypair: Keypair) -> Self {
        self.identity = Some(keypair);
        self
    }

    pub fn listen_addr(mut self, addr: Multiaddr) -> Self {
        self.listen_addrs.push(addr);
        self
    }

    /// Parse and add listen addresses given as strings.
    pub fn listen_addr_strings<I, S>(mut self, addrs: I) -> Result<Self, HostError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for s in addrs {
            self.listen_addrs.push(s.as_ref().parse()?);
        }
        Ok(self)
    }

    /// Channel security for every connection. Required: there is no cleartext mode.
    pub fn security(mut self, protocol: SecurityProtocol) -> Self {
        self.security = Some(protocol);
        self
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = Some(timeout);
        self
    }

    /// Bound on each inbound handshake. Defaults to `NOISE_HANDSHAKE_TIMEOUT`.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Cap on concurrent inbound handshakes. Defaults to `MAX_PENDING_HANDSHAKES`.
    pub fn max_pending_handshakes(mut self, n: usize) -> Self {
        self.max_pending_handshakes = Some(n.max(1));
        self
    }

    pub async fn build(self) -> Result<Host, HostError> {
        let security = self.security.ok_or(HostError::NoSecurity)?;
        if self.listen_addrs.is_empty() {
            return Err(HostError::NoListenAddrs);
        }
        let identity = self.identity.unwrap_or_else(Keypair::generate_ed25519);
        let noise_keys = Arc::new(AuthenticKeypair::new(&identity)?);

        let mut listeners = Vec::with_capacity(self.listen_addrs.len());
        let mut bound = Vec::with_capacity(self.listen_addrs.len());
        for addr in self.listen_addrs {
            let socket = listen_socket(&addr)?;
            let listener = TcpListener::bind(socket)
                .await
                .map_err(|source| HostError::Bind {
                    addr: addr.clone(),
                    source,
                })?;
            let local = listener
                .local_addr()
                .map_err(|source| HostError::Bind { addr, source })?;
            bound.push(from_socket_addr(local));
            listeners.push(listener);
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let inbound = Inbound {
            keys: noise_keys.clone(),
            local_addrs: Arc::new(bound.clone()),
            handshake_timeout: self.handshake_timeout.unwrap_or(NOISE_HANDSHAKE_TIMEOUT),
            pending: Arc::new(Semaphore::new(
                self.max_pending_handshakes.unwrap_or(MAX_PENDING_HANDSHAKES),
            )),
            tx: inbound_tx,
        };
        let accept_tasks = listeners
            .into_iter()
            .map(|listener| tokio::spawn(accept_loop(listener, inbound.clone())))
            .collect();

        Ok(Host {
            peer_id: identity.public().to_peer_id(),
            identity,
            noise_keys,
            listen_addrs: bound,
            peerstore: Arc::new(Peerstore::new()),
            security,
            dial_timeout: self.dial_timeout.unwrap_or(DEFAULT_DIAL_TIMEOUT),
            inbound: Mutex::new(inbound_rx),
            accept_tasks,
        })
    }
}

fn listen_socket(addr: &Multiaddr) -> Result<SocketAddr, HostError> {
    if is_relayed(addr) {
        return Err(HostError::UnsupportedListenAddr(addr.clone()));
    }
    socket_addr(addr).ok_or_else(|| HostError::UnsupportedListenAddr(addr.clone()))
}

/// What every accept loop of a host shares.
#[derive(Clone)]
struct Inbound {
    keys: Arc<AuthenticKeypair>,
    local_addrs: Arc<Vec<Multiaddr>>,
    handshake_timeout: Duration,
    pending: Arc<Semaphore>,
    tx: mpsc::Sender<SecureStream>,
}

async fn accept_loop(listener: TcpListener, inbound: Inbound) {
    loop {
        // A slot is held from accept until the handshake task ends.
        let Ok(permit) = inbound.pending.clone().acquire_owned().await else {
            return;
        };
        match listener.accept().await {
            Ok((io, remote)) => {
                let inbound = inbound.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let upgrade =
                        SecureStream::upgrade_inbound(io, &inbound.keys, &inbound.local_addrs);
                    match tokio::time::timeout(inbound.handshake_timeout, upgrade).await {
                        Ok(Ok(stream)) => {
                            debug!(peer_id = %stream.remote_peer(), %remote, "inbound connection secured");
                            if inbound.tx.send(stream).await.is_err() {
                                debug!(%remote, "host closed, dropping inbound connection");
                            }
                        }
                        Ok(Err(e)) => warn!(%remote, error = %e, "inbound handshake failed"),
                        Err(_) => warn!(%remote, "inbound handshake timed out"),
                    }
                });
            }
            Err(e) => {
                drop(permit);
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// A running node. Dropping it stops the accept loops; streams already handed
/// out stay usable.
pub struct Host {
    peer_id: PeerId,
    identity: Keypair,
    noise_keys: Arc<AuthenticKeypair>,
    listen_addrs: Vec<Multiaddr>,
    peerstore: Arc<Peerstore>,
    security: SecurityProtocol,
    dial_timeout: Duration,
    inbound: Mutex<mpsc::Receiver<SecureStream>>,
    accept_tasks: Vec<JoinHandle<()>>,
}

impl Host {
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    pub fn id(&self) -> PeerId {
        self.peer_id
    }

    pub fn public_key(&self) -> PublicKey {
        self.identity.public()
    }

    /// Addresses actually bound (port 0 resolved to the assigned port).
    pub fn addrs(&self) -> &[Multiaddr] {
        &self.listen_addrs
    }

    pub fn peerstore(&self) -> &Arc<Peerstore> {
        &self.peerstore
    }

    pub fn security(&self) -> SecurityProtocol {
        self.security
    }

    /// Next inbound connection that completed the handshake. `None` once the
    /// host is closed.
    pub async fn accept(&self) -> Option<SecureStream> {
        self.inbound.lock().await.recv().await
    }

    /// Connect to a known peer, trying its address-book entries in order.
    pub async fn connect(&self, peer: &PeerId) -> Result<SecureStream, DialError> {
        let addrs = self.peerstore.addrs(peer);
        let mut last_err = DialError::NoAddresses(*peer);
        for addr in addrs {
            match self.dial(&addr, Some(peer)).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(peer_id = %peer, %addr, error = %e, "dial attempt failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Dial one address. When `expected` is given (or the address ends in
    /// `/p2p/<id>`), the remote identity must match it; a mismatch aborts the
    /// handshake before our identity is revealed.
    pub async fn dial(
        &self,
        addr: &Multiaddr,
        expected: Option<&PeerId>,
    ) -> Result<SecureStream, DialError> {
        if is_relayed(addr) {
            return Err(DialError::RelayDisabled(addr.clone()));
        }
        let expected = expected.copied().or_else(|| crate::addr::peer_id(addr));
        let connect = async {
            let target = resolve(addr).await?;
            let io = TcpStream::connect(target).await?;
            SecureStream::upgrade_outbound(
                io,
                &self.noise_keys,
                &self.listen_addrs,
                expected.as_ref(),
            )
            .await
            .map_err(DialError::from_handshake)
        };
        let stream = tokio::time::timeout(self.dial_timeout, connect)
            .await
            .map_err(|_| DialError::Timeout(addr.clone()))??;
        debug!(peer_id = %stream.remote_peer(), %addr, "outbound connection secured");
        Ok(stream)
    }

    /// Stop accepting connections.
    pub fn close(self) {}
}

impl Drop for Host {
    fn drop(&mut self) {
        for task in &self.accept_tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("id", &self.id())
            .field("addrs", &self.listen_addrs)
            .finish_non_exhaustive()
    }
}

async fn resolve(addr: &Multiaddr) -> Result<SocketAddr, DialError> {
    if let Some(socket) = socket_addr(addr) {
        return Ok(socket);
    }
    let (host, port) =
        dns_target(addr).ok_or_else(|| DialError::UnsupportedAddr(addr.clone()))?;
    let mut resolved = tokio::net::lookup_host((host.as_str(), port)).await?;
    resolved
        .next()
        .ok_or_else(|| DialError::UnsupportedAddr(addr.clone()))
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("no listen address configured")]
    NoListenAddrs,
    #[error("no channel security configured")]
    NoSecurity,
    #[error("unsupported listen address {0}")]
    UnsupportedListenAddr(Multiaddr),
    #[error("invalid listen address: {0}")]
    InvalidListenAddr(#[from] multiaddr::Error),
    #[error("channel security setup failed: {0}")]
    Security(#[from] NoiseError),
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: Multiaddr,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("no known address for peer {0}")]
    NoAddresses(PeerId),
    #[error("relay is disabled, refusing {0}")]
    RelayDisabled(Multiaddr),
    #[error("cannot dial {0}")]
    UnsupportedAddr(Multiaddr),
    #[error("dial timed out: {0}")]
    Timeout(Multiaddr),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake: {0}")]
    Handshake(#[source] StreamError),
    #[error("remote identity mismatch: expected {expected}, got {actual}")]
    PeerIdMismatch { expected: PeerId, actual: PeerId },
}

impl DialError {
    fn from_handshake(e: StreamError) -> Self {
        match e {
            StreamError::PeerIdMismatch { expected, actual } => {
                DialError::PeerIdMismatch { expected, actual }
            }
            other => DialError::Handshake(other),
        }
    }
}
