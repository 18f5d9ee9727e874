//! Noise-secured TCP stream: handshake upgrade plus encrypted message exchange.

use std::net::SocketAddr;

use libp2p::Multiaddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::identity::{PeerId, PublicKey};
use crate::noise::{verify_static_key, AuthenticKeypair, HandshakeState, NoiseError, NoiseTransport};
use crate::protocol::{HandshakePayload, PROLOGUE, PROTOCOL_VERSION};
use crate::wire::{read_frame, write_frame, FrameError};

/// An authenticated, encrypted connection to one remote peer.
pub struct SecureStream {
    io: TcpStream,
    noise: NoiseTransport,
    remote_peer: PeerId,
    remote_public_key: PublicKey,
    remote_addr: SocketAddr,
    remote_listen_addrs: Vec<Multiaddr>,
}

impl SecureStream {
    /// Run the initiator side of the handshake over a freshly dialed stream.
    ///
    /// With `expected` set, the responder's identity is checked as soon as
    /// message 2 arrives; on mismatch the connection is dropped before our
    /// own identity is sent.
    pub async fn upgrade_outbound(
        mut io: TcpStream,
        keys: &AuthenticKeypair,
        local_addrs: &[Multiaddr],
        expected: Option<&PeerId>,
    ) -> Result<Self, StreamError> {
        let remote_addr = io.peer_addr()?;
        let mut hs = HandshakeState::initiator(keys.dh(), PROLOGUE);

        let m1 = hs.write_message(&[])?;
        write_frame(&mut io, &m1).await?;

        let m2 = read_frame(&mut io).await?;
        let payload = hs.read_message(&m2)?;
        let (remote_public_key, remote) = authenticate(&hs, &payload)?;
        let remote_peer = remote_public_key.to_peer_id();
        if let Some(expected) = expected {
            if *expected != remote_peer {
                return Err(StreamError::PeerIdMismatch {
                    expected: *expected,
                    actual: remote_peer,
                });
            }
        }

        let ours = HandshakePayload::new(keys, local_addrs.to_vec()).encode()?;
        let m3 = hs.write_message(&ours)?;
        write_frame(&mut io, &m3).await?;

        Ok(Self {
            io,
            noise: hs.into_transport()?,
            remote_peer,
            remote_public_key,
            remote_addr,
            remote_listen_addrs: remote.listen_addrs,
        })
    }

    /// Run the responder side of the handshake over an accepted stream.
    pub async fn upgrade_inbound(
        mut io: TcpStream,
        keys: &AuthenticKeypair,
        local_addrs: &[Multiaddr],
    ) -> Result<Self, StreamError> {
        let remote_addr = io.peer_addr()?;
        let mut hs = HandshakeState::responder(keys.dh(), PROLOGUE);

        let m1 = read_frame(&mut io).await?;
        // Message 1 is cleartext; its payload is ignored.
        hs.read_message(&m1)?;

        let ours = HandshakePayload::new(keys, local_addrs.to_vec()).encode()?;
        let m2 = hs.write_message(&ours)?;
        write_frame(&mut io, &m2).await?;

        let m3 = read_frame(&mut io).await?;
        let payload = hs.read_message(&m3)?;
        let (remote_public_key, remote) = authenticate(&hs, &payload)?;

        Ok(Self {
            io,
            noise: hs.into_transport()?,
            remote_peer: remote_public_key.to_peer_id(),
            remote_public_key,
            remote_addr,
            remote_listen_addrs: remote.listen_addrs,
        })
    }

    /// Encrypt and send one message (at most `MAX_PLAINTEXT_SIZE` bytes).
    pub async fn send(&mut self, msg: &[u8]) -> Result<(), StreamError> {
        let cipher = self.noise.encrypt(msg)?;
        write_frame(&mut self.io, &cipher).await?;
        Ok(())
    }

    /// Receive and decrypt the next message. `StreamError::Frame(FrameError::Closed)`
    /// when the remote closed the connection.
    pub async fn recv(&mut self) -> Result<Vec<u8>, StreamError> {
        let cipher = read_frame(&mut self.io).await?;
        Ok(self.noise.decrypt(&cipher)?)
    }

    pub async fn close(mut self) -> Result<(), StreamError> {
        self.io.shutdown().await?;
        Ok(())
    }

    /// Authenticated identity of the remote end.
    pub fn remote_peer(&self) -> PeerId {
        self.remote_peer
    }

    pub fn remote_public_key(&self) -> &PublicKey {
        &self.remote_public_key
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Listen addresses the remote advertised during the handshake.
    pub fn remote_listen_addrs(&self) -> &[Multiaddr] {
        &self.remote_listen_addrs
    }
}

impl std::fmt::Debug for SecureStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStream")
            .field("remote_peer", &self.remote_peer)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

/// Decode the remote payload, check its version and that its identity key
/// signed the static key the handshake just authenticated.
fn authenticate(
    hs: &HandshakeState,
    bytes: &[u8],
) -> Result<(PublicKey, HandshakePayload), StreamError> {
    let payload = HandshakePayload::decode(bytes)?;
    if payload.protocol_version != PROTOCOL_VERSION {
        return Err(StreamError::VersionMismatch {
            ours: PROTOCOL_VERSION,
            theirs: payload.protocol_version,
        });
    }
    let remote_static = hs.remote_static().ok_or(NoiseError::UnexpectedState)?;
    let identity = verify_static_key(&payload.identity_key, &payload.identity_sig, remote_static)?;
    Ok((identity, payload))
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("noise: {0}")]
    Noise(#[from] NoiseError),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("handshake payload: {0}")]
    Payload(#[from] bincode::Error),
    #[error("unsupported protocol version {theirs} (ours {ours})")]
    VersionMismatch { ours: u8, theirs: u8 },
    #[error("remote identity mismatch: expected {expected}, got {actual}")]
    PeerIdMismatch { expected: PeerId, actual: PeerId },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Remote closed the connection cleanly between messages.
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamError::Frame(FrameError::Closed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::from_socket_addr;
    use crate::identity::Keypair;
    use tokio::net::TcpListener;

    fn keys() -> (Keypair, AuthenticKeypair) {
        let identity = Keypair::generate_ed25519();
        let keys = AuthenticKeypair::new(&identity).unwrap();
        (identity, keys)
    }

    async fn pair() -> (SecureStream, SecureStream, Keypair, Keypair) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (server_id, server_keys) = keys();
        let (client_id, client_keys) = keys();
        let server = tokio::spawn(async move {
            let (io, _) = listener.accept().await.unwrap();
            SecureStream::upgrade_inbound(io, &server_keys, &[from_socket_addr(addr)])
                .await
                .unwrap()
        });
        let io = TcpStream::connect(addr).await.unwrap();
        let client = SecureStream::upgrade_outbound(io, &client_keys, &[], None)
            .await
            .unwrap();
        let server = server.await.unwrap();
        (client, server, client_id, server_id)
    }

    #[tokio::test]
    async fn handshake_identifies_both_ends() {
        let (client, server, client_id, server_id) = pair().await;
        assert_eq!(client.remote_peer(), server_id.public().to_peer_id());
        assert_eq!(server.remote_peer(), client_id.public().to_peer_id());
        assert_eq!(client.remote_public_key(), &server_id.public());
        assert_eq!(client.remote_listen_addrs().len(), 1);
        assert!(server.remote_listen_addrs().is_empty());
    }

    #[tokio::test]
    async fn messages_flow_both_ways() {
        let (mut client, mut server, _, _) = pair().await;
        client.send(b"deposit 1").await.unwrap();
        client.send(b"deposit 2").await.unwrap();
        assert_eq!(server.recv().await.unwrap(), b"deposit 1");
        assert_eq!(server.recv().await.unwrap(), b"deposit 2");
        server.send(b"ack").await.unwrap();
        assert_eq!(client.recv().await.unwrap(), b"ack");
    }

    #[tokio::test]
    async fn close_is_observed() {
        let (client, mut server, _, _) = pair().await;
        client.close().await.unwrap();
        let err = server.recv().await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn unexpected_responder_never_sees_initiator() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (_, server_keys) = keys();
        let server = tokio::spawn(async move {
            let (io, _) = listener.accept().await.unwrap();
            SecureStream::upgrade_inbound(io, &server_keys, &[]).await
        });
        let (_, client_keys) = keys();
        let wanted = Keypair::generate_ed25519().public().to_peer_id();
        let io = TcpStream::connect(addr).await.unwrap();
        let err = SecureStream::upgrade_outbound(io, &client_keys, &[], Some(&wanted))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::PeerIdMismatch { expected, .. } if expected == wanted));
        // Message 3 was never sent, so the responder only sees the hang-up.
        let res = server.await.unwrap();
        assert!(matches!(res, Err(ref e) if e.is_closed()), "{res:?}");
    }

    #[tokio::test]
    async fn forged_identity_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Valid Noise keys, but the signature belongs to a different static key.
        let (identity, real) = keys();
        let other = AuthenticKeypair::new(&identity).unwrap();
        let forged = HandshakePayload {
            protocol_version: PROTOCOL_VERSION,
            identity_key: identity.public().encode_protobuf(),
            identity_sig: other.signature().to_vec(),
            listen_addrs: vec![],
        };
        let server = tokio::spawn(async move {
            let (mut io, _) = listener.accept().await.unwrap();
            let mut hs = HandshakeState::responder(real.dh(), PROLOGUE);
            hs.read_message(&read_frame(&mut io).await.unwrap()).unwrap();
            let m2 = hs.write_message(&forged.encode().unwrap()).unwrap();
            write_frame(&mut io, &m2).await.unwrap();
        });
        let (_, client_keys) = keys();
        let io = TcpStream::connect(addr).await.unwrap();
        let err = SecureStream::upgrade_outbound(io, &client_keys, &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Noise(NoiseError::BadSignature(_))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn cleartext_peer_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (_, server_keys) = keys();
        let server = tokio::spawn(async move {
            let (io, _) = listener.accept().await.unwrap();
            SecureStream::upgrade_inbound(io, &server_keys, &[]).await
        });
        let mut io = TcpStream::connect(addr).await.unwrap();
        // Too short to carry an ephemeral key.
        write_frame(&mut io, b"GET / HTTP/1.1").await.unwrap();
        let res = server.await.unwrap();
        assert!(matches!(res, Err(StreamError::Noise(_))));
    }
}
