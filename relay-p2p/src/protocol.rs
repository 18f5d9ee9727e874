//! Handshake payload carried inside the Noise messages, and protocol constants.

use libp2p::Multiaddr;
use serde::{Deserialize, Serialize};

use crate::noise::AuthenticKeypair;

/// Current protocol version. Sent in every handshake payload.
pub const PROTOCOL_VERSION: u8 = 1;

/// Prologue mixed into every handshake; both sides must agree on it.
pub const PROLOGUE: &[u8] = b"relay-p2p/noise/1";

/// Channel security mechanisms a host can be configured with. Noise is the only one;
/// there is no cleartext option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityProtocol {
    Noise,
}

impl SecurityProtocol {
    pub fn id(&self) -> &'static str {
        match self {
            SecurityProtocol::Noise => "/noise",
        }
    }
}

/// Sent encrypted by each side during the handshake (responder in message 2,
/// initiator in message 3). Encoding is bincode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub protocol_version: u8,
    /// Sender's identity public key, protobuf encoded.
    pub identity_key: Vec<u8>,
    /// Identity signature over the sender's Noise static key.
    pub identity_sig: Vec<u8>,
    /// Addresses the sender listens on.
    pub listen_addrs: Vec<Multiaddr>,
}

impl HandshakePayload {
    pub fn new(keys: &AuthenticKeypair, listen_addrs: Vec<Multiaddr>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            identity_key: keys.identity().encode_protobuf(),
            identity_sig: keys.signature().to_vec(),
            listen_addrs,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
