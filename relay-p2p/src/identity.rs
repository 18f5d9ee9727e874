//! Node identity: libp2p keypair and peer ID, key file persistence.
//!
//! A key file holds the protobuf encoding of the private key as one hex line.
//! That is the encoding libp2p implementations use when marshalling private
//! keys, so keys and peer IDs carry over from other libp2p relayers.

use std::path::Path;

pub use libp2p::identity::{DecodingError, Keypair, PublicKey, SigningError};
pub use libp2p::PeerId;

/// Parse a hex-encoded private key (surrounding whitespace ignored).
pub fn keypair_from_hex(s: &str) -> Result<Keypair, IdentityError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(IdentityError::Empty);
    }
    let raw = hex::decode(s)?;
    Ok(Keypair::from_protobuf_encoding(&raw)?)
}

pub fn keypair_to_hex(keypair: &Keypair) -> Result<String, IdentityError> {
    Ok(hex::encode(keypair.to_protobuf_encoding()?))
}

/// Read a hex-encoded private key from `path`.
pub fn load_keypair(path: impl AsRef<Path>) -> Result<Keypair, IdentityError> {
    let s = std::fs::read_to_string(path)?;
    keypair_from_hex(&s)
}

/// Write the private key of `keypair` to `path` as hex, one line.
pub fn save_keypair(path: impl AsRef<Path>, keypair: &Keypair) -> Result<(), IdentityError> {
    let mut line = keypair_to_hex(keypair)?;
    line.push('\n');
    std::fs::write(path, line)?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("key file is empty")]
    Empty,
    #[error("invalid hex key: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid private key: {0}")]
    Decode(#[from] DecodingError),
    #[error("key file: {0}")]
    Io(#[from] std::io::Error),
}
