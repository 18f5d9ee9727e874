//! Noise XX handshake (`Noise_XX_25519_ChaChaPoly_SHA256`) and the transport
//! ciphers it yields.
//!
//! ```text
//! -> e
//! <- e, ee, s, es
//! -> s, se
//! ```
//!
//! Both sides end up knowing the other's static key. The static key is a fresh
//! X25519 key per host, vouched for by a signature of the host's identity key
//! (see `AuthenticKeypair`). Nonce: 32 zero bits followed by a 64-bit
//! little-endian counter per direction; never reused.

use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::identity::{Keypair, PeerId, PublicKey, SigningError};

pub const NOISE_PROTOCOL_NAME: &str = "Noise_XX_25519_ChaChaPoly_SHA256";

/// Largest Noise message on the wire (fits the 2-byte length prefix).
pub const MAX_NOISE_MESSAGE_SIZE: usize = 65535;

pub const TAG_LEN: usize = 16;

/// Largest plaintext a single transport message can carry.
pub const MAX_PLAINTEXT_SIZE: usize = MAX_NOISE_MESSAGE_SIZE - TAG_LEN;

const HASH_LEN: usize = 32;

/// Length of an X25519 key.
pub const DH_LEN: usize = 32;

/// Prefix of the message an identity key signs to vouch for a Noise static key.
pub const STATIC_KEY_DOMAIN: &[u8] = b"noise-libp2p-static-key:";

type HmacSha256 = Hmac<Sha256>;

fn hmac(key: &[u8], parts: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    for p in parts {
        mac.update(p);
    }
    mac.finalize().into_bytes().into()
}

/// HKDF with two outputs, as defined by the Noise framework.
fn hkdf2(chaining_key: &[u8; HASH_LEN], ikm: &[u8]) -> ([u8; HASH_LEN], [u8; HASH_LEN]) {
    let temp = hmac(chaining_key, &[ikm]);
    let out1 = hmac(&temp, &[&[0x01u8][..]]);
    let out2 = hmac(&temp, &[&out1[..], &[0x02u8][..]]);
    (out1, out2)
}

/// X25519 keypair used as a Noise static or ephemeral key.
#[derive(Clone)]
pub struct DhKeypair {
    secret: StaticSecret,
    public: [u8; DH_LEN],
}

impl DhKeypair {
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_secret_bytes(bytes: [u8; DH_LEN]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = X25519PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    pub fn public(&self) -> &[u8; DH_LEN] {
        &self.public
    }

    fn dh(&self, other: &[u8; DH_LEN]) -> [u8; DH_LEN] {
        self.secret
            .diffie_hellman(&X25519PublicKey::from(*other))
            .to_bytes()
    }
}

impl fmt::Debug for DhKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhKeypair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct CipherState {
    key: Option<[u8; 32]>,
    nonce: u64,
}

impl CipherState {
    fn empty() -> Self {
        Self {
            key: None,
            nonce: 0,
        }
    }

    fn with_key(key: [u8; 32]) -> Self {
        Self {
            key: Some(key),
            nonce: 0,
        }
    }

    fn next_nonce(&mut self) -> Result<[u8; 12], NoiseError> {
        // 2^64-1 is reserved.
        if self.nonce == u64::MAX {
            return Err(NoiseError::NonceExhausted);
        }
        let mut nonce_bytes = [0u8; 12];
        nonce_bytes[4..12].copy_from_slice(&self.nonce.to_le_bytes());
        self.nonce += 1;
        Ok(nonce_bytes)
    }

    fn encrypt_with_ad(&mut self, ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let Some(key) = self.key else {
            return Ok(plaintext.to_vec());
        };
        let nonce = self.next_nonce()?;
        ChaCha20Poly1305::new(Key::from_slice(&key))
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: ad,
                },
            )
            .map_err(|_| NoiseError::Encrypt)
    }

    fn decrypt_with_ad(&mut self, ad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let Some(key) = self.key else {
            return Ok(ciphertext.to_vec());
        };
        let nonce = self.next_nonce()?;
        ChaCha20Poly1305::new(Key::from_slice(&key))
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad: ad,
                },
            )
            .map_err(|_| NoiseError::Decrypt)
    }
}

struct SymmetricState {
    chaining_key: [u8; HASH_LEN],
    hash: [u8; HASH_LEN],
    cipher: CipherState,
}

impl SymmetricState {
    fn new(protocol_name: &str) -> Self {
        let name = protocol_name.as_bytes();
        let mut hash = [0u8; HASH_LEN];
        if name.len() <= HASH_LEN {
            hash[..name.len()].copy_from_slice(name);
        } else {
            hash = Sha256::digest(name).into();
        }
        Self {
            chaining_key: hash,
            hash,
            cipher: CipherState::empty(),
        }
    }

    fn mix_hash(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }

    fn mix_key(&mut self, input_key_material: &[u8]) {
        let (ck, temp_k) = hkdf2(&self.chaining_key, input_key_material);
        self.chaining_key = ck;
        self.cipher = CipherState::with_key(temp_k);
    }

    fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let ciphertext = self.cipher.encrypt_with_ad(&self.hash, plaintext)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let plaintext = self.cipher.decrypt_with_ad(&self.hash, ciphertext)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    fn split(&self) -> (CipherState, CipherState) {
        let (k1, k2) = hkdf2(&self.chaining_key, &[]);
        (CipherState::with_key(k1), CipherState::with_key(k2))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// In-progress XX handshake. Drive it with `write_message` / `read_message`
/// in turn, then call `into_transport`.
pub struct HandshakeState {
    role: Role,
    symmetric: SymmetricState,
    local_static: DhKeypair,
    local_ephemeral: Option<DhKeypair>,
    remote_static: Option<[u8; DH_LEN]>,
    remote_ephemeral: Option<[u8; DH_LEN]>,
    step: usize,
}

const HANDSHAKE_STEPS: usize = 3;

impl HandshakeState {
    pub fn initiator(local_static: &DhKeypair, prologue: &[u8]) -> Self {
        Self::new(Role::Initiator, local_static, prologue)
    }

    pub fn responder(local_static: &DhKeypair, prologue: &[u8]) -> Self {
        Self::new(Role::Responder, local_static, prologue)
    }

    fn new(role: Role, local_static: &DhKeypair, prologue: &[u8]) -> Self {
        let mut symmetric = SymmetricState::new(NOISE_PROTOCOL_NAME);
        symmetric.mix_hash(prologue);
        Self {
            role,
            symmetric,
            local_static: local_static.clone(),
            local_ephemeral: None,
            remote_static: None,
            remote_ephemeral: None,
            step: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_finished(&self) -> bool {
        self.step == HANDSHAKE_STEPS
    }

    /// Whether the next handshake message is ours to write.
    pub fn is_my_turn(&self) -> bool {
        match self.role {
            Role::Initiator => self.step % 2 == 0,
            Role::Responder => self.step % 2 == 1,
        }
    }

    /// Remote static key, known once the remote has sent it (message 2 for
    /// the initiator, message 3 for the responder).
    pub fn remote_static(&self) -> Option<&[u8; DH_LEN]> {
        self.remote_static.as_ref()
    }

    /// Produce the next handshake message carrying `payload`.
    pub fn write_message(&mut self, payload: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if self.is_finished() || !self.is_my_turn() {
            return Err(NoiseError::UnexpectedState);
        }
        let mut msg = Vec::new();
        match self.step {
            // -> e
            0 => {
                let e = self.generate_ephemeral(&mut msg);
                self.local_ephemeral = Some(e);
            }
            // <- e, ee, s, es
            1 => {
                let re = self.remote_ephemeral.ok_or(NoiseError::UnexpectedState)?;
                let e = self.generate_ephemeral(&mut msg);
                self.symmetric.mix_key(&e.dh(&re));
                self.local_ephemeral = Some(e);
                let s = self
                    .symmetric
                    .encrypt_and_hash(self.local_static.public())?;
                msg.extend_from_slice(&s);
                self.symmetric
                    .mix_key(&self.local_static.dh(&re));
            }
            // -> s, se
            _ => {
                let re = self.remote_ephemeral.ok_or(NoiseError::UnexpectedState)?;
                let s = self
                    .symmetric
                    .encrypt_and_hash(self.local_static.public())?;
                msg.extend_from_slice(&s);
                self.symmetric
                    .mix_key(&self.local_static.dh(&re));
            }
        }
        let body = self.symmetric.encrypt_and_hash(payload)?;
        msg.extend_from_slice(&body);
        if msg.len() > MAX_NOISE_MESSAGE_SIZE {
            return Err(NoiseError::MessageTooLarge(msg.len()));
        }
        self.step += 1;
        Ok(msg)
    }

    /// Consume the peer's next handshake message; returns its payload.
    pub fn read_message(&mut self, message: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if self.is_finished() || self.is_my_turn() {
            return Err(NoiseError::UnexpectedState);
        }
        if message.len() > MAX_NOISE_MESSAGE_SIZE {
            return Err(NoiseError::MessageTooLarge(message.len()));
        }
        let encrypted_static_len = DH_LEN + TAG_LEN;
        let rest = match self.step {
            // -> e
            0 => self.read_ephemeral(message)?,
            // <- e, ee, s, es
            1 => {
                if message.len() < DH_LEN + encrypted_static_len + TAG_LEN {
                    return Err(NoiseError::MessageTooShort(message.len()));
                }
                let rest = self.read_ephemeral(message)?;
                let e = self
                    .local_ephemeral
                    .clone()
                    .ok_or(NoiseError::UnexpectedState)?;
                let re = self.remote_ephemeral.ok_or(NoiseError::UnexpectedState)?;
                let ee = e.dh(&re);
                self.symmetric.mix_key(&ee);
                let rs = self.read_static(&rest[..encrypted_static_len])?;
                let es = e.dh(&rs);
                self.symmetric.mix_key(&es);
                &rest[encrypted_static_len..]
            }
            // -> s, se
            _ => {
                if message.len() < encrypted_static_len + TAG_LEN {
                    return Err(NoiseError::MessageTooShort(message.len()));
                }
                let rs = self.read_static(&message[..encrypted_static_len])?;
                let e = self
                    .local_ephemeral
                    .clone()
                    .ok_or(NoiseError::UnexpectedState)?;
                let se = e.dh(&rs);
                self.symmetric.mix_key(&se);
                &message[encrypted_static_len..]
            }
        };
        let payload = self.symmetric.decrypt_and_hash(rest)?;
        self.step += 1;
        Ok(payload)
    }

    /// Finish the handshake and derive the transport ciphers.
    pub fn into_transport(self) -> Result<NoiseTransport, NoiseError> {
        if !self.is_finished() {
            return Err(NoiseError::IncompleteHandshake);
        }
        let remote_static = self.remote_static.ok_or(NoiseError::IncompleteHandshake)?;
        let (c1, c2) = self.symmetric.split();
        let (send, recv) = match self.role {
            Role::Initiator => (c1, c2),
            Role::Responder => (c2, c1),
        };
        Ok(NoiseTransport {
            send,
            recv,
            remote_static,
            handshake_hash: self.symmetric.hash,
        })
    }

    fn generate_ephemeral(&mut self, msg: &mut Vec<u8>) -> DhKeypair {
        let e = DhKeypair::generate();
        msg.extend_from_slice(e.public());
        self.symmetric.mix_hash(e.public());
        e
    }

    fn read_ephemeral<'m>(&mut self, message: &'m [u8]) -> Result<&'m [u8], NoiseError> {
        if message.len() < DH_LEN {
            return Err(NoiseError::MessageTooShort(message.len()));
        }
        let mut re = [0u8; DH_LEN];
        re.copy_from_slice(&message[..DH_LEN]);
        self.symmetric.mix_hash(&re);
        self.remote_ephemeral = Some(re);
        Ok(&message[DH_LEN..])
    }

    fn read_static(&mut self, encrypted: &[u8]) -> Result<[u8; DH_LEN], NoiseError> {
        let plain = self.symmetric.decrypt_and_hash(encrypted)?;
        let rs: [u8; DH_LEN] = plain
            .try_into()
            .map_err(|v: Vec<u8>| NoiseError::MessageTooShort(v.len()))?;
        self.remote_static = Some(rs);
        Ok(rs)
    }
}

/// Post-handshake ciphers: one per direction.
pub struct NoiseTransport {
    send: CipherState,
    recv: CipherState,
    remote_static: [u8; DH_LEN],
    handshake_hash: [u8; HASH_LEN],
}

impl NoiseTransport {
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(NoiseError::MessageTooLarge(plaintext.len()));
        }
        self.send.encrypt_with_ad(&[], plaintext)
    }

    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if ciphertext.len() > MAX_NOISE_MESSAGE_SIZE {
            return Err(NoiseError::MessageTooLarge(ciphertext.len()));
        }
        if ciphertext.len() < TAG_LEN {
            return Err(NoiseError::MessageTooShort(ciphertext.len()));
        }
        self.recv.decrypt_with_ad(&[], ciphertext)
    }

    pub fn remote_static(&self) -> &[u8; DH_LEN] {
        &self.remote_static
    }

    /// Channel binding value; equal on both ends of a completed handshake.
    pub fn handshake_hash(&self) -> &[u8; HASH_LEN] {
        &self.handshake_hash
    }
}

/// Noise static key plus the identity key's signature over it. Created once
/// per host; the signature travels in the handshake payload.
#[derive(Debug, Clone)]
pub struct AuthenticKeypair {
    dh: DhKeypair,
    identity: PublicKey,
    signature: Vec<u8>,
}

impl AuthenticKeypair {
    pub fn new(identity: &Keypair) -> Result<Self, NoiseError> {
        let dh = DhKeypair::generate();
        let signature = identity.sign(&static_key_message(dh.public()))?;
        Ok(Self {
            dh,
            identity: identity.public(),
            signature,
        })
    }

    pub fn dh(&self) -> &DhKeypair {
        &self.dh
    }

    pub fn identity(&self) -> &PublicKey {
        &self.identity
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }
}

fn static_key_message(static_key: &[u8; DH_LEN]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(STATIC_KEY_DOMAIN.len() + DH_LEN);
    msg.extend_from_slice(STATIC_KEY_DOMAIN);
    msg.extend_from_slice(static_key);
    msg
}

/// Check that the protobuf-encoded `identity_key` signed `static_key`.
/// Returns the identity's public key.
pub fn verify_static_key(
    identity_key: &[u8],
    signature: &[u8],
    static_key: &[u8; DH_LEN],
) -> Result<PublicKey, NoiseError> {
    let identity =
        PublicKey::try_decode_protobuf(identity_key).map_err(|_| NoiseError::InvalidIdentity)?;
    if !identity.verify(&static_key_message(static_key), signature) {
        return Err(NoiseError::BadSignature(identity.to_peer_id()));
    }
    Ok(identity)
}

#[derive(Debug, thiserror::Error)]
pub enum NoiseError {
    #[error("noise message too short ({0} bytes)")]
    MessageTooShort(usize),
    #[error("noise message too large ({0} bytes)")]
    MessageTooLarge(usize),
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("nonce exhausted")]
    NonceExhausted,
    #[error("handshake message out of order")]
    UnexpectedState,
    #[error("handshake not finished")]
    IncompleteHandshake,
    #[error("signing static key: {0}")]
    Sign(#[from] SigningError),
    #[error("remote identity key is malformed")]
    InvalidIdentity,
    #[error("static key signature of {0} does not verify")]
    BadSignature(PeerId),
}
