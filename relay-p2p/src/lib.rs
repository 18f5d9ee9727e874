//! Relayer p2p host.
//! Turns an identity key and a static peer configuration into a running host:
//! loopback listener, Noise-secured connections, pre-seeded address book.

pub mod addr;
pub mod bootstrap;
pub mod config;
pub mod host;
pub mod identity;
pub mod noise;
pub mod peerstore;
pub mod protocol;
pub mod stream;
pub mod wire;

pub use bootstrap::{create_host, seed_address_book, BootstrapError};
pub use config::{ConfigError, PeerDescriptor, RelayerConfig};
pub use host::{DialError, Host, HostBuilder, HostError};
pub use identity::{load_keypair, save_keypair, IdentityError, Keypair, PeerId, PublicKey};
pub use libp2p::Multiaddr;
pub use peerstore::{AddrTtl, AddressBook, Peerstore};
pub use protocol::{SecurityProtocol, PROTOCOL_VERSION};
pub use stream::{SecureStream, StreamError};
