//! Address book: peer ID -> ordered addresses, each with an expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use libp2p::{Multiaddr, PeerId};
use parking_lot::RwLock;

/// How long an address-book entry stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrTtl {
    /// Never expires. Used for statically configured peers.
    Permanent,
    For(Duration),
}

/// Default TTL for addresses learned in passing (not used by bootstrap).
pub const TEMP_ADDR_TTL: AddrTtl = AddrTtl::For(Duration::from_secs(120));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    Never,
    At(Instant),
}

impl Expiry {
    fn from_ttl(ttl: AddrTtl, now: Instant) -> Self {
        match ttl {
            AddrTtl::Permanent => Expiry::Never,
            // Overflowing deadlines are as good as permanent.
            AddrTtl::For(d) => now.checked_add(d).map_or(Expiry::Never, Expiry::At),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        match self {
            Expiry::Never => true,
            Expiry::At(t) => *t > now,
        }
    }

    fn later(self, other: Expiry) -> Expiry {
        match (self, other) {
            (Expiry::Never, _) | (_, Expiry::Never) => Expiry::Never,
            (Expiry::At(a), Expiry::At(b)) => Expiry::At(a.max(b)),
        }
    }
}

#[derive(Debug, Clone)]
struct AddrEntry {
    addr: Multiaddr,
    expiry: Expiry,
}

/// Capability to feed and query an address book. Bootstrap seeds through it;
/// a future discovery layer would update the book through the same seam.
pub trait AddressBook: Send + Sync {
    fn add_addr(&self, peer: PeerId, addr: Multiaddr, ttl: AddrTtl);
    fn addrs(&self, peer: &PeerId) -> Vec<Multiaddr>;
    fn peers(&self) -> Vec<PeerId>;
}

/// In-memory address book shared by a host and its callers.
#[derive(Debug, Default)]
pub struct Peerstore {
    book: RwLock<HashMap<PeerId, Vec<AddrEntry>>>,
}

impl Peerstore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `addr` for `peer`. An address already present keeps the longer
    /// of its current and the new TTL.
    pub fn add_addr(&self, peer: PeerId, addr: Multiaddr, ttl: AddrTtl) {
        let expiry = Expiry::from_ttl(ttl, Instant::now());
        let mut book = self.book.write();
        let entries = book.entry(peer).or_default();
        match entries.iter_mut().find(|e| e.addr == addr) {
            Some(existing) => existing.expiry = existing.expiry.later(expiry),
            None => entries.push(AddrEntry { addr, expiry }),
        }
    }

    pub fn add_addrs(&self, peer: PeerId, addrs: impl IntoIterator<Item = Multiaddr>, ttl: AddrTtl) {
        for addr in addrs {
            self.add_addr(peer, addr, ttl);
        }
    }

    /// Live addresses for `peer` in insertion order.
    pub fn addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        let now = Instant::now();
        self.book
            .read()
            .get(peer)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.expiry.is_live(now))
                    .map(|e| e.addr.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remaining TTL of an entry; `None` if absent or expired.
    pub fn ttl(&self, peer: &PeerId, addr: &Multiaddr) -> Option<AddrTtl> {
        let now = Instant::now();
        let book = self.book.read();
        let entry = book.get(peer)?.iter().find(|e| &e.addr == addr)?;
        match entry.expiry {
            Expiry::Never => Some(AddrTtl::Permanent),
            Expiry::At(t) if t > now => Some(AddrTtl::For(t - now)),
            Expiry::At(_) => None,
        }
    }

    /// Peers with at least one live address.
    pub fn peers(&self) -> Vec<PeerId> {
        let now = Instant::now();
        let mut out: Vec<PeerId> = self
            .book
            .read()
            .iter()
            .filter(|(_, entries)| entries.iter().any(|e| e.expiry.is_live(now)))
            .map(|(id, _)| *id)
            .collect();
        out.sort();
        out
    }

    pub fn clear_addrs(&self, peer: &PeerId) {
        self.book.write().remove(peer);
    }

    /// Drop expired entries and peers left without any address.
    pub fn gc(&self) {
        let now = Instant::now();
        let mut book = self.book.write();
        book.retain(|_, entries| {
            entries.retain(|e| e.expiry.is_live(now));
            !entries.is_empty()
        });
    }

    /// Number of peers with at least one live address.
    pub fn len(&self) -> usize {
        self.peers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AddressBook for Peerstore {
    fn add_addr(&self, peer: PeerId, addr: Multiaddr, ttl: AddrTtl) {
        Peerstore::add_addr(self, peer, addr, ttl)
    }

    fn addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        Peerstore::addrs(self, peer)
    }

    fn peers(&self) -> Vec<PeerId> {
        Peerstore::peers(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::tcp_loopback;
    use crate::identity::Keypair;

    fn peer() -> PeerId {
        Keypair::generate_ed25519().public().to_peer_id()
    }

    #[test]
    fn empty_store() {
        let ps = Peerstore::new();
        assert!(ps.is_empty());
        assert!(ps.addrs(&peer()).is_empty());
    }

    #[test]
    fn insertion_order_and_dedup() {
        let ps = Peerstore::new();
        let p = peer();
        let a = tcp_loopback(1);
        let b = tcp_loopback(2);
        ps.add_addr(p, a.clone(), AddrTtl::Permanent);
        ps.add_addr(p, b.clone(), AddrTtl::Permanent);
        ps.add_addr(p, a.clone(), AddrTtl::Permanent);
        assert_eq!(ps.addrs(&p), vec![a, b]);
        assert_eq!(ps.len(), 1);
    }

    #[test]
    fn expired_entries_hidden() {
        let ps = Peerstore::new();
        let p = peer();
        let a = tcp_loopback(1);
        ps.add_addr(p, a.clone(), AddrTtl::For(Duration::ZERO));
        assert!(ps.addrs(&p).is_empty());
        assert_eq!(ps.ttl(&p, &a), None);
        assert!(ps.peers().is_empty());
        ps.gc();
        assert!(ps.book.read().is_empty());
    }

    #[test]
    fn permanent_is_never_shortened() {
        let ps = Peerstore::new();
        let p = peer();
        let a = tcp_loopback(1);
        ps.add_addr(p, a.clone(), AddrTtl::Permanent);
        ps.add_addr(p, a.clone(), AddrTtl::For(Duration::ZERO));
        assert_eq!(ps.ttl(&p, &a), Some(AddrTtl::Permanent));
        assert_eq!(ps.addrs(&p), vec![a]);
    }

    #[test]
    fn temporary_extended_to_permanent() {
        let ps = Peerstore::new();
        let p = peer();
        let a = tcp_loopback(1);
        ps.add_addr(p, a.clone(), TEMP_ADDR_TTL);
        assert!(matches!(ps.ttl(&p, &a), Some(AddrTtl::For(_))));
        ps.add_addr(p, a.clone(), AddrTtl::Permanent);
        assert_eq!(ps.ttl(&p, &a), Some(AddrTtl::Permanent));
    }

    #[test]
    fn clear_addrs_removes_peer() {
        let ps = Peerstore::new();
        let p = peer();
        ps.add_addrs(
            p,
            [tcp_loopback(1), tcp_loopback(2)],
            AddrTtl::Permanent,
        );
        assert_eq!(ps.addrs(&p).len(), 2);
        ps.clear_addrs(&p);
        assert!(ps.is_empty());
    }

    #[test]
    fn usable_through_trait_object() {
        let ps = Peerstore::new();
        let book: &dyn AddressBook = &ps;
        let p = peer();
        book.add_addr(p, tcp_loopback(7), AddrTtl::Permanent);
        assert_eq!(book.peers(), vec![p]);
        assert_eq!(book.addrs(&p), vec![tcp_loopback(7)]);
    }
}
