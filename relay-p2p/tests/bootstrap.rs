use std::time::Duration;

use relay_p2p::addr::{socket_addr, tcp_loopback};
use relay_p2p::{
    create_host, seed_address_book, AddrTtl, BootstrapError, Host, Keypair, Multiaddr,
    PeerDescriptor, PeerId, RelayerConfig,
};

fn random_peer() -> PeerId {
    Keypair::generate_ed25519().public().to_peer_id()
}

fn port_of(host: &Host) -> u16 {
    socket_addr(&host.addrs()[0]).unwrap().port()
}

async fn host_with(port: u16, peers: Vec<PeerDescriptor>) -> Host {
    create_host(Some(Keypair::generate_ed25519()), &RelayerConfig::new(port, peers))
        .await
        .unwrap()
}

#[tokio::test]
async fn seeds_first_address_of_each_peer() {
    // This one needs the port up front: it checks the configured port is the one bound.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let p1 = random_peer();
    let addr_a: Multiaddr = "/ip4/10.0.0.1/tcp/9000".parse().unwrap();
    let addr_b: Multiaddr = "/ip4/10.0.0.2/tcp/9000".parse().unwrap();
    let host = host_with(
        port,
        vec![PeerDescriptor::new(p1, vec![addr_a.clone(), addr_b.clone()])],
    )
    .await;

    assert_eq!(host.peerstore().addrs(&p1), vec![addr_a.clone()]);
    assert_eq!(host.peerstore().ttl(&p1, &addr_a), Some(AddrTtl::Permanent));
    assert_eq!(host.peerstore().ttl(&p1, &addr_b), None);
    assert_eq!(host.addrs()[0], tcp_loopback(port));
}

#[tokio::test]
async fn address_book_has_one_entry_per_peer() {
    let peers: Vec<PeerDescriptor> = (0..5u16)
        .map(|i| {
            PeerDescriptor::new(
                random_peer(),
                vec![tcp_loopback(10_000 + i), tcp_loopback(20_000 + i)],
            )
        })
        .collect();
    let host = host_with(0, peers.clone()).await;

    let mut expected: Vec<_> = peers.iter().map(|p| p.id).collect();
    expected.sort();
    assert_eq!(host.peerstore().peers(), expected);
    for p in &peers {
        assert_eq!(host.peerstore().addrs(&p.id), vec![p.addrs[0].clone()]);
    }
}

#[tokio::test]
async fn absent_key_builds_nothing() {
    // The port is held, so any bind attempt would surface as HostConstruction.
    let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = held.local_addr().unwrap().port();
    let config = RelayerConfig::new(port, vec![PeerDescriptor::new(random_peer(), vec![tcp_loopback(1)])]);
    let err = create_host(None, &config).await.unwrap_err();
    assert!(matches!(err, BootstrapError::Configuration(_)));
}

#[tokio::test]
async fn second_host_on_same_port_fails() {
    let first = host_with(0, vec![]).await;
    let err = create_host(
        Some(Keypair::generate_ed25519()),
        &RelayerConfig::new(port_of(&first), vec![]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, BootstrapError::HostConstruction(_)));
}

#[tokio::test]
async fn hosts_coexist_with_independent_identities() {
    let a = host_with(0, vec![]).await;
    let b = host_with(0, vec![]).await;
    assert_ne!(a.id(), b.id());
    assert_ne!(a.addrs(), b.addrs());
}

#[tokio::test]
async fn seeded_peers_talk_over_noise() {
    let key_a = Keypair::generate_ed25519();
    let id_a = key_a.public().to_peer_id();
    let a = create_host(Some(key_a), &RelayerConfig::new(0, vec![]))
        .await
        .unwrap();

    let key_b = Keypair::generate_ed25519();
    let id_b = key_b.public().to_peer_id();
    let b = create_host(
        Some(key_b),
        &RelayerConfig::new(0, vec![PeerDescriptor::new(id_a, a.addrs().to_vec())]),
    )
    .await
    .unwrap();
    // a was built before b's port existed; seed it the same way bootstrap does.
    seed_address_book(
        a.peerstore().as_ref(),
        &[PeerDescriptor::new(id_b, b.addrs().to_vec())],
    );

    let (out, inc) = tokio::join!(a.connect(&id_b), b.accept());
    let mut out = out.unwrap();
    let mut inc = inc.unwrap();
    assert_eq!(out.remote_peer(), id_b);
    assert_eq!(inc.remote_peer(), id_a);

    out.send(b"keygen start").await.unwrap();
    assert_eq!(inc.recv().await.unwrap(), b"keygen start");
    inc.send(b"keygen ready").await.unwrap();
    assert_eq!(out.recv().await.unwrap(), b"keygen ready");

    // And the other direction, from b's own address book.
    let (out, inc) = tokio::join!(b.connect(&id_a), a.accept());
    assert_eq!(out.unwrap().remote_peer(), id_a);
    assert_eq!(inc.unwrap().remote_peer(), id_b);
}

#[tokio::test]
async fn unreachable_peer_fails_without_fallback() {
    let peer = random_peer();
    let live = host_with(0, vec![]).await;
    // Port 0 can never be connected to.
    let dead = tcp_loopback(0);
    let host = host_with(
        0,
        vec![PeerDescriptor::new(peer, vec![dead, live.addrs()[0].clone()])],
    )
    .await;
    let res = tokio::time::timeout(Duration::from_secs(15), host.connect(&peer))
        .await
        .unwrap();
    assert!(res.is_err());
}
