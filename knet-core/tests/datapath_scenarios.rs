//! End-to-end scenarios exercising real dispatcher threads over loopback
//! transports (spec.md §8).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use knet_core::compress::CompressConfig;
use knet_core::transport::{LoopbackTransport, Transport, UdpTransport};
use knet_core::{Handle, HandleConfig, LinkPolicy};
use knet_proto::{ChannelId, LinkId, NodeId};

const WAIT_TIMEOUT: Duration = Duration::from_secs(3);
const POLL: Duration = Duration::from_millis(5);

fn fast_config() -> HandleConfig {
    HandleConfig::new().with_heartbeat_tick(Duration::from_millis(5))
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let start = std::time::Instant::now();
    while !cond() {
        assert!(start.elapsed() < WAIT_TIMEOUT, "condition never became true");
        std::thread::sleep(POLL);
    }
}

fn is_reachable(handle: &Handle, host: NodeId) -> bool {
    handle
        .state
        .read()
        .hosts
        .get(&host)
        .map(|h| h.lock().reachable())
        .unwrap_or(false)
}

fn link_up(a: &Arc<Handle>, a_id: NodeId, b: &Arc<Handle>, b_id: NodeId, link: LinkId, policy: LinkPolicy) {
    a.add_host(b_id, policy).unwrap();
    b.add_host(a_id, policy).unwrap();

    let addr_a: SocketAddr = format!("127.0.0.1:{}", 20000 + link as u16 * 2).parse().unwrap();
    let addr_b: SocketAddr = format!("127.0.0.1:{}", 20001 + link as u16 * 2).parse().unwrap();
    let (ta, tb) = LoopbackTransport::pair(addr_a, addr_b);

    a.set_link_config(b_id, link, ta).unwrap();
    b.set_link_config(a_id, link, tb).unwrap();
    a.set_forwarding(true);
    b.set_forwarding(true);
    a.set_link_enable(b_id, link, true).unwrap();
    b.set_link_enable(a_id, link, true).unwrap();

    wait_until(|| is_reachable(a, b_id) && is_reachable(b, a_id));
}

fn teardown(a: &Arc<Handle>, a_id: NodeId, b: &Arc<Handle>, b_id: NodeId, links: &[LinkId]) {
    for &link in links {
        a.set_link_enable(b_id, link, false).unwrap();
        b.set_link_enable(a_id, link, false).unwrap();
        a.clear_link_config(b_id, link).unwrap();
        b.clear_link_config(a_id, link).unwrap();
    }
    // DST-LINK only recomputes reachability on its periodic sweep once no
    // explicit link-change signal fired it (clearing a link's config, as
    // opposed to a pong/dead-timeout transition, doesn't push one); give it
    // a chance to catch up before `remove_host` checks unreachability.
    wait_until(|| !is_reachable(a, b_id) && !is_reachable(b, a_id));
    a.remove_host(b_id).unwrap();
    b.remove_host(a_id).unwrap();
    a.close().unwrap();
    b.close().unwrap();
}

#[test]
fn two_node_loopback_delivers_data_both_ways() {
    const A: NodeId = 1;
    const B: NodeId = 2;
    const CHAN: ChannelId = 0;

    let a = Handle::open(A, fast_config()).unwrap();
    let b = Handle::open(B, fast_config()).unwrap();
    a.add_data_channel(CHAN, None).unwrap();
    b.add_data_channel(CHAN, None).unwrap();

    link_up(&a, A, &b, B, 0, LinkPolicy::Passive);

    a.send(CHAN, b"hello from a".to_vec()).unwrap();
    let mut first = None;
    wait_until(|| {
        first = b.recv(CHAN).unwrap();
        first.is_some()
    });
    assert_eq!(first.unwrap(), b"hello from a".to_vec());

    b.send(CHAN, b"hello from b".to_vec()).unwrap();
    let mut received = None;
    wait_until(|| {
        received = a.recv(CHAN).unwrap();
        received.is_some()
    });
    assert_eq!(received.unwrap(), b"hello from b".to_vec());

    teardown(&a, A, &b, B, &[0]);
}

#[test]
fn dynamic_remote_address_is_learned_from_first_datagram() {
    const A: NodeId = 1;
    const B: NodeId = 2;
    const CHAN: ChannelId = 0;

    let a = Handle::open(A, fast_config()).unwrap();
    let b = Handle::open(B, fast_config()).unwrap();
    a.add_data_channel(CHAN, None).unwrap();
    b.add_data_channel(CHAN, None).unwrap();
    a.add_host(B, LinkPolicy::Passive).unwrap();
    b.add_host(A, LinkPolicy::Passive).unwrap();

    // B doesn't know A's address yet; A knows B's.
    let ta = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let tb = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr_a = ta.local_addr();
    let addr_b = tb.local_addr();
    ta.set_remote(addr_b);
    // tb's remote is left unset; it learns it from A's first ping.

    a.set_link_config(B, 0, Arc::new(ta)).unwrap();
    b.set_link_config(A, 0, Arc::new(tb)).unwrap();
    a.set_forwarding(true);
    b.set_forwarding(true);
    a.set_link_enable(B, 0, true).unwrap();
    b.set_link_enable(A, 0, true).unwrap();

    wait_until(|| is_reachable(&a, B) && is_reachable(&b, A));

    a.send(CHAN, b"ping payload".to_vec()).unwrap();
    let mut received = None;
    wait_until(|| {
        received = b.recv(CHAN).unwrap();
        received.is_some()
    });
    assert_eq!(received.unwrap(), b"ping payload".to_vec());
    let _ = addr_a;

    teardown(&a, A, &b, B, &[0]);
}

#[test]
fn remote_address_change_is_picked_up_from_the_next_inbound_datagram() {
    // The same rx-side learning path that makes a dynamic (unconfigured)
    // remote work also keeps a configured one current when the peer's
    // address changes (e.g. a NAT rebind): every successful `try_recv` on a
    // `Transport` updates `remote` to the datagram's actual source
    // (`dispatch::rx::run`), so the next `send` follows the peer even
    // without reconfiguring the link.
    let original_peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let t = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    t.set_remote(original_peer.local_addr().unwrap());

    t.send(b"hi").unwrap();
    let mut buf = [0u8; 16];
    let (n, from) = original_peer.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hi");

    let relocated_peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    relocated_peer.send_to(b"hello", t.local_addr()).unwrap();
    let mut rbuf = [0u8; 16];
    let (rn, rfrom) = t.try_recv(&mut rbuf).unwrap().or_else(|| {
        std::thread::sleep(Duration::from_millis(20));
        t.try_recv(&mut rbuf).unwrap()
    }).unwrap();
    assert_eq!(&rbuf[..rn], b"hello");
    assert_ne!(rfrom, from);
    t.set_remote(rfrom);

    t.send(b"bye").unwrap();
    let mut buf2 = [0u8; 16];
    let (n2, _) = relocated_peer.recv_from(&mut buf2).unwrap();
    assert_eq!(&buf2[..n2], b"bye");
}

#[test]
fn close_requires_every_link_disabled_first() {
    const A: NodeId = 1;
    const B: NodeId = 2;

    let a = Handle::open(A, fast_config()).unwrap();
    let b = Handle::open(B, fast_config()).unwrap();
    link_up(&a, A, &b, B, 0, LinkPolicy::Passive);

    assert!(a.close().is_err());
    a.set_link_enable(B, 0, false).unwrap();
    b.set_link_enable(A, 0, false).unwrap();
    a.clear_link_config(B, 0).unwrap();
    b.clear_link_config(A, 0).unwrap();
    wait_until(|| !is_reachable(&a, B) && !is_reachable(&b, A));
    a.remove_host(B).unwrap();
    b.remove_host(A).unwrap();
    a.close().unwrap();
    b.close().unwrap();
    assert!(a.close().is_err()); // already closed
}

#[cfg(feature = "lz4")]
#[test]
fn compressed_payloads_round_trip_across_the_wire() {
    const A: NodeId = 1;
    const B: NodeId = 2;
    const CHAN: ChannelId = 0;

    let cfg = CompressConfig {
        algo: "lz4".into(),
        level: 1,
        threshold: 16,
    };
    let a = Handle::open(A, fast_config().with_compression(cfg)).unwrap();
    let b = Handle::open(B, fast_config()).unwrap();
    a.add_data_channel(CHAN, None).unwrap();
    b.add_data_channel(CHAN, None).unwrap();

    link_up(&a, A, &b, B, 0, LinkPolicy::Passive);

    let payload = vec![b'x'; 4096];
    a.send(CHAN, payload.clone()).unwrap();
    let mut received = None;
    wait_until(|| {
        received = b.recv(CHAN).unwrap();
        received.is_some()
    });
    assert_eq!(received.unwrap(), payload);

    teardown(&a, A, &b, B, &[0]);
}

#[test]
fn active_policy_failover_keeps_delivering_after_one_link_dies() {
    const A: NodeId = 1;
    const B: NodeId = 2;
    const CHAN: ChannelId = 0;

    let a = Handle::open(A, fast_config()).unwrap();
    let b = Handle::open(B, fast_config()).unwrap();
    a.add_data_channel(CHAN, None).unwrap();
    b.add_data_channel(CHAN, None).unwrap();

    a.add_host(B, LinkPolicy::Active).unwrap();
    b.add_host(A, LinkPolicy::Active).unwrap();

    for link in [0u8, 1u8] {
        let addr_a: SocketAddr = format!("127.0.0.1:{}", 21000 + link as u16 * 2).parse().unwrap();
        let addr_b: SocketAddr = format!("127.0.0.1:{}", 21001 + link as u16 * 2).parse().unwrap();
        let (ta, tb) = LoopbackTransport::pair(addr_a, addr_b);
        a.set_link_config(B, link, ta).unwrap();
        b.set_link_config(A, link, tb).unwrap();
    }
    a.set_forwarding(true);
    b.set_forwarding(true);
    a.set_link_enable(B, 0, true).unwrap();
    a.set_link_enable(B, 1, true).unwrap();
    b.set_link_enable(A, 0, true).unwrap();
    b.set_link_enable(A, 1, true).unwrap();

    wait_until(|| is_reachable(&a, B) && is_reachable(&b, A));

    // Sever link 0 entirely (disable and drop its transport, so it can no
    // longer carry traffic at all, not just logically); link 1 should keep
    // the host reachable and keep delivering.
    a.set_link_enable(B, 0, false).unwrap();
    b.set_link_enable(A, 0, false).unwrap();
    a.clear_link_config(B, 0).unwrap();
    b.clear_link_config(A, 0).unwrap();

    wait_until(|| is_reachable(&a, B) && is_reachable(&b, A));

    a.send(CHAN, b"still alive".to_vec()).unwrap();
    let mut received = None;
    wait_until(|| {
        received = b.recv(CHAN).unwrap();
        received.is_some()
    });
    assert_eq!(received.unwrap(), b"still alive".to_vec());

    teardown(&a, A, &b, B, &[1]);
}

#[test]
fn duplicate_deliveries_across_both_active_links_are_deduplicated() {
    const A: NodeId = 1;
    const B: NodeId = 2;
    const CHAN: ChannelId = 0;

    let a = Handle::open(A, fast_config()).unwrap();
    let b = Handle::open(B, fast_config()).unwrap();
    a.add_data_channel(CHAN, None).unwrap();
    b.add_data_channel(CHAN, None).unwrap();

    a.add_host(B, LinkPolicy::Active).unwrap();
    b.add_host(A, LinkPolicy::Active).unwrap();

    for link in [0u8, 1u8] {
        let addr_a: SocketAddr = format!("127.0.0.1:{}", 22000 + link as u16 * 2).parse().unwrap();
        let addr_b: SocketAddr = format!("127.0.0.1:{}", 22001 + link as u16 * 2).parse().unwrap();
        let (ta, tb) = LoopbackTransport::pair(addr_a, addr_b);
        a.set_link_config(B, link, ta).unwrap();
        b.set_link_config(A, link, tb).unwrap();
    }
    a.set_forwarding(true);
    b.set_forwarding(true);
    a.set_link_enable(B, 0, true).unwrap();
    a.set_link_enable(B, 1, true).unwrap();
    b.set_link_enable(A, 0, true).unwrap();
    b.set_link_enable(A, 1, true).unwrap();

    wait_until(|| is_reachable(&a, B) && is_reachable(&b, A));

    a.send(CHAN, b"only once".to_vec()).unwrap();

    let mut deliveries = Vec::new();
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_millis(300) {
        if let Some(payload) = b.recv(CHAN).unwrap() {
            deliveries.push(payload);
        }
        std::thread::sleep(POLL);
    }
    assert_eq!(deliveries, vec![b"only once".to_vec()]);

    a.set_link_enable(B, 0, false).unwrap();
    a.set_link_enable(B, 1, false).unwrap();
    b.set_link_enable(A, 0, false).unwrap();
    b.set_link_enable(A, 1, false).unwrap();
    a.clear_link_config(B, 0).unwrap();
    a.clear_link_config(B, 1).unwrap();
    b.clear_link_config(A, 0).unwrap();
    b.clear_link_config(A, 1).unwrap();
    teardown(&a, A, &b, B, &[]);
}
