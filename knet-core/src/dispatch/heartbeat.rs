//! HEARTBEAT worker (spec.md §4.6): walks every enabled link each tick,
//! sends pings, times out dead links, and drives PMTU probing once a link
//! is connected.

use std::sync::Arc;

use bytes::BytesMut;
use byteorder::{BigEndian, ByteOrder};
use crossbeam_channel::Receiver;
use knet_proto::{FrameHeader, PacketType};

use super::LinkChangeSender;
use crate::handle::Handle;

pub(super) fn run(handle: Arc<Handle>, shutdown: Receiver<()>, link_change: LinkChangeSender) {
    let tick = handle.heartbeat_tick();
    loop {
        match shutdown.recv_timeout(tick) {
            Ok(()) => return,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
        }

        let now = handle.time_provider().now();
        let host_ids: Vec<_> = {
            let state = handle.state.read();
            state.hosts.keys().copied().collect()
        };

        for host_id in host_ids {
            let mut became_dead = false;
            let mut pings = Vec::new();
            let mut pmtu_probes = Vec::new();

            {
                let state = handle.state.read();
                if let Some(host) = state.hosts.get(&host_id) {
                    let mut host = host.lock();
                    for link in host.links_mut() {
                        if link.check_dead(now) {
                            became_dead = true;
                        }
                        link.check_missed_pong(now);
                        if let Some((seq, sent_at)) = link.poll_ping_due(now) {
                            pings.push((link.id, seq, sent_at));
                        }
                        link.poll_pmtu_timeout(now);
                        if let Some((size, seq)) = link.poll_pmtu_probe(now) {
                            pmtu_probes.push((link.id, size, seq));
                        }
                    }
                }
            }

            for (link_id, seq, sent_at) in pings {
                send_ping(&handle, host_id, link_id, seq, sent_at);
            }
            for (link_id, size, seq) in pmtu_probes {
                send_pmtu_probe(&handle, host_id, link_id, size, seq);
            }
            if became_dead {
                let _ = link_change.send(host_id);
            }
        }
    }
}

fn send_ping(handle: &Arc<Handle>, host_id: knet_proto::NodeId, link_id: knet_proto::LinkId, seq: u32, _sent_at: std::time::Instant) {
    let Some(transport) = handle.transport_for(host_id, link_id) else { return };
    let mut header = FrameHeader::new(PacketType::Ping, handle.node_id, seq);
    header.channel_or_probe = seq as u16;

    // the embedded timestamp is the sender's own clock, read at send time;
    // `_sent_at` (the Instant Link recorded) only matters locally for RTT
    // bookkeeping and never needs to leave this process.
    let millis = handle.millis_since_epoch();
    let mut payload = [0u8; 9];
    payload[0] = link_id;
    BigEndian::write_u64(&mut payload[1..], millis);

    let mut buf = BytesMut::new();
    if header.encode(&payload, &mut buf).is_ok() {
        let _ = transport.send(&buf);
    }
}

/// Sends a probe datagram padded to `size` bytes: the candidate the binary
/// search wants to test. Whether it survives the path intact (and gets
/// echoed back at the same size) is what `rx::handle_probe`'s `PmtuReply`
/// arm validates.
fn send_pmtu_probe(handle: &Arc<Handle>, host_id: knet_proto::NodeId, link_id: knet_proto::LinkId, size: usize, seq: u32) {
    let Some(transport) = handle.transport_for(host_id, link_id) else { return };
    let mut header = FrameHeader::new(PacketType::PmtuProbe, handle.node_id, seq);
    header.channel_or_probe = seq as u16;
    let payload = vec![0u8; size];
    let mut buf = BytesMut::new();
    if header.encode(&payload, &mut buf).is_ok() {
        let _ = transport.send(&buf);
    }
}
