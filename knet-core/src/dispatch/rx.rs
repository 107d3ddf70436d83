//! RX worker: network → application, plus inbound probe handling
//! (spec.md §4.3, §4.6).

use std::sync::Arc;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use crossbeam_channel::Receiver;
use knet_proto::{Fingerprint, FrameHeader, NodeId, PacketType};

use super::LinkChangeSender;
use crate::filter::{Direction, FilterInput};
use crate::handle::Handle;
use crate::logging::LogLevel;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const RECV_BUF_SIZE: usize = knet_proto::ABSOLUTE_MAX_PACKET_SIZE;

pub(super) fn run(handle: Arc<Handle>, shutdown: Receiver<()>, link_change: LinkChangeSender) {
    let mut buf = vec![0u8; RECV_BUF_SIZE];
    loop {
        match shutdown.recv_timeout(POLL_INTERVAL) {
            Ok(()) => return,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
        }

        let transports = handle.all_transports();
        for ((host_id, link_id), transport) in transports {
            loop {
                let received = match transport.try_recv(&mut buf) {
                    Ok(Some((n, from))) => {
                        transport.set_remote(from); // dynamic-remote learning, spec.md §8 scenario 2
                        Some(n)
                    }
                    Ok(None) => None,
                    Err(e) => {
                        handle.log.emit(
                            LogLevel::Warn,
                            format!("recv failed on host {host_id} link {link_id}: {e}"),
                        );
                        None
                    }
                };
                let Some(n) = received else { break };
                handle_frame(&handle, host_id, link_id, &buf[..n], &link_change);
            }
        }
    }
}

fn handle_frame(handle: &Arc<Handle>, host_id: NodeId, link_id: knet_proto::LinkId, raw: &[u8], link_change: &LinkChangeSender) {
    let (header, wire_payload) = match FrameHeader::decode(raw) {
        Ok(ok) => ok,
        Err(_) => {
            record_framing_error(handle, host_id, link_id);
            return;
        }
    };

    let now = handle.time_provider().now();

    if header.packet_type.is_probe() {
        handle_probe(handle, host_id, link_id, &header, wire_payload, now, link_change);
        return;
    }

    {
        let state = handle.state.read();
        if let Some(host) = state.hosts.get(&host_id) {
            if let Some(l) = host.lock().link_mut(link_id) {
                l.on_rx(now);
            }
        }
    }

    let fp = Fingerprint::of(&header);
    let duplicate = {
        let state = handle.state.read();
        state.dedup.lock().insert(fp)
    };
    if duplicate {
        return;
    }

    let decompressed = {
        let state = handle.state.read();
        if header.flags.is_compressed() {
            state.compress.lock().decompress(header.compress_algo, wire_payload)
        } else {
            Ok(wire_payload.to_vec())
        }
    };
    let Ok(plaintext) = decompressed else {
        record_framing_error(handle, host_id, link_id);
        return;
    };

    let opened = {
        let state = handle.state.read();
        if header.flags.is_encrypted() {
            state.crypto.open(&plaintext)
        } else {
            Some(plaintext)
        }
    };
    let Some(payload) = opened else {
        record_framing_error(handle, host_id, link_id);
        return;
    };

    if !handle.forwarding() {
        return;
    }

    let fallback = handle.broadcast_filter();
    let resolved = handle.filter.resolve(
        FilterInput {
            sender: host_id,
            receiver: handle.node_id,
            direction: Direction::Rx,
            channel: header.channel(),
            payload: &payload,
        },
        &fallback,
    );
    if resolved.destinations.is_empty() {
        handle.log.emit(LogLevel::Debug, format!("drop: filter rejected sender {host_id}"));
        return;
    }

    let channel = resolved.channel;
    let state = handle.state.read();
    match state.channels.get(&channel) {
        Some(chan) => {
            if let Err(e) = chan.deliver(payload) {
                drop(state);
                handle.log.emit(LogLevel::Debug, format!("drop: channel {channel} delivery failed: {e}"));
            }
        }
        None => {
            drop(state);
            handle.log.emit(LogLevel::Debug, format!("drop: unknown channel {channel}"));
        }
    }
}

fn handle_probe(
    handle: &Arc<Handle>,
    host_id: NodeId,
    link_id: knet_proto::LinkId,
    header: &FrameHeader,
    payload: &[u8],
    now: std::time::Instant,
    link_change: &LinkChangeSender,
) {
    let seq = header.probe_seq() as u32;
    let mut changed = false;

    match header.packet_type {
        PacketType::Ping => {
            let state = handle.state.read();
            if let Some(host) = state.hosts.get(&host_id) {
                if let Some(l) = host.lock().link_mut(link_id) {
                    l.on_rx(now);
                }
            }
            if let Some(transport) = handle.transport_for(host_id, link_id) {
                let mut reply = FrameHeader::new(PacketType::Pong, handle.node_id, header.seq);
                reply.channel_or_probe = header.channel_or_probe;
                let mut buf = bytes::BytesMut::new();
                if reply.encode(payload, &mut buf).is_ok() {
                    let _ = transport.send(&buf);
                }
            }
        }
        PacketType::Pong => {
            // Ping payload layout is [link_id: u8, millis: u64 BE] (see
            // heartbeat::send_ping); Pong echoes it back verbatim.
            if payload.len() >= 9 {
                let sent_millis = BigEndian::read_u64(&payload[1..9]);
                let sent_at = handle.instant_from_millis_since_epoch(sent_millis);
                let state = handle.state.read();
                if let Some(host) = state.hosts.get(&host_id) {
                    let mut host = host.lock();
                    if let Some(link) = host.link_mut(link_id) {
                        let was_connected = link.state() == crate::link::LinkState::Connected;
                        link.on_pong(seq, sent_at, now);
                        if link.state() == crate::link::LinkState::Connected && !was_connected {
                            changed = true;
                        }
                    }
                }
            }
        }
        PacketType::PmtuProbe => {
            // Echo back the size actually received, not just an empty ack:
            // the prober compares this against the candidate it sent to
            // tell "arrived intact" from "arrived truncated/corrupted."
            if let Some(transport) = handle.transport_for(host_id, link_id) {
                let mut reply = FrameHeader::new(PacketType::PmtuReply, handle.node_id, header.seq);
                reply.channel_or_probe = header.channel_or_probe;
                let mut reply_payload = [0u8; 4];
                BigEndian::write_u32(&mut reply_payload, payload.len() as u32);
                let mut buf = bytes::BytesMut::new();
                if reply.encode(&reply_payload, &mut buf).is_ok() {
                    let _ = transport.send(&buf);
                }
            }
        }
        PacketType::PmtuReply => {
            let confirmed_size = (payload.len() >= 4).then(|| BigEndian::read_u32(&payload[..4]) as usize);
            let state = handle.state.read();
            if let Some(host) = state.hosts.get(&host_id) {
                if let Some(link) = host.lock().link_mut(link_id) {
                    link.on_pmtu_reply(seq, confirmed_size);
                }
            }
        }
        PacketType::Data => unreachable!("handled by the caller"),
    }

    if changed {
        let _ = link_change.send(host_id);
    }
}

fn record_framing_error(handle: &Arc<Handle>, host_id: NodeId, link_id: knet_proto::LinkId) {
    let state = handle.state.read();
    if let Some(host) = state.hosts.get(&host_id) {
        if let Some(link) = host.lock().link_mut(link_id) {
            link.record_framing_error();
        }
    }
    handle.log.emit(LogLevel::Debug, format!("framing error on host {host_id} link {link_id}"));
}
