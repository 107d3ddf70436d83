//! TX worker: application → network (spec.md §4.6).

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use crossbeam_channel::Receiver;
use knet_proto::{FrameHeader, Flags};

use crate::filter::{Direction, FilterInput};
use crate::handle::Handle;
use crate::logging::LogLevel;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

pub(super) fn run(handle: Arc<Handle>, shutdown: Receiver<()>) {
    let mut next_seq: u32 = 0;
    loop {
        match shutdown.recv_timeout(POLL_INTERVAL) {
            Ok(()) => return,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
        }
        if !handle.forwarding() {
            continue;
        }

        let channels: Vec<_> = {
            let state = handle.state.read();
            state.channels.keys().copied().collect()
        };

        for channel in channels {
            loop {
                let payload = {
                    let state = handle.state.read();
                    match state.channels.get(&channel) {
                        Some(chan) => match chan.egress_receiver().try_recv() {
                            Ok(bytes) => bytes,
                            Err(_) => break,
                        },
                        None => break,
                    }
                };
                send_one(&handle, channel, &payload, &mut next_seq);
            }
        }
    }
}

fn send_one(handle: &Arc<Handle>, channel: knet_proto::ChannelId, payload: &[u8], next_seq: &mut u32) {
    let fallback = handle.broadcast_filter();
    let resolved = handle.filter.resolve(
        FilterInput {
            sender: handle.node_id,
            receiver: handle.node_id,
            direction: Direction::Tx,
            channel,
            payload,
        },
        &fallback,
    );
    let destinations = resolved.destinations;
    let channel = resolved.channel;

    if destinations.is_empty() {
        return; // spec.md §4.5: empty filter output drops the packet silently
    }

    let seq = *next_seq;
    *next_seq = next_seq.wrapping_add(1);

    for host_id in destinations {
        let active_links: Vec<knet_proto::LinkId> = {
            let state = handle.state.read();
            match state.hosts.get(&host_id) {
                Some(host) => host.lock().active_links().to_vec(),
                None => continue,
            }
        };
        if active_links.is_empty() {
            continue;
        }

        let (wire_payload, flags, compress_algo) = {
            let state = handle.state.read();
            let compress = state.compress.lock();
            match compress.should_compress(payload.len()) {
                true => match compress.compress(payload) {
                    Ok(Some((idx, compressed))) => (compressed, Flags::COMPRESSED, idx),
                    _ => (payload.to_vec(), Flags::empty(), 0),
                },
                false => (payload.to_vec(), Flags::empty(), 0),
            }
        };
        let (sealed, flags) = {
            let state = handle.state.read();
            let sealed = state.crypto.seal(&wire_payload);
            let flags = if state.crypto.is_noop() { flags } else { flags | Flags::ENCRYPTED };
            (sealed, flags)
        };

        let mut header = FrameHeader::for_data(handle.node_id, seq, channel);
        header.flags = flags;
        header.compress_algo = compress_algo;

        let mut buf = BytesMut::new();
        if header.encode(&sealed, &mut buf).is_err() {
            continue;
        }

        for link_id in &active_links {
            if let Some(transport) = handle.transport_for(host_id, *link_id) {
                if let Err(e) = transport.send(&buf) {
                    handle.log.emit(
                        LogLevel::Warn,
                        format!("send failed on host {host_id} link {link_id}: {e}"),
                    );
                    handle.fire_socket_notify(host_id, *link_id);
                }
            }
        }
    }
}
