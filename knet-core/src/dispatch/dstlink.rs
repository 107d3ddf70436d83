//! DST-LINK worker (spec.md §4.4, §4.6): recomputes a host's active link
//! set whenever one of its links changes connected-state, and fires the
//! reachability callback exactly once per transition, outside any lock.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, select};

use super::LinkChangeReceiver;
use crate::handle::Handle;

const IDLE_SWEEP_INTERVAL: Duration = Duration::from_millis(200);

pub(super) fn run(handle: Arc<Handle>, shutdown: Receiver<()>, link_change: LinkChangeReceiver) {
    loop {
        select! {
            recv(shutdown) -> msg => {
                if msg.is_ok() { return; }
                return; // disconnected: shutting down
            }
            recv(link_change) -> host_id => {
                match host_id {
                    Ok(host_id) => recompute(&handle, host_id),
                    Err(_) => return,
                }
            }
            default(IDLE_SWEEP_INTERVAL) => {
                // Catches transitions that did not get an explicit signal
                // (defensive periodic sweep; the fast path is the channel).
                sweep_all(&handle);
            }
        }
    }
}

fn recompute(handle: &Arc<Handle>, host_id: knet_proto::NodeId) {
    let transition = {
        let state = handle.state.read();
        state.hosts.get(&host_id).and_then(|h| h.lock().recompute_active_links())
    };
    if let Some(reachable) = transition {
        handle.fire_host_status(host_id, reachable);
    }
}

fn sweep_all(handle: &Arc<Handle>) {
    let host_ids: Vec<_> = {
        let state = handle.state.read();
        state.hosts.keys().copied().collect()
    };
    for host_id in host_ids {
        recompute(handle, host_id);
    }
}
