//! Application data channels (spec.md §4, Entities table: "Data channel").
//!
//! A channel is the application-facing multiplexing tag carried in the data
//! packet header. Each channel owns an endpoint the application reads
//! egress bytes from and writes ingress bytes to; here that endpoint is a
//! bounded `crossbeam_channel` pair rather than a raw file descriptor, the
//! Rust-idiomatic equivalent of the original's pipe-backed `datafd`.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, bounded};
use knet_proto::ChannelId;

pub const CHANNEL_QUEUE_DEPTH: usize = 1024;

/// Invoked whenever a channel has data pending on either side, so an
/// application multiplexing several channels on its own event loop knows
/// where to look without polling every channel eagerly.
pub type NotifyCallback = Arc<dyn Fn(ChannelId) + Send + Sync>;

/// One registered data channel (spec.md's `add_data_channel`/
/// `remove_data_channel`).
pub struct DataChannel {
    pub id: ChannelId,
    /// `true` when this channel's endpoint was allocated by the handle
    /// (`add_data_channel` with no caller-supplied descriptor); `false` when
    /// the application handed in its own endpoint to multiplex externally.
    /// Mirrors the original's owner flag on `datafd` entries.
    pub owned: bool,
    egress_tx: Sender<Vec<u8>>,
    egress_rx: Receiver<Vec<u8>>,
    ingress_tx: Sender<Vec<u8>>,
    ingress_rx: Receiver<Vec<u8>>,
    notify: Option<NotifyCallback>,
}

impl std::fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataChannel")
            .field("id", &self.id)
            .field("owned", &self.owned)
            .finish()
    }
}

impl DataChannel {
    pub fn new(id: ChannelId, owned: bool, notify: Option<NotifyCallback>) -> Self {
        let (egress_tx, egress_rx) = bounded(CHANNEL_QUEUE_DEPTH);
        let (ingress_tx, ingress_rx) = bounded(CHANNEL_QUEUE_DEPTH);
        Self {
            id,
            owned,
            egress_tx,
            egress_rx,
            ingress_tx,
            ingress_rx,
            notify,
        }
    }

    /// Application → TX worker.
    pub fn send(&self, payload: Vec<u8>) -> Result<(), crossbeam_channel::TrySendError<Vec<u8>>> {
        self.egress_tx.try_send(payload)?;
        self.fire_notify();
        Ok(())
    }

    pub fn egress_receiver(&self) -> &Receiver<Vec<u8>> {
        &self.egress_rx
    }

    /// RX worker → application.
    pub fn deliver(&self, payload: Vec<u8>) -> Result<(), crossbeam_channel::TrySendError<Vec<u8>>> {
        self.ingress_tx.try_send(payload)?;
        self.fire_notify();
        Ok(())
    }

    /// Application reads delivered payloads (spec.md's `recv(buffer) →
    /// bytes`).
    pub fn recv(&self) -> Option<Vec<u8>> {
        self.ingress_rx.try_recv().ok()
    }

    fn fire_notify(&self) {
        if let Some(notify) = &self.notify {
            notify(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn round_trips_egress_and_ingress_independently() {
        let chan = DataChannel::new(0, true, None);
        chan.send(b"out".to_vec()).unwrap();
        assert_eq!(chan.egress_receiver().try_recv().unwrap(), b"out".to_vec());

        chan.deliver(b"in".to_vec()).unwrap();
        assert_eq!(chan.recv().unwrap(), b"in".to_vec());
        assert!(chan.recv().is_none());
    }

    #[test]
    fn notify_fires_on_both_directions() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let notify: NotifyCallback = Arc::new(move |_ch| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        let chan = DataChannel::new(3, false, Some(notify));
        chan.send(b"a".to_vec()).unwrap();
        chan.deliver(b"b".to_vec()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
