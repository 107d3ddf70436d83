//! The five dispatcher threads (spec.md §4.6, §5).
//!
//! Each worker is a plain OS thread coordinating through `crossbeam_channel`
//! rather than raw `poll` on file descriptors, since this crate's
//! [`crate::transport::Transport`] seam is non-blocking rather than
//! fd-based. `close` sets a shutdown flag observable by every worker (here:
//! dropping the shutdown sender, which makes every `select!` wake
//! immediately) and joins them in the order spec.md §5 specifies: TX, RX,
//! HEARTBEAT, DST-LINK, LOG.

mod dstlink;
mod heartbeat;
mod log;
mod rx;
mod tx;

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use knet_proto::NodeId;

use crate::handle::Handle;
use crate::logging::LogSink;

/// Signal sent from HEARTBEAT/RX to DST-LINK whenever a link's
/// connected-state may have changed, so DST-LINK only recomputes affected
/// hosts instead of polling every host every tick.
pub(crate) type LinkChangeSender = Sender<NodeId>;
pub(crate) type LinkChangeReceiver = Receiver<NodeId>;

pub struct Dispatchers {
    shutdown_tx: Sender<()>,
    tx: JoinHandle<()>,
    rx: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
    dstlink: JoinHandle<()>,
    log: JoinHandle<()>,
}

impl Dispatchers {
    pub fn spawn(handle: Arc<Handle>, log_sink: LogSink) -> Self {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let (link_change_tx, link_change_rx) = unbounded::<NodeId>();

        let tx = {
            let handle = handle.clone();
            let shutdown_rx = shutdown_rx.clone();
            std::thread::Builder::new()
                .name("knet-tx".into())
                .spawn(move || tx::run(handle, shutdown_rx))
                .expect("spawning the TX worker")
        };

        let rx = {
            let handle = handle.clone();
            let shutdown_rx = shutdown_rx.clone();
            let link_change_tx = link_change_tx.clone();
            std::thread::Builder::new()
                .name("knet-rx".into())
                .spawn(move || rx::run(handle, shutdown_rx, link_change_tx))
                .expect("spawning the RX worker")
        };

        let heartbeat = {
            let handle = handle.clone();
            let shutdown_rx = shutdown_rx.clone();
            std::thread::Builder::new()
                .name("knet-heartbeat".into())
                .spawn(move || heartbeat::run(handle, shutdown_rx, link_change_tx))
                .expect("spawning the HEARTBEAT worker")
        };

        let dstlink = {
            let handle = handle.clone();
            let shutdown_rx = shutdown_rx.clone();
            std::thread::Builder::new()
                .name("knet-dstlink".into())
                .spawn(move || dstlink::run(handle, shutdown_rx, link_change_rx))
                .expect("spawning the DST-LINK worker")
        };

        let log = {
            let shutdown_rx = shutdown_rx.clone();
            let receiver = handle.log.receiver();
            std::thread::Builder::new()
                .name("knet-log".into())
                .spawn(move || log::run(receiver, log_sink, shutdown_rx))
                .expect("spawning the LOG worker")
        };

        Self {
            shutdown_tx,
            tx,
            rx,
            heartbeat,
            dstlink,
            log,
        }
    }

    /// Drops the shutdown sender (closing the channel wakes every worker's
    /// `select!`) and joins in the mandated order.
    pub fn shutdown(self) {
        drop(self.shutdown_tx);
        let _ = self.tx.join();
        let _ = self.rx.join();
        let _ = self.heartbeat.join();
        let _ = self.dstlink.join();
        let _ = self.log.join();
    }
}
