//! Per-handle logging (spec.md §4.6, `open(node_id, log_fd, log_level, flags)`).
//!
//! The core logs through `tracing` the way the teacher's engine code does
//! (plain `tracing::debug!`/`warn!`/`error!` call sites — see
//! `merkle-tox-core/src/engine/mod.rs`), so the ambient, process-wide
//! subscriber the embedding application installs always sees everything.
//! On top of that, spec.md's programmatic interface asks for a raw per-handle
//! log sink the caller can read as a plain byte stream (`log_fd`); that
//! sink is a bounded queue drained by the LOG dispatcher and optionally
//! mirrored onto a `UnixDatagram` pipe pair, the scaffolding-turned-per-handle-
//! state SPEC_FULL.md calls out (global log thread/mutex in the original
//! becomes state owned by the handle and torn down at close).

use std::os::unix::net::UnixDatagram;

use crossbeam_channel::{Receiver, Sender, TrySendError, unbounded};
use knet_proto::NodeId;

pub const LOG_QUEUE_DEPTH_UNBOUNDED_WARNING_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub node_id: NodeId,
    pub level: LogLevel,
    pub message: String,
}

/// Where a handle's raw log lines go, mirroring the original's `log_fd`
/// parameter to `open`.
pub enum LogSink {
    /// No raw sink; only the process `tracing` subscriber receives events.
    None,
    /// Mirror every record onto a `UnixDatagram` pair; the caller keeps the
    /// other end to read lines from.
    Fd(UnixDatagram),
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogSink::None => write!(f, "LogSink::None"),
            LogSink::Fd(_) => write!(f, "LogSink::Fd(..)"),
        }
    }
}

/// Owns the handle's log queue. The handle's code calls [`LogChannel::emit`]
/// (which also fires the matching `tracing` macro); the LOG dispatcher
/// drains the receiver and forwards to the configured [`LogSink`].
pub struct LogChannel {
    node_id: NodeId,
    min_level: LogLevel,
    tx: Sender<LogRecord>,
    rx: Receiver<LogRecord>,
}

impl std::fmt::Debug for LogChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogChannel")
            .field("node_id", &self.node_id)
            .field("min_level", &self.min_level)
            .finish()
    }
}

impl LogChannel {
    pub fn new(node_id: NodeId, min_level: LogLevel) -> Self {
        let (tx, rx) = unbounded();
        Self {
            node_id,
            min_level,
            tx,
            rx,
        }
    }

    pub fn receiver(&self) -> Receiver<LogRecord> {
        self.rx.clone()
    }

    pub fn emit(&self, level: LogLevel, message: impl Into<String>) {
        if level < self.min_level {
            return;
        }
        let message = message.into();
        match level {
            LogLevel::Trace => tracing::trace!(node = self.node_id, "{}", message),
            LogLevel::Debug => tracing::debug!(node = self.node_id, "{}", message),
            LogLevel::Info => tracing::info!(node = self.node_id, "{}", message),
            LogLevel::Warn => tracing::warn!(node = self.node_id, "{}", message),
            LogLevel::Error => tracing::error!(node = self.node_id, "{}", message),
        }
        let record = LogRecord {
            node_id: self.node_id,
            level,
            message,
        };
        if let Err(TrySendError::Full(_)) = self.tx.try_send(record) {
            // unbounded sender never reports Full; kept for clarity if the
            // queue type ever changes to a bounded one.
        }
    }
}

/// Drains one batch of queued records into `sink`. Called by the LOG
/// dispatcher's loop iteration.
pub fn drain_into(rx: &Receiver<LogRecord>, sink: &LogSink) {
    while let Ok(record) = rx.try_recv() {
        if let LogSink::Fd(socket) = sink {
            let line = format!("[{:?}] node={} {}\n", record.level, record.node_id, record.message);
            let _ = socket.send(line.as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_records_are_suppressed() {
        let log = LogChannel::new(1, LogLevel::Warn);
        log.emit(LogLevel::Debug, "should not queue");
        assert!(log.receiver().try_recv().is_err());
    }

    #[test]
    fn at_or_above_threshold_records_queue() {
        let log = LogChannel::new(1, LogLevel::Info);
        log.emit(LogLevel::Warn, "queued");
        let record = log.receiver().try_recv().unwrap();
        assert_eq!(record.message, "queued");
    }

    #[test]
    fn drain_forwards_to_fd_sink() {
        let (a, b) = UnixDatagram::pair().unwrap();
        let log = LogChannel::new(5, LogLevel::Trace);
        log.emit(LogLevel::Error, "boom");
        drain_into(&log.receiver(), &LogSink::Fd(a));
        let mut buf = [0u8; 256];
        let n = b.recv(&mut buf).unwrap();
        let line = String::from_utf8_lossy(&buf[..n]);
        assert!(line.contains("boom"));
    }
}
