//! LOG worker (spec.md §4.6): drains queued log records into the
//! configured [`LogSink`].

use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::logging::{LogRecord, LogSink, drain_into};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(super) fn run(records: Receiver<LogRecord>, sink: LogSink, shutdown: Receiver<()>) {
    loop {
        drain_into(&records, &sink);
        match shutdown.recv_timeout(POLL_INTERVAL) {
            Ok(()) => break,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
        }
    }
    drain_into(&records, &sink); // final drain so close()'s own log line isn't lost
}
