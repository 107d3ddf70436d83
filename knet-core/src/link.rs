//! The link state machine and liveness probes (spec.md §4.3).
//!
//! One [`Link`] models a directed transport path to one peer link slot. Its
//! mutable state (counters, timestamps, probe bookkeeping) is protected by
//! its own lock, always acquired after the handle's read lock (spec.md §5),
//! so callers take `&mut Link` only from inside the owning `Host`'s guard.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use knet_proto::{LinkId, NodeId};

use crate::rtt::RttEstimator;
use crate::transport::TransportKind;

pub const PING_INTERVAL: Duration = Duration::from_secs(1);
pub const PONG_MISS_THRESHOLD: u32 = 3;

pub fn dead_timeout(ping_interval: Duration) -> Duration {
    ping_interval * 5
}

/// spec.md §4.3: disabled → probing → connected, with connected reverting to
/// probing on sustained pong loss or rx staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disabled,
    Probing,
    Connected,
}

/// Static per-link configuration set by `set_config`, cleared by
/// `clear_config` (spec.md's Link row: "created by set_config, destroyed by
/// clear_config; must be disabled before clear").
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub transport: TransportKind,
    pub local_addr: SocketAddr,
    /// Absent for a dynamic link whose remote address is learned from the
    /// first received datagram (spec.md §8 scenario 2).
    pub remote_addr: Option<SocketAddr>,
    pub ping_interval: Duration,
}

/// PMTU probing state, supplementary to spec.md (see SPEC_FULL.md's Link
/// module note): a simple binary search over candidate payload sizes run
/// once a link reaches `connected`.
#[derive(Debug, Clone, Copy)]
pub struct PmtuProbeState {
    pub low: usize,
    pub high: usize,
    pub outstanding_seq: Option<u32>,
    pub outstanding_sent_at: Option<Instant>,
    pub settled: bool,
}

impl PmtuProbeState {
    fn new(floor: usize, ceiling: usize) -> Self {
        Self {
            low: floor,
            high: ceiling,
            outstanding_seq: None,
            outstanding_sent_at: None,
            settled: floor >= ceiling,
        }
    }

    fn candidate(&self) -> usize {
        self.low + (self.high - self.low) / 2
    }
}

/// A dropped PMTU probe reply is declared lost after this many ping
/// intervals, so binary search can re-arm instead of stalling forever.
pub const PMTU_PROBE_TIMEOUT_MULTIPLIER: u32 = 2;

#[derive(Debug)]
pub struct Link {
    pub id: LinkId,
    pub host: NodeId,
    pub config: LinkConfig,
    state: LinkState,
    enabled: bool,
    last_rx: Option<Instant>,
    pending_ping_at: Option<Instant>,
    outstanding_ping_seq: Option<u32>,
    next_probe_seq: u32,
    ping_count: u64,
    pong_count: u64,
    consecutive_missed_pongs: u32,
    rtt: RttEstimator,
    framing_errors: u64,
    path_mtu: Option<usize>,
    pmtu_probe: PmtuProbeState,
}

impl Link {
    pub const PMTU_FLOOR: usize = 576;
    pub const PMTU_CEILING: usize = 65507;

    pub fn new(id: LinkId, host: NodeId, config: LinkConfig) -> Self {
        Self {
            id,
            host,
            config,
            state: LinkState::Disabled,
            enabled: false,
            last_rx: None,
            pending_ping_at: None,
            outstanding_ping_seq: None,
            // Starting from a random point rather than 0 avoids treating a
            // freshly re-enabled link's first probe seq as a replay of a
            // previous session's.
            next_probe_seq: rand::random(),
            ping_count: 0,
            pong_count: 0,
            consecutive_missed_pongs: 0,
            rtt: RttEstimator::new(),
            framing_errors: 0,
            path_mtu: None,
            pmtu_probe: PmtuProbeState::new(Self::PMTU_FLOOR, Self::PMTU_CEILING),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn path_mtu(&self) -> Option<usize> {
        self.path_mtu
    }

    pub fn framing_errors(&self) -> u64 {
        self.framing_errors
    }

    pub fn record_framing_error(&mut self) {
        self.framing_errors += 1;
    }

    /// `set_enable(true)`: disabled → probing. A no-op if already enabled.
    pub fn enable(&mut self) {
        if self.enabled {
            return;
        }
        self.enabled = true;
        self.state = LinkState::Probing;
        self.consecutive_missed_pongs = 0;
        self.pmtu_probe = PmtuProbeState::new(Self::PMTU_FLOOR, Self::PMTU_CEILING);
        self.path_mtu = None;
    }

    /// `set_enable(false)`: any state → disabled, from any prior state per
    /// spec.md §4.3.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.state = LinkState::Disabled;
        self.pending_ping_at = None;
        self.outstanding_ping_seq = None;
    }

    /// Called by HEARTBEAT each tick. Returns the ping to send, if this
    /// link's interval has elapsed.
    pub fn poll_ping_due(&mut self, now: Instant) -> Option<(u32, Instant)> {
        if !self.enabled {
            return None;
        }
        let due = self
            .pending_ping_at
            .map(|t| now >= t)
            .unwrap_or(true);
        if !due {
            return None;
        }
        let seq = self.next_probe_seq;
        self.next_probe_seq = self.next_probe_seq.wrapping_add(1);
        self.outstanding_ping_seq = Some(seq);
        self.pending_ping_at = Some(now + self.config.ping_interval);
        self.ping_count += 1;
        Some((seq, now))
    }

    /// HEARTBEAT's dead-link sweep: connected → probing if last-rx is older
    /// than the dead timeout.
    pub fn check_dead(&mut self, now: Instant) -> bool {
        if self.state != LinkState::Connected {
            return false;
        }
        let timeout = dead_timeout(self.config.ping_interval);
        let stale = match self.last_rx {
            Some(t) => now.duration_since(t) > timeout,
            None => true,
        };
        if stale {
            self.state = LinkState::Probing;
            self.consecutive_missed_pongs = 0;
        }
        stale
    }

    /// A valid pong arrived echoing `seq` sent at `sent_at`.
    ///
    /// Ties per spec.md §4.3 ("same probe seq received twice... keeping the
    /// first reply; subsequent duplicates update only statistics"): a pong
    /// whose seq no longer matches the single outstanding ping still counts
    /// toward `pong_count` but never re-triggers the state transition or a
    /// second RTT sample.
    pub fn on_pong(&mut self, seq: u32, sent_at: Instant, now: Instant) {
        self.pong_count += 1;
        self.last_rx = Some(now);
        if self.outstanding_ping_seq != Some(seq) {
            return; // duplicate/stale reply: statistics only
        }
        self.outstanding_ping_seq = None;
        self.consecutive_missed_pongs = 0;
        self.rtt.update(now.saturating_duration_since(sent_at));
        if self.state == LinkState::Probing {
            self.state = LinkState::Connected;
        }
    }

    /// Any valid frame (not only pongs) refreshes liveness.
    pub fn on_rx(&mut self, now: Instant) {
        self.last_rx = Some(now);
    }

    /// HEARTBEAT calls this once per tick per link after the ping-due check
    /// to age out a ping that never got a reply.
    pub fn check_missed_pong(&mut self, now: Instant) {
        let Some(_seq) = self.outstanding_ping_seq else { return };
        let Some(deadline) = self.pending_ping_at else { return };
        if now < deadline {
            return;
        }
        self.outstanding_ping_seq = None;
        self.consecutive_missed_pongs += 1;
        if self.state == LinkState::Connected && self.consecutive_missed_pongs > PONG_MISS_THRESHOLD {
            self.state = LinkState::Probing;
        }
    }

    /// Drives the PMTU binary search once connected. Returns the candidate
    /// payload size to probe next, if one is outstanding.
    pub fn poll_pmtu_probe(&mut self, now: Instant) -> Option<(usize, u32)> {
        if self.state != LinkState::Connected || self.pmtu_probe.settled {
            return None;
        }
        if self.pmtu_probe.outstanding_seq.is_some() {
            return None;
        }
        let seq = self.next_probe_seq;
        self.next_probe_seq = self.next_probe_seq.wrapping_add(1);
        self.pmtu_probe.outstanding_seq = Some(seq);
        self.pmtu_probe.outstanding_sent_at = Some(now);
        Some((self.pmtu_probe.candidate(), seq))
    }

    /// A reply arrived for `seq`. `confirmed_size` is the payload size the
    /// peer actually echoed back; the candidate is only accepted when it
    /// matches the size that was probed, so a truncated or corrupted reply
    /// is treated the same as a rejection.
    pub fn on_pmtu_reply(&mut self, seq: u32, confirmed_size: Option<usize>) {
        if self.pmtu_probe.outstanding_seq != Some(seq) {
            return;
        }
        let candidate = self.pmtu_probe.candidate();
        self.pmtu_probe.outstanding_seq = None;
        self.pmtu_probe.outstanding_sent_at = None;
        if confirmed_size == Some(candidate) {
            self.pmtu_probe.low = candidate;
        } else {
            self.pmtu_probe.high = candidate.saturating_sub(1);
        }
        if self.pmtu_probe.high <= self.pmtu_probe.low + 1 {
            self.pmtu_probe.settled = true;
            self.path_mtu = Some(self.pmtu_probe.low);
        }
    }

    pub fn on_pmtu_timeout(&mut self, seq: u32) {
        self.on_pmtu_reply(seq, None);
    }

    /// HEARTBEAT calls this once per tick per link: ages out an outstanding
    /// PMTU probe whose reply never arrived, so the binary search re-arms
    /// instead of stalling on a dropped reply forever.
    pub fn poll_pmtu_timeout(&mut self, now: Instant) {
        let Some(seq) = self.pmtu_probe.outstanding_seq else { return };
        let Some(sent_at) = self.pmtu_probe.outstanding_sent_at else { return };
        let timeout = self.config.ping_interval * PMTU_PROBE_TIMEOUT_MULTIPLIER;
        if now.duration_since(sent_at) >= timeout {
            self.on_pmtu_timeout(seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_link() -> Link {
        let cfg = LinkConfig {
            transport: TransportKind::Udp,
            local_addr: "127.0.0.1:0".parse().unwrap(),
            remote_addr: Some("127.0.0.1:1".parse().unwrap()),
            ping_interval: PING_INTERVAL,
        };
        Link::new(0, 1, cfg)
    }

    #[test]
    fn enabling_moves_disabled_to_probing() {
        let mut link = make_link();
        assert_eq!(link.state(), LinkState::Disabled);
        link.enable();
        assert_eq!(link.state(), LinkState::Probing);
    }

    #[test]
    fn first_valid_pong_connects_the_link() {
        let mut link = make_link();
        link.enable();
        let now = Instant::now();
        let (seq, sent_at) = link.poll_ping_due(now).unwrap();
        link.on_pong(seq, sent_at, now + Duration::from_millis(20));
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[test]
    fn duplicate_pong_does_not_retrigger_or_double_count_rtt() {
        let mut link = make_link();
        link.enable();
        let now = Instant::now();
        let (seq, sent_at) = link.poll_ping_due(now).unwrap();
        link.on_pong(seq, sent_at, now + Duration::from_millis(20));
        let srtt_after_first = link.rtt().srtt();
        link.on_pong(seq, sent_at, now + Duration::from_millis(500));
        assert_eq!(link.rtt().srtt(), srtt_after_first);
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[test]
    fn sustained_missed_pongs_revert_to_probing() {
        let mut link = make_link();
        link.enable();
        let mut now = Instant::now();
        let (seq, sent_at) = link.poll_ping_due(now).unwrap();
        link.on_pong(seq, sent_at, now);
        assert_eq!(link.state(), LinkState::Connected);

        for _ in 0..=PONG_MISS_THRESHOLD {
            now += PING_INTERVAL;
            link.poll_ping_due(now);
            now += PING_INTERVAL;
            link.check_missed_pong(now);
        }
        assert_eq!(link.state(), LinkState::Probing);
    }

    #[test]
    fn stale_rx_marks_connected_link_dead() {
        let mut link = make_link();
        link.enable();
        let now = Instant::now();
        let (seq, sent_at) = link.poll_ping_due(now).unwrap();
        link.on_pong(seq, sent_at, now);
        assert_eq!(link.state(), LinkState::Connected);

        let later = now + dead_timeout(PING_INTERVAL) + Duration::from_millis(1);
        assert!(link.check_dead(later));
        assert_eq!(link.state(), LinkState::Probing);
    }

    #[test]
    fn disable_resets_to_disabled_from_any_state() {
        let mut link = make_link();
        link.enable();
        let now = Instant::now();
        let (seq, sent_at) = link.poll_ping_due(now).unwrap();
        link.on_pong(seq, sent_at, now);
        link.disable();
        assert_eq!(link.state(), LinkState::Disabled);
        assert!(!link.is_enabled());
    }

    #[test]
    fn pmtu_binary_search_converges() {
        let mut link = make_link();
        link.enable();
        let now = Instant::now();
        let (seq, sent_at) = link.poll_ping_due(now).unwrap();
        link.on_pong(seq, sent_at, now);

        let mut guard = 0;
        while let Some((candidate, seq)) = link.poll_pmtu_probe(now) {
            link.on_pmtu_reply(seq, Some(candidate)); // always accept: should converge to ceiling - 1
            guard += 1;
            assert!(guard < 64, "pmtu probe failed to converge");
        }
        assert!(link.path_mtu().is_some());
    }

    #[test]
    fn pmtu_probe_timeout_rearms_the_search() {
        let mut link = make_link();
        link.enable();
        let now = Instant::now();
        let (seq, sent_at) = link.poll_ping_due(now).unwrap();
        link.on_pong(seq, sent_at, now);

        link.poll_pmtu_probe(now).unwrap();
        assert!(link.poll_pmtu_probe(now).is_none(), "a second probe shouldn't start while one is outstanding");

        let later = now + PING_INTERVAL * PMTU_PROBE_TIMEOUT_MULTIPLIER;
        link.poll_pmtu_timeout(later);
        assert!(link.poll_pmtu_probe(later).is_some(), "timeout should re-arm the search");
    }
}
