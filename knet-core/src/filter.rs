//! The packet filter callback seam (spec.md §4.5).
//!
//! The filter sees both directions: on TX it resolves a packet's
//! destination host id(s) before link selection runs, and on RX it decides
//! whether an arriving packet is accepted and which local channel it lands
//! on (spec.md §2: "ingress is the mirror of egress"). It is installed and
//! replaced at any time without pausing the TX/RX workers, so the pointer
//! lives behind an [`ArcSwapOption`] rather than the handle's config
//! `RwLock` — this workspace's own addition, not a grounded pack precedent
//! (see DESIGN.md), chosen for the hot-swappable lock-free-read semantics
//! `ArcSwapOption`'s own API documents.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use knet_proto::{ChannelId, NodeId};

/// Which side of the wire this filter invocation is resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

/// What the filter sees: who sent it, who received it, which way it's
/// travelling, and the channel/payload it arrived or departed on.
#[derive(Debug, Clone, Copy)]
pub struct FilterInput<'a> {
    pub sender: NodeId,
    pub receiver: NodeId,
    pub direction: Direction,
    pub channel: ChannelId,
    pub payload: &'a [u8],
}

/// What the filter decides: which configured hosts should receive this
/// packet (TX), or whether to accept it at all (RX), and which channel it
/// should be delivered on. An empty `destinations` list means "drop" (no
/// destination resolved, or the RX side rejects the sender).
#[derive(Debug, Clone)]
pub struct FilterOutput {
    pub destinations: Vec<NodeId>,
    pub channel: ChannelId,
}

pub trait PacketFilter: Send + Sync {
    fn filter(&self, input: FilterInput<'_>) -> FilterOutput;
}

impl<F> PacketFilter for F
where
    F: Fn(FilterInput<'_>) -> FilterOutput + Send + Sync,
{
    fn filter(&self, input: FilterInput<'_>) -> FilterOutput {
        self(input)
    }
}

/// The default before any filter is installed: on TX, broadcasts to every
/// configured host on the same channel; on RX, accepts whatever the wire
/// already decided (the sender, unchanged channel).
#[derive(Debug, Default)]
pub struct BroadcastFilter {
    pub hosts: Vec<NodeId>,
}

impl PacketFilter for BroadcastFilter {
    fn filter(&self, input: FilterInput<'_>) -> FilterOutput {
        match input.direction {
            Direction::Tx => FilterOutput {
                destinations: self.hosts.clone(),
                channel: input.channel,
            },
            Direction::Rx => FilterOutput {
                destinations: vec![input.sender],
                channel: input.channel,
            },
        }
    }
}

/// Holds the installable filter pointer. Reads never take a lock.
pub struct FilterSlot {
    inner: ArcSwapOption<dyn PacketFilter>,
}

impl std::fmt::Debug for FilterSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterSlot")
            .field("installed", &self.inner.load().is_some())
            .finish()
    }
}

impl Default for FilterSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterSlot {
    pub fn new() -> Self {
        Self {
            inner: ArcSwapOption::from(None),
        }
    }

    pub fn install(&self, filter: Arc<dyn PacketFilter>) {
        self.inner.store(Some(filter));
    }

    pub fn clear(&self) {
        self.inner.store(None);
    }

    /// Resolves one TX or RX packet, falling back to `fallback` (e.g. a
    /// broadcast to all configured hosts) when no filter is installed.
    pub fn resolve(&self, input: FilterInput<'_>, fallback: &dyn PacketFilter) -> FilterOutput {
        match self.inner.load_full() {
            Some(filter) => filter.filter(input),
            None => fallback.filter(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(direction: Direction) -> FilterInput<'static> {
        FilterInput {
            sender: 7,
            receiver: 1,
            direction,
            channel: 0,
            payload: b"hi",
        }
    }

    #[test]
    fn tx_falls_back_to_broadcast_when_unset() {
        let slot = FilterSlot::new();
        let fallback = BroadcastFilter { hosts: vec![1, 2, 3] };
        let out = slot.resolve(input(Direction::Tx), &fallback);
        assert_eq!(out.destinations, vec![1, 2, 3]);
    }

    #[test]
    fn rx_falls_back_to_accepting_the_sender() {
        let slot = FilterSlot::new();
        let fallback = BroadcastFilter { hosts: vec![1, 2, 3] };
        let out = slot.resolve(input(Direction::Rx), &fallback);
        assert_eq!(out.destinations, vec![7]);
    }

    #[test]
    fn installed_filter_overrides_fallback() {
        let slot = FilterSlot::new();
        slot.install(Arc::new(|_input: FilterInput<'_>| FilterOutput {
            destinations: vec![42],
            channel: 5,
        }));
        let fallback = BroadcastFilter { hosts: vec![1, 2, 3] };
        let out = slot.resolve(input(Direction::Tx), &fallback);
        assert_eq!(out.destinations, vec![42]);
        assert_eq!(out.channel, 5);
    }

    #[test]
    fn clearing_restores_fallback_behavior() {
        let slot = FilterSlot::new();
        slot.install(Arc::new(|_input: FilterInput<'_>| FilterOutput {
            destinations: Vec::new(),
            channel: 0,
        }));
        slot.clear();
        let fallback = BroadcastFilter { hosts: vec![9] };
        let out = slot.resolve(input(Direction::Tx), &fallback);
        assert_eq!(out.destinations, vec![9]);
    }
}
