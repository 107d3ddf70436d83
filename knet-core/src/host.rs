//! Host and link selection (spec.md §4.4).
//!
//! A `Host` owns a bounded set of [`Link`]s and the policy used to pick
//! which ones egress traffic goes out on. Reachability transitions are
//! computed here and surfaced to the DST-LINK dispatcher, which is the only
//! place the status-change callback is invoked (never under this struct's
//! own lock).

use knet_proto::{LinkId, NodeId};

use crate::error::{ConfigError, KnetError, StateError};
use crate::link::{Link, LinkConfig, LinkState};

/// A host may hold at most this many configured link slots, matching
/// kronosnet's `KNET_MAX_LINK` compile bound.
pub const MAX_LINKS_PER_HOST: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPolicy {
    /// Active/standby: only the best-ranked connected link carries traffic.
    Passive,
    /// All-parallel: every connected link carries traffic; the receiver
    /// deduplicates.
    Active,
}

#[derive(Debug)]
pub struct Host {
    pub id: NodeId,
    pub policy: LinkPolicy,
    links: Vec<Option<Link>>,
    reachable: bool,
    /// Cached result of the last active-link-set recomputation, refreshed
    /// by [`Host::recompute_active_links`].
    active_links: Vec<LinkId>,
}

impl Host {
    pub fn new(id: NodeId, policy: LinkPolicy) -> Self {
        Self {
            id,
            policy,
            links: (0..MAX_LINKS_PER_HOST).map(|_| None).collect(),
            reachable: false,
            active_links: Vec::new(),
        }
    }

    pub fn reachable(&self) -> bool {
        self.reachable
    }

    pub fn active_links(&self) -> &[LinkId] {
        &self.active_links
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id as usize).and_then(|slot| slot.as_ref())
    }

    pub fn link_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.links.get_mut(id as usize).and_then(|slot| slot.as_mut())
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().filter_map(|slot| slot.as_ref())
    }

    pub fn links_mut(&mut self) -> impl Iterator<Item = &mut Link> {
        self.links.iter_mut().filter_map(|slot| slot.as_mut())
    }

    /// `set_link_config`: creates a link at `id` (spec.md's Link row:
    /// "created by set_config").
    pub fn set_link_config(&mut self, id: LinkId, config: LinkConfig) -> Result<(), ConfigError> {
        let slot = self
            .links
            .get_mut(id as usize)
            .ok_or(ConfigError::TooManyLinks(MAX_LINKS_PER_HOST))?;
        if slot.is_some() {
            return Err(ConfigError::DuplicateLink(self.id, id));
        }
        *slot = Some(Link::new(id, self.id, config));
        Ok(())
    }

    /// `clear_link_config`: requires the link be disabled first (spec.md's
    /// Link row: "must be disabled before clear").
    pub fn clear_link_config(&mut self, id: LinkId) -> Result<(), KnetError> {
        let slot = self
            .links
            .get_mut(id as usize)
            .ok_or(ConfigError::UnknownLink(self.id, id))?;
        match slot {
            None => Err(ConfigError::UnknownLink(self.id, id).into()),
            Some(link) if link.is_enabled() => {
                Err(StateError::LinkStillEnabled(self.id, id).into())
            }
            Some(_) => {
                *slot = None;
                Ok(())
            }
        }
    }

    pub fn any_link_enabled(&self) -> bool {
        self.links().any(|l| l.is_enabled())
    }

    /// Recomputes the active link set and the host's reachability. Returns
    /// `Some(bool)` with the new reachability value exactly when it
    /// *changed* (spec.md: "each transition fires the status-change
    /// callback exactly once"); `None` means no transition happened.
    pub fn recompute_active_links(&mut self) -> Option<bool> {
        let mut connected: Vec<LinkId> = self
            .links
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                slot.as_ref()
                    .filter(|l| l.state() == LinkState::Connected)
                    .map(|_| idx as LinkId)
            })
            .collect();
        connected.sort_unstable();

        self.active_links = match self.policy {
            LinkPolicy::Active => connected,
            LinkPolicy::Passive => self.best_passive_link(&connected).into_iter().collect(),
        };

        let now_reachable = !self.links.iter().all(|slot| {
            slot.as_ref()
                .map(|l| l.state() != LinkState::Connected)
                .unwrap_or(true)
        });
        if now_reachable != self.reachable {
            self.reachable = now_reachable;
            Some(now_reachable)
        } else {
            None
        }
    }

    /// Picks the single link `LinkPolicy::Passive` should carry traffic on:
    /// the lowest RTT health bound among links with an established
    /// estimate, falling back to the lowest slot index when bounds tie or
    /// no link has a sample yet.
    fn best_passive_link(&self, connected: &[LinkId]) -> Option<LinkId> {
        connected.iter().copied().min_by(|&a, &b| {
            let la = self.link(a).expect("connected set only holds occupied slots");
            let lb = self.link(b).expect("connected set only holds occupied slots");
            match (la.rtt().has_samples(), lb.rtt().has_samples()) {
                (true, true) => la.rtt().bound().cmp(&lb.rtt().bound()).then(a.cmp(&b)),
                (true, false) => std::cmp::Ordering::Less,
                (false, true) => std::cmp::Ordering::Greater,
                (false, false) => a.cmp(&b),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportKind;
    use std::time::Instant;

    fn cfg() -> LinkConfig {
        LinkConfig {
            transport: TransportKind::Udp,
            local_addr: "127.0.0.1:0".parse().unwrap(),
            remote_addr: Some("127.0.0.1:1".parse().unwrap()),
            ping_interval: std::time::Duration::from_secs(1),
        }
    }

    fn connect(link: &mut Link, now: Instant) {
        link.enable();
        let (seq, sent_at) = link.poll_ping_due(now).unwrap();
        link.on_pong(seq, sent_at, now);
    }

    #[test]
    fn host_becomes_reachable_on_first_connected_link() {
        let mut host = Host::new(2, LinkPolicy::Passive);
        host.set_link_config(0, cfg()).unwrap();
        assert_eq!(host.recompute_active_links(), None); // no link connected yet

        connect(host.link_mut(0).unwrap(), Instant::now());
        assert_eq!(host.recompute_active_links(), Some(true));
        assert!(host.reachable());
    }

    #[test]
    fn passive_policy_uses_only_lowest_slot_index() {
        let mut host = Host::new(2, LinkPolicy::Passive);
        host.set_link_config(0, cfg()).unwrap();
        host.set_link_config(1, cfg()).unwrap();
        let now = Instant::now();
        connect(host.link_mut(0).unwrap(), now);
        connect(host.link_mut(1).unwrap(), now);
        host.recompute_active_links();
        assert_eq!(host.active_links(), &[0]);
    }

    #[test]
    fn active_policy_uses_every_connected_link() {
        let mut host = Host::new(2, LinkPolicy::Active);
        host.set_link_config(0, cfg()).unwrap();
        host.set_link_config(1, cfg()).unwrap();
        let now = Instant::now();
        connect(host.link_mut(0).unwrap(), now);
        connect(host.link_mut(1).unwrap(), now);
        host.recompute_active_links();
        assert_eq!(host.active_links(), &[0, 1]);
    }

    #[test]
    fn host_becomes_unreachable_only_when_the_last_link_drops() {
        let mut host = Host::new(2, LinkPolicy::Passive);
        host.set_link_config(0, cfg()).unwrap();
        host.set_link_config(1, cfg()).unwrap();
        let now = Instant::now();
        connect(host.link_mut(0).unwrap(), now);
        connect(host.link_mut(1).unwrap(), now);
        host.recompute_active_links();

        host.link_mut(0).unwrap().disable();
        assert_eq!(host.recompute_active_links(), None); // still reachable via link 1

        host.link_mut(1).unwrap().disable();
        assert_eq!(host.recompute_active_links(), Some(false));
    }

    #[test]
    fn passive_policy_prefers_the_link_with_the_lower_rtt_bound() {
        let mut host = Host::new(2, LinkPolicy::Passive);
        host.set_link_config(0, cfg()).unwrap();
        host.set_link_config(1, cfg()).unwrap();
        let now = Instant::now();
        // link 0 connects with a slow pong, link 1 with a fast one: the
        // higher slot index should still win on RTT bound.
        connect(host.link_mut(1).unwrap(), now);
        host.link_mut(0).unwrap().enable();
        let (seq, sent_at) = host.link_mut(0).unwrap().poll_ping_due(now).unwrap();
        host.link_mut(0).unwrap().on_pong(seq, sent_at, now + std::time::Duration::from_millis(200));

        host.recompute_active_links();
        assert_eq!(host.active_links(), &[1]);
    }

    #[test]
    fn clear_config_rejects_an_enabled_link() {
        let mut host = Host::new(2, LinkPolicy::Passive);
        host.set_link_config(0, cfg()).unwrap();
        host.link_mut(0).unwrap().enable();
        assert!(host.clear_link_config(0).is_err());
    }
}
