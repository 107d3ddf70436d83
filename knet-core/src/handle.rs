//! The top-level per-node object (spec.md §4.6) and its public interface.
//!
//! `Handle` owns the host table, data channels, compression/crypto
//! configuration, the packet filter, the dedup window, and the dispatcher
//! threads. Construction happens in [`Handle::open`], teardown in
//! [`Handle::close`], mirroring the original's `open(node_id, log_fd,
//! log_level, flags)` / `close(handle)` pair.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use knet_proto::{ChannelId, NodeId};
use parking_lot::{Mutex, RwLock};

use crate::channel::{DataChannel, NotifyCallback};
use crate::compress::{CompressConfig, CompressTable};
use crate::crypto::{CryptoCodec, NoopCrypto};
use crate::dedup::DedupWindow;
use crate::dispatch::Dispatchers;
use crate::error::{ConfigError, KnetError, ResourceError, StateError};
use crate::filter::{BroadcastFilter, FilterSlot, PacketFilter};
use crate::host::{Host, LinkPolicy};
use crate::link::{LinkConfig, PING_INTERVAL};
use crate::logging::{LogChannel, LogLevel, LogSink};
use crate::time::{SystemTimeProvider, TimeProvider};
use crate::transport::Transport;

pub const MAX_CHANNELS: usize = 32;

/// Callback invoked by the DST-LINK worker exactly once per reachability
/// transition, outside any core lock (spec.md §4.4).
pub type HostStatusCallback = Arc<dyn Fn(NodeId, bool) + Send + Sync>;

/// Callback invoked when a link's transport-level status changes (e.g. a
/// send failure), the programmatic interface's `install_socket_notify`.
pub type SocketNotifyCallback = Arc<dyn Fn(NodeId, knet_proto::LinkId) + Send + Sync>;

/// Builder for a handle's immutable-at-open configuration, layered the way
/// `tox_sequenced::SequenceSession::new` / `with_quota_at` /
/// `with_congestion_control_and_quota_at` add specificity one constructor
/// at a time.
pub struct HandleConfig {
    pub compression: Option<CompressConfig>,
    pub crypto: Option<Arc<dyn CryptoCodec>>,
    pub max_packet_size: usize,
    pub heartbeat_tick: Duration,
    pub dedup_window: usize,
    pub log_level: LogLevel,
    pub log_sink: LogSink,
    pub time_provider: Arc<dyn TimeProvider>,
}

impl std::fmt::Debug for HandleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleConfig")
            .field("max_packet_size", &self.max_packet_size)
            .field("heartbeat_tick", &self.heartbeat_tick)
            .field("dedup_window", &self.dedup_window)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            compression: None,
            crypto: None,
            max_packet_size: knet_proto::ABSOLUTE_MAX_PACKET_SIZE,
            heartbeat_tick: Duration::from_millis(1),
            dedup_window: crate::dedup::DEDUP_ENTRIES_PER_LINK,
            log_level: LogLevel::Info,
            log_sink: LogSink::None,
            time_provider: Arc::new(SystemTimeProvider),
        }
    }
}

impl HandleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(mut self, cfg: CompressConfig) -> Self {
        self.compression = Some(cfg);
        self
    }

    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoCodec>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn with_heartbeat_tick(mut self, tick: Duration) -> Self {
        self.heartbeat_tick = tick;
        self
    }

    pub fn with_dedup_window(mut self, entries: usize) -> Self {
        self.dedup_window = entries;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = sink;
        self
    }

    pub fn with_time_provider(mut self, provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = provider;
        self
    }
}

/// State shared across the dispatcher threads, guarded by one RwLock
/// (spec.md §5: "handle-wide configuration... protected by a RwLock").
/// Individual hosts are further wrapped in their own `Mutex` so per-link
/// work never blocks readers of the rest of the host table; this composes
/// as the handle read lock followed by a per-host lock, the granularity
/// spec.md's per-link lock collapses to here (see DESIGN.md).
pub struct HandleState {
    pub hosts: HashMap<NodeId, Mutex<Host>>,
    pub channels: HashMap<ChannelId, DataChannel>,
    pub compress: Mutex<CompressTable>,
    pub crypto: Arc<dyn CryptoCodec>,
    pub dedup: Mutex<DedupWindow>,
    pub forwarding: AtomicBool,
}

pub struct Handle {
    pub node_id: NodeId,
    pub state: Arc<RwLock<HandleState>>,
    pub filter: Arc<FilterSlot>,
    pub log: Arc<LogChannel>,
    host_status_notify: Arc<ArcSwapOption<dyn Fn(NodeId, bool) + Send + Sync>>,
    socket_notify: Arc<ArcSwapOption<dyn Fn(NodeId, knet_proto::LinkId) + Send + Sync>>,
    transports: Arc<RwLock<HashMap<(NodeId, knet_proto::LinkId), Arc<dyn Transport>>>>,
    dispatchers: Mutex<Option<Dispatchers>>,
    time_provider: Arc<dyn TimeProvider>,
    epoch: std::time::Instant,
    heartbeat_tick: Duration,
    closed: AtomicBool,
}

impl Handle {
    /// `open(node_id, log_fd, log_level, flags)`: constructs the handle and
    /// starts the dispatcher workers.
    pub fn open(node_id: NodeId, config: HandleConfig) -> Result<Arc<Self>, KnetError> {
        let compress = CompressTable::new(config.compression, config.max_packet_size)
            .map_err(KnetError::Config)?;
        let crypto = config.crypto.unwrap_or_else(|| Arc::new(NoopCrypto) as Arc<dyn CryptoCodec>);

        let state = Arc::new(RwLock::new(HandleState {
            hosts: HashMap::new(),
            channels: HashMap::new(),
            compress: Mutex::new(compress),
            crypto,
            dedup: Mutex::new(DedupWindow::new(config.dedup_window)),
            forwarding: AtomicBool::new(false),
        }));

        let log = Arc::new(LogChannel::new(node_id, config.log_level));
        let epoch = config.time_provider.now();
        let handle = Arc::new(Self {
            node_id,
            state,
            filter: Arc::new(FilterSlot::new()),
            log,
            host_status_notify: Arc::new(ArcSwapOption::from(None)),
            socket_notify: Arc::new(ArcSwapOption::from(None)),
            transports: Arc::new(RwLock::new(HashMap::new())),
            dispatchers: Mutex::new(None),
            time_provider: config.time_provider,
            epoch,
            heartbeat_tick: config.heartbeat_tick,
            closed: AtomicBool::new(false),
        });

        let dispatchers = Dispatchers::spawn(handle.clone(), config.log_sink);
        *handle.dispatchers.lock() = Some(dispatchers);
        handle.log.emit(LogLevel::Info, format!("handle opened for node {node_id}"));
        Ok(handle)
    }

    /// `close`: requires every link disabled, stops workers in reverse
    /// start order, drains queues, frees hosts.
    pub fn close(&self) -> Result<(), KnetError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StateError::AlreadyClosed.into());
        }
        {
            let state = self.state.read();
            state.forwarding.store(false, Ordering::SeqCst);
            if state.hosts.values().any(|h| h.lock().any_link_enabled()) {
                self.closed.store(false, Ordering::SeqCst);
                return Err(StateError::LinksStillEnabled.into());
            }
        }
        if let Some(dispatchers) = self.dispatchers.lock().take() {
            dispatchers.shutdown();
        }
        let mut state = self.state.write();
        state.hosts.clear();
        state.channels.clear();
        state.compress.lock().fini();
        self.log.emit(LogLevel::Info, format!("handle closed for node {}", self.node_id));
        Ok(())
    }

    pub fn set_forwarding(&self, enabled: bool) {
        self.state.read().forwarding.store(enabled, Ordering::SeqCst);
    }

    pub fn forwarding(&self) -> bool {
        self.state.read().forwarding.load(Ordering::SeqCst)
    }

    pub fn add_host(&self, id: NodeId, policy: LinkPolicy) -> Result<(), KnetError> {
        let mut state = self.state.write();
        if state.hosts.contains_key(&id) {
            return Err(ConfigError::DuplicateHost(id).into());
        }
        if state.hosts.len() >= u16::MAX as usize {
            return Err(ResourceError::HostTableFull.into());
        }
        state.hosts.insert(id, Mutex::new(Host::new(id, policy)));
        Ok(())
    }

    /// Requires the host be unreachable first (spec.md's Host row implies
    /// this via the reachability contract; enforced explicitly here).
    pub fn remove_host(&self, id: NodeId) -> Result<(), KnetError> {
        let mut state = self.state.write();
        let reachable = state
            .hosts
            .get(&id)
            .ok_or(ConfigError::UnknownHost(id))?
            .lock()
            .reachable();
        if reachable {
            return Err(StateError::HostStillReachable(id).into());
        }
        state.hosts.remove(&id);
        Ok(())
    }

    pub fn set_link_config(
        &self,
        host: NodeId,
        link: knet_proto::LinkId,
        transport: Arc<dyn Transport>,
    ) -> Result<(), KnetError> {
        let state = self.state.read();
        let host_entry = state.hosts.get(&host).ok_or(ConfigError::UnknownHost(host))?;
        let config = LinkConfig {
            transport: transport.kind(),
            local_addr: transport.local_addr(),
            remote_addr: None,
            ping_interval: PING_INTERVAL,
        };
        host_entry.lock().set_link_config(link, config)?;
        self.transports.write().insert((host, link), transport);
        Ok(())
    }

    pub fn clear_link_config(&self, host: NodeId, link: knet_proto::LinkId) -> Result<(), KnetError> {
        let state = self.state.read();
        let host_entry = state.hosts.get(&host).ok_or(ConfigError::UnknownHost(host))?;
        host_entry.lock().clear_link_config(link)?;
        self.transports.write().remove(&(host, link));
        Ok(())
    }

    pub fn set_link_enable(&self, host: NodeId, link: knet_proto::LinkId, enabled: bool) -> Result<(), KnetError> {
        let state = self.state.read();
        let host_entry = state.hosts.get(&host).ok_or(ConfigError::UnknownHost(host))?;
        let mut host_guard = host_entry.lock();
        let link = host_guard
            .link_mut(link)
            .ok_or(ConfigError::UnknownLink(host, link))?;
        if enabled {
            link.enable();
        } else {
            link.disable();
        }
        Ok(())
    }

    pub fn add_data_channel(&self, id: ChannelId, notify: Option<NotifyCallback>) -> Result<(), KnetError> {
        let mut state = self.state.write();
        if state.channels.contains_key(&id) {
            return Err(ConfigError::DuplicateChannel(id).into());
        }
        if state.channels.len() >= MAX_CHANNELS {
            return Err(ResourceError::ChannelTableFull.into());
        }
        state.channels.insert(id, DataChannel::new(id, true, notify));
        Ok(())
    }

    pub fn remove_data_channel(&self, id: ChannelId) -> Result<(), KnetError> {
        let mut state = self.state.write();
        if state.channels.remove(&id).is_none() {
            return Err(ConfigError::UnknownChannel(id).into());
        }
        Ok(())
    }

    pub fn install_filter(&self, filter: Arc<dyn PacketFilter>) {
        self.filter.install(filter);
    }

    pub fn install_host_status_notify(&self, callback: HostStatusCallback) {
        self.host_status_notify.store(Some(callback));
    }

    pub fn install_socket_notify(&self, callback: SocketNotifyCallback) {
        self.socket_notify.store(Some(callback));
    }

    pub(crate) fn fire_host_status(&self, host: NodeId, reachable: bool) {
        if let Some(callback) = self.host_status_notify.load_full() {
            callback(host, reachable);
        }
    }

    pub(crate) fn fire_socket_notify(&self, host: NodeId, link: knet_proto::LinkId) {
        if let Some(callback) = self.socket_notify.load_full() {
            callback(host, link);
        }
    }

    pub(crate) fn transport_for(&self, host: NodeId, link: knet_proto::LinkId) -> Option<Arc<dyn Transport>> {
        self.transports.read().get(&(host, link)).cloned()
    }

    pub(crate) fn all_transports(&self) -> Vec<((NodeId, knet_proto::LinkId), Arc<dyn Transport>)> {
        self.transports
            .read()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    /// `send(channel, bytes)`: enqueues a payload for the TX worker.
    pub fn send(&self, channel: ChannelId, payload: Vec<u8>) -> Result<(), KnetError> {
        if !self.forwarding() {
            return Ok(()); // setfwd(false) silently gates egress, per spec.md §4.6
        }
        let state = self.state.read();
        let chan = state
            .channels
            .get(&channel)
            .ok_or(ConfigError::UnknownChannel(channel))?;
        chan.send(payload)
            .map_err(|_| ResourceError::ChannelTableFull.into())
    }

    /// `recv(buffer) → bytes`: drains one delivered payload from `channel`.
    pub fn recv(&self, channel: ChannelId) -> Result<Option<Vec<u8>>, KnetError> {
        let state = self.state.read();
        let chan = state
            .channels
            .get(&channel)
            .ok_or(ConfigError::UnknownChannel(channel))?;
        Ok(chan.recv())
    }

    pub fn enumerate_hosts(&self) -> Vec<NodeId> {
        self.state.read().hosts.keys().copied().collect()
    }

    pub fn enumerate_links(&self, host: NodeId) -> Vec<knet_proto::LinkId> {
        self.state
            .read()
            .hosts
            .get(&host)
            .map(|h| h.lock().links().map(|l| l.id).collect())
            .unwrap_or_default()
    }

    pub(crate) fn broadcast_filter(&self) -> BroadcastFilter {
        BroadcastFilter {
            hosts: self.enumerate_hosts(),
        }
    }

    pub(crate) fn time_provider(&self) -> &Arc<dyn TimeProvider> {
        &self.time_provider
    }

    /// Millis elapsed since this handle opened, using its own
    /// [`TimeProvider`] clock. Used to stamp outgoing pings so a later pong
    /// echo can be turned back into an RTT sample without leaking raw
    /// `Instant` values onto the wire.
    pub(crate) fn millis_since_epoch(&self) -> u64 {
        self.time_provider
            .now()
            .saturating_duration_since(self.epoch)
            .as_millis() as u64
    }

    pub(crate) fn instant_from_millis_since_epoch(&self, millis: u64) -> std::time::Instant {
        self.epoch + Duration::from_millis(millis)
    }

    pub(crate) fn heartbeat_tick(&self) -> Duration {
        self.heartbeat_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_close_with_no_links_succeeds() {
        let handle = Handle::open(1, HandleConfig::new()).unwrap();
        handle.close().unwrap();
    }

    #[test]
    fn close_is_rejected_while_a_link_is_enabled() {
        let handle = Handle::open(1, HandleConfig::new()).unwrap();
        handle.add_host(2, LinkPolicy::Passive).unwrap();
        let (a, _b) = crate::transport::LoopbackTransport::pair(
            "127.0.0.1:10001".parse().unwrap(),
            "127.0.0.1:10002".parse().unwrap(),
        );
        handle.set_link_config(2, 0, a).unwrap();
        handle.set_link_enable(2, 0, true).unwrap();
        assert!(handle.close().is_err());
        handle.set_link_enable(2, 0, false).unwrap();
        handle.close().unwrap();
    }

    #[test]
    fn duplicate_host_is_rejected() {
        let handle = Handle::open(1, HandleConfig::new()).unwrap();
        handle.add_host(2, LinkPolicy::Passive).unwrap();
        assert!(handle.add_host(2, LinkPolicy::Passive).is_err());
        handle.close().unwrap();
    }

    #[test]
    fn send_before_forwarding_enabled_is_a_silent_noop() {
        let handle = Handle::open(1, HandleConfig::new()).unwrap();
        handle.add_data_channel(0, None).unwrap();
        handle.send(0, b"hi".to_vec()).unwrap();
        handle.close().unwrap();
    }
}
