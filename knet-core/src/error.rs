use thiserror::Error;

use knet_proto::{ChannelId, LinkId, NodeId};

/// The discriminated error taxonomy from spec.md §7.
///
/// Config, state, and resource errors are returned synchronously from the
/// call that triggered them. Framing errors never reach the application
/// directly: they are counted per-link and logged by the RX worker instead
/// (see [`crate::link::Link::framing_errors`]). Timeouts are internal to the
/// link state machine and are never surfaced here.
#[derive(Debug, Error)]
pub enum KnetError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("host id {0} is already registered")]
    DuplicateHost(NodeId),
    #[error("host {0} is not known to this handle")]
    UnknownHost(NodeId),
    #[error("link slot {1} already configured on host {0}")]
    DuplicateLink(NodeId, LinkId),
    #[error("link slot {1} is not configured on host {0}")]
    UnknownLink(NodeId, LinkId),
    #[error("channel {0} is already registered")]
    DuplicateChannel(ChannelId),
    #[error("channel {0} is not known to this handle")]
    UnknownChannel(ChannelId),
    #[error("compression algorithm '{0}' is not recognized")]
    UnknownCompressAlgorithm(String),
    #[error("compression level {level} is not supported by algorithm '{algo}'")]
    UnsupportedCompressLevel { algo: String, level: i32 },
    #[error("compression threshold {0} exceeds the configured maximum packet size")]
    ThresholdTooLarge(usize),
    #[error("too many compression algorithms registered ({0})")]
    TooManyCompressAlgorithms(usize),
    #[error("a host may hold at most {0} link slots")]
    TooManyLinks(usize),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("host {0} must be unreachable before it can be removed")]
    HostStillReachable(NodeId),
    #[error("link {1} on host {0} must be disabled before its config can be cleared")]
    LinkStillEnabled(NodeId, LinkId),
    #[error("link {1} on host {0} has no config to clear")]
    LinkNotConfigured(NodeId, LinkId),
    #[error("handle is already closed")]
    AlreadyClosed,
    #[error("at least one link is still enabled")]
    LinksStillEnabled,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("address already in use")]
    AddressInUse,
    #[error("transport protocol not supported by this backend")]
    ProtocolUnsupported,
    #[error("send failed on link {1} of host {0}: {2}")]
    SendFailed(NodeId, LinkId, String),
    #[error("dynamic port allocation exhausted")]
    PortExhausted,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("channel table is full")]
    ChannelTableFull,
    #[error("host table is full")]
    HostTableFull,
    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),
}
