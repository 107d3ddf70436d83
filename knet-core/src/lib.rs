//! # knet-core
//!
//! The handle/host/link state model for the knet datapath core: the
//! compression dispatch table, the link state machine and probes, host
//! link selection, the packet filter seam, and the dispatcher threads that
//! move bytes between application data channels and the network.
//!
//! `knet-proto` defines the wire format this crate serializes to and
//! parses from; the external transport and crypto backends are modeled as
//! traits ([`transport::Transport`], [`crypto::CryptoCodec`]) so the core
//! compiles and is testable without them.

pub mod channel;
pub mod compress;
pub mod crypto;
pub mod dedup;
mod dispatch;
pub mod error;
pub mod filter;
pub mod handle;
pub mod host;
pub mod link;
pub mod logging;
pub mod rtt;
pub mod time;
pub mod transport;

pub use error::{ConfigError, KnetError, ResourceError, StateError, TransportError};
pub use handle::{Handle, HandleConfig};
pub use host::{Host, LinkPolicy};
pub use link::{Link, LinkConfig, LinkState};
