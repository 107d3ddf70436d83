//! # knet-proto
//!
//! The on-wire frame format for the knet datapath core: a fixed 16-byte
//! header, the packet-type tag, and fingerprint extraction for dedup.
//!
//! This crate is pure: no I/O, no threads, no allocation beyond what the
//! caller's buffers already provide. It is shared between the TX/RX
//! dispatcher threads in `knet-core` and exists separately so the wire
//! format can be versioned and tested on its own, the way `tox-proto` is
//! split out from `tox-sequenced` in the sibling transport stack this crate
//! was modeled on.

pub mod constants;
pub mod error;
pub mod fingerprint;
pub mod flags;
pub mod header;
pub mod packet_type;

pub use constants::{
    ABSOLUTE_MAX_PACKET_SIZE, ChannelId, COMPRESS_ALGORITHMS, COMPRESS_NONE_IDX, HEADER_LEN,
    LinkId, MAGIC, MAX_COMPRESS_METHODS, NodeId, PROTOCOL_VERSION,
};
pub use error::FrameError;
pub use fingerprint::{Fingerprint, extract_fingerprint};
pub use flags::Flags;
pub use header::FrameHeader;
pub use packet_type::PacketType;
