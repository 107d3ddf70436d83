//! Fundamental wire constants for the knet datapath.

/// Identifies a configured peer. Unique within a handle.
pub type NodeId = u16;

/// Index of a link slot within a host. Unique within a host.
pub type LinkId = u8;

/// Small signed index identifying an application data channel.
pub type ChannelId = i16;

/// ASCII-derived magic packed into the top 3 bytes of the magic+version field.
const MAGIC_BASE: u32 = 0x4b4e_5400; // "KNT\0"

/// Current wire protocol version, packed into the low byte of the magic+version field.
pub const PROTOCOL_VERSION: u8 = 1;

/// The combined magic+version value expected at offset 0 of every frame.
pub const MAGIC: u32 = MAGIC_BASE | PROTOCOL_VERSION as u32;

/// Size of the fixed frame header, in bytes (spec: offsets 0..16).
pub const HEADER_LEN: usize = 16;

/// Hard ceiling enforced by `decode` regardless of handle configuration.
///
/// Independent of any per-handle `max_packet_size`, matching kronosnet's
/// `KNET_MAX_PACKET_SIZE` compile-time bound.
pub const ABSOLUTE_MAX_PACKET_SIZE: usize = 64 * 1024;

/// The on-wire compression algorithm index table. Append-only: existing
/// positions must never be reassigned, because the index travels on the wire.
pub const COMPRESS_ALGORITHMS: &[&str] =
    &["none", "zlib", "lz4", "lz4hc", "lzo2", "lzma", "bzip2"];

/// Compile-time bound on the number of registered compression algorithms.
pub const MAX_COMPRESS_METHODS: usize = 16;

/// Index reserved for "no compression" in [`COMPRESS_ALGORITHMS`].
pub const COMPRESS_NONE_IDX: u8 = 0;
