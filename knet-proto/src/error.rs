use thiserror::Error;

/// Errors raised while encoding or decoding a frame.
///
/// These are framing errors in the sense of spec.md §7: they increment a
/// per-link counter and drop the packet, they never panic on attacker- or
/// peer-controlled bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("buffer too short for a frame header")]
    TooShort,
    #[error("frame magic does not match")]
    BadMagic,
    #[error("unknown protocol version {0}")]
    UnknownVersion(u8),
    #[error("unknown packet type tag {0}")]
    UnknownPacketType(u8),
    #[error("reserved header byte is non-zero")]
    ReservedNonZero,
    #[error("payload length {0} exceeds the absolute maximum packet size")]
    TooLarge(usize),
    #[error("declared payload length does not match the buffer supplied")]
    LengthMismatch,
    #[error("output buffer is too small to hold the encoded frame")]
    OutputTooSmall,
}
