use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

use crate::constants::{ChannelId, HEADER_LEN, MAGIC, NodeId, PROTOCOL_VERSION};
use crate::error::FrameError;
use crate::flags::Flags;
use crate::packet_type::PacketType;

/// The fixed 16-byte frame header (spec.md §6), with the decoded payload
/// borrowed from whatever buffer it was parsed out of.
///
/// `channel_or_probe` carries the data channel for `Data` packets, or the
/// probe sequence id for `Ping`/`Pong`/pmtu packets — same wire slot, two
/// readings depending on `packet_type`, exactly as spec.md §6 describes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub packet_type: PacketType,
    pub flags: Flags,
    pub sender: NodeId,
    pub seq: u32,
    pub channel_or_probe: u16,
    pub compress_algo: u8,
}

impl FrameHeader {
    pub fn new(packet_type: PacketType, sender: NodeId, seq: u32) -> Self {
        FrameHeader {
            packet_type,
            flags: Flags::empty(),
            sender,
            seq,
            channel_or_probe: 0,
            compress_algo: 0,
        }
    }

    pub fn for_data(sender: NodeId, seq: u32, channel: ChannelId) -> Self {
        let mut h = Self::new(PacketType::Data, sender, seq);
        h.channel_or_probe = channel as u16;
        h
    }

    pub fn channel(&self) -> ChannelId {
        self.channel_or_probe as ChannelId
    }

    pub fn probe_seq(&self) -> u16 {
        self.channel_or_probe
    }

    /// Encodes the header followed by `payload` into `out`.
    ///
    /// `out` must have at least `HEADER_LEN + payload.len()` bytes of
    /// capacity; this never allocates beyond what `BytesMut` already has
    /// reserved, matching the "caller supplies the output buffer" contract
    /// in spec.md §4.1.
    pub fn encode(&self, payload: &[u8], out: &mut BytesMut) -> Result<(), FrameError> {
        let total = HEADER_LEN + payload.len();
        if total > crate::constants::ABSOLUTE_MAX_PACKET_SIZE {
            return Err(FrameError::TooLarge(total));
        }
        out.reserve(total);
        out.put_u32(MAGIC);
        out.put_u8(self.packet_type.to_u8());
        out.put_u8(self.flags.bits());
        out.put_u16(self.sender);
        out.put_u32(self.seq);
        out.put_u16(self.channel_or_probe);
        out.put_u8(self.compress_algo);
        out.put_u8(0); // reserved
        out.put_slice(payload);
        Ok(())
    }

    /// Parses a header from the front of `buf` and returns it along with the
    /// payload slice (everything after the 16-byte header).
    pub fn decode(buf: &[u8]) -> Result<(FrameHeader, &[u8]), FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::TooShort);
        }
        if buf.len() > crate::constants::ABSOLUTE_MAX_PACKET_SIZE {
            return Err(FrameError::TooLarge(buf.len()));
        }
        let magic = BigEndian::read_u32(&buf[0..4]);
        let version = (magic & 0xff) as u8;
        if magic & !0xffu32 != MAGIC & !0xffu32 {
            return Err(FrameError::BadMagic);
        }
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnknownVersion(version));
        }
        let packet_type = PacketType::from_u8(buf[4])?;
        let flags = Flags::from_bits(buf[5]);
        let sender = BigEndian::read_u16(&buf[6..8]);
        let seq = BigEndian::read_u32(&buf[8..12]);
        let channel_or_probe = BigEndian::read_u16(&buf[12..14]);
        let compress_algo = buf[14];
        if buf[15] != 0 {
            return Err(FrameError::ReservedNonZero);
        }
        let header = FrameHeader {
            packet_type,
            flags,
            sender,
            seq,
            channel_or_probe,
            compress_algo,
        };
        Ok((header, &buf[HEADER_LEN..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_data_frame() {
        let header = FrameHeader::for_data(7, 42, 3);
        let payload = b"Testing";
        let mut buf = BytesMut::new();
        header.encode(payload, &mut buf).unwrap();

        let (decoded, decoded_payload) = FrameHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded_payload, payload);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = BytesMut::new();
        buf.put_u32(0xdead_beef);
        buf.resize(HEADER_LEN, 0);
        assert_eq!(FrameHeader::decode(&buf), Err(FrameError::BadMagic));
    }

    #[test]
    fn rejects_short_buffers() {
        let buf = [0u8; HEADER_LEN - 1];
        assert_eq!(FrameHeader::decode(&buf), Err(FrameError::TooShort));
    }

    #[test]
    fn rejects_nonzero_reserved_byte() {
        let header = FrameHeader::for_data(1, 1, 0);
        let mut buf = BytesMut::new();
        header.encode(b"x", &mut buf).unwrap();
        buf[15] = 1;
        assert_eq!(
            FrameHeader::decode(&buf),
            Err(FrameError::ReservedNonZero)
        );
    }

    #[test]
    fn rejects_unknown_version() {
        let header = FrameHeader::for_data(1, 1, 0);
        let mut buf = BytesMut::new();
        header.encode(b"x", &mut buf).unwrap();
        // Bump the version nibble packed into the magic word's low byte.
        buf[3] = 0xee;
        assert_eq!(FrameHeader::decode(&buf), Err(FrameError::UnknownVersion(0xee)));
    }
}
