use crate::constants::NodeId;
use crate::error::FrameError;
use crate::header::FrameHeader;
use crate::packet_type::PacketType;

/// The `(sender, packet type, sequence number)` triple used to deduplicate
/// fanned-out copies of a packet across redundant links (spec.md §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub sender: NodeId,
    pub kind: PacketType,
    pub seq: u32,
}

impl Fingerprint {
    pub fn of(header: &FrameHeader) -> Self {
        Fingerprint {
            sender: header.sender,
            kind: header.packet_type,
            seq: header.seq,
        }
    }
}

/// Extracts a [`Fingerprint`] directly from a wire buffer without building a
/// full [`FrameHeader`] or allocating.
pub fn extract_fingerprint(buf: &[u8]) -> Result<Fingerprint, FrameError> {
    let (header, _payload) = FrameHeader::decode(buf)?;
    Ok(Fingerprint::of(&header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn extracts_without_touching_payload() {
        let header = FrameHeader::for_data(9, 100, 2);
        let mut buf = BytesMut::new();
        header.encode(b"hello", &mut buf).unwrap();

        let fp = extract_fingerprint(&buf).unwrap();
        assert_eq!(fp, Fingerprint::of(&header));
    }

    #[test]
    fn distinct_senders_or_seqs_are_distinct_fingerprints() {
        let a = Fingerprint {
            sender: 1,
            kind: PacketType::Data,
            seq: 1,
        };
        let b = Fingerprint {
            sender: 2,
            kind: PacketType::Data,
            seq: 1,
        };
        assert_ne!(a, b);
    }
}
