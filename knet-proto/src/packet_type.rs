use crate::error::FrameError;

/// The packet-type tag carried at header offset 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Data = 0,
    Ping = 1,
    Pong = 2,
    PmtuProbe = 3,
    PmtuReply = 4,
}

impl PacketType {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Result<Self, FrameError> {
        match v {
            0 => Ok(PacketType::Data),
            1 => Ok(PacketType::Ping),
            2 => Ok(PacketType::Pong),
            3 => Ok(PacketType::PmtuProbe),
            4 => Ok(PacketType::PmtuReply),
            other => Err(FrameError::UnknownPacketType(other)),
        }
    }

    /// Probe-family packet types drive the link state machine rather than
    /// carrying application payload.
    pub fn is_probe(self) -> bool {
        matches!(
            self,
            PacketType::Ping | PacketType::Pong | PacketType::PmtuProbe | PacketType::PmtuReply
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_known_tags() {
        for v in 0u8..=4 {
            let pt = PacketType::from_u8(v).unwrap();
            assert_eq!(pt.to_u8(), v);
        }
    }

    #[test]
    fn rejects_unknown_tags() {
        assert_eq!(
            PacketType::from_u8(5),
            Err(FrameError::UnknownPacketType(5))
        );
        assert_eq!(
            PacketType::from_u8(255),
            Err(FrameError::UnknownPacketType(255))
        );
    }
}
