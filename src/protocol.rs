/// Protocol name carried by CONNECT.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol level of MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;

/// Largest value the remaining length field can carry (four 7-bit groups).
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// Reserved flag values of the fixed header; PUBLISH flags are checked by its decoder.
    pub(crate) fn validate_flags(&self, flags: u8) -> bool {
        match self {
            Self::Publish => true,
            Self::PubRel | Self::Subscribe | Self::Unsubscribe => flags == 0b0010,
            _ => flags == 0,
        }
    }

    pub(crate) fn reserved_flags(&self) -> u8 {
        match self {
            Self::PubRel | Self::Subscribe | Self::Unsubscribe => 0b0010,
            _ => 0,
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let packet_type = match value {
            1 => Self::Connect,
            2 => Self::ConnAck,
            3 => Self::Publish,
            4 => Self::PubAck,
            5 => Self::PubRec,
            6 => Self::PubRel,
            7 => Self::PubComp,
            8 => Self::Subscribe,
            9 => Self::SubAck,
            10 => Self::Unsubscribe,
            11 => Self::UnsubAck,
            12 => Self::PingReq,
            13 => Self::PingResp,
            14 => Self::Disconnect,
            _ => return Err(crate::Error::InvalidPacketType),
        };

        Ok(packet_type)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_len: usize,
}
