use alloc::vec::Vec;

use crate::{
    packet::{
        connect::{ConnAck, Connect},
        decode::DecodePacket,
        encode::{Encode, EncodePacket},
        publish::Publish,
        subscribe::{SubAck, Subscribe},
        unsubscribe::Unsubscribe,
    },
    protocol::{FixedHeader, PacketType},
};

pub mod connect;
pub mod decode;
pub mod encode;
pub mod publish;
pub mod subscribe;
pub mod unsubscribe;

/// An MQTT 3.1.1 control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PacketId),
    PubRec(PacketId),
    PubRel(PacketId),
    PubComp(PacketId),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(PacketId),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnAck(_) => PacketType::ConnAck,
            Self::Publish(_) => PacketType::Publish,
            Self::PubAck(_) => PacketType::PubAck,
            Self::PubRec(_) => PacketType::PubRec,
            Self::PubRel(_) => PacketType::PubRel,
            Self::PubComp(_) => PacketType::PubComp,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubAck(_) => PacketType::SubAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubAck(_) => PacketType::UnsubAck,
            Self::PingReq => PacketType::PingReq,
            Self::PingResp => PacketType::PingResp,
            Self::Disconnect => PacketType::Disconnect,
        }
    }

    pub fn encode(&self, cursor: &mut encode::Cursor) -> Result<(), crate::Error> {
        match self {
            Self::Connect(packet) => encode_packet(packet, cursor),
            Self::ConnAck(packet) => encode_packet(packet, cursor),
            Self::Publish(packet) => encode_packet(packet, cursor),
            Self::PubAck(id) => only_packet_id(cursor, PacketType::PubAck, *id),
            Self::PubRec(id) => only_packet_id(cursor, PacketType::PubRec, *id),
            Self::PubRel(id) => only_packet_id(cursor, PacketType::PubRel, *id),
            Self::PubComp(id) => only_packet_id(cursor, PacketType::PubComp, *id),
            Self::Subscribe(packet) => encode_packet(packet, cursor),
            Self::SubAck(packet) => encode_packet(packet, cursor),
            Self::Unsubscribe(packet) => encode_packet(packet, cursor),
            Self::UnsubAck(id) => only_packet_id(cursor, PacketType::UnsubAck, *id),
            Self::PingReq => empty_body(cursor, PacketType::PingReq),
            Self::PingResp => empty_body(cursor, PacketType::PingResp),
            Self::Disconnect => empty_body(cursor, PacketType::Disconnect),
        }
    }

    /// Size of the whole packet on the wire, fixed header included.
    pub fn required_space(&self) -> Result<usize, crate::Error> {
        let body = match self {
            Self::Connect(packet) => packet.required_space(),
            Self::ConnAck(packet) => packet.required_space(),
            Self::Publish(packet) => packet.required_space(),
            Self::Subscribe(packet) => packet.required_space(),
            Self::SubAck(packet) => packet.required_space(),
            Self::Unsubscribe(packet) => packet.required_space(),
            Self::PubAck(_)
            | Self::PubRec(_)
            | Self::PubRel(_)
            | Self::PubComp(_)
            | Self::UnsubAck(_) => 2,
            Self::PingReq | Self::PingResp | Self::Disconnect => 0,
        };

        Ok(1 + encode::remaining_length_len(body)? + body)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, crate::Error> {
        let mut buf = alloc::vec![0u8; self.required_space()?];
        let mut cursor = encode::Cursor::new(&mut buf);
        self.encode(&mut cursor)?;

        Ok(buf)
    }

    /// Decodes a complete packet body whose fixed header has already been parsed.
    pub fn decode(header: &FixedHeader, body: &[u8]) -> Result<Self, crate::Error> {
        if header.remaining_len != body.len() {
            return Err(crate::Error::MalformedRemainingLength);
        }

        if !header.packet_type.validate_flags(header.flags) {
            return Err(crate::Error::InvalidFlags);
        }

        let cursor = &mut decode::Cursor::new(body);
        let flags = header.flags;

        let packet = match header.packet_type {
            PacketType::Connect => Connect::decode(cursor, flags).map(Packet::Connect),
            PacketType::ConnAck => ConnAck::decode(cursor, flags).map(Packet::ConnAck),
            PacketType::Publish => Publish::decode(cursor, flags).map(Packet::Publish),
            PacketType::PubAck => PacketId::decode(cursor).map(Packet::PubAck),
            PacketType::PubRec => PacketId::decode(cursor).map(Packet::PubRec),
            PacketType::PubRel => PacketId::decode(cursor).map(Packet::PubRel),
            PacketType::PubComp => PacketId::decode(cursor).map(Packet::PubComp),
            PacketType::Subscribe => Subscribe::decode(cursor, flags).map(Packet::Subscribe),
            PacketType::SubAck => SubAck::decode(cursor, flags).map(Packet::SubAck),
            PacketType::Unsubscribe => {
                Unsubscribe::decode(cursor, flags).map(Packet::Unsubscribe)
            }
            PacketType::UnsubAck => PacketId::decode(cursor).map(Packet::UnsubAck),
            PacketType::PingReq => Ok(Packet::PingReq),
            PacketType::PingResp => Ok(Packet::PingResp),
            PacketType::Disconnect => Ok(Packet::Disconnect),
        }?;

        cursor.expect_empty()?;

        Ok(packet)
    }
}

fn encode_packet<P: EncodePacket>(
    packet: &P,
    cursor: &mut encode::Cursor<'_>,
) -> Result<(), crate::Error> {
    let header = ((P::PACKET_TYPE as u8) << 4) | (packet.flags() & 0x0F);
    cursor.write_u8(header)?;

    encode::remaining_length(packet.required_space(), cursor)?;

    packet.encode_body(cursor)
}

fn only_packet_id(
    cursor: &mut encode::Cursor,
    packet_type: PacketType,
    packet_id: PacketId,
) -> Result<(), crate::Error> {
    let header = ((packet_type as u8) << 4) | packet_type.reserved_flags();

    header.encode(cursor)?;
    2u8.encode(cursor)?;
    packet_id.encode(cursor)
}

fn empty_body(cursor: &mut encode::Cursor, packet_type: PacketType) -> Result<(), crate::Error> {
    let header = (packet_type as u8) << 4;

    header.encode(cursor)?;
    0u8.encode(cursor)
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    fn decode(cursor: &mut decode::Cursor) -> Result<Self, crate::Error> {
        Self::try_from(cursor.read_u8()?)
    }
}

impl TryFrom<u8> for QoS {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let qos = match value {
            0 => Self::AtMostOnce,
            1 => Self::AtLeastOnce,
            2 => Self::ExactlyOnce,
            _ => return Err(crate::Error::InvalidQoS),
        };

        Ok(qos)
    }
}

impl encode::Encode for QoS {
    fn encode(&self, cursor: &mut encode::Cursor) -> Result<(), crate::Error> {
        (*self as u8).encode(cursor)
    }

    fn required_space(&self) -> usize {
        1
    }
}

/// Non-zero 16-bit packet identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PacketId(u16);

impl PacketId {
    pub const fn get(self) -> u16 {
        self.0
    }

    fn decode(cursor: &mut decode::Cursor) -> Result<Self, crate::Error> {
        Self::try_from(cursor.read_u16()?)
    }
}

impl TryFrom<u16> for PacketId {
    type Error = crate::Error;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        if id == 0 {
            return Err(crate::Error::MalformedPacket);
        }

        Ok(Self(id))
    }
}

impl From<PacketId> for u16 {
    fn from(id: PacketId) -> Self {
        id.0
    }
}

impl core::fmt::Display for PacketId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl encode::Encode for PacketId {
    fn encode(&self, cursor: &mut encode::Cursor) -> Result<(), crate::Error> {
        self.0.encode(cursor)
    }

    fn required_space(&self) -> usize {
        2
    }
}
