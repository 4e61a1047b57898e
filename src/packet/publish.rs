use alloc::{string::String, vec::Vec};

use crate::{
    packet::{
        PacketId, QoS,
        decode::{self, DecodePacket},
        encode::{self, Encode, EncodePacket},
    },
    protocol::PacketType,
};

/// An application message to publish.
#[derive(Debug, Clone, Copy)]
pub struct Msg<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

impl<'a> Msg<'a> {
    pub fn new(topic: &'a str, payload: &'a [u8], qos: QoS) -> Self {
        Self {
            topic,
            payload,
            qos,
            retain: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub flags: Flags,
    pub topic: String,
    /// Present iff `flags.qos` is above `AtMostOnce`.
    pub packet_id: Option<PacketId>,
    pub payload: Vec<u8>,
}

impl From<&Msg<'_>> for Publish {
    fn from(msg: &Msg<'_>) -> Self {
        Self {
            flags: Flags {
                dup: false,
                qos: msg.qos,
                retain: msg.retain,
            },
            topic: String::from(msg.topic),
            packet_id: None,
            payload: msg.payload.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Flags {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
}

impl TryFrom<u8> for Flags {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let dup = value & 0b1000 != 0;
        let qos = QoS::try_from((value >> 1) & 0b11)?;
        let retain = value & 0b0001 != 0;

        Ok(Self { dup, qos, retain })
    }
}

impl From<&Flags> for u8 {
    fn from(value: &Flags) -> Self {
        (value.dup as u8) << 3 | (value.qos as u8) << 1 | (value.retain as u8)
    }
}

impl EncodePacket for Publish {
    const PACKET_TYPE: PacketType = PacketType::Publish;

    fn flags(&self) -> u8 {
        (&self.flags).into()
    }

    fn required_space(&self) -> usize {
        self.topic.required_space()
            + self.packet_id.map(|id| id.required_space()).unwrap_or(0)
            + self.payload.len()
    }

    fn encode_body(&self, cursor: &mut encode::Cursor) -> Result<(), crate::Error> {
        if self.packet_id.is_some() == (self.flags.qos == QoS::AtMostOnce) {
            return Err(crate::Error::MalformedPacket);
        }

        self.topic.encode(cursor)?;
        if let Some(id) = self.packet_id {
            id.encode(cursor)?;
        }

        cursor.write_bytes(&self.payload)
    }
}

impl DecodePacket for Publish {
    fn decode(cursor: &mut decode::Cursor, flags: u8) -> Result<Self, crate::Error> {
        let flags = Flags::try_from(flags)?;
        let topic = String::from(cursor.read_utf8()?);

        let packet_id = match flags.qos {
            QoS::AtMostOnce => None,
            _ => Some(PacketId::decode(cursor)?),
        };

        let payload = cursor.read_rest().to_vec();

        Ok(Publish {
            flags,
            topic,
            packet_id,
            payload,
        })
    }
}
