use alloc::{string::String, vec::Vec};

use crate::{
    packet::{
        PacketId, QoS,
        decode::{self, DecodePacket},
        encode::{self, Encode, EncodePacket},
    },
    protocol::PacketType,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: PacketId,
    pub topics: Vec<Subscription>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic_filter: String,
    pub qos: QoS,
}

impl Subscription {
    pub fn new(topic_filter: &str, qos: QoS) -> Self {
        Self {
            topic_filter: String::from(topic_filter),
            qos,
        }
    }
}

impl EncodePacket for Subscribe {
    const PACKET_TYPE: PacketType = PacketType::Subscribe;

    fn required_space(&self) -> usize {
        self.packet_id.required_space()
            + self
                .topics
                .iter()
                .map(|sub| sub.topic_filter.required_space() + sub.qos.required_space())
                .sum::<usize>()
    }

    fn encode_body(&self, cursor: &mut encode::Cursor) -> Result<(), crate::Error> {
        // [MQTT-3.8.3-3]
        if self.topics.is_empty() {
            return Err(crate::Error::MalformedPacket);
        }

        self.packet_id.encode(cursor)?;

        for sub in &self.topics {
            sub.topic_filter.encode(cursor)?;
            sub.qos.encode(cursor)?;
        }

        Ok(())
    }
}

impl DecodePacket for Subscribe {
    fn decode(cursor: &mut decode::Cursor, _: u8) -> Result<Self, crate::Error> {
        let packet_id = PacketId::decode(cursor)?;
        let mut topics = Vec::new();

        while !cursor.is_empty() {
            let topic_filter = String::from(cursor.read_utf8()?);
            let qos = QoS::decode(cursor)?;

            topics.push(Subscription { topic_filter, qos });
        }

        if topics.is_empty() {
            return Err(crate::Error::MalformedPacket);
        }

        Ok(Subscribe { packet_id, topics })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: PacketId,
    /// One code per requested filter, in request order.
    pub return_codes: Vec<SubAckReturnCode>,
}

impl EncodePacket for SubAck {
    const PACKET_TYPE: PacketType = PacketType::SubAck;

    fn required_space(&self) -> usize {
        self.packet_id.required_space() + self.return_codes.len()
    }

    fn encode_body(&self, cursor: &mut encode::Cursor) -> Result<(), crate::Error> {
        self.packet_id.encode(cursor)?;

        for code in &self.return_codes {
            (*code as u8).encode(cursor)?;
        }

        Ok(())
    }
}

impl DecodePacket for SubAck {
    fn decode(cursor: &mut decode::Cursor, _: u8) -> Result<Self, crate::Error> {
        let packet_id = PacketId::decode(cursor)?;

        let return_codes = cursor
            .read_rest()
            .iter()
            .map(|byte| SubAckReturnCode::try_from(*byte))
            .collect::<Result<Vec<_>, _>>()?;

        if return_codes.is_empty() {
            return Err(crate::Error::MalformedPacket);
        }

        Ok(SubAck {
            packet_id,
            return_codes,
        })
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubAckReturnCode {
    MaxQoS0 = 0x00,
    MaxQoS1 = 0x01,
    MaxQoS2 = 0x02,
    Failure = 0x80,
}

impl SubAckReturnCode {
    /// The QoS the broker granted, `None` when the filter was refused.
    pub fn granted_qos(&self) -> Option<QoS> {
        match self {
            Self::MaxQoS0 => Some(QoS::AtMostOnce),
            Self::MaxQoS1 => Some(QoS::AtLeastOnce),
            Self::MaxQoS2 => Some(QoS::ExactlyOnce),
            Self::Failure => None,
        }
    }
}

impl TryFrom<u8> for SubAckReturnCode {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let code = match value {
            0x00 => Self::MaxQoS0,
            0x01 => Self::MaxQoS1,
            0x02 => Self::MaxQoS2,
            0x80 => Self::Failure,
            _ => return Err(crate::Error::InvalidSubAckReturnCode),
        };

        Ok(code)
    }
}
