use alloc::{string::String, vec::Vec};

use crate::{
    packet::{
        PacketId,
        decode::{self, DecodePacket},
        encode::{self, Encode, EncodePacket},
    },
    protocol::PacketType,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: PacketId,
    pub topics: Vec<String>,
}

impl DecodePacket for Unsubscribe {
    fn decode(cursor: &mut decode::Cursor, _: u8) -> Result<Self, crate::Error> {
        let packet_id = PacketId::decode(cursor)?;

        let mut topics = Vec::new();

        while !cursor.is_empty() {
            topics.push(String::from(cursor.read_utf8()?));
        }

        if topics.is_empty() {
            return Err(crate::Error::MalformedPacket);
        }

        Ok(Unsubscribe { packet_id, topics })
    }
}

impl EncodePacket for Unsubscribe {
    const PACKET_TYPE: PacketType = PacketType::Unsubscribe;

    fn required_space(&self) -> usize {
        let mut required = self.packet_id.required_space();

        for topic in &self.topics {
            required += topic.required_space();
        }

        required
    }

    fn encode_body(&self, cursor: &mut encode::Cursor) -> Result<(), crate::Error> {
        // [MQTT-3.10.3-2]
        if self.topics.is_empty() {
            return Err(crate::Error::MalformedPacket);
        }

        self.packet_id.encode(cursor)?;

        for topic in &self.topics {
            topic.encode(cursor)?;
        }

        Ok(())
    }
}
