use alloc::{string::String, vec::Vec};

use crate::{
    packet::{
        QoS,
        decode::{self, DecodePacket},
        encode::{self, Encode, EncodePacket},
    },
    protocol::{PROTOCOL_LEVEL, PROTOCOL_NAME, PacketType},
    topic,
};

const DEFAULT_KEEP_ALIVE: u16 = 60;
const DEFAULT_ACK_TIMEOUT: u16 = 10;
const DEFAULT_MAX_RETRIES: u8 = 3;
const DEFAULT_CONNECT_TIMEOUT: u16 = 10;

/// Everything `Session::connect` needs for one connection attempt.
#[derive(Debug, Clone)]
pub struct Options<'a> {
    pub clean_session: bool,
    /// Seconds; 0 disables keep-alive.
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub will: Option<WillOptions<'a>>,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
    /// Seconds to wait for an acknowledgment before retransmitting.
    pub ack_timeout: u16,
    /// Retransmissions of one exchange before it is reported as failed.
    pub max_retries: u8,
    /// Seconds to wait for CONNACK.
    pub connect_timeout: u16,
}

impl<'a> Options<'a> {
    pub fn new(client_id: &'a str) -> Self {
        Self {
            clean_session: true,
            keep_alive: DEFAULT_KEEP_ALIVE,
            client_id,
            will: None,
            username: None,
            password: None,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), crate::Error> {
        // [MQTT-3.1.3-7]
        if self.client_id.is_empty() && !self.clean_session {
            return Err(crate::Error::InvalidClientId);
        }

        // [MQTT-3.1.2-22]
        if self.password.is_some() && self.username.is_none() {
            return Err(crate::Error::PasswordWithoutUsername);
        }

        if let Some(will) = &self.will {
            topic::validate_name(will.topic)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WillOptions<'a> {
    pub qos: QoS,
    pub retain: bool,
    pub topic: &'a str,
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl From<&Options<'_>> for Connect {
    fn from(value: &Options<'_>) -> Self {
        Self {
            clean_session: value.clean_session,
            keep_alive: value.keep_alive,
            client_id: String::from(value.client_id),
            will: value.will.as_ref().map(|will| Will {
                qos: will.qos,
                retain: will.retain,
                topic: String::from(will.topic),
                payload: will.payload.to_vec(),
            }),
            username: value.username.map(String::from),
            password: value.password.map(<[u8]>::to_vec),
        }
    }
}

impl DecodePacket for Connect {
    fn decode(cursor: &mut decode::Cursor, _: u8) -> Result<Self, crate::Error> {
        if cursor.read_utf8()? != PROTOCOL_NAME {
            return Err(crate::Error::MalformedPacket);
        }

        if cursor.read_u8()? != PROTOCOL_LEVEL {
            return Err(crate::Error::MalformedPacket);
        }

        let flags = cursor.read_u8()?;
        if flags & 0b0000_0001 != 0 {
            return Err(crate::Error::MalformedPacket);
        }

        let clean_session = flags & 0b0000_0010 != 0;
        let will_flag = flags & 0b0000_0100 != 0;
        let qos = QoS::try_from((flags >> 3) & 0b11)?;
        let retain = flags & 0b0010_0000 != 0;
        let password_flag = flags & 0b0100_0000 != 0;
        let username_flag = flags & 0b1000_0000 != 0;

        // [MQTT-3.1.2-13], [MQTT-3.1.2-15]
        if !will_flag && (qos != QoS::AtMostOnce || retain) {
            return Err(crate::Error::MalformedPacket);
        }

        let keep_alive = cursor.read_u16()?;
        let client_id = String::from(cursor.read_utf8()?);

        let will = if will_flag {
            Some(Will {
                topic: String::from(cursor.read_utf8()?),
                payload: cursor.read_binary_chunk()?.to_vec(),
                qos,
                retain,
            })
        } else {
            None
        };

        let username = if username_flag {
            Some(String::from(cursor.read_utf8()?))
        } else {
            None
        };

        let password = if password_flag {
            Some(cursor.read_binary_chunk()?.to_vec())
        } else {
            None
        };

        Ok(Connect {
            clean_session,
            keep_alive,
            client_id,
            will,
            username,
            password,
        })
    }
}

impl EncodePacket for Connect {
    const PACKET_TYPE: PacketType = PacketType::Connect;

    fn required_space(&self) -> usize {
        let mut required = PROTOCOL_NAME.required_space()
            + PROTOCOL_LEVEL.required_space()
            + 0u8.required_space()
            + self.keep_alive.required_space()
            + self.client_id.required_space();

        if let Some(will) = &self.will {
            required += will.topic.required_space();
            required += will.payload.required_space();
        }

        if let Some(username) = &self.username {
            required += username.required_space();
        }

        if let Some(password) = &self.password {
            required += password.required_space();
        }

        required
    }

    fn encode_body(&self, cursor: &mut encode::Cursor) -> Result<(), crate::Error> {
        PROTOCOL_NAME.encode(cursor)?;
        PROTOCOL_LEVEL.encode(cursor)?;

        let flags = (self.username.is_some() as u8) << 7
            | (self.password.is_some() as u8) << 6
            | (self.will.as_ref().map(|w| w.retain).unwrap_or(false) as u8) << 5
            | self.will.as_ref().map(|w| w.qos as u8).unwrap_or(0) << 3 // 2 bits
            | (self.will.is_some() as u8) << 2
            | (self.clean_session as u8) << 1;

        flags.encode(cursor)?;
        self.keep_alive.encode(cursor)?;
        self.client_id.encode(cursor)?;

        if let Some(will) = &self.will {
            will.topic.encode(cursor)?;
            will.payload.encode(cursor)?;
        }

        if let Some(username) = &self.username {
            username.encode(cursor)?;
        }

        if let Some(password) = &self.password {
            password.encode(cursor)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnAck {
    /// Always false for clean sessions; carried but not acted upon.
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl DecodePacket for ConnAck {
    fn decode(cursor: &mut decode::Cursor, _: u8) -> Result<Self, crate::Error> {
        let flags = cursor.read_u8()?;

        if flags & 0b1111_1110 != 0 {
            return Err(crate::Error::MalformedPacket);
        }

        let return_code = ConnectReturnCode::try_from(cursor.read_u8()?)?;
        let session_present = (flags & 0b0000_0001) != 0;

        // [MQTT-3.2.2-4]
        if return_code != ConnectReturnCode::Accepted && session_present {
            return Err(crate::Error::MalformedPacket);
        }

        Ok(ConnAck {
            return_code,
            session_present,
        })
    }
}

impl EncodePacket for ConnAck {
    const PACKET_TYPE: PacketType = PacketType::ConnAck;

    fn required_space(&self) -> usize {
        2
    }

    fn encode_body(&self, cursor: &mut encode::Cursor) -> Result<(), crate::Error> {
        (self.session_present as u8).encode(cursor)?;
        (self.return_code as u8).encode(cursor)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUserNameOrPassword = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let code = match value {
            0 => Self::Accepted,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => return Err(crate::Error::InvalidConnectReturnCode),
        };

        Ok(code)
    }
}
