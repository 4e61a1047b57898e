//! Sans-I/O MQTT 3.1.1 client engine.
//!
//! The [`Session`] owns the protocol state of one broker connection: it turns
//! application calls into bytes, turns received bytes into callbacks on a
//! [`Handler`], and tracks the QoS 1 / QoS 2 handshakes in both directions.
//! It never touches a socket or a timer itself; the host feeds it bytes and the
//! current time, and drains [`Session::take_outgoing`].
//!
//! [`Client`] is a thin async driver over any `embedded-io-async` stream for hosts
//! that do not want to do that plumbing by hand.

#![no_std]

extern crate alloc;

pub mod client;
pub(crate) mod incoming;
pub(crate) mod keep_alive;
pub(crate) mod outgoing;
pub mod packet;
pub mod packet_id_pool;
pub mod parser;
pub mod protocol;
pub mod session;
pub mod time;
pub mod topic;
pub mod tracker;

pub use client::Client;
pub use packet::connect::{ConnectReturnCode, Options as ConnectOptions, WillOptions};
pub use packet::publish::Msg as PublishMsg;
pub use packet::subscribe::SubAckReturnCode;
pub use packet::{Packet, PacketId, QoS};
pub use session::{Handler, Session, State};

/// Codec and call-level failures, returned through `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    InvalidFlags,
    MalformedRemainingLength,
    InvalidPacketType,
    MalformedPacket,
    InvalidConnectReturnCode,
    InvalidSubAckReturnCode,
    InvalidQoS,
    InvalidUtf8,
    PacketTooLarge,
    BufferTooSmall,
    InvalidTopic,
    InvalidClientId,
    PasswordWithoutUsername,
    NotConnected,
    AlreadyConnected,
    ResourceExhausted,
    ProtocolViolation,
    TransportError,
    RemoteClosed,
    TimeError,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Self::InvalidFlags => "invalid fixed header flags",
            Self::MalformedRemainingLength => "malformed remaining length",
            Self::InvalidPacketType => "invalid packet type",
            Self::MalformedPacket => "malformed packet",
            Self::InvalidConnectReturnCode => "invalid CONNACK return code",
            Self::InvalidSubAckReturnCode => "invalid SUBACK return code",
            Self::InvalidQoS => "invalid QoS level",
            Self::InvalidUtf8 => "string is not valid UTF-8",
            Self::PacketTooLarge => "packet exceeds protocol size limits",
            Self::BufferTooSmall => "output buffer too small",
            Self::InvalidTopic => "invalid topic name or filter",
            Self::InvalidClientId => "empty client id requires a clean session",
            Self::PasswordWithoutUsername => "password set without username",
            Self::NotConnected => "session is not connected",
            Self::AlreadyConnected => "session is not disconnected",
            Self::ResourceExhausted => "no packet identifier available",
            Self::ProtocolViolation => "protocol violation",
            Self::TransportError => "transport error",
            Self::RemoteClosed => "connection closed by remote",
            Self::TimeError => "clock error",
        };

        f.write_str(msg)
    }
}

/// Conditions reported to [`Handler::on_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    /// Received bytes could not be framed or decoded. Fatal.
    MalformedPacket,
    /// Well-formed but semantically invalid packet (ack for an unknown id). Never fatal.
    ProtocolViolation,
    /// The broker refused CONNECT. Fatal.
    ConnectRejected(ConnectReturnCode),
    /// No CONNACK within the connect timeout. Fatal.
    ConnectTimeout,
    /// No PINGRESP within a keep-alive cycle. Fatal.
    PingTimeout,
    /// An outbound exchange ran out of retries.
    DeliveryFailed(PacketId),
    /// Packet identifiers or in-flight slots ran out.
    ResourceExhausted,
    /// The transport reported an error. Fatal.
    Transport,
}

impl ErrorKind {
    /// Whether the session closes after reporting this condition.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MalformedPacket
                | Self::ConnectRejected(_)
                | Self::ConnectTimeout
                | Self::PingTimeout
                | Self::Transport
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds() {
        assert!(ErrorKind::MalformedPacket.is_fatal());
        assert!(ErrorKind::ConnectRejected(ConnectReturnCode::NotAuthorized).is_fatal());
        assert!(ErrorKind::PingTimeout.is_fatal());

        let id = PacketId::try_from(1).unwrap();
        assert!(!ErrorKind::ProtocolViolation.is_fatal());
        assert!(!ErrorKind::DeliveryFailed(id).is_fatal());
        assert!(!ErrorKind::ResourceExhausted.is_fatal());
    }
}
