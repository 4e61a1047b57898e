//! Connection state machine.
//!
//! A [`Session`] is driven by three inputs: bytes from the broker
//! ([`Session::handle_incoming`]), the passage of time
//! ([`Session::handle_timers`]) and application calls. Everything it wants to
//! send is queued until the host drains it with [`Session::take_outgoing`].

use alloc::vec::Vec;

use embedded_time::{Clock, Instant};

use crate::{
    ErrorKind,
    keep_alive::{KeepAlive, Ping},
    packet::{
        Packet, PacketId, QoS,
        connect::{ConnAck, Connect, ConnectReturnCode, Options},
        encode,
        publish::{Msg, Publish},
        subscribe::{SubAck, SubAckReturnCode, Subscribe, Subscription},
        unsubscribe::Unsubscribe,
    },
    parser, time, topic,
    tracker::{Expired, Inbound, Tracker},
};

#[cfg(test)]
pub(crate) mod tests;

/// Application callbacks. Every method defaults to doing nothing.
pub trait Handler {
    /// CONNACK arrived. Anything but `Accepted` is followed by `on_error` and `on_close`.
    fn on_connack(&mut self, _code: ConnectReturnCode) {}

    /// A QoS 1 publish was acknowledged.
    fn on_puback(&mut self, _packet_id: PacketId) {}

    /// An application message arrived. QoS 2 messages are delivered once.
    fn on_publish(&mut self, _publish: &Publish) {}

    /// A QoS 2 publish completed.
    fn on_pubcomp(&mut self, _packet_id: PacketId) {}

    fn on_suback(&mut self, _packet_id: PacketId, _return_codes: &[SubAckReturnCode]) {}

    fn on_unsuback(&mut self, _packet_id: PacketId) {}

    fn on_error(&mut self, _kind: ErrorKind) {}

    /// The session is back in `Disconnected`.
    fn on_close(&mut self) {}
}

impl Handler for () {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

pub struct Session<C, H, const N_OUT: usize = 16, const N_IN: usize = 16>
where
    C: Clock,
    H: Handler,
{
    handler: H,
    state: State,
    session_present: bool,
    keep_alive_secs: u16,
    keep_alive: Option<KeepAlive<C>>,
    connect_timeout: C::T,
    connect_started: Option<Instant<C>>,
    tracker: Tracker<C, N_OUT, N_IN>,
    rx: Vec<u8>,
    tx: Vec<u8>,
}

impl<C, H, const N_OUT: usize, const N_IN: usize> Session<C, H, N_OUT, N_IN>
where
    C: Clock,
    H: Handler,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            state: State::Disconnected,
            session_present: false,
            keep_alive_secs: 0,
            keep_alive: None,
            connect_timeout: time::ticks_from_secs::<C>(0),
            connect_started: None,
            tracker: Tracker::new(time::ticks_from_secs::<C>(0), 0),
            rx: Vec::new(),
            tx: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Session-present flag of the last accepted CONNACK.
    pub fn session_present(&self) -> bool {
        self.session_present
    }

    /// Outbound QoS 1 / QoS 2 publishes not yet fully acknowledged.
    pub fn in_flight(&self) -> usize {
        self.tracker.in_flight()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Queues CONNECT and starts waiting for CONNACK.
    pub fn connect(&mut self, options: &Options<'_>, now: Instant<C>) -> Result<(), crate::Error> {
        if self.state != State::Disconnected {
            return Err(crate::Error::AlreadyConnected);
        }

        options.validate()?;

        let packet = Packet::Connect(Connect::from(options));
        self.queue(&packet)?;

        self.tracker.clear();
        self.tracker.set_retry_policy(
            time::ticks_from_secs::<C>(options.ack_timeout.into()),
            options.max_retries,
        );
        self.rx.clear();
        self.keep_alive_secs = options.keep_alive;
        self.connect_timeout = time::ticks_from_secs::<C>(options.connect_timeout.into());
        self.connect_started = Some(now);
        self.session_present = false;
        self.state = State::Connecting;

        log::debug!("connecting as {:?}", options.client_id);

        Ok(())
    }

    /// Queues PUBLISH. Returns the packet id for QoS 1 and QoS 2.
    pub fn publish(&mut self, msg: &Msg<'_>, now: Instant<C>) -> Result<Option<PacketId>, crate::Error> {
        self.ensure_connected()?;
        topic::validate_name(msg.topic)?;

        let mut publish = Publish::from(msg);
        let packet_id = self.tracker.track_publish(&mut publish, now)?;

        if let Err(e) = self.send(&Packet::Publish(publish), now) {
            if let Some(id) = packet_id {
                self.tracker.cancel_publish(id);
            }
            return Err(e);
        }

        Ok(packet_id)
    }

    /// Queues SUBSCRIBE for `(filter, max QoS)` pairs.
    pub fn subscribe(&mut self, topics: &[(&str, QoS)], now: Instant<C>) -> Result<PacketId, crate::Error> {
        self.ensure_connected()?;

        if topics.is_empty() {
            return Err(crate::Error::InvalidTopic);
        }

        for (filter, _) in topics {
            topic::validate_filter(filter)?;
        }

        let packet_id = self.tracker.track_subscribe(topics.len())?;
        let packet = Packet::Subscribe(Subscribe {
            packet_id,
            topics: topics
                .iter()
                .map(|(filter, qos)| Subscription::new(filter, *qos))
                .collect(),
        });

        if let Err(e) = self.send(&packet, now) {
            let _ = self.tracker.on_suback(packet_id);
            return Err(e);
        }

        Ok(packet_id)
    }

    pub fn unsubscribe(&mut self, topics: &[&str], now: Instant<C>) -> Result<PacketId, crate::Error> {
        self.ensure_connected()?;

        if topics.is_empty() {
            return Err(crate::Error::InvalidTopic);
        }

        for filter in topics {
            topic::validate_filter(filter)?;
        }

        let packet_id = self.tracker.track_unsubscribe(topics.len())?;
        let packet = Packet::Unsubscribe(Unsubscribe {
            packet_id,
            topics: topics.iter().map(|filter| (*filter).into()).collect(),
        });

        if let Err(e) = self.send(&packet, now) {
            let _ = self.tracker.on_unsuback(packet_id);
            return Err(e);
        }

        Ok(packet_id)
    }

    /// Queues DISCONNECT and drops all in-flight state. Only `on_close` is reported.
    pub fn disconnect(&mut self) -> Result<(), crate::Error> {
        if !matches!(self.state, State::Connecting | State::Connected) {
            return Err(crate::Error::NotConnected);
        }

        self.state = State::Closing;
        self.queue(&Packet::Disconnect)?;
        self.reset();
        self.state = State::Disconnected;

        log::debug!("disconnected");
        self.handler.on_close();

        Ok(())
    }

    /// Feeds bytes read from the transport. Partial packets are kept until the rest arrives.
    pub fn handle_incoming(&mut self, bytes: &[u8], now: Instant<C>) {
        if !matches!(self.state, State::Connecting | State::Connected) {
            log::debug!("dropping {} bytes while {:?}", bytes.len(), self.state);
            return;
        }

        self.rx.extend_from_slice(bytes);

        let mut consumed = 0;

        loop {
            match parser::decode(&self.rx[consumed..]) {
                Ok(Some((packet, used))) => {
                    consumed += used;
                    self.dispatch(packet, now);

                    if self.state == State::Disconnected {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::error!("malformed input: {}", e);
                    self.fail(ErrorKind::MalformedPacket);
                    return;
                }
            }
        }

        self.rx.drain(..consumed);
    }

    /// Runs the connect, keep-alive and retransmission timers. Returns when to call again.
    pub fn handle_timers(&mut self, now: Instant<C>) -> Option<Instant<C>> {
        match self.state {
            State::Connecting => self.connect_timer(now),
            State::Connected => {
                for expired in self.tracker.expire(now) {
                    match expired {
                        Expired::Retransmit(packet) => {
                            log::debug!("retransmitting {:?}", packet.packet_type());
                            self.reply(&packet, now);
                        }
                        Expired::Abandoned(packet_id) => {
                            log::warn!("giving up on packet id {}", packet_id);
                            self.handler.on_error(ErrorKind::DeliveryFailed(packet_id));
                        }
                    }
                }

                match self.keep_alive.as_mut().map(|k| k.poll(now)) {
                    Some(Ping::Send) => self.reply(&Packet::PingReq, now),
                    Some(Ping::TimedOut) => {
                        self.fail(ErrorKind::PingTimeout);
                        return None;
                    }
                    Some(Ping::Idle) | None => {}
                }

                time::earliest(
                    self.tracker.next_deadline(),
                    self.keep_alive.as_ref().and_then(|k| k.deadline()),
                )
            }
            State::Disconnected | State::Closing => None,
        }
    }

    /// The transport reported end of stream.
    pub fn handle_transport_closed(&mut self) {
        if self.state != State::Disconnected {
            log::warn!("transport closed while {:?}", self.state);
            self.fail(ErrorKind::Transport);
        }
    }

    pub fn handle_transport_error(&mut self) {
        if self.state != State::Disconnected {
            self.fail(ErrorKind::Transport);
        }
    }

    /// Bytes queued for the transport since the last call.
    pub fn take_outgoing(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.tx)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.tx.is_empty()
    }

    fn ensure_connected(&self) -> Result<(), crate::Error> {
        match self.state {
            State::Connected => Ok(()),
            _ => Err(crate::Error::NotConnected),
        }
    }

    fn connect_timer(&mut self, now: Instant<C>) -> Option<Instant<C>> {
        let started = self.connect_started?;

        if time::expired(&now, &started, self.connect_timeout) {
            self.fail(ErrorKind::ConnectTimeout);
            return None;
        }

        Some(time::after(&started, self.connect_timeout))
    }

    fn dispatch(&mut self, packet: Packet, now: Instant<C>) {
        match (self.state, packet) {
            (State::Connecting, Packet::ConnAck(ack)) => self.on_connack(ack, now),
            (State::Connected, Packet::Publish(publish)) => self.on_publish(publish, now),
            (State::Connected, Packet::PubAck(id)) => match self.tracker.on_puback(id) {
                Ok(()) => self.handler.on_puback(id),
                Err(_) => self.violation("PUBACK", id),
            },
            (State::Connected, Packet::PubRec(id)) => match self.tracker.on_pubrec(id, now) {
                Ok(pubrel) => self.reply(&pubrel, now),
                Err(_) => self.violation("PUBREC", id),
            },
            (State::Connected, Packet::PubRel(id)) => {
                let pubcomp = self.tracker.on_pubrel(id);
                self.reply(&pubcomp, now);
            }
            (State::Connected, Packet::PubComp(id)) => match self.tracker.on_pubcomp(id) {
                Ok(()) => self.handler.on_pubcomp(id),
                Err(_) => self.violation("PUBCOMP", id),
            },
            (State::Connected, Packet::SubAck(ack)) => self.on_suback(ack),
            (State::Connected, Packet::UnsubAck(id)) => match self.tracker.on_unsuback(id) {
                Ok(()) => self.handler.on_unsuback(id),
                Err(_) => self.violation("UNSUBACK", id),
            },
            (State::Connected, Packet::PingResp) => {
                if let Some(keep_alive) = self.keep_alive.as_mut() {
                    keep_alive.on_pingresp();
                }
            }
            (state, packet) => {
                log::warn!("ignoring {:?} while {:?}", packet.packet_type(), state);
            }
        }
    }

    fn on_connack(&mut self, ack: ConnAck, now: Instant<C>) {
        self.connect_started = None;

        if ack.return_code != ConnectReturnCode::Accepted {
            log::error!("connection refused: {:?}", ack.return_code);
            self.handler.on_connack(ack.return_code);
            self.fail(ErrorKind::ConnectRejected(ack.return_code));
            return;
        }

        self.state = State::Connected;
        self.session_present = ack.session_present;
        self.keep_alive = Some(KeepAlive::new(self.keep_alive_secs, now));

        log::debug!("connected, session present: {}", ack.session_present);
        self.handler.on_connack(ack.return_code);
    }

    fn on_publish(&mut self, publish: Publish, now: Instant<C>) {
        match self.tracker.on_inbound_publish(&publish) {
            Inbound::Deliver { ack } => {
                self.handler.on_publish(&publish);

                if let Some(ack) = ack {
                    self.reply(&ack, now);
                }
            }
            Inbound::Acknowledge(ack) => {
                log::debug!("duplicate QoS 2 publish {:?}", publish.packet_id);
                self.reply(&ack, now);
            }
            Inbound::Dropped => {
                log::warn!("inbound window full, dropping publish {:?}", publish.packet_id);
                self.handler.on_error(ErrorKind::ResourceExhausted);
            }
        }
    }

    fn on_suback(&mut self, ack: SubAck) {
        match self.tracker.on_suback(ack.packet_id) {
            Ok(requested) if requested == ack.return_codes.len() => {
                self.handler.on_suback(ack.packet_id, &ack.return_codes)
            }
            Ok(requested) => {
                log::warn!(
                    "SUBACK {} carries {} return codes for {} filters",
                    ack.packet_id,
                    ack.return_codes.len(),
                    requested
                );
                self.handler.on_error(ErrorKind::ProtocolViolation);
            }
            Err(_) => self.violation("SUBACK", ack.packet_id),
        }
    }

    fn violation(&mut self, what: &str, packet_id: PacketId) {
        log::warn!("{} for unknown packet id {}", what, packet_id);
        self.handler.on_error(ErrorKind::ProtocolViolation);
    }

    /// Terminates the session: `on_error`, then `on_close`, exactly once.
    fn fail(&mut self, kind: ErrorKind) {
        debug_assert!(kind.is_fatal(), "{:?} is not fatal", kind);

        if matches!(self.state, State::Disconnected | State::Closing) {
            return;
        }

        log::error!("session failed: {:?}", kind);

        self.state = State::Closing;
        self.handler.on_error(kind);
        self.reset();
        self.tx.clear();
        self.state = State::Disconnected;
        self.handler.on_close();
    }

    fn reset(&mut self) {
        self.tracker.clear();
        self.rx.clear();
        self.keep_alive = None;
        self.connect_started = None;
    }

    /// Queues a packet and counts it as traffic for keep-alive.
    fn send(&mut self, packet: &Packet, now: Instant<C>) -> Result<(), crate::Error> {
        self.queue(packet)?;

        if let Some(keep_alive) = self.keep_alive.as_mut() {
            keep_alive.on_send(now);
        }

        Ok(())
    }

    /// `send` for packets the session generates itself; those always fit.
    fn reply(&mut self, packet: &Packet, now: Instant<C>) {
        if let Err(e) = self.send(packet, now) {
            log::error!("failed to encode {:?}: {}", packet.packet_type(), e);
        }
    }

    fn queue(&mut self, packet: &Packet) -> Result<(), crate::Error> {
        let start = self.tx.len();
        self.tx.resize(start + packet.required_space()?, 0);

        let mut cursor = encode::Cursor::new(&mut self.tx[start..]);
        if let Err(e) = packet.encode(&mut cursor) {
            self.tx.truncate(start);
            return Err(e);
        }

        Ok(())
    }
}
