use alloc::{string::String, vec, vec::Vec};

use super::*;
use crate::{packet::publish::Flags, time::TestClock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    ConnAck(ConnectReturnCode),
    PubAck(PacketId),
    Publish(Publish),
    PubComp(PacketId),
    SubAck(PacketId, Vec<SubAckReturnCode>),
    UnsubAck(PacketId),
    Error(ErrorKind),
    Close,
}

/// Handler that remembers every callback in order.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    pub(crate) events: Vec<Event>,
}

impl Recorder {
    pub(crate) fn take(&mut self) -> Vec<Event> {
        core::mem::take(&mut self.events)
    }
}

impl Handler for Recorder {
    fn on_connack(&mut self, code: ConnectReturnCode) {
        self.events.push(Event::ConnAck(code));
    }

    fn on_puback(&mut self, packet_id: PacketId) {
        self.events.push(Event::PubAck(packet_id));
    }

    fn on_publish(&mut self, publish: &Publish) {
        self.events.push(Event::Publish(publish.clone()));
    }

    fn on_pubcomp(&mut self, packet_id: PacketId) {
        self.events.push(Event::PubComp(packet_id));
    }

    fn on_suback(&mut self, packet_id: PacketId, return_codes: &[SubAckReturnCode]) {
        self.events
            .push(Event::SubAck(packet_id, return_codes.to_vec()));
    }

    fn on_unsuback(&mut self, packet_id: PacketId) {
        self.events.push(Event::UnsubAck(packet_id));
    }

    fn on_error(&mut self, kind: ErrorKind) {
        self.events.push(Event::Error(kind));
    }

    fn on_close(&mut self) {
        self.events.push(Event::Close);
    }
}

type TestSession = Session<TestClock, Recorder, 4, 4>;

fn at(ms: u64) -> Instant<TestClock> {
    TestClock::at(ms)
}

fn id(value: u16) -> PacketId {
    PacketId::try_from(value).unwrap()
}

/// Decodes everything the session queued since the last call.
pub(crate) fn decode_all(mut bytes: &[u8]) -> Vec<Packet> {
    let mut packets = Vec::new();

    while let Some((packet, used)) = parser::decode(bytes).unwrap() {
        packets.push(packet);
        bytes = &bytes[used..];
    }

    assert!(bytes.is_empty(), "trailing partial packet");
    packets
}

fn sent(session: &mut TestSession) -> Vec<Packet> {
    decode_all(&session.take_outgoing())
}

fn feed(session: &mut TestSession, packet: Packet, now: Instant<TestClock>) {
    session.handle_incoming(&packet.to_vec().unwrap(), now);
}

fn events(session: &mut TestSession) -> Vec<Event> {
    session.handler_mut().take()
}

fn connack(return_code: ConnectReturnCode) -> Packet {
    Packet::ConnAck(ConnAck {
        session_present: false,
        return_code,
    })
}

fn inbound(qos: QoS, packet_id: Option<u16>, payload: &[u8]) -> Publish {
    Publish {
        flags: Flags {
            dup: false,
            qos,
            retain: false,
        },
        topic: String::from("test1"),
        packet_id: packet_id.map(id),
        payload: payload.to_vec(),
    }
}

fn connected_with(options: &Options<'_>) -> TestSession {
    let mut session = TestSession::new(Recorder::default());

    session.connect(options, at(0)).unwrap();
    sent(&mut session);
    feed(&mut session, connack(ConnectReturnCode::Accepted), at(0));

    assert_eq!(session.state(), State::Connected);
    events(&mut session);
    session
}

fn connected(keep_alive: u16) -> TestSession {
    let mut options = Options::new("client");
    options.keep_alive = keep_alive;

    connected_with(&options)
}

#[test]
fn connect_accepted() {
    let mut session = TestSession::new(Recorder::default());
    let mut options = Options::new("client");
    options.keep_alive = 12;

    session.connect(&options, at(0)).unwrap();
    assert_eq!(session.state(), State::Connecting);

    let packets = sent(&mut session);
    assert_eq!(packets.len(), 1);
    match &packets[0] {
        Packet::Connect(connect) => {
            assert_eq!(connect.client_id, "client");
            assert_eq!(connect.keep_alive, 12);
            assert!(connect.clean_session);
        }
        other => panic!("expected CONNECT, got {other:?}"),
    }

    feed(&mut session, connack(ConnectReturnCode::Accepted), at(50));

    assert_eq!(session.state(), State::Connected);
    assert_eq!(
        events(&mut session),
        [Event::ConnAck(ConnectReturnCode::Accepted)]
    );
}

#[test]
fn connect_only_from_disconnected() {
    let mut session = connected(60);

    assert_eq!(
        session.connect(&Options::new("again"), at(1)),
        Err(crate::Error::AlreadyConnected)
    );
}

#[test]
fn invalid_options_leave_session_idle() {
    let mut session = TestSession::new(Recorder::default());
    let mut options = Options::new("");
    options.clean_session = false;

    assert_eq!(
        session.connect(&options, at(0)),
        Err(crate::Error::InvalidClientId)
    );
    assert_eq!(session.state(), State::Disconnected);
    assert!(!session.has_outgoing());
}

#[test]
fn calls_require_connection() {
    let mut session = TestSession::new(Recorder::default());
    let msg = Msg::new("a", b"x", QoS::AtMostOnce);

    assert_eq!(
        session.publish(&msg, at(0)),
        Err(crate::Error::NotConnected)
    );
    assert_eq!(
        session.subscribe(&[("a", QoS::AtMostOnce)], at(0)),
        Err(crate::Error::NotConnected)
    );
    assert_eq!(
        session.unsubscribe(&["a"], at(0)),
        Err(crate::Error::NotConnected)
    );
    assert_eq!(session.disconnect(), Err(crate::Error::NotConnected));

    session.connect(&Options::new("client"), at(0)).unwrap();
    assert_eq!(
        session.publish(&msg, at(0)),
        Err(crate::Error::NotConnected)
    );
}

#[test]
fn qos0_publish_is_fire_and_forget() {
    let mut session = connected(60);

    let packet_id = session
        .publish(&Msg::new("test", b"data", QoS::AtMostOnce), at(1))
        .unwrap();

    assert_eq!(packet_id, None);
    assert_eq!(session.in_flight(), 0);
    assert_eq!(
        sent(&mut session),
        [Packet::Publish(Publish {
            flags: Flags::default(),
            topic: String::from("test"),
            packet_id: None,
            payload: b"data".to_vec(),
        })]
    );
}

#[test]
fn qos1_publish_acknowledged() {
    let mut session = connected(12);

    let packet_id = session
        .publish(&Msg::new("test2", b"hello world", QoS::AtLeastOnce), at(1))
        .unwrap();
    assert_eq!(packet_id, Some(id(1)));

    assert_eq!(
        sent(&mut session),
        [Packet::Publish(Publish {
            flags: Flags {
                dup: false,
                qos: QoS::AtLeastOnce,
                retain: false,
            },
            topic: String::from("test2"),
            packet_id: Some(id(1)),
            payload: b"hello world".to_vec(),
        })]
    );

    feed(&mut session, Packet::PubAck(id(1)), at(2));
    assert_eq!(events(&mut session), [Event::PubAck(id(1))]);
    assert_eq!(session.in_flight(), 0);

    // A second PUBACK for the same id is a local violation only.
    feed(&mut session, Packet::PubAck(id(1)), at(3));
    assert_eq!(
        events(&mut session),
        [Event::Error(ErrorKind::ProtocolViolation)]
    );
    assert_eq!(session.state(), State::Connected);
}

#[test]
fn subscribe_acknowledged() {
    let mut session = connected(12);

    session
        .publish(&Msg::new("test2", b"hello world", QoS::AtLeastOnce), at(1))
        .unwrap();
    feed(&mut session, Packet::PubAck(id(1)), at(2));
    sent(&mut session);
    events(&mut session);

    let topics = [
        ("test1", QoS::AtMostOnce),
        ("test2", QoS::AtLeastOnce),
        ("test3", QoS::ExactlyOnce),
    ];
    let packet_id = session.subscribe(&topics, at(3)).unwrap();
    assert_eq!(packet_id, id(2));

    assert_eq!(
        sent(&mut session),
        [Packet::Subscribe(Subscribe {
            packet_id: id(2),
            topics: vec![
                Subscription::new("test1", QoS::AtMostOnce),
                Subscription::new("test2", QoS::AtLeastOnce),
                Subscription::new("test3", QoS::ExactlyOnce),
            ],
        })]
    );

    let codes = vec![
        SubAckReturnCode::MaxQoS0,
        SubAckReturnCode::MaxQoS1,
        SubAckReturnCode::MaxQoS2,
    ];
    feed(
        &mut session,
        Packet::SubAck(SubAck {
            packet_id: id(2),
            return_codes: codes.clone(),
        }),
        at(4),
    );

    assert_eq!(events(&mut session), [Event::SubAck(id(2), codes)]);
}

#[test]
fn suback_with_wrong_code_count_is_violation() {
    let mut session = connected(60);

    let packet_id = session
        .subscribe(&[("a", QoS::AtMostOnce), ("b", QoS::AtLeastOnce)], at(1))
        .unwrap();
    sent(&mut session);

    feed(
        &mut session,
        Packet::SubAck(SubAck {
            packet_id,
            return_codes: vec![SubAckReturnCode::MaxQoS0],
        }),
        at(2),
    );

    assert_eq!(
        events(&mut session),
        [Event::Error(ErrorKind::ProtocolViolation)]
    );
    assert_eq!(session.state(), State::Connected);

    // The exchange is over; a late SUBACK for the same id is unknown.
    feed(
        &mut session,
        Packet::SubAck(SubAck {
            packet_id,
            return_codes: vec![SubAckReturnCode::MaxQoS0, SubAckReturnCode::MaxQoS1],
        }),
        at(3),
    );
    assert_eq!(
        events(&mut session),
        [Event::Error(ErrorKind::ProtocolViolation)]
    );
}

#[test]
fn unsubscribe_acknowledged() {
    let mut session = connected(60);

    let packet_id = session.unsubscribe(&["a/+", "b/#"], at(1)).unwrap();
    assert_eq!(
        sent(&mut session),
        [Packet::Unsubscribe(Unsubscribe {
            packet_id,
            topics: vec![String::from("a/+"), String::from("b/#")],
        })]
    );

    feed(&mut session, Packet::UnsubAck(packet_id), at(2));
    assert_eq!(events(&mut session), [Event::UnsubAck(packet_id)]);

    feed(&mut session, Packet::UnsubAck(packet_id), at(3));
    assert_eq!(
        events(&mut session),
        [Event::Error(ErrorKind::ProtocolViolation)]
    );
}

#[test]
fn invalid_topics_rejected() {
    let mut session = connected(60);

    assert_eq!(
        session.publish(&Msg::new("a/+", b"", QoS::AtMostOnce), at(1)),
        Err(crate::Error::InvalidTopic)
    );
    assert_eq!(
        session.subscribe(&[("a#", QoS::AtMostOnce)], at(1)),
        Err(crate::Error::InvalidTopic)
    );
    assert_eq!(session.subscribe(&[], at(1)), Err(crate::Error::InvalidTopic));
    assert_eq!(session.unsubscribe(&[], at(1)), Err(crate::Error::InvalidTopic));
    assert!(!session.has_outgoing());
}

#[test]
fn ping_sent_after_half_keep_alive() {
    let mut session = connected(12);

    let next = session.handle_timers(at(5_999));
    assert_eq!(next.map(|i| i.duration_since_epoch().integer()), Some(6_000));
    assert!(sent(&mut session).is_empty());

    let next = session.handle_timers(at(6_000));
    assert_eq!(sent(&mut session), [Packet::PingReq]);
    assert_eq!(next.map(|i| i.duration_since_epoch().integer()), Some(12_000));

    feed(&mut session, Packet::PingResp, at(7_000));
    session.handle_timers(at(12_000));

    assert_eq!(sent(&mut session), [Packet::PingReq]);
    assert_eq!(session.state(), State::Connected);
    assert!(events(&mut session).is_empty());
}

#[test]
fn missing_pingresp_closes_session() {
    let mut session = connected(12);

    session.handle_timers(at(6_000));
    assert_eq!(sent(&mut session), [Packet::PingReq]);

    assert!(session.handle_timers(at(11_999)).is_some());
    assert_eq!(session.state(), State::Connected);

    assert!(session.handle_timers(at(12_000)).is_none());
    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(
        events(&mut session),
        [Event::Error(ErrorKind::PingTimeout), Event::Close]
    );

    // Nothing more happens once closed.
    assert!(session.handle_timers(at(20_000)).is_none());
    session.handle_transport_closed();
    assert!(events(&mut session).is_empty());
}

#[test]
fn outbound_qos2_completes_once() {
    let mut session = connected(0);

    let packet_id = session
        .publish(&Msg::new("t", b"x", QoS::ExactlyOnce), at(1))
        .unwrap()
        .unwrap();
    sent(&mut session);

    feed(&mut session, Packet::PubRec(packet_id), at(2));
    assert_eq!(sent(&mut session), [Packet::PubRel(packet_id)]);

    feed(&mut session, Packet::PubRec(packet_id), at(3));
    assert_eq!(sent(&mut session), [Packet::PubRel(packet_id)]);
    assert!(events(&mut session).is_empty());

    feed(&mut session, Packet::PubComp(packet_id), at(4));
    assert_eq!(events(&mut session), [Event::PubComp(packet_id)]);
    assert_eq!(session.in_flight(), 0);

    feed(&mut session, Packet::PubComp(packet_id), at(5));
    assert_eq!(
        events(&mut session),
        [Event::Error(ErrorKind::ProtocolViolation)]
    );
}

#[test]
fn inbound_qos0_and_qos1() {
    let mut session = connected(60);

    let qos0 = inbound(QoS::AtMostOnce, None, b"zero");
    let qos1 = inbound(QoS::AtLeastOnce, Some(3), b"one");

    feed(&mut session, Packet::Publish(qos0.clone()), at(1));
    feed(&mut session, Packet::Publish(qos1.clone()), at(2));

    assert_eq!(
        events(&mut session),
        [Event::Publish(qos0), Event::Publish(qos1)]
    );
    assert_eq!(sent(&mut session), [Packet::PubAck(id(3))]);
}

#[test]
fn inbound_qos2_delivered_once() {
    let mut session = connected(60);
    let msg = inbound(QoS::ExactlyOnce, Some(5), b"two");

    feed(&mut session, Packet::Publish(msg.clone()), at(1));

    let mut redelivery = msg.clone();
    redelivery.flags.dup = true;
    feed(&mut session, Packet::Publish(redelivery), at(2));

    assert_eq!(events(&mut session), [Event::Publish(msg)]);
    assert_eq!(
        sent(&mut session),
        [Packet::PubRec(id(5)), Packet::PubRec(id(5))]
    );

    feed(&mut session, Packet::PubRel(id(5)), at(3));
    assert_eq!(sent(&mut session), [Packet::PubComp(id(5))]);

    // PUBREL for an id we no longer know still gets PUBCOMP.
    feed(&mut session, Packet::PubRel(id(5)), at(4));
    assert_eq!(sent(&mut session), [Packet::PubComp(id(5))]);
    assert!(events(&mut session).is_empty());
}

#[test]
fn inbound_window_full_drops_without_ack() {
    let mut session = connected(60);

    for packet_id in 1..=4 {
        feed(
            &mut session,
            Packet::Publish(inbound(QoS::ExactlyOnce, Some(packet_id), b"")),
            at(1),
        );
    }
    assert_eq!(sent(&mut session).len(), 4);
    events(&mut session);

    feed(
        &mut session,
        Packet::Publish(inbound(QoS::ExactlyOnce, Some(5), b"")),
        at(2),
    );

    assert!(sent(&mut session).is_empty());
    assert_eq!(
        events(&mut session),
        [Event::Error(ErrorKind::ResourceExhausted)]
    );
    assert_eq!(session.state(), State::Connected);
}

#[test]
fn outbound_window_full() {
    let mut session = connected(60);
    let msg = Msg::new("t", b"", QoS::AtLeastOnce);

    for _ in 0..4 {
        session.publish(&msg, at(1)).unwrap();
    }

    assert_eq!(
        session.publish(&msg, at(1)),
        Err(crate::Error::ResourceExhausted)
    );
    assert_eq!(session.state(), State::Connected);

    // QoS 0 needs no slot.
    assert_eq!(
        session.publish(&Msg::new("t", b"", QoS::AtMostOnce), at(1)),
        Ok(None)
    );
}

#[test]
fn oversized_publish_releases_id() {
    let mut session = connected(60);
    let topic: String = core::iter::repeat_n('t', 70_000).collect();

    assert_eq!(
        session.publish(&Msg::new(&topic, b"", QoS::AtLeastOnce), at(1)),
        Err(crate::Error::PacketTooLarge)
    );
    assert_eq!(session.in_flight(), 0);
    assert!(!session.has_outgoing());

    assert_eq!(
        session.publish(&Msg::new("t", b"", QoS::AtLeastOnce), at(1)),
        Ok(Some(id(2)))
    );
}

#[test]
fn retransmit_then_delivery_failed() {
    let mut options = Options::new("client");
    options.keep_alive = 0;
    options.ack_timeout = 1;
    options.max_retries = 1;
    let mut session = connected_with(&options);

    let packet_id = session
        .publish(&Msg::new("t", b"x", QoS::AtLeastOnce), at(0))
        .unwrap()
        .unwrap();
    sent(&mut session);

    let next = session.handle_timers(at(999));
    assert_eq!(next.map(|i| i.duration_since_epoch().integer()), Some(1_000));
    assert!(sent(&mut session).is_empty());

    session.handle_timers(at(1_000));
    match sent(&mut session).as_slice() {
        [Packet::Publish(publish)] => {
            assert!(publish.flags.dup);
            assert_eq!(publish.packet_id, Some(packet_id));
        }
        other => panic!("expected one PUBLISH, got {other:?}"),
    }

    assert!(session.handle_timers(at(2_000)).is_none());
    assert!(sent(&mut session).is_empty());
    assert_eq!(
        events(&mut session),
        [Event::Error(ErrorKind::DeliveryFailed(packet_id))]
    );
    assert_eq!(session.state(), State::Connected);
    assert_eq!(session.in_flight(), 0);

    // A late PUBACK for the abandoned id changes nothing.
    feed(&mut session, Packet::PubAck(packet_id), at(2_001));
    assert_eq!(
        events(&mut session),
        [Event::Error(ErrorKind::ProtocolViolation)]
    );
}

#[test]
fn pubrel_retransmitted_while_awaiting_pubcomp() {
    let mut options = Options::new("client");
    options.keep_alive = 0;
    options.ack_timeout = 1;
    let mut session = connected_with(&options);

    let packet_id = session
        .publish(&Msg::new("t", b"x", QoS::ExactlyOnce), at(0))
        .unwrap()
        .unwrap();
    feed(&mut session, Packet::PubRec(packet_id), at(500));
    sent(&mut session);

    session.handle_timers(at(1_500));
    assert_eq!(sent(&mut session), [Packet::PubRel(packet_id)]);
}

#[test]
fn connect_timeout() {
    let mut session = TestSession::new(Recorder::default());
    session.connect(&Options::new("client"), at(0)).unwrap();

    let next = session.handle_timers(at(5_000));
    assert_eq!(next.map(|i| i.duration_since_epoch().integer()), Some(10_000));
    assert_eq!(session.state(), State::Connecting);

    assert!(session.handle_timers(at(10_000)).is_none());
    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(
        events(&mut session),
        [Event::Error(ErrorKind::ConnectTimeout), Event::Close]
    );
}

#[test]
fn connect_rejected() {
    let mut session = TestSession::new(Recorder::default());
    session.connect(&Options::new("client"), at(0)).unwrap();

    feed(&mut session, connack(ConnectReturnCode::NotAuthorized), at(1));

    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(
        events(&mut session),
        [
            Event::ConnAck(ConnectReturnCode::NotAuthorized),
            Event::Error(ErrorKind::ConnectRejected(
                ConnectReturnCode::NotAuthorized
            )),
            Event::Close,
        ]
    );

    // No implicit retry, but the host may try again.
    assert!(!session.has_outgoing());
    assert_eq!(session.connect(&Options::new("client"), at(2)), Ok(()));
}

#[test]
fn malformed_input_is_fatal() {
    let mut session = connected(60);

    session.handle_incoming(&[0x00, 0x00], at(1));

    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(
        events(&mut session),
        [Event::Error(ErrorKind::MalformedPacket), Event::Close]
    );

    // Bytes after the failure are ignored.
    feed(&mut session, Packet::PingResp, at(2));
    assert!(events(&mut session).is_empty());
}

#[test]
fn bad_flags_are_fatal() {
    let mut session = connected(60);

    // PUBREL with reserved flags 0000 instead of 0010.
    session.handle_incoming(&[0x60, 0x02, 0x00, 0x01], at(1));

    assert_eq!(
        events(&mut session),
        [Event::Error(ErrorKind::MalformedPacket), Event::Close]
    );
}

#[test]
fn input_split_into_single_bytes() {
    let mut session = connected(60);
    let msg = inbound(QoS::AtLeastOnce, Some(9), b"payload");
    let mut bytes = Packet::Publish(msg.clone()).to_vec().unwrap();
    bytes.extend(Packet::PingResp.to_vec().unwrap());

    for byte in &bytes {
        session.handle_incoming(core::slice::from_ref(byte), at(1));
    }

    assert_eq!(events(&mut session), [Event::Publish(msg)]);
    assert_eq!(sent(&mut session), [Packet::PubAck(id(9))]);
}

#[test]
fn several_packets_in_one_read() {
    let mut session = connected(60);
    let first = inbound(QoS::AtMostOnce, None, b"1");
    let second = inbound(QoS::AtMostOnce, None, b"2");

    let mut bytes = Packet::Publish(first.clone()).to_vec().unwrap();
    bytes.extend(Packet::Publish(second.clone()).to_vec().unwrap());

    session.handle_incoming(&bytes, at(1));

    assert_eq!(
        events(&mut session),
        [Event::Publish(first), Event::Publish(second)]
    );
}

#[test]
fn unexpected_packets_ignored() {
    let mut session = TestSession::new(Recorder::default());
    session.connect(&Options::new("client"), at(0)).unwrap();
    sent(&mut session);

    feed(&mut session, Packet::PubAck(id(1)), at(1));
    assert_eq!(session.state(), State::Connecting);

    feed(&mut session, connack(ConnectReturnCode::Accepted), at(2));
    events(&mut session);

    feed(&mut session, connack(ConnectReturnCode::Accepted), at(3));
    feed(&mut session, Packet::PingReq, at(3));

    assert_eq!(session.state(), State::Connected);
    assert!(events(&mut session).is_empty());
    assert!(sent(&mut session).is_empty());
}

#[test]
fn disconnect_discards_in_flight() {
    let mut session = connected(60);

    session
        .publish(&Msg::new("t", b"x", QoS::AtLeastOnce), at(1))
        .unwrap();
    assert_eq!(session.disconnect(), Ok(()));

    let packets = sent(&mut session);
    assert_eq!(packets.last(), Some(&Packet::Disconnect));
    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(session.in_flight(), 0);
    assert_eq!(events(&mut session), [Event::Close]);

    // The late PUBACK arrives after the session is gone.
    feed(&mut session, Packet::PubAck(id(1)), at(2));
    assert!(events(&mut session).is_empty());
}

#[test]
fn transport_failure_closes_once() {
    let mut session = connected(60);

    session.handle_transport_closed();
    session.handle_transport_error();

    assert_eq!(session.state(), State::Disconnected);
    assert_eq!(
        events(&mut session),
        [Event::Error(ErrorKind::Transport), Event::Close]
    );
}

#[test]
fn new_connection_starts_with_fresh_ids() {
    let mut session = connected(60);

    session
        .publish(&Msg::new("t", b"x", QoS::AtLeastOnce), at(1))
        .unwrap();
    session.disconnect().unwrap();
    sent(&mut session);

    session.connect(&Options::new("client"), at(2)).unwrap();
    feed(&mut session, connack(ConnectReturnCode::Accepted), at(3));

    assert_eq!(
        session.publish(&Msg::new("t", b"x", QoS::AtLeastOnce), at(4)),
        Ok(Some(id(1)))
    );
}
