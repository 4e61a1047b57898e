//! Bookkeeping for every exchange that needs an acknowledgment.
//!
//! The tracker never sends anything. Each operation reports what the caller
//! has to transmit or deliver, so it can be driven and tested on its own.

use alloc::vec::Vec;

use embedded_time::{Clock, Instant};
use heapless::Vec as BoundedVec;

use crate::{
    incoming::Incoming,
    outgoing::Outgoing,
    packet::{Packet, PacketId, QoS, publish::Publish},
    packet_id_pool::PacketIdPool,
};

pub use crate::outgoing::{Expired, Stage};

/// What to do with a received PUBLISH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Hand the message to the application, then send `ack` if any.
    Deliver { ack: Option<Packet> },
    /// Redelivered QoS 2 message: acknowledge again without delivering.
    Acknowledge(Packet),
    /// No room to track the message; neither deliver nor acknowledge.
    Dropped,
}

/// A SUBSCRIBE or UNSUBSCRIBE waiting for its acknowledgment.
#[derive(Debug, Clone, Copy)]
struct Pending {
    packet_id: PacketId,
    topics: usize,
}

pub struct Tracker<C: Clock, const N_OUT: usize, const N_IN: usize> {
    ids: PacketIdPool,
    outgoing: Outgoing<C, N_OUT>,
    incoming: Incoming<N_IN>,
    subscribes: BoundedVec<Pending, N_OUT>,
    unsubscribes: BoundedVec<Pending, N_OUT>,
    ack_timeout: C::T,
    max_retries: u8,
}

impl<C: Clock, const N_OUT: usize, const N_IN: usize> Tracker<C, N_OUT, N_IN> {
    pub fn new(ack_timeout: C::T, max_retries: u8) -> Self {
        Self {
            ids: PacketIdPool::new(),
            outgoing: Outgoing::new(),
            incoming: Incoming::new(),
            subscribes: BoundedVec::new(),
            unsubscribes: BoundedVec::new(),
            ack_timeout,
            max_retries,
        }
    }

    pub fn set_retry_policy(&mut self, ack_timeout: C::T, max_retries: u8) {
        self.ack_timeout = ack_timeout;
        self.max_retries = max_retries;
    }

    /// Drops every exchange and frees every id.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.outgoing.clear();
        self.incoming.clear();
        self.subscribes.clear();
        self.unsubscribes.clear();
    }

    /// Outbound publishes still waiting for their final acknowledgment.
    pub fn in_flight(&self) -> usize {
        self.outgoing.len()
    }

    /// Inbound QoS 2 messages still waiting for PUBREL.
    pub fn awaiting_pubrel(&self) -> usize {
        self.incoming.len()
    }

    pub fn stage(&self, packet_id: PacketId) -> Option<Stage> {
        self.outgoing.stage(packet_id)
    }

    pub fn is_in_use(&self, packet_id: PacketId) -> bool {
        self.ids.is_in_use(packet_id)
    }

    /// Assigns an id to a QoS 1 / QoS 2 `publish` and starts tracking it.
    /// QoS 0 messages are not tracked and get no id.
    pub fn track_publish(
        &mut self,
        publish: &mut Publish,
        now: Instant<C>,
    ) -> Result<Option<PacketId>, crate::Error> {
        if publish.flags.qos == QoS::AtMostOnce {
            publish.packet_id = None;
            return Ok(None);
        }

        if self.outgoing.is_full() {
            return Err(crate::Error::ResourceExhausted);
        }

        let id = self.ids.allocate()?;
        publish.packet_id = Some(id);

        if let Err(e) = self.outgoing.track(id, publish.clone(), now) {
            self.ids.release(id);
            publish.packet_id = None;
            return Err(e);
        }

        Ok(Some(id))
    }

    /// Drops an outbound publish that never reached the wire and frees its id.
    pub fn cancel_publish(&mut self, packet_id: PacketId) {
        if self.outgoing.remove(packet_id) {
            self.ids.release(packet_id);
        }
    }

    pub fn on_puback(&mut self, packet_id: PacketId) -> Result<(), crate::Error> {
        self.outgoing.on_puback(packet_id)?;
        self.ids.release(packet_id);

        Ok(())
    }

    /// Advances a QoS 2 exchange and returns the PUBREL to send.
    pub fn on_pubrec(&mut self, packet_id: PacketId, now: Instant<C>) -> Result<Packet, crate::Error> {
        self.outgoing.on_pubrec(packet_id, now)?;

        Ok(Packet::PubRel(packet_id))
    }

    pub fn on_pubcomp(&mut self, packet_id: PacketId) -> Result<(), crate::Error> {
        self.outgoing.on_pubcomp(packet_id)?;
        self.ids.release(packet_id);

        Ok(())
    }

    pub fn on_inbound_publish(&mut self, publish: &Publish) -> Inbound {
        let Some(packet_id) = publish.packet_id else {
            return Inbound::Deliver { ack: None };
        };

        match publish.flags.qos {
            QoS::AtMostOnce => Inbound::Deliver { ack: None },
            QoS::AtLeastOnce => Inbound::Deliver {
                ack: Some(Packet::PubAck(packet_id)),
            },
            QoS::ExactlyOnce => match self.incoming.track(packet_id) {
                Ok(true) => Inbound::Deliver {
                    ack: Some(Packet::PubRec(packet_id)),
                },
                Ok(false) => Inbound::Acknowledge(Packet::PubRec(packet_id)),
                Err(_) => Inbound::Dropped,
            },
        }
    }

    /// Finishes an inbound QoS 2 exchange. PUBCOMP is owed even for an unknown
    /// id, since the broker may be retrying a PUBREL whose PUBCOMP got lost.
    pub fn on_pubrel(&mut self, packet_id: PacketId) -> Packet {
        if !self.incoming.release(packet_id) {
            log::debug!("PUBREL for unknown packet id {}", packet_id);
        }

        Packet::PubComp(packet_id)
    }

    pub fn track_subscribe(&mut self, topics: usize) -> Result<PacketId, crate::Error> {
        track_pending(&mut self.ids, &mut self.subscribes, topics)
    }

    /// Completes a subscription and returns how many filters it requested.
    pub fn on_suback(&mut self, packet_id: PacketId) -> Result<usize, crate::Error> {
        release_pending(&mut self.ids, &mut self.subscribes, packet_id)
    }

    pub fn track_unsubscribe(&mut self, topics: usize) -> Result<PacketId, crate::Error> {
        track_pending(&mut self.ids, &mut self.unsubscribes, topics)
    }

    pub fn on_unsuback(&mut self, packet_id: PacketId) -> Result<(), crate::Error> {
        release_pending(&mut self.ids, &mut self.unsubscribes, packet_id).map(|_| ())
    }

    /// Handles acknowledgment timeouts. Abandoned ids are freed before they are returned.
    pub fn expire(&mut self, now: Instant<C>) -> Vec<Expired> {
        let expired = self.outgoing.expire(now, self.ack_timeout, self.max_retries);

        for entry in &expired {
            if let Expired::Abandoned(id) = entry {
                self.ids.release(*id);
            }
        }

        expired
    }

    /// When the oldest outbound exchange times out.
    pub fn next_deadline(&self) -> Option<Instant<C>> {
        self.outgoing.next_deadline(self.ack_timeout)
    }
}

fn track_pending<const N: usize>(
    ids: &mut PacketIdPool,
    pending: &mut BoundedVec<Pending, N>,
    topics: usize,
) -> Result<PacketId, crate::Error> {
    if pending.is_full() {
        return Err(crate::Error::ResourceExhausted);
    }

    let id = ids.allocate()?;
    if pending.push(Pending { packet_id: id, topics }).is_err() {
        ids.release(id);
        return Err(crate::Error::ResourceExhausted);
    }

    Ok(id)
}

fn release_pending<const N: usize>(
    ids: &mut PacketIdPool,
    pending: &mut BoundedVec<Pending, N>,
    packet_id: PacketId,
) -> Result<usize, crate::Error> {
    let index = pending
        .iter()
        .position(|p| p.packet_id == packet_id)
        .ok_or(crate::Error::ProtocolViolation)?;

    let entry = pending.remove(index);
    ids.release(packet_id);

    Ok(entry.topics)
}
