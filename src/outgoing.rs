use alloc::vec::Vec;

use embedded_time::{Clock, Instant};
use heapless::Vec as BoundedVec;

use crate::{
    packet::{Packet, PacketId, QoS, publish::Publish},
    time,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    AwaitingPuback,
    AwaitingPubrec,
    AwaitingPubcomp,
}

pub(crate) struct Outbound<C: Clock> {
    id: PacketId,
    stage: Stage,
    publish: Publish,
    sent_at: Instant<C>,
    retries: u8,
}

/// What a timed-out exchange turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expired {
    Retransmit(Packet),
    Abandoned(PacketId),
}

/// Outbound QoS 1 / QoS 2 publishes waiting for their final acknowledgment.
pub(crate) struct Outgoing<C: Clock, const N: usize> {
    pubs: BoundedVec<Outbound<C>, N>,
}

impl<C: Clock, const N: usize> Outgoing<C, N> {
    pub(crate) fn new() -> Self {
        Self {
            pubs: BoundedVec::new(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.pubs.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.pubs.len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.pubs.is_full()
    }

    pub(crate) fn stage(&self, id: PacketId) -> Option<Stage> {
        self.pubs.iter().find(|p| p.id == id).map(|p| p.stage)
    }

    /// Starts tracking `publish`, which must already carry `id`.
    pub(crate) fn track(
        &mut self,
        id: PacketId,
        publish: Publish,
        now: Instant<C>,
    ) -> Result<(), crate::Error> {
        let stage = match publish.flags.qos {
            QoS::AtLeastOnce => Stage::AwaitingPuback,
            QoS::ExactlyOnce => Stage::AwaitingPubrec,
            QoS::AtMostOnce => return Err(crate::Error::ProtocolViolation),
        };

        let entry = Outbound {
            id,
            stage,
            publish,
            sent_at: now,
            retries: 0,
        };

        self.pubs
            .push(entry)
            .map_err(|_| crate::Error::ResourceExhausted)
    }

    pub(crate) fn on_puback(&mut self, id: PacketId) -> Result<(), crate::Error> {
        self.remove_in(id, Stage::AwaitingPuback)
    }

    /// Moves the exchange to `AwaitingPubcomp`. A repeated PUBREC is accepted so
    /// the caller can answer it with PUBREL again.
    pub(crate) fn on_pubrec(&mut self, id: PacketId, now: Instant<C>) -> Result<(), crate::Error> {
        let entry = self
            .pubs
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(crate::Error::ProtocolViolation)?;

        match entry.stage {
            Stage::AwaitingPubrec => {
                entry.stage = Stage::AwaitingPubcomp;
                entry.sent_at = now;
                entry.retries = 0;
                Ok(())
            }
            Stage::AwaitingPubcomp => Ok(()),
            Stage::AwaitingPuback => Err(crate::Error::ProtocolViolation),
        }
    }

    pub(crate) fn on_pubcomp(&mut self, id: PacketId) -> Result<(), crate::Error> {
        self.remove_in(id, Stage::AwaitingPubcomp)
    }

    pub(crate) fn remove(&mut self, id: PacketId) -> bool {
        let Some(index) = self.pubs.iter().position(|p| p.id == id) else {
            return false;
        };

        self.pubs.remove(index);
        true
    }

    fn remove_in(&mut self, id: PacketId, stage: Stage) -> Result<(), crate::Error> {
        let index = self
            .pubs
            .iter()
            .position(|p| p.id == id && p.stage == stage)
            .ok_or(crate::Error::ProtocolViolation)?;

        self.pubs.remove(index);
        Ok(())
    }

    /// Retransmits or abandons every exchange whose last transmission is `timeout` old.
    pub(crate) fn expire(&mut self, now: Instant<C>, timeout: C::T, max_retries: u8) -> Vec<Expired> {
        let mut expired = Vec::new();

        self.pubs.retain_mut(|entry| {
            if !time::expired(&now, &entry.sent_at, timeout) {
                return true;
            }

            if entry.retries >= max_retries {
                expired.push(Expired::Abandoned(entry.id));
                return false;
            }

            entry.retries += 1;
            entry.sent_at = now;

            let packet = match entry.stage {
                Stage::AwaitingPubcomp => Packet::PubRel(entry.id),
                Stage::AwaitingPuback | Stage::AwaitingPubrec => {
                    entry.publish.flags.dup = true;
                    Packet::Publish(entry.publish.clone())
                }
            };

            expired.push(Expired::Retransmit(packet));
            true
        });

        expired
    }

    pub(crate) fn next_deadline(&self, timeout: C::T) -> Option<Instant<C>> {
        self.pubs
            .iter()
            .map(|p| Some(time::after(&p.sent_at, timeout)))
            .fold(None, time::earliest)
    }
}
