use heapless::Vec;

use crate::packet::PacketId;

/// Inbound QoS 2 ids for which PUBREC went out and PUBREL has not arrived yet.
pub(crate) struct Incoming<const N: usize> {
    awaiting_pubrel: Vec<PacketId, N>,
}

impl<const N: usize> Incoming<N> {
    pub(crate) fn new() -> Self {
        Self {
            awaiting_pubrel: Vec::new(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.awaiting_pubrel.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.awaiting_pubrel.len()
    }

    pub(crate) fn contains(&self, packet_id: PacketId) -> bool {
        self.awaiting_pubrel.contains(&packet_id)
    }

    /// Records `packet_id`. Returns `false` when it was already recorded, meaning
    /// the PUBLISH is a redelivery that must not reach the application again.
    pub(crate) fn track(&mut self, packet_id: PacketId) -> Result<bool, crate::Error> {
        if self.contains(packet_id) {
            return Ok(false);
        }

        self.awaiting_pubrel
            .push(packet_id)
            .map_err(|_| crate::Error::ResourceExhausted)?;

        Ok(true)
    }

    /// Forgets `packet_id`; `false` when it was not recorded.
    pub(crate) fn release(&mut self, packet_id: PacketId) -> bool {
        let Some(index) = self.awaiting_pubrel.iter().position(|id| *id == packet_id) else {
            return false;
        };

        self.awaiting_pubrel.remove(index);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: u16) -> PacketId {
        PacketId::try_from(value).unwrap()
    }

    #[test]
    fn duplicate_is_reported() {
        let mut incoming = Incoming::<4>::new();

        assert_eq!(incoming.track(id(9)), Ok(true));
        assert_eq!(incoming.track(id(9)), Ok(false));
        assert_eq!(incoming.len(), 1);
    }

    #[test]
    fn release_allows_reuse() {
        let mut incoming = Incoming::<4>::new();
        incoming.track(id(9)).unwrap();

        assert!(incoming.release(id(9)));
        assert!(!incoming.release(id(9)));
        assert_eq!(incoming.track(id(9)), Ok(true));
    }

    #[test]
    fn full_table() {
        let mut incoming = Incoming::<2>::new();
        incoming.track(id(1)).unwrap();
        incoming.track(id(2)).unwrap();

        assert_eq!(incoming.track(id(3)), Err(crate::Error::ResourceExhausted));
        // Known ids are still recognised when full.
        assert_eq!(incoming.track(id(2)), Ok(false));
    }
}
