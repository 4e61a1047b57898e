//! Packet identifier allocation.
//!
//! Ids come from a counter that only moves forward and wraps from 65535 to 1,
//! skipping ids still in use. A released id therefore comes back only after
//! every other free id has been handed out once.

use crate::packet::PacketId;

const WORDS: usize = (u16::MAX as usize + 1) / 32;

pub struct PacketIdPool {
    in_use: [u32; WORDS],
    in_use_count: usize,
    next_id: u16,
}

impl Default for PacketIdPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketIdPool {
    pub const fn new() -> Self {
        Self {
            in_use: [0; WORDS],
            in_use_count: 0,
            next_id: 1,
        }
    }

    pub fn clear(&mut self) {
        self.in_use.fill(0);
        self.in_use_count = 0;
        self.next_id = 1;
    }

    pub fn allocate(&mut self) -> Result<PacketId, crate::Error> {
        if self.in_use_count == u16::MAX as usize {
            return Err(crate::Error::ResourceExhausted);
        }

        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);

            if self.next_id == 0 {
                self.next_id = 1;
            }

            if self.contains(id) {
                continue;
            }

            self.set(id, true);
            self.in_use_count += 1;

            return PacketId::try_from(id);
        }
    }

    /// Returns `id` to the pool. Releasing a free id is a no-op.
    pub fn release(&mut self, id: PacketId) {
        if self.contains(id.get()) {
            self.set(id.get(), false);
            self.in_use_count -= 1;
        }
    }

    pub fn is_in_use(&self, id: PacketId) -> bool {
        self.contains(id.get())
    }

    pub fn in_use(&self) -> usize {
        self.in_use_count
    }

    #[inline]
    fn contains(&self, id: u16) -> bool {
        let (word, bit) = Self::position(id);
        self.in_use[word] & bit != 0
    }

    #[inline]
    fn set(&mut self, id: u16, used: bool) {
        let (word, bit) = Self::position(id);

        if used {
            self.in_use[word] |= bit;
        } else {
            self.in_use[word] &= !bit;
        }
    }

    #[inline]
    fn position(id: u16) -> (usize, u32) {
        (id as usize / 32, 1 << (id % 32))
    }
}
