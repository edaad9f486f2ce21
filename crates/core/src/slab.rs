//! Lookup table storage
//!
//! A flat, power-of-two sized array of 32-bit pre-images shared by every
//! worker during one solve. Entries are relaxed atomics: fill and search race
//! on slots with last-writer-wins semantics and no per-entry locking. A lost
//! write only costs a missed candidate, never a wrong answer, because every
//! hit is re-validated against the exact threshold.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};
use crate::params::{ENTRY_SIZE, MAX_ENTRIES, entries_to_memory, memory_to_entries};

pub struct Slab {
    entries: Box<[AtomicU32]>,
}

impl Slab {
    /// Check that `bytes` describes a usable table size
    pub fn validate(bytes: usize) -> Result<()> {
        if bytes == 0 || !bytes.is_power_of_two() {
            return Err(Error::MemoryNotPowerOfTwo(bytes));
        }
        if bytes < ENTRY_SIZE {
            return Err(Error::MemoryTooSmall {
                bytes,
                min: ENTRY_SIZE,
            });
        }
        let max = (MAX_ENTRIES as u128) * ENTRY_SIZE as u128;
        if bytes as u128 > max {
            return Err(Error::MemoryTooLarge {
                bytes,
                max: usize::try_from(max).unwrap_or(usize::MAX),
            });
        }
        Ok(())
    }

    /// Allocate a zeroed table of `bytes` bytes
    ///
    /// Allocation failure is reported as [`Error::Allocation`] instead of
    /// aborting, since the size is caller controlled.
    pub fn allocate(bytes: usize) -> Result<Self> {
        Self::validate(bytes)?;
        let count = memory_to_entries(bytes);

        let mut entries: Vec<AtomicU32> = Vec::new();
        entries
            .try_reserve_exact(count)
            .map_err(|_| Error::Allocation(bytes))?;
        entries.resize_with(count, || AtomicU32::new(0));

        Ok(Self {
            entries: entries.into_boxed_slice(),
        })
    }

    /// Number of entries (always a power of two)
    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Size of the table in bytes
    pub fn memory(&self) -> usize {
        entries_to_memory(self.entries.len())
    }

    #[inline(always)]
    pub fn load(&self, slot: u64) -> u32 {
        self.entries[slot as usize].load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn store(&self, slot: u64, value: u32) {
        self.entries[slot as usize].store(value, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Slab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slab")
            .field("entries", &self.entries.len())
            .finish()
    }
}
