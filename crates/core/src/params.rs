//! Nano PoW Engine Parameters
//!
//! Table geometry, solution widths and the work quantum shared by every
//! driver. Both backends must agree on these for solutions to validate.

/// Size in bytes of one lookup table entry (a 32-bit pre-image)
pub const ENTRY_SIZE: usize = core::mem::size_of::<u32>();

/// Largest lookup scale: the table holds at most 2^32 entries (16 GB)
pub const MAX_LOOKUP: u32 = 32;

/// Maximum number of entries in the lookup table
pub const MAX_ENTRIES: u64 = 1 << MAX_LOOKUP;

/// Width of the left-hand side of a solution (slab value width)
pub const LHS_BITS: u32 = 32;

/// Width of the right-hand side of a solution
pub const RHS_BITS: u32 = 48;

/// Largest valid left-hand side
pub const MAX_LHS: u64 = (1 << LHS_BITS) - 1;

/// Largest valid right-hand side
pub const MAX_RHS: u64 = (1 << RHS_BITS) - 1;

/// Number of candidates a worker claims per cursor fetch
pub const STEPPING: u64 = 1024;

/// Difficulty (in bits) a freshly constructed driver starts with
pub const DEFAULT_DIFFICULTY_BITS: u32 = 8;

/// Work items per GPU workgroup (must match the WGSL kernels)
pub const GPU_WORKGROUP_SIZE: u32 = 64;

/// Candidates each GPU work item handles per dispatch
pub const GPU_STEPPING: u32 = 256;

/// Default number of GPU work items
pub const GPU_DEFAULT_THREADS: usize = 8192;

/// Algorithm version
pub const VERSION: u8 = 3;

/// Convert a byte count to whole megabytes
pub fn to_megabytes(memory: usize) -> usize {
    memory / (1024 * 1024)
}

/// Bytes needed to hold `entries` table entries
pub fn entries_to_memory(entries: usize) -> usize {
    entries * ENTRY_SIZE
}

/// Number of table entries that fit in `memory` bytes
pub fn memory_to_entries(memory: usize) -> usize {
    memory / ENTRY_SIZE
}

/// Number of entries for a lookup scale of `lookup` (2^lookup)
pub fn lookup_to_entries(lookup: u32) -> usize {
    1usize << lookup
}
