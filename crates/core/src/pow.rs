//! Nano PoW numeric core
//!
//! A solution is a pair `(lhs, rhs)` whose keyed digests sum to a value that,
//! complemented and bit-reversed, exceeds the difficulty threshold:
//!
//! ```text
//! sum        = H0(nonce, lhs) + H1(nonce, rhs)          (mod 2^128)
//! difficulty = reverse(!sum)
//! passes     = difficulty > threshold
//! ```
//!
//! `H0` and `H1` are SipHash-2-4 keyed by the nonce with bit 63 of the first
//! key word forced set (`H0`) or clear (`H1`), so the two sides never share a
//! hash domain. Everything here is a pure function and is what an external
//! validator needs.

use crate::error::{Error, Result};
use crate::params::{MAX_LHS, MAX_RHS};
use crate::primitives::{reverse_128, siphash24_128_u64};

/// 128-bit seed that keys one proof-of-work instance
pub type Nonce = [u64; 2];

/// Bit forced set in the first key word for `H0`, and clear for `H1`
const DOMAIN_BIT: u64 = 1 << 63;

/// A candidate or final proof-of-work solution
///
/// `lhs` is a 32-bit slab pre-image and `rhs` a 48-bit search candidate.
/// A zero `rhs` is never produced by a search and marks "no solution".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Solution {
    pub lhs: u64,
    pub rhs: u64,
}

impl Solution {
    /// The empty solution returned by a cancelled solve
    pub const EMPTY: Solution = Solution { lhs: 0, rhs: 0 };

    pub const fn new(lhs: u64, rhs: u64) -> Self {
        Self { lhs, rhs }
    }

    /// True if this is the "no solution" marker
    pub const fn is_empty(&self) -> bool {
        self.rhs == 0
    }

    /// True if both halves are within their packed widths
    pub const fn in_range(&self) -> bool {
        self.lhs <= MAX_LHS && self.rhs <= MAX_RHS
    }
}

impl From<[u64; 2]> for Solution {
    fn from(value: [u64; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<Solution> for [u64; 2] {
    fn from(value: Solution) -> Self {
        [value.lhs, value.rhs]
    }
}

/// Key used by `H0`: the nonce with its domain bit set
#[inline(always)]
pub fn lhs_key(nonce: Nonce) -> [u64; 2] {
    [nonce[0] | DOMAIN_BIT, nonce[1]]
}

/// Key used by `H1`: the nonce with its domain bit cleared
#[inline(always)]
pub fn rhs_key(nonce: Nonce) -> [u64; 2] {
    [nonce[0] & !DOMAIN_BIT, nonce[1]]
}

/// Keyed 128-bit digest of `item`
#[inline(always)]
pub fn hash(key: [u64; 2], item: u64) -> u128 {
    siphash24_128_u64(key, item)
}

/// Hash function H0 (left-hand side, domain bit set)
#[inline(always)]
pub fn h0(nonce: Nonce, item: u64) -> u128 {
    hash(lhs_key(nonce), item)
}

/// Hash function H1 (right-hand side, domain bit cleared)
#[inline(always)]
pub fn h1(nonce: Nonce, item: u64) -> u128 {
    hash(rhs_key(nonce), item)
}

/// Digest sum of a solution
#[inline(always)]
pub fn sum(nonce: Nonce, solution: Solution) -> u128 {
    h0(nonce, solution.lhs).wrapping_add(h1(nonce, solution.rhs))
}

/// Reverse the bit order of a 128-bit value
#[inline(always)]
pub fn reverse(item: u128) -> u128 {
    reverse_128(item)
}

/// Threshold requiring `bits` leading one bits of difficulty
///
/// # Panics
///
/// Panics unless `0 < bits < 128`. Use [`try_bit_difficulty`] for
/// caller-supplied values.
pub fn bit_difficulty(bits: u32) -> u128 {
    assert!(
        bits > 0 && bits < 128,
        "Difficulty must be greater than 0 and less than 128"
    );
    reverse((1u128 << bits) - 1)
}

/// 64-bit flavoured threshold: `bits` of difficulty beyond the implicit 32
///
/// # Panics
///
/// Panics unless `0 < bits < 64`.
pub fn bit_difficulty_64(bits: u32) -> u128 {
    assert!(
        bits > 0 && bits < 64,
        "Difficulty must be greater than 0 and less than 64"
    );
    bit_difficulty(bits + 32)
}

/// Checked form of [`bit_difficulty`]
pub fn try_bit_difficulty(bits: u32) -> Result<u128> {
    if bits == 0 || bits >= 128 {
        return Err(Error::InvalidDifficultyBits { bits, max: 128 });
    }
    Ok(bit_difficulty(bits))
}

/// Checked form of [`bit_difficulty_64`]
pub fn try_bit_difficulty_64(bits: u32) -> Result<u128> {
    if bits == 0 || bits >= 64 {
        return Err(Error::InvalidDifficultyBits { bits, max: 64 });
    }
    Ok(bit_difficulty_64(bits))
}

/// Score of a solution; larger is harder
pub fn difficulty(nonce: Nonce, solution: Solution) -> u128 {
    reverse(!sum(nonce, solution))
}

/// Widen a 64-bit difficulty: the top 32 bits are implied ones
pub fn difficulty_64_to_128(difficulty: u64) -> u128 {
    (0xffff_ffffu128 << 96) | ((difficulty as u128) << 32)
}

/// Narrow a 128-bit difficulty to its 64-bit form
pub fn difficulty_128_to_64(difficulty: u128) -> u64 {
    (difficulty >> 32) as u64
}

/// Exact threshold test on a precomputed digest sum
#[inline(always)]
pub fn passes_sum(sum: u128, threshold: u128) -> bool {
    reverse(!sum) > threshold
}

/// Cheap necessary condition for [`passes_sum`]: the masked low bits are zero
#[inline(always)]
pub fn passes_quick(sum: u128, mask: u128) -> bool {
    sum & mask == 0
}

/// Pre-filter mask for a given `difficulty_inv`
///
/// The trailing run of ones of `difficulty_inv` (the leading ones of the
/// threshold). For thresholds built by [`bit_difficulty`] this is
/// `difficulty_inv` itself; for arbitrary thresholds it shrinks towards
/// zero, where the quick test always passes and the exact test decides.
pub fn quick_mask(difficulty_inv: u128) -> u128 {
    difficulty_inv & !difficulty_inv.wrapping_add(1)
}

/// Validate a solution against a 128-bit threshold
///
/// Solutions outside the 32/48-bit packing are rejected.
pub fn passes(nonce: Nonce, solution: Solution, difficulty: u128) -> bool {
    solution.in_range() && passes_sum(sum(nonce, solution), difficulty)
}

/// Validate a solution against a 64-bit threshold
pub fn passes_64(nonce: Nonce, solution: Solution, difficulty: u64) -> bool {
    passes(nonce, solution, difficulty_64_to_128(difficulty))
}

/// Map `item` to a slot of a power-of-two sized table
#[inline(always)]
pub fn slot(size: u64, item: u64) -> u64 {
    let mask = size.wrapping_sub(1);
    debug_assert!(size & mask == 0, "Slab size is not a power of 2");
    item & mask
}

/// Number of pre-images one fill round writes
///
/// When the table is large enough that `size^2` covers the inverse
/// difficulty, one pass over the table suffices. Smaller tables are churned
/// three times over so search sees more distinct pre-images.
pub fn fill_count(size: u64, difficulty_inv: u128) -> u64 {
    let low_fill = size.min(u32::MAX as u64 / 3) * 3;
    let critical = (size as u128) * (size as u128) >= difficulty_inv.saturating_add(1);
    if critical { size } else { low_fill }
}
