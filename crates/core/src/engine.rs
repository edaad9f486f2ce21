//! Fill and search kernels for the CPU driver
//!
//! A [`SearchContext`] captures everything one solve needs (keys, thresholds
//! and the shared table) so worker closures can run the inner loops without
//! touching driver state.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::params::{MAX_RHS, STEPPING};
use crate::pow::{
    Nonce, Solution, hash, lhs_key, passes_quick, passes_sum, quick_mask, reverse, rhs_key, slot,
};
use crate::prng::Xoroshiro128StarStar;
use crate::slab::Slab;

pub struct SearchContext<'a> {
    lhs_key: [u64; 2],
    rhs_key: [u64; 2],
    difficulty: u128,
    mask: u128,
    slab: &'a Slab,
}

impl<'a> SearchContext<'a> {
    pub fn new(slab: &'a Slab, nonce: Nonce, difficulty: u128) -> Self {
        Self {
            lhs_key: lhs_key(nonce),
            rhs_key: rhs_key(nonce),
            difficulty,
            mask: quick_mask(reverse(difficulty)),
            slab,
        }
    }

    /// Write `count` pre-images starting at `begin` into the table
    ///
    /// Items are 32-bit and wrap. Cancellation is polled once per
    /// [`STEPPING`] items; returns false if the fill stopped early.
    pub fn fill(&self, begin: u32, count: u64, cancel: &AtomicBool) -> bool {
        let size = self.slab.size();
        let mut done = 0u64;
        while done < count {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            let end = count.min(done + STEPPING);
            for i in done..end {
                let item = begin.wrapping_add(i as u32);
                let digest = hash(self.lhs_key, item as u64);
                self.slab.store(slot(size, digest as u64), item);
            }
            done = end;
        }
        true
    }

    /// Probe the table with one right-hand side
    ///
    /// The candidate `lhs` sits in the slot that cancels the low bits of
    /// `H1(rhs)`, so `H0(lhs) + H1(rhs)` is zero modulo the table size.
    #[inline(always)]
    pub fn probe(&self, rhs: u64) -> Option<Solution> {
        let h1 = hash(self.rhs_key, rhs);
        let lhs = self.slab.load(slot(self.slab.size(), 0u64.wrapping_sub(h1 as u64))) as u64;
        let sum = hash(self.lhs_key, lhs).wrapping_add(h1);
        if passes_quick(sum, self.mask) && passes_sum(sum, self.difficulty) {
            Some(Solution::new(lhs, rhs))
        } else {
            None
        }
    }

    /// Probe `count` consecutive right-hand sides starting at `begin`
    ///
    /// Candidates are truncated to 48 bits; zero is skipped since it marks
    /// the empty solution.
    pub fn search(&self, begin: u64, count: u64) -> Option<Solution> {
        for i in 0..count {
            let rhs = begin.wrapping_add(i) & MAX_RHS;
            if rhs == 0 {
                continue;
            }
            if let Some(solution) = self.probe(rhs) {
                return Some(solution);
            }
        }
        None
    }

    /// Probe `count` right-hand sides drawn from `rng`
    pub fn search_random(&self, rng: &mut Xoroshiro128StarStar, count: u64) -> Option<Solution> {
        for _ in 0..count {
            let rhs = rng.next() & MAX_RHS;
            if rhs == 0 {
                continue;
            }
            if let Some(solution) = self.probe(rhs) {
                return Some(solution);
            }
        }
        None
    }
}

/// Slice of fill epoch `epoch` owned by `thread` out of `total`
///
/// The epoch covers `[epoch * budget, epoch * budget + budget)` in 32-bit
/// wrapping item space. Each thread gets `budget / total` items and the last
/// thread also takes the remainder, so the slices tile the epoch exactly.
pub fn fill_shard(epoch: u64, thread: usize, total: usize, budget: u64) -> (u32, u64) {
    let total = total.max(1) as u64;
    let thread = thread as u64;
    let base = budget / total;
    let begin = epoch
        .wrapping_mul(budget)
        .wrapping_add(thread.wrapping_mul(base)) as u32;
    let count = if thread + 1 == total {
        base + budget % total
    } else {
        base
    };
    (begin, count)
}
