//! Cooperative work distribution
//!
//! Workers share one 64-bit cursor. The high half is the fill epoch and the
//! low half the search offset; each `fetch_add(STEPPING)` hands a worker a
//! disjoint quantum of right-hand sides. The first time a worker sees a new
//! epoch it fills its shard of that epoch before searching.
//!
//! A monotonic ticket identifies the job. A worker that finds a candidate
//! commits it only if it can move the ticket from the value it started with,
//! so exactly one result is recorded per job and every other worker notices
//! the change and leaves its loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{debug, trace};

use crate::engine::{SearchContext, fill_shard};
use crate::params::STEPPING;
use crate::pow::Solution;

#[derive(Debug, Default)]
pub struct Generator {
    cursor: AtomicU64,
    ticket: AtomicU64,
    lhs: AtomicU64,
    rhs: AtomicU64,
}

impl Generator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare for a new job and return its ticket
    ///
    /// The ticket itself is never reset; only the cursor and the result.
    pub fn reset(&self) -> u64 {
        self.cursor.store(0, Ordering::Relaxed);
        self.lhs.store(0, Ordering::Relaxed);
        self.rhs.store(0, Ordering::Relaxed);
        self.ticket.load(Ordering::Acquire)
    }

    pub fn ticket(&self) -> u64 {
        self.ticket.load(Ordering::Acquire)
    }

    /// Current cursor value (fill epoch in the high half)
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Try to record `solution` as the winner of job `ticket`
    pub fn commit(&self, ticket: u64, solution: Solution) -> bool {
        let won = self
            .ticket
            .compare_exchange(ticket, ticket.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.lhs.store(solution.lhs, Ordering::Release);
            self.rhs.store(solution.rhs, Ordering::Release);
        }
        won
    }

    /// Result of job `ticket`, or the empty solution if nobody won it
    pub fn result(&self, ticket: u64) -> Solution {
        if self.ticket() == ticket {
            return Solution::EMPTY;
        }
        Solution::new(
            self.lhs.load(Ordering::Acquire),
            self.rhs.load(Ordering::Acquire),
        )
    }

    /// Worker loop for job `ticket`
    ///
    /// Runs until some worker commits a result or `cancel` is raised.
    /// Returns true if this worker committed the result.
    pub fn find(
        &self,
        context: &SearchContext<'_>,
        budget: u64,
        ticket: u64,
        thread: usize,
        total: usize,
        cancel: &AtomicBool,
    ) -> bool {
        let mut last_epoch: Option<u64> = None;
        let mut found = false;

        while self.ticket() == ticket && !cancel.load(Ordering::Relaxed) {
            let current = self.cursor.fetch_add(STEPPING, Ordering::Relaxed);
            let epoch = current >> 32;
            if last_epoch != Some(epoch) {
                last_epoch = Some(epoch);
                let (begin, count) = fill_shard(epoch, thread, total, budget);
                trace!(
                    "thread {} filling epoch {} from {:#010x} ({} items)",
                    thread, epoch, begin, count
                );
                if !context.fill(begin, count, cancel) {
                    break;
                }
            }

            if let Some(solution) = context.search(current, STEPPING) {
                if self.commit(ticket, solution) {
                    debug!(
                        "thread {} committed lhs={:#x} rhs={:#x}",
                        thread, solution.lhs, solution.rhs
                    );
                    found = true;
                }
            }
        }
        found
    }
}
