//! Driver interface shared by the CPU and GPU-offload backends
//!
//! A driver owns the lookup table and its workers and exposes the engine
//! synchronously. Backends supply the `fill` and `search` primitives; the
//! default [`Driver::solve`] loops over them until a solution is found or the
//! job is cancelled.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};

use crate::error::Result;
use crate::params::{DEFAULT_DIFFICULTY_BITS, MAX_LOOKUP};
use crate::pow::{Nonce, Solution, bit_difficulty, difficulty_64_to_128, difficulty_128_to_64, passes};

/// Backend family of a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Cpu,
    Gpu,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Cpu => f.write_str("cpu"),
            DriverKind::Gpu => f.write_str("gpu"),
        }
    }
}

/// Cloneable handle that cancels the running solve of one driver
///
/// Cancellation is cooperative: workers poll the flag between work quanta,
/// so `solve` returns the empty solution shortly after [`cancel`] is called.
///
/// [`cancel`]: CancelHandle::cancel
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub(crate) fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// Threshold a driver starts with
pub fn default_difficulty() -> u128 {
    bit_difficulty(DEFAULT_DIFFICULTY_BITS)
}

pub trait Driver: Send {
    fn kind(&self) -> DriverKind;

    /// Set the 128-bit threshold; solutions must score strictly above it
    fn difficulty_set(&mut self, difficulty: u128);

    fn difficulty_get(&self) -> u128;

    fn difficulty_set_64(&mut self, difficulty: u64) {
        self.difficulty_set(difficulty_64_to_128(difficulty));
    }

    fn difficulty_get_64(&self) -> u64 {
        difficulty_128_to_64(self.difficulty_get())
    }

    /// Resize the worker set; for the GPU driver this is the global work size
    fn threads_set(&mut self, threads: usize);

    fn threads_get(&self) -> usize;

    /// Replace the lookup table with one of `bytes` bytes
    ///
    /// The size must be a non-zero power of two. On a configuration error
    /// the previous table is kept.
    fn memory_set(&mut self, bytes: usize) -> Result<()>;

    /// Size of the current table in bytes (0 if none)
    fn memory_get(&self) -> usize;

    /// Record `nonce` and reset per-solve state
    fn prepare(&mut self, nonce: Nonce);

    /// Populate the next slice of the table
    fn fill(&mut self) -> Result<()>;

    /// Search the table; the empty solution means "try again" or "cancelled"
    fn search(&mut self) -> Result<Solution>;

    fn cancel_handle(&self) -> CancelHandle;

    /// Request cancellation of the running solve
    fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    /// Human-readable description of the backend and its hardware
    fn dump(&self) -> String;

    /// Worker count this backend runs best with
    fn recommended_threads(&self) -> usize;

    /// Lookup scale (log2 of entries) suited to `difficulty_bits` leading one bits
    ///
    /// Any bit count is accepted; the result is clamped to `1..=MAX_LOOKUP`.
    fn recommended_lookup(&self, difficulty_bits: u32) -> u32 {
        let lookup = match self.kind() {
            DriverKind::Cpu => difficulty_bits / 2,
            DriverKind::Gpu => difficulty_bits / 2 + 1,
        };
        lookup.clamp(1, MAX_LOOKUP)
    }

    /// Find a solution for `nonce` at the configured difficulty
    ///
    /// Alternates `fill` and `search` until a candidate appears. Candidates
    /// are re-checked against the exact threshold before they are returned;
    /// a cancelled solve returns [`Solution::EMPTY`].
    fn solve(&mut self, nonce: Nonce) -> Result<Solution> {
        solve_phased(self, nonce)
    }
}

/// Generic fill-then-search loop behind [`Driver::solve`]
///
/// Exposed so backends that override `solve` can still fall back to it.
pub fn solve_phased<D: Driver + ?Sized>(driver: &mut D, nonce: Nonce) -> Result<Solution> {
    let cancel = driver.cancel_handle();
    cancel.reset();
    driver.prepare(nonce);

    loop {
        if cancel.is_cancelled() {
            debug!("Solve cancelled");
            return Ok(Solution::EMPTY);
        }
        driver.fill()?;
        let solution = driver.search()?;
        if solution.is_empty() {
            continue;
        }
        if passes(nonce, solution, driver.difficulty_get()) {
            return Ok(solution);
        }
        warn!(
            "Discarding candidate lhs={:#x} rhs={:#x} that fails validation",
            solution.lhs, solution.rhs
        );
    }
}
