//! CPU driver
//!
//! Runs fill and search on a [`ThreadPool`] of native threads sharing one
//! [`Slab`]. Two scheduling strategies are available:
//!
//! - [`SolveStrategy::Cooperative`]: every worker runs the cursor/ticket loop
//!   of [`Generator::find`], filling its shard whenever the fill epoch
//!   advances and searching sequential quanta in between.
//! - [`SolveStrategy::Phased`]: the generic loop of [`solve_phased`], one pool
//!   dispatch to fill a slice of the table, one to search it with
//!   per-thread pseudorandom candidates.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use log::{debug, info, warn};

use crate::driver::{CancelHandle, Driver, DriverKind, default_difficulty, solve_phased};
use crate::engine::SearchContext;
use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::params::{STEPPING, to_megabytes};
use crate::pow::{Nonce, Solution, fill_count, passes, reverse};
use crate::prng::Xoroshiro128StarStar;
use crate::slab::Slab;
use crate::thread_pool::ThreadPool;

/// How a [`CpuDriver`] schedules fill and search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SolveStrategy {
    #[default]
    Cooperative,
    Phased,
}

impl std::fmt::Display for SolveStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveStrategy::Cooperative => f.write_str("cooperative"),
            SolveStrategy::Phased => f.write_str("phased"),
        }
    }
}

pub struct CpuDriver {
    pool: ThreadPool,
    slab: Option<Arc<Slab>>,
    difficulty: u128,
    nonce: Nonce,
    strategy: SolveStrategy,
    generator: Arc<Generator>,
    /// Next unfilled pre-image for the phased strategy
    fill_cursor: Arc<AtomicU64>,
    ticket: u64,
    cancel: CancelHandle,
}

impl CpuDriver {
    /// Driver with one worker per logical CPU
    pub fn new() -> Self {
        Self::with_threads(num_cpus::get())
    }

    /// Driver with `threads` workers; zero runs all work on the caller
    pub fn with_threads(threads: usize) -> Self {
        Self {
            pool: ThreadPool::new(threads),
            slab: None,
            difficulty: default_difficulty(),
            nonce: [0, 0],
            strategy: SolveStrategy::default(),
            generator: Arc::new(Generator::new()),
            fill_cursor: Arc::new(AtomicU64::new(0)),
            ticket: 0,
            cancel: CancelHandle::new(),
        }
    }

    pub fn strategy_set(&mut self, strategy: SolveStrategy) {
        self.strategy = strategy;
    }

    pub fn strategy_get(&self) -> SolveStrategy {
        self.strategy
    }

    /// Release the lookup table
    pub fn memory_reset(&mut self) {
        self.slab = None;
    }

    fn slab(&self) -> Result<Arc<Slab>> {
        self.slab.clone().ok_or(Error::NoMemory)
    }

    fn budget(&self, slab: &Slab) -> u64 {
        fill_count(slab.size(), reverse(self.difficulty))
    }

    /// Cursor/ticket solve: all workers fill and search in one dispatch
    fn solve_cooperative(&mut self, nonce: Nonce) -> Result<Solution> {
        self.cancel.reset();
        self.prepare(nonce);
        let slab = self.slab()?;
        let budget = self.budget(&slab);
        let difficulty = self.difficulty;

        loop {
            if self.cancel.is_cancelled() {
                debug!("Solve cancelled");
                return Ok(Solution::EMPTY);
            }

            let start = Instant::now();
            let ticket = self.ticket;
            let generator = Arc::clone(&self.generator);
            let cancel = self.cancel.flag();
            let shared = Arc::clone(&slab);
            self.pool.execute(move |thread, total| {
                let context = SearchContext::new(&shared, nonce, difficulty);
                generator.find(&context, budget, ticket, thread, total, &cancel);
            });
            self.pool.barrier();

            let solution = self.generator.result(ticket);
            self.ticket = self.generator.ticket();
            if solution.is_empty() {
                continue;
            }
            debug!(
                "Solved in {} ms (cursor {:#x})",
                start.elapsed().as_millis(),
                self.generator.cursor()
            );
            if passes(nonce, solution, difficulty) {
                return Ok(solution);
            }
            warn!(
                "Discarding candidate lhs={:#x} rhs={:#x} that fails validation",
                solution.lhs, solution.rhs
            );
        }
    }
}

impl Default for CpuDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for CpuDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Cpu
    }

    fn difficulty_set(&mut self, difficulty: u128) {
        self.difficulty = difficulty;
    }

    fn difficulty_get(&self) -> u128 {
        self.difficulty
    }

    fn threads_set(&mut self, threads: usize) {
        self.pool.resize(threads);
    }

    fn threads_get(&self) -> usize {
        self.pool.len()
    }

    fn memory_set(&mut self, bytes: usize) -> Result<()> {
        Slab::validate(bytes)?;
        self.slab = None;
        match Slab::allocate(bytes) {
            Ok(slab) => {
                info!("Memory set to {} MB ({} entries)", to_megabytes(bytes), slab.size());
                self.slab = Some(Arc::new(slab));
                Ok(())
            }
            Err(err) => {
                warn!("Error while creating memory buffer: {}", err);
                Err(err)
            }
        }
    }

    fn memory_get(&self) -> usize {
        self.slab.as_ref().map_or(0, |slab| slab.memory())
    }

    fn prepare(&mut self, nonce: Nonce) {
        self.nonce = nonce;
        self.ticket = self.generator.reset();
        self.fill_cursor.store(0, Ordering::Relaxed);
    }

    fn fill(&mut self) -> Result<()> {
        let slab = self.slab()?;
        let budget = self.budget(&slab);
        let nonce = self.nonce;
        let difficulty = self.difficulty;
        let cursor = Arc::clone(&self.fill_cursor);
        let cancel = self.cancel.flag();

        let start = Instant::now();
        self.pool.execute(move |thread, total| {
            let total = total as u64;
            let mut share = budget / total;
            if thread as u64 + 1 == total {
                share += budget % total;
            }
            let begin = cursor.fetch_add(share, Ordering::Relaxed);
            let context = SearchContext::new(&slab, nonce, difficulty);
            context.fill(begin as u32, share, &cancel);
        });
        self.pool.barrier();
        debug!("Filled {} items in {} ms", budget, start.elapsed().as_millis());
        Ok(())
    }

    fn search(&mut self) -> Result<Solution> {
        let slab = self.slab()?;
        let nonce = self.nonce;
        let difficulty = self.difficulty;
        let ticket = self.ticket;
        let generator = Arc::clone(&self.generator);
        let cancel = self.cancel.flag();

        let start = Instant::now();
        self.pool.execute(move |thread, _| {
            let context = SearchContext::new(&slab, nonce, difficulty);
            let mut rng = Xoroshiro128StarStar::for_thread(thread);
            while generator.ticket() == ticket && !cancel.load(Ordering::Relaxed) {
                if let Some(solution) = context.search_random(&mut rng, STEPPING) {
                    generator.commit(ticket, solution);
                }
            }
        });
        self.pool.barrier();
        debug!("Searched in {} ms", start.elapsed().as_millis());

        let solution = self.generator.result(ticket);
        self.ticket = self.generator.ticket();
        Ok(solution)
    }

    fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Hardware threads: {}", num_cpus::get());
        let _ = writeln!(out, "Physical cores: {}", num_cpus::get_physical());
        let _ = writeln!(out, "Worker threads: {}", self.pool.len());
        let _ = writeln!(out, "Strategy: {}", self.strategy);
        let _ = write!(out, "Memory: {} MB", to_megabytes(self.memory_get()));
        out
    }

    fn recommended_threads(&self) -> usize {
        num_cpus::get()
    }

    fn solve(&mut self, nonce: Nonce) -> Result<Solution> {
        match self.strategy {
            SolveStrategy::Cooperative => self.solve_cooperative(nonce),
            SolveStrategy::Phased => solve_phased(self, nonce),
        }
    }
}
