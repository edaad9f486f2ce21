//! Resizable worker pool with a start/finish barrier
//!
//! Every worker runs the same operation `op(thread_id, total_threads)` once
//! per dispatch. The owner dispatches with [`ThreadPool::execute`] and waits
//! for all workers to return to idle with [`ThreadPool::barrier`]. The mutex
//! only guards dispatch bookkeeping; the work itself runs unlocked.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error, warn};

pub type Operation = Arc<dyn Fn(usize, usize) + Send + Sync>;

struct State {
    /// Requested number of workers; ids at or above this exit
    workers: usize,
    /// Workers currently parked waiting for a dispatch
    ready: usize,
    /// Bumped on every dispatch
    generation: u64,
    operation: Option<Operation>,
}

struct Shared {
    state: Mutex<State>,
    start: Condvar,
    finish: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ThreadPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(threads: usize) -> Self {
        let mut pool = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    workers: 0,
                    ready: 0,
                    generation: 0,
                    operation: None,
                }),
                start: Condvar::new(),
                finish: Condvar::new(),
            }),
            handles: Vec::new(),
        };
        pool.resize(threads);
        pool
    }

    /// Number of workers
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Dispatch `operation` to every worker
    ///
    /// Waits for the previous dispatch to drain first. With no workers the
    /// operation runs inline on the caller as thread 0 of 1.
    pub fn execute<F>(&self, operation: F)
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.barrier();
        if self.handles.is_empty() {
            operation(0, 1);
            return;
        }

        let mut state = self.shared.lock();
        state.operation = Some(Arc::new(operation));
        state.ready = 0;
        state.generation = state.generation.wrapping_add(1);
        self.shared.start.notify_all();
    }

    /// Block until every worker is idle
    ///
    /// Drops the last dispatched operation so anything it captured is freed.
    pub fn barrier(&self) {
        let state = self.shared.lock();
        let mut state = self
            .shared
            .finish
            .wait_while(state, |state| state.ready < state.workers)
            .unwrap_or_else(PoisonError::into_inner);
        state.operation = None;
    }

    /// Grow or shrink the pool to `threads` workers
    ///
    /// Drains in-flight work before changing size, and returns once every
    /// remaining worker is parked.
    pub fn resize(&mut self, threads: usize) {
        self.barrier();
        let current = self.handles.len();

        if threads > current {
            let generation = {
                let mut state = self.shared.lock();
                state.workers = threads;
                state.generation
            };
            for id in current..threads {
                let shared = Arc::clone(&self.shared);
                let spawned = thread::Builder::new()
                    .name(format!("nano-pow-worker-{}", id))
                    .spawn(move || worker(shared, id, generation));
                match spawned {
                    Ok(handle) => self.handles.push(handle),
                    Err(err) => {
                        warn!("Failed to spawn worker {}: {}", id, err);
                        self.shared.lock().workers = self.handles.len();
                        break;
                    }
                }
            }
        } else if threads < current {
            {
                let mut state = self.shared.lock();
                state.workers = threads;
                self.shared.start.notify_all();
            }
            for handle in self.handles.drain(threads..) {
                if handle.join().is_err() {
                    error!("Worker thread panicked during shutdown");
                }
            }
        }

        self.barrier();
        debug!("Thread pool resized from {} to {} workers", current, self.handles.len());
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.resize(0);
    }
}

fn worker(shared: Arc<Shared>, id: usize, mut seen: u64) {
    let mut state = shared.lock();
    loop {
        state.ready += 1;
        shared.finish.notify_all();

        state = shared
            .start
            .wait_while(state, |state| state.generation == seen && id < state.workers)
            .unwrap_or_else(PoisonError::into_inner);

        if id >= state.workers {
            state.ready -= 1;
            shared.finish.notify_all();
            return;
        }

        seen = state.generation;
        let operation = state.operation.clone();
        let total = state.workers;
        drop(state);

        if let Some(operation) = operation {
            if catch_unwind(AssertUnwindSafe(|| operation(id, total))).is_err() {
                error!("Worker {} panicked while running an operation", id);
            }
        }

        state = shared.lock();
    }
}
