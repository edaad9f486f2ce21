//! # Nano PoW Core
//!
//! A memory-bound proof-of-work engine. Given a 128-bit nonce, find a pair
//! `(lhs, rhs)` whose keyed digests sum to a value that, complemented and
//! bit-reversed, exceeds a difficulty threshold. Solving needs a large lookup
//! table; validating a solution is two hashes.
//!
//! ## Algorithm
//!
//! ```text
//! fill:   slab[H0(x) mod N] = x                    for a range of 32-bit x
//! search: lhs = slab[-H1(rhs) mod N]               for 48-bit candidates rhs
//!         passes if reverse(!(H0(lhs) + H1(rhs))) > difficulty
//! ```
//!
//! `H0`/`H1` are SipHash-2-4 (128-bit output) keyed by the nonce with a
//! domain bit set or cleared. The table is a single-slot hash map: collisions
//! overwrite, which only costs missed candidates.
//!
//! ## Drivers
//!
//! - [`CpuDriver`]: native worker threads, cooperative cursor/ticket
//!   scheduling by default, or phased fill-then-search
//! - `GpuDriver` (feature `gpu`): wgpu compute kernels
//!
//! ## Example
//!
//! ```rust,no_run
//! use nano_pow_core::{CpuDriver, Driver, bit_difficulty, passes};
//!
//! let mut driver = CpuDriver::new();
//! driver.difficulty_set(bit_difficulty(16));
//! driver.memory_set(1 << 20).unwrap();
//!
//! let nonce = [0x0123_4567_89ab_cdef, 0xfedc_ba98_7654_3210];
//! let solution = driver.solve(nonce).unwrap();
//! assert!(passes(nonce, solution, bit_difficulty(16)));
//! ```

mod cpu_driver;
mod driver;
mod engine;
mod error;
mod generator;
mod params;
mod pow;
mod primitives;
mod prng;
mod slab;
mod thread_pool;

#[cfg(feature = "gpu")]
mod gpu;

pub mod ffi;

pub use cpu_driver::{CpuDriver, SolveStrategy};
pub use driver::{CancelHandle, Driver, DriverKind, default_difficulty, solve_phased};
pub use engine::{SearchContext, fill_shard};
pub use error::{Error, ErrorCategory, GpuPhase, Result};
pub use generator::Generator;
pub use params::*;
pub use pow::*;
pub use primitives::{reverse_64, reverse_128, siphash24_64, siphash24_128, siphash24_128_u64};
pub use prng::Xoroshiro128StarStar;
pub use slab::Slab;
pub use thread_pool::ThreadPool;

#[cfg(feature = "gpu")]
pub use gpu::{GpuDriver, adapters};

#[cfg(test)]
mod tests;
