//! Nano PoW Prover Library
//!
//! Front end for the memory-bound proof-of-work engine: file-backed
//! settings, driver construction, deadline-bounded solving and the
//! profiling loops used by the `nano-pow` binary.
//!
//! # Example
//!
//! ```rust,no_run
//! use nano_pow::config::ProverConfig;
//! use nano_pow::work::{format_nonce, random_nonce};
//!
//! let config = ProverConfig {
//!     difficulty_bits: 24,
//!     ..ProverConfig::default()
//! };
//! let mut driver = config.build_driver().unwrap();
//! let nonce = random_nonce().unwrap();
//! let solution = driver.solve(nonce).unwrap();
//! println!("{} -> {:x?}", format_nonce(nonce), solution);
//! ```

// Re-export the core algorithm
pub use nano_pow_core as algorithm;

pub mod config;
pub mod profile;
pub mod runner;
pub mod work;

// Convenience re-exports
pub use algorithm::{Driver, Nonce, Solution, passes};
