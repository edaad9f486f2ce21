//! Timed solve and validation loops

use std::hint::black_box;
use std::time::Instant;

use log::info;
use serde::Serialize;

use crate::algorithm::{self, Driver, Solution, passes_64};
use crate::work::SolutionReport;

/// Validation profiling never runs fewer iterations than this from the CLI
pub const VALIDATION_MIN_COUNT: u64 = 10_000_000;

/// 64-bit threshold used by the validation loop
pub const VALIDATION_DIFFICULTY: u64 = 0xffff_ffc0_0000_0000;

#[derive(Debug, Clone, Serialize)]
pub struct ProfileReport {
    pub driver: String,
    pub threads: usize,
    pub memory_mb: usize,
    pub difficulty: String,
    pub samples: Vec<SolutionReport>,
    pub average_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub count: u64,
    pub average_ns: u64,
    pub per_second: u64,
}

/// Solve `count` problems with nonces `{1, 0}`, `{2, 0}`, ...
///
/// `observe` sees each sample as it completes.
pub fn profile(
    driver: &mut dyn Driver,
    count: u32,
    mut observe: impl FnMut(&SolutionReport),
) -> algorithm::Result<ProfileReport> {
    let threshold = driver.difficulty_get();
    info!(
        "Profiling {} threads, {} MB, difficulty {:032x}",
        driver.threads_get(),
        algorithm::to_megabytes(driver.memory_get()),
        threshold
    );

    let mut samples = Vec::with_capacity(count as usize);
    let mut total_ms = 0u64;
    for i in 0..count as u64 {
        let nonce = [i + 1, 0];
        let start = Instant::now();
        let solution = driver.solve(nonce)?;
        let millis = start.elapsed().as_millis() as u64;
        total_ms += millis;

        let sample = SolutionReport::new(nonce, solution, threshold, Some(millis));
        observe(&sample);
        samples.push(sample);
    }

    Ok(ProfileReport {
        driver: driver.kind().to_string(),
        threads: driver.threads_get(),
        memory_mb: algorithm::to_megabytes(driver.memory_get()),
        difficulty: format!("{:032x}", threshold),
        samples,
        average_ms: total_ms.checked_div(count as u64).unwrap_or(0),
    })
}

/// Time `count` validations against a fixed nonce and threshold
pub fn profile_validation(count: u64) -> ValidationReport {
    let nonce = [0, 0];
    let start = Instant::now();
    let mut valid = false;
    for i in 0..count {
        valid = passes_64(black_box(nonce), Solution::new(i, i), VALIDATION_DIFFICULTY);
    }
    black_box(valid);
    let total_ns = (start.elapsed().as_nanos() as u64).max(1);

    ValidationReport {
        count,
        average_ns: total_ns.checked_div(count).unwrap_or(0),
        per_second: (count as u128 * 1_000_000_000 / total_ns as u128) as u64,
    }
}
