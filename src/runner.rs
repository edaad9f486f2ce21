//! Deadline-bounded solving
//!
//! `Driver::solve` blocks its caller. The runner moves the driver onto a
//! blocking task and races it against a timer; when the timer wins the solve
//! is cancelled through its [`CancelHandle`](crate::algorithm::CancelHandle)
//! and the empty solution comes back with the driver.

use std::time::{Duration, Instant};

use anyhow::Context;
use log::{debug, warn};

use crate::algorithm::{Driver, Nonce, Solution};

const RECANCEL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of one bounded solve
pub struct Solved {
    pub driver: Box<dyn Driver>,
    pub solution: Solution,
    pub elapsed: Duration,
}

/// Solve `nonce`, cancelling after `deadline` if one is given
pub fn solve_with_deadline(
    driver: Box<dyn Driver>,
    nonce: Nonce,
    deadline: Option<Duration>,
) -> anyhow::Result<Solved> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("Failed to start solver runtime")?;
    let cancel = driver.cancel_handle();

    runtime.block_on(async move {
        let start = Instant::now();
        let mut driver = driver;
        let mut task = tokio::task::spawn_blocking(move || {
            let result = driver.solve(nonce);
            (driver, result)
        });

        let joined = match deadline {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("No solution within {:?}, cancelling", limit);
                    // solve() clears the flag on entry, keep signalling until it returns
                    loop {
                        cancel.cancel();
                        if let Ok(joined) = tokio::time::timeout(RECANCEL_INTERVAL, &mut task).await {
                            break joined;
                        }
                    }
                }
            },
            None => task.await,
        };

        let (driver, result) = joined.context("Solver task panicked")?;
        let solution = result?;
        let elapsed = start.elapsed();
        debug!("Solve finished in {} ms", elapsed.as_millis());
        Ok::<_, anyhow::Error>(Solved {
            driver,
            solution,
            elapsed,
        })
    })
}
