//! Nano PoW CLI
//!
//! # Commands
//!
//! - `solve` - Solve one nonce (given or random)
//! - `validate` - Check a solution against a nonce
//! - `profile` - Time a series of solves
//! - `profile-validation` - Time the validation path
//! - `dump` - Print driver and device information

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use log::info;

use nano_pow::algorithm::{Solution, to_megabytes};
use nano_pow::config::{DriverChoice, ProverConfig, StrategyChoice};
use nano_pow::profile::{VALIDATION_DIFFICULTY, VALIDATION_MIN_COUNT, profile, profile_validation};
use nano_pow::runner::solve_with_deadline;
use nano_pow::work::{SolutionReport, format_nonce, parse_nonce, parse_word, random_nonce};

#[derive(Parser)]
#[command(name = "nano-pow")]
#[command(version)]
#[command(about = "Memory-bound proof-of-work solver, validator and profiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: <config dir>/nano-pow/config.json if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend to use
    #[arg(long, global = true, value_enum)]
    driver: Option<DriverChoice>,

    /// Number of worker threads
    #[arg(short, long, global = true)]
    threads: Option<usize>,

    /// Difficulty in leading one bits, 1-127
    #[arg(short, long, global = true)]
    difficulty: Option<u32>,

    /// Table holds 2^N entries (default: derived from the difficulty)
    #[arg(short, long, global = true)]
    lookup: Option<u32>,

    /// CPU scheduling strategy
    #[arg(long, global = true, value_enum)]
    strategy: Option<StrategyChoice>,

    /// GPU adapter index (see `dump`)
    #[arg(long, global = true)]
    adapter: Option<usize>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// More log output (repeat for more)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve one nonce
    Solve {
        /// Nonce as 32 hex digits (default: random)
        #[arg(long)]
        nonce: Option<String>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Check a solution
    Validate {
        /// Nonce as 32 hex digits
        #[arg(long)]
        nonce: String,

        /// Left-hand side in hex
        #[arg(long)]
        lhs: String,

        /// Right-hand side in hex
        #[arg(long)]
        rhs: String,
    },

    /// Time a series of solves
    Profile {
        /// Number of problems to solve
        #[arg(short, long, default_value = "16")]
        count: u32,
    },

    /// Time the validation path
    ProfileValidation {
        /// Number of validations (at least 10 million)
        #[arg(short, long, default_value_t = VALIDATION_MIN_COUNT)]
        count: u64,
    },

    /// Print driver and device information
    Dump,

    /// Write the effective settings to the config file
    SaveConfig,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = build_config(&cli)?;

    match cli.command {
        Commands::Solve { nonce, timeout } => cmd_solve(&config, nonce, timeout, cli.json),
        Commands::Validate { nonce, lhs, rhs } => cmd_validate(&config, &nonce, &lhs, &rhs, cli.json),
        Commands::Profile { count } => cmd_profile(&config, count, cli.json),
        Commands::ProfileValidation { count } => cmd_profile_validation(count, cli.json),
        Commands::Dump => cmd_dump(&config),
        Commands::SaveConfig => cmd_save_config(&config, cli.config),
    }
}

/// Config file values overridden by command line flags
fn build_config(cli: &Cli) -> anyhow::Result<ProverConfig> {
    let mut config = ProverConfig::load_or_default(cli.config.as_deref())?;
    if let Some(driver) = cli.driver {
        config.driver = driver;
    }
    if let Some(threads) = cli.threads {
        config.threads = Some(threads);
    }
    if let Some(difficulty) = cli.difficulty {
        config.difficulty_bits = difficulty;
    }
    if let Some(lookup) = cli.lookup {
        config.lookup = Some(lookup);
    }
    if let Some(strategy) = cli.strategy {
        config.strategy = strategy;
    }
    if let Some(adapter) = cli.adapter {
        config.gpu_adapter = Some(adapter);
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_solve(
    config: &ProverConfig,
    nonce: Option<String>,
    timeout: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let nonce = match nonce {
        Some(text) => parse_nonce(&text)?,
        None => random_nonce()?,
    };
    let driver = config.build_driver()?;
    let threshold = driver.difficulty_get();
    info!("Solving nonce {}", format_nonce(nonce));

    let solved = solve_with_deadline(driver, nonce, timeout.map(Duration::from_secs))?;
    if solved.solution.is_empty() {
        anyhow::bail!("No solution found before the deadline");
    }

    let report = SolutionReport::new(
        nonce,
        solved.solution,
        threshold,
        Some(solved.elapsed.as_millis() as u64),
    );
    if json {
        return print_json(&report);
    }
    println!("Nonce:      {}", report.nonce);
    println!("Solution:   {} {}", report.lhs, report.rhs);
    println!("Difficulty: {}", report.difficulty);
    println!("Time:       {} ms", solved.elapsed.as_millis());
    Ok(())
}

fn cmd_validate(
    config: &ProverConfig,
    nonce: &str,
    lhs: &str,
    rhs: &str,
    json: bool,
) -> anyhow::Result<()> {
    let nonce = parse_nonce(nonce)?;
    let solution = Solution::new(parse_word(lhs)?, parse_word(rhs)?);
    let threshold = config.difficulty()?;

    let report = SolutionReport::new(nonce, solution, threshold, None);
    if json {
        print_json(&report)?;
    } else {
        println!("{}", report);
        println!("{}", if report.valid { "valid" } else { "invalid" });
    }
    if !report.valid {
        std::process::exit(2);
    }
    Ok(())
}

fn cmd_profile(config: &ProverConfig, count: u32, json: bool) -> anyhow::Result<()> {
    if count == 0 {
        anyhow::bail!("Count must be at least 1");
    }
    let mut driver = config.build_driver()?;
    if !json {
        println!(
            "Profiling threads: {} memory: {} MB difficulty: {} bits",
            driver.threads_get(),
            to_megabytes(driver.memory_get()),
            config.difficulty_bits
        );
    }

    let report = profile(driver.as_mut(), count, |sample| {
        if !json {
            println!("{}", sample);
        }
    })
    .context("Profiling failed")?;

    if json {
        return print_json(&report);
    }
    println!("Average solution time: {} ms", report.average_ms);
    Ok(())
}

fn cmd_profile_validation(count: u64, json: bool) -> anyhow::Result<()> {
    let count = count.max(VALIDATION_MIN_COUNT);
    if !json {
        println!(
            "Starting validation profile ({} validations, threshold {:016x})",
            count, VALIDATION_DIFFICULTY
        );
    }
    let report = profile_validation(count);
    if json {
        return print_json(&report);
    }
    println!(
        "Average validation time: {} ns ({} validations/s)",
        report.average_ns, report.per_second
    );
    Ok(())
}

fn cmd_dump(config: &ProverConfig) -> anyhow::Result<()> {
    let mut dump_config = config.clone();
    // Dump only describes the device, a minimal table is enough
    dump_config.lookup = Some(1);
    let driver = dump_config.build_driver()?;
    println!("Driver: {}", driver.kind());
    println!("{}", driver.dump());
    println!("Recommended threads: {}", driver.recommended_threads());
    println!(
        "Recommended lookup: {}",
        driver.recommended_lookup(config.difficulty_bits)
    );
    Ok(())
}

fn cmd_save_config(config: &ProverConfig, path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = path
        .or_else(ProverConfig::default_path)
        .context("No config directory available, pass --config")?;
    config.save(&path)?;
    println!("Saved config to {}", path.display());
    Ok(())
}
