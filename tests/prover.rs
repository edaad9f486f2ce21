use std::time::Duration;

use nano_pow::algorithm::{CpuDriver, DriverKind, Error, MAX_LOOKUP, bit_difficulty, passes};
use nano_pow::config::{ConfigError, DriverChoice, ProverConfig, StrategyChoice};
use nano_pow::profile::{profile, profile_validation};
use nano_pow::runner::solve_with_deadline;
use nano_pow::work::SolutionReport;

fn small_config(bits: u32, lookup: u32) -> ProverConfig {
    ProverConfig {
        threads: Some(2),
        difficulty_bits: bits,
        lookup: Some(lookup),
        ..ProverConfig::default()
    }
}

#[test]
fn test_config_defaults() {
    let config = ProverConfig::default();
    assert_eq!(config.driver, DriverChoice::Cpu);
    assert_eq!(config.strategy, StrategyChoice::Cooperative);
    assert_eq!(config.difficulty_bits, 52);
    assert!(config.threads.is_none());
    assert_eq!(config.difficulty().unwrap(), bit_difficulty(52));
}

#[test]
fn test_config_json() {
    let config = ProverConfig {
        driver: DriverChoice::Gpu,
        threads: Some(4096),
        strategy: StrategyChoice::Phased,
        gpu_adapter: Some(1),
        ..small_config(30, 16)
    };
    let text = serde_json::to_string(&config).unwrap();
    assert!(text.contains("\"driver\":\"gpu\""), "{}", text);
    assert!(text.contains("\"strategy\":\"phased\""), "{}", text);
    let parsed: ProverConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, config);

    // Missing fields take their defaults
    let partial: ProverConfig = serde_json::from_str(r#"{"difficulty_bits": 20}"#).unwrap();
    assert_eq!(partial.difficulty_bits, 20);
    assert_eq!(partial.driver, DriverChoice::Cpu);
}

#[test]
fn test_config_file_round_trip() {
    let path = std::env::temp_dir()
        .join(format!("nano-pow-test-{}", std::process::id()))
        .join("config.json");
    let config = small_config(24, 12);
    config.save(&path).unwrap();
    assert_eq!(ProverConfig::load(&path).unwrap(), config);
    assert_eq!(ProverConfig::load_or_default(Some(&path)).unwrap(), config);

    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(ProverConfig::load(&path), Err(ConfigError::Parse { .. })));
    let _ = std::fs::remove_dir_all(path.parent().unwrap());

    assert!(matches!(ProverConfig::load(&path), Err(ConfigError::Io { .. })));
}

#[test]
fn test_config_rejects_bad_values() {
    let config = small_config(0, 12);
    assert!(matches!(
        config.build_driver(),
        Err(ConfigError::Engine(Error::InvalidDifficultyBits { bits: 0, .. }))
    ));

    let config = small_config(16, 33);
    assert!(matches!(
        config.build_driver(),
        Err(ConfigError::Engine(Error::InvalidLookup { lookup: 33, .. }))
    ));
}

#[cfg(not(feature = "gpu"))]
#[test]
fn test_gpu_requires_feature() {
    let config = ProverConfig {
        driver: DriverChoice::Gpu,
        ..small_config(16, 12)
    };
    assert!(matches!(config.build_driver(), Err(ConfigError::GpuUnavailable)));
}

#[test]
fn test_build_driver_and_solve() {
    for strategy in [StrategyChoice::Cooperative, StrategyChoice::Phased] {
        let config = ProverConfig {
            strategy,
            ..small_config(12, 14)
        };
        let mut driver = config.build_driver().unwrap();
        assert_eq!(driver.kind(), DriverKind::Cpu);
        assert_eq!(driver.threads_get(), 2);
        assert_eq!(driver.memory_get(), 1 << 16);

        let nonce = [0xfeed, 0xbeef];
        let solution = driver.solve(nonce).unwrap();
        assert!(passes(nonce, solution, bit_difficulty(12)));
    }
}

#[test]
fn test_derived_lookup() {
    let config = ProverConfig {
        lookup: None,
        ..small_config(24, 1)
    };
    let driver = config.build_driver().unwrap();
    // CPU lookup is half the difficulty: 2^12 entries of 4 bytes
    assert_eq!(driver.memory_get(), 1 << 14);
}

#[test]
fn test_derived_lookup_wide_difficulty() {
    let driver = CpuDriver::with_threads(0);
    for (bits, expected) in [(70, MAX_LOOKUP), (127, MAX_LOOKUP), (1, 1), (40, 20)] {
        let config = ProverConfig {
            lookup: None,
            ..small_config(bits, 1)
        };
        assert_eq!(config.lookup_for(&driver).unwrap(), expected, "bits {}", bits);
    }
}

#[test]
fn test_solve_with_deadline() {
    let driver = small_config(10, 14).build_driver().unwrap();
    let solved = solve_with_deadline(driver, [3, 4], None).unwrap();
    assert!(passes([3, 4], solved.solution, bit_difficulty(10)));

    // A threshold no sum can exceed only ends through the deadline
    let mut driver = solved.driver;
    driver.difficulty_set(u128::MAX);
    let solved = solve_with_deadline(driver, [3, 4], Some(Duration::from_millis(100))).unwrap();
    assert!(solved.solution.is_empty());
    assert!(solved.elapsed >= Duration::from_millis(100));

    // The returned driver is still usable
    let mut driver = solved.driver;
    driver.difficulty_set(bit_difficulty(10));
    let solution = driver.solve([3, 4]).unwrap();
    assert!(passes([3, 4], solution, bit_difficulty(10)));
}

#[test]
fn test_profile() {
    let mut driver = small_config(10, 14).build_driver().unwrap();
    let mut seen = Vec::new();
    let report = profile(driver.as_mut(), 3, |sample| seen.push(sample.clone())).unwrap();

    assert_eq!(report.samples.len(), 3);
    assert_eq!(seen, report.samples);
    assert_eq!(report.driver, "cpu");
    assert_eq!(report.threads, 2);
    assert!(report.samples.iter().all(|s| s.valid));
    assert_eq!(report.samples[0].nonce, "00000000000000010000000000000000");
    assert_eq!(report.samples[2].nonce, "00000000000000030000000000000000");
}

#[test]
fn test_profile_validation() {
    let report = profile_validation(10_000);
    assert_eq!(report.count, 10_000);
    assert!(report.per_second > 0);
}

#[test]
fn test_solution_report() {
    let mut driver = small_config(8, 14).build_driver().unwrap();
    let nonce = [1, 2];
    let solution = driver.solve(nonce).unwrap();

    let report = SolutionReport::new(nonce, solution, bit_difficulty(8), Some(5));
    assert!(report.valid);
    assert!(report.difficulty.starts_with("ff"), "{}", report.difficulty);
    assert!(report.to_string().ends_with("solution ms: 5"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["valid"], true);
    assert_eq!(json["millis"], 5);

    let unsolved = SolutionReport::new(nonce, solution, bit_difficulty(120), None);
    assert!(!unsolved.valid);
    assert!(serde_json::to_value(&unsolved).unwrap().get("millis").is_none());
}
