//! Prover settings
//!
//! Settings live in a JSON file (by default under the user's config
//! directory) and are overridden field by field from the command line.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::algorithm::{
    self, CpuDriver, Driver, MAX_LOOKUP, SolveStrategy, entries_to_memory, lookup_to_entries,
    to_megabytes, try_bit_difficulty,
};

/// Difficulty used when neither the file nor the command line sets one
pub const DEFAULT_DIFFICULTY_BITS: u32 = 52;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid nonce {0:?}, expected {len} hex digits", len = crate::work::NONCE_HEX_LEN)]
    InvalidNonce(String),

    #[error("Invalid solution word {0:?}, expected hex")]
    InvalidSolution(String),

    #[error("Entropy source failed: {0}")]
    Entropy(#[from] getrandom::Error),

    #[error("GPU driver not available, rebuild with the `gpu` feature")]
    GpuUnavailable,

    #[error(transparent)]
    Engine(#[from] algorithm::Error),
}

/// Which backend to construct
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum DriverChoice {
    #[default]
    Cpu,
    Gpu,
}

/// CPU scheduling strategy as written in settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum StrategyChoice {
    #[default]
    Cooperative,
    Phased,
}

impl From<StrategyChoice> for SolveStrategy {
    fn from(value: StrategyChoice) -> Self {
        match value {
            StrategyChoice::Cooperative => SolveStrategy::Cooperative,
            StrategyChoice::Phased => SolveStrategy::Phased,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProverConfig {
    pub driver: DriverChoice,
    /// Worker count; the driver's own default when unset
    pub threads: Option<usize>,
    /// Leading one bits the 128-bit difficulty must have
    pub difficulty_bits: u32,
    /// Table holds 2^lookup entries; derived from the difficulty when unset
    pub lookup: Option<u32>,
    pub strategy: StrategyChoice,
    /// Adapter index for the GPU driver; the default adapter when unset
    pub gpu_adapter: Option<usize>,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            driver: DriverChoice::Cpu,
            threads: None,
            difficulty_bits: DEFAULT_DIFFICULTY_BITS,
            lookup: None,
            strategy: StrategyChoice::Cooperative,
            gpu_adapter: None,
        }
    }
}

impl ProverConfig {
    /// `<config dir>/nano-pow/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("nano-pow").join("config.json"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if given, else the default file if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => {
                debug!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(io)
    }

    /// 128-bit threshold for `difficulty_bits`
    pub fn difficulty(&self) -> Result<u128, ConfigError> {
        Ok(try_bit_difficulty(self.difficulty_bits)?)
    }

    /// Lookup scale to use with `driver`
    pub fn lookup_for(&self, driver: &dyn Driver) -> Result<u32, ConfigError> {
        let lookup = self
            .lookup
            .unwrap_or_else(|| driver.recommended_lookup(self.difficulty_bits));
        if lookup == 0 || lookup > MAX_LOOKUP {
            return Err(algorithm::Error::InvalidLookup {
                lookup,
                max: MAX_LOOKUP,
            }
            .into());
        }
        Ok(lookup)
    }

    /// Construct and fully configure the selected driver
    pub fn build_driver(&self) -> Result<Box<dyn Driver>, ConfigError> {
        let difficulty = self.difficulty()?;
        let mut driver: Box<dyn Driver> = match self.driver {
            DriverChoice::Cpu => {
                let mut cpu = match self.threads {
                    Some(threads) => CpuDriver::with_threads(threads),
                    None => CpuDriver::new(),
                };
                cpu.strategy_set(self.strategy.into());
                Box::new(cpu)
            }
            DriverChoice::Gpu => {
                let mut gpu = self.gpu_driver()?;
                if let Some(threads) = self.threads {
                    gpu.threads_set(threads);
                }
                gpu
            }
        };

        driver.difficulty_set(difficulty);
        let lookup = self.lookup_for(driver.as_ref())?;
        let memory = entries_to_memory(lookup_to_entries(lookup));
        driver.memory_set(memory)?;
        info!(
            "{} driver: {} threads, lookup 2^{} ({} MB), difficulty {} bits",
            driver.kind(),
            driver.threads_get(),
            lookup,
            to_megabytes(memory),
            self.difficulty_bits
        );
        Ok(driver)
    }

    #[cfg(feature = "gpu")]
    fn gpu_driver(&self) -> Result<Box<dyn Driver>, ConfigError> {
        Ok(Box::new(algorithm::GpuDriver::new(self.gpu_adapter)?))
    }

    #[cfg(not(feature = "gpu"))]
    fn gpu_driver(&self) -> Result<Box<dyn Driver>, ConfigError> {
        Err(ConfigError::GpuUnavailable)
    }
}
