//! Error types for the Nano PoW engine

use core::fmt;

use thiserror::Error;

/// Broad class of an [`Error`], used by callers to pick a recovery path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected input; the driver keeps its previous configuration
    Configuration,
    /// Memory could not be obtained; retry smaller or switch driver
    Resource,
    /// A device call failed; see [`GpuPhase`] for where
    Device,
}

/// Phase of the GPU-offload driver in which a device error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuPhase {
    Init,
    Build,
    Setup,
    MemorySet,
    Fill,
    Search,
}

impl fmt::Display for GpuPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GpuPhase::Init => "init",
            GpuPhase::Build => "build",
            GpuPhase::Setup => "setup",
            GpuPhase::MemorySet => "memory_set",
            GpuPhase::Fill => "fill",
            GpuPhase::Search => "search",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Difficulty must be greater than 0 and less than {max} bits, got {bits}")]
    InvalidDifficultyBits { bits: u32, max: u32 },

    #[error("Memory size must be a non-zero power of two, got {0} bytes")]
    MemoryNotPowerOfTwo(usize),

    #[error("Memory size {bytes} bytes is below one table entry ({min} bytes)")]
    MemoryTooSmall { bytes: usize, min: usize },

    #[error("Memory size {bytes} bytes exceeds the {max} byte table limit")]
    MemoryTooLarge { bytes: usize, max: usize },

    #[error("Lookup scale must be between 1 and {max}, got {lookup}")]
    InvalidLookup { lookup: u32, max: u32 },

    #[error("Failed to allocate {0} bytes for the lookup table")]
    Allocation(usize),

    #[error("No lookup table allocated, call memory_set first")]
    NoMemory,

    #[error("GPU {phase} error: {message}")]
    Device { phase: GpuPhase, message: String },
}

impl Error {
    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidDifficultyBits { .. }
            | Error::MemoryNotPowerOfTwo(_)
            | Error::MemoryTooSmall { .. }
            | Error::MemoryTooLarge { .. }
            | Error::InvalidLookup { .. }
            | Error::NoMemory => ErrorCategory::Configuration,
            Error::Allocation(_) => ErrorCategory::Resource,
            Error::Device { .. } => ErrorCategory::Device,
        }
    }

    /// Phase of a device error, if this is one
    pub fn gpu_phase(&self) -> Option<GpuPhase> {
        match self {
            Error::Device { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    #[cfg_attr(not(feature = "gpu"), allow(dead_code))]
    pub(crate) fn device(phase: GpuPhase, message: impl Into<String>) -> Self {
        Error::Device {
            phase,
            message: message.into(),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
