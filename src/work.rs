//! Nonce text formats and printable solve results

use serde::{Deserialize, Serialize};

use crate::algorithm::{Nonce, Solution, difficulty, passes, sum};
use crate::config::ConfigError;

/// Number of hex digits in a textual nonce
pub const NONCE_HEX_LEN: usize = 32;

/// Parse a nonce from 32 hex digits, high word first
///
/// An optional `0x` prefix is accepted.
pub fn parse_nonce(text: &str) -> Result<Nonce, ConfigError> {
    let digits = text.trim();
    let digits = digits.strip_prefix("0x").unwrap_or(digits);
    if digits.len() != NONCE_HEX_LEN {
        return Err(ConfigError::InvalidNonce(text.to_string()));
    }
    let bytes = hex::decode(digits).map_err(|_| ConfigError::InvalidNonce(text.to_string()))?;

    let mut hi = [0u8; 8];
    let mut lo = [0u8; 8];
    hi.copy_from_slice(&bytes[..8]);
    lo.copy_from_slice(&bytes[8..]);
    Ok([u64::from_be_bytes(hi), u64::from_be_bytes(lo)])
}

pub fn format_nonce(nonce: Nonce) -> String {
    format!("{:016x}{:016x}", nonce[0], nonce[1])
}

/// Parse one solution half from hex, with or without `0x`
pub fn parse_word(text: &str) -> Result<u64, ConfigError> {
    let digits = text.trim();
    let digits = digits.strip_prefix("0x").unwrap_or(digits);
    u64::from_str_radix(digits, 16).map_err(|_| ConfigError::InvalidSolution(text.to_string()))
}

/// Fresh nonce from the operating system's entropy source
pub fn random_nonce() -> Result<Nonce, ConfigError> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes)?;

    let mut hi = [0u8; 8];
    let mut lo = [0u8; 8];
    hi.copy_from_slice(&bytes[..8]);
    lo.copy_from_slice(&bytes[8..]);
    Ok([u64::from_le_bytes(hi), u64::from_le_bytes(lo)])
}

/// A solve outcome in printable form
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SolutionReport {
    pub nonce: String,
    pub lhs: String,
    pub rhs: String,
    /// `H0(lhs) + H1(rhs)`
    pub sum: String,
    pub difficulty: String,
    pub valid: bool,
    /// Wall-clock solve time, absent for pure validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub millis: Option<u64>,
}

impl SolutionReport {
    pub fn new(nonce: Nonce, solution: Solution, threshold: u128, millis: Option<u64>) -> Self {
        Self {
            nonce: format_nonce(nonce),
            lhs: format!("{:016x}", solution.lhs),
            rhs: format!("{:016x}", solution.rhs),
            sum: format!("{:032x}", sum(nonce, solution)),
            difficulty: format!("{:032x}", difficulty(nonce, solution)),
            valid: passes(nonce, solution, threshold),
            millis,
        }
    }
}

impl std::fmt::Display for SolutionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "H0({})+H1({})={} {}",
            self.lhs, self.rhs, self.sum, self.difficulty
        )?;
        if let Some(millis) = self.millis {
            write!(f, " solution ms: {}", millis)?;
        }
        Ok(())
    }
}
