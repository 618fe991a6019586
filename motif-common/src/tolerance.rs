//! Onset matching tolerance
//!
//! Every fuzzy onset comparison takes an explicit [`Tolerance`]. The single
//! documented default lives here and is only applied where configuration is
//! resolved (TOML file or CLI flag), never inside a matching routine.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum absolute onset difference, in quarter-note offsets, for an analysis
/// row to be matched to a canonical note.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Tolerance(f64);

impl Tolerance {
    /// Default tolerance: 0.001 quarter notes.
    ///
    /// Must stay well below the shortest onset spacing the extraction service
    /// emits (a 64th note, 0.0625).
    pub const DEFAULT: Tolerance = Tolerance(0.001);

    /// Create a tolerance, rejecting negative or non-finite values.
    pub fn new(epsilon: f64) -> Result<Self> {
        if !epsilon.is_finite() || epsilon < 0.0 {
            return Err(Error::InvalidInput(format!(
                "tolerance must be a finite, non-negative number (got {})",
                epsilon
            )));
        }
        Ok(Self(epsilon))
    }

    pub fn epsilon(self) -> f64 {
        self.0
    }

    /// True when `a` and `b` differ by at most this tolerance.
    pub fn admits(self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.0
    }
}

impl TryFrom<f64> for Tolerance {
    type Error = Error;

    fn try_from(value: f64) -> Result<Self> {
        Tolerance::new(value)
    }
}

impl From<Tolerance> for f64 {
    fn from(value: Tolerance) -> Self {
        value.0
    }
}

impl FromStr for Tolerance {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid tolerance: {}", s)))?;
        Tolerance::new(value)
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
