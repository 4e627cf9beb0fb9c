//! Offline learning: firing analysis and bounded gain adjustments.
//!
//! ```text
//!   FiringRecord ──▶ PidAnalyzer ──▶ FiringAnalysis{suggestions}
//!                                           │
//!                                      PidLearner ──update_band──▶ AdaptivePidTable
//! ```
//!
//! Both stages are deterministic rule sets.  Every change they make goes
//! through [`AdaptivePidTable::update_band`](crate::control::adaptive::AdaptivePidTable::update_band)
//! and inherits its safety clamps.

pub mod analyzer;
pub mod learner;

use serde::{Deserialize, Serialize};

use crate::control::pid::PidGains;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GainParam {
    Kp,
    Ki,
    Kd,
}

impl GainParam {
    pub fn get(self, g: &PidGains) -> f64 {
        match self {
            Self::Kp => g.kp,
            Self::Ki => g.ki,
            Self::Kd => g.kd,
        }
    }

    pub fn set(self, g: &mut PidGains, value: f64) {
        match self {
            Self::Kp => g.kp = value,
            Self::Ki => g.ki = value,
            Self::Kd => g.kd = value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Self::Increase => 1.0,
            Self::Decrease => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Magnitude {
    Small,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Poor,
    Acceptable,
    Good,
    Excellent,
}

impl Quality {
    /// Weight used by the overall firing score.
    pub fn score(self) -> u32 {
        match self {
            Self::Excellent => 100,
            Self::Good => 75,
            Self::Acceptable => 50,
            Self::Poor => 25,
        }
    }
}

/// One directional gain change proposed for a band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub band: u32,
    pub param: GainParam,
    pub direction: Direction,
    pub magnitude: Magnitude,
    pub reason: String,
}
