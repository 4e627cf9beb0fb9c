//! Firing programs.
//!
//! A [`Program`] is an ordered list of [`Segment`]s, each a ramp toward a
//! target at a given rate followed by an optional hold.  Programs are
//! validated once when they are loaded; the runner never re-checks a
//! segment mid-firing.

use serde::{Deserialize, Serialize};

use crate::error::ProgramError;

/// One ramp/hold step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Target temperature, °C.
    pub target: f64,
    /// Ramp rate, °C/h (always positive; direction comes from the target).
    pub rate: f64,
    /// Soak time at target, minutes.
    #[serde(default, alias = "hold")]
    pub hold_minutes: f64,
}

impl Segment {
    pub fn new(target: f64, rate: f64, hold_minutes: f64) -> Self {
        Self {
            target,
            rate,
            hold_minutes,
        }
    }

    fn check(&self, max_temp: f64) -> Result<(), &'static str> {
        if !self.target.is_finite() || self.target < 0.0 {
            return Err("target must be a non-negative number");
        }
        if self.target > max_temp {
            return Err("target exceeds the kiln's maximum temperature");
        }
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err("rate must be positive");
        }
        if !self.hold_minutes.is_finite() || self.hold_minutes < 0.0 {
            return Err("hold must be zero or positive");
        }
        Ok(())
    }
}

/// A validated firing program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub segments: Vec<Segment>,
}

/// Per-segment duration estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentEstimate {
    pub ramp_minutes: f64,
    pub hold_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgramEstimate {
    pub segments: Vec<SegmentEstimate>,
    pub total_minutes: f64,
}

impl Program {
    /// Build and validate a program.
    pub fn new(
        name: impl Into<String>,
        segments: Vec<Segment>,
        max_temp: f64,
    ) -> Result<Self, ProgramError> {
        if segments.is_empty() {
            return Err(ProgramError::Empty);
        }
        for (index, seg) in segments.iter().enumerate() {
            seg.check(max_temp)
                .map_err(|reason| ProgramError::InvalidSegment { index, reason })?;
        }
        Ok(Self {
            name: name.into(),
            segments,
        })
    }

    /// Parse and validate a program from JSON.
    pub fn from_json(json: &str, max_temp: f64) -> Result<Self, ProgramError> {
        let raw: Program =
            serde_json::from_str(json).map_err(|e| ProgramError::Parse(e.to_string()))?;
        Self::new(raw.name, raw.segments, max_temp)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Estimated duration from `start_temp`, with rates floored at `min_rate`.
    pub fn estimate(&self, start_temp: f64, min_rate: f64) -> ProgramEstimate {
        let mut previous = start_temp;
        let mut total = 0.0;
        let segments = self
            .segments
            .iter()
            .map(|seg| {
                let ramp_minutes = (seg.target - previous).abs() / seg.rate.max(min_rate) * 60.0;
                previous = seg.target;
                total += ramp_minutes + seg.hold_minutes;
                SegmentEstimate {
                    ramp_minutes,
                    hold_minutes: seg.hold_minutes,
                }
            })
            .collect();
        ProgramEstimate {
            segments,
            total_minutes: total,
        }
    }

    /// Remaining minutes when executing segment `index` from `current_temp`.
    /// `hold_left_minutes` is the unfinished part of that segment's hold,
    /// or `None` when still ramping.
    pub fn remaining_minutes(
        &self,
        index: usize,
        current_temp: f64,
        hold_left_minutes: Option<f64>,
        min_rate: f64,
    ) -> f64 {
        let Some(active) = self.segments.get(index) else {
            return 0.0;
        };
        let mut total = match hold_left_minutes {
            Some(left) => left,
            None => {
                (active.target - current_temp).abs() / active.rate.max(min_rate) * 60.0
                    + active.hold_minutes
            }
        };
        let mut previous = active.target;
        for seg in &self.segments[index + 1..] {
            total += (seg.target - previous).abs() / seg.rate.max(min_rate) * 60.0
                + seg.hold_minutes;
            previous = seg.target;
        }
        total
    }
}
