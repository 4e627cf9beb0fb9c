//! Blackboard threaded through every program-phase handler.
//!
//! The runner writes `measured` before each tick; handlers move the
//! setpoint, the segment index and the hold countdown, and append
//! [`PhaseEvent`]s that the runner drains after the tick to drive the
//! firing log and notifications.

use crate::config::RunnerConfig;
use crate::program::{Program, Segment};

/// Something a phase handler wants the outside world to know about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhaseEvent {
    RampStart {
        index: usize,
        from: f64,
        target: f64,
        rate: f64,
        heating: bool,
    },
    RampComplete {
        index: usize,
        temperature: f64,
        target: f64,
    },
    HoldStart {
        index: usize,
        target: f64,
        minutes: f64,
    },
    HoldComplete {
        index: usize,
        target: f64,
        minutes: f64,
    },
    SegmentComplete {
        index: usize,
        total: usize,
        target: f64,
    },
    ProgramComplete,
}

pub struct FsmContext {
    // -- Timing --
    pub ticks_in_state: u64,
    pub total_ticks: u64,
    /// Nominal control cycle, seconds.  Setpoint advance and hold
    /// countdown both step by this amount per tick.
    pub cycle_secs: f64,

    // -- Program --
    pub config: RunnerConfig,
    pub program: Program,
    /// Active segment, 0-based.
    pub segment: usize,

    // -- Control state --
    /// Smoothed measured temperature for this cycle.
    pub measured: f64,
    pub setpoint: f64,
    /// Measured temperature when the active ramp started.
    pub ramp_start_temp: f64,
    /// Direction of the active ramp, fixed at ramp start.
    pub heating: bool,
    pub hold_total_secs: f64,
    pub hold_remaining_secs: f64,

    /// Drained by the runner after every tick.
    pub events: Vec<PhaseEvent>,
}

impl FsmContext {
    pub fn new(config: RunnerConfig, program: Program) -> Self {
        Self {
            ticks_in_state: 0,
            total_ticks: 0,
            cycle_secs: config.cycle_interval_secs,
            config,
            program,
            segment: 0,
            measured: 0.0,
            setpoint: 0.0,
            ramp_start_temp: 0.0,
            heating: true,
            hold_total_secs: 0.0,
            hold_remaining_secs: 0.0,
            events: Vec::new(),
        }
    }

    /// The active segment.  Segment indices never run past the program
    /// because a program is validated non-empty and the last segment
    /// moves to `Complete` instead of advancing.
    pub fn current(&self) -> Segment {
        self.program
            .segments
            .get(self.segment)
            .or(self.program.segments.last())
            .copied()
            .unwrap_or(Segment::new(self.measured, 1.0, 0.0))
    }

    pub fn segment_count(&self) -> usize {
        self.program.segments.len()
    }

    pub fn is_last_segment(&self) -> bool {
        self.segment + 1 >= self.segment_count()
    }

    /// Ramp progress toward the active target, 0–100 %.
    pub fn ramp_progress(&self) -> f64 {
        let span = (self.current().target - self.ramp_start_temp).abs();
        if span <= 0.0 {
            return 100.0;
        }
        ((self.measured - self.ramp_start_temp).abs() / span * 100.0).clamp(0.0, 100.0)
    }
}
