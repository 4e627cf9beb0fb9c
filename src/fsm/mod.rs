//! Function-pointer finite state machine engine for program execution.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  StateTable                                                │
//! │  ┌──────────┬───────────┬──────────┬───────────────────┐   │
//! │  │ StateId  │ on_enter  │ on_exit  │ on_update         │   │
//! │  ├──────────┼───────────┼──────────┼───────────────────┤   │
//! │  │ Idle     │ fn(ctx)   │    -     │ fn(ctx)->Option<> │   │
//! │  │ Ramp     │ fn(ctx)   │    -     │ fn(ctx)->Option<> │   │
//! │  │ Hold     │ fn(ctx)   │    -     │ fn(ctx)->Option<> │   │
//! │  │ Complete │ fn(ctx)   │    -     │ fn(ctx)->Option<> │   │
//! │  │ Stopped  │ fn(ctx)   │    -     │ fn(ctx)->Option<> │   │
//! │  │ Error    │ fn(ctx)   │    -     │ fn(ctx)->Option<> │   │
//! │  └──────────┴───────────┴──────────┴───────────────────┘   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! One tick per control cycle.  The engine calls `on_update` for the
//! **current** state; `Some(next)` runs `on_exit(current)`, then
//! `on_enter(next)`.  A state may transition to itself: the runner uses
//! `Ramp → Ramp` to start the next segment, which re-runs `ramp_enter`.
//! Every handler receives the [`FsmContext`] blackboard.

pub mod context;
pub mod states;

use context::FsmContext;
use log::info;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Program execution phase.
/// Must stay in sync with the table built in [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StateId {
    #[default]
    Idle = 0,
    Ramp = 1,
    Hold = 2,
    Complete = 3,
    Stopped = 4,
    Error = 5,
}

impl StateId {
    pub const COUNT: usize = 6;

    /// Convert an index back to `StateId`.  Out of range asserts in debug
    /// builds and maps to `Error` in release.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Idle,
            1 => Self::Ramp,
            2 => Self::Hold,
            3 => Self::Complete,
            4 => Self::Stopped,
            5 => Self::Error,
            _ => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::Error
            }
        }
    }

    /// Ramp or hold: a program is being executed.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Ramp | Self::Hold)
    }

    /// No further transitions without a new start.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Stopped | Self::Error)
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// `on_enter` / `on_exit` action, run once per transition.
pub type StateActionFn = fn(&mut FsmContext);

/// Per-tick handler.  `Some(next)` requests a transition.
pub type StateUpdateFn = fn(&mut FsmContext) -> Option<StateId>;

/// One row of the state table.
pub struct StateDescriptor {
    pub id: StateId,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_update: StateUpdateFn,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

pub struct Fsm {
    /// Indexed by `StateId as usize`.
    table: [StateDescriptor; StateId::COUNT],
    current: usize,
    tick_count: u64,
    state_entry_tick: u64,
}

impl Fsm {
    pub fn new(table: [StateDescriptor; StateId::COUNT], initial: StateId) -> Self {
        Self {
            table,
            current: initial as usize,
            tick_count: 0,
            state_entry_tick: 0,
        }
    }

    /// Run the initial `on_enter`.  Call once before the first `tick()`.
    pub fn start(&mut self, ctx: &mut FsmContext) {
        info!("FSM | starting in {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    /// Advance by one control cycle.
    pub fn tick(&mut self, ctx: &mut FsmContext) {
        self.tick_count += 1;
        ctx.ticks_in_state = self.tick_count - self.state_entry_tick;
        ctx.total_ticks = self.tick_count;

        if let Some(next_id) = (self.table[self.current].on_update)(ctx) {
            self.transition(next_id, ctx);
        }
    }

    /// Jump to `next` regardless of what `on_update` would return (start,
    /// stop and emergency).  No-op when already there.
    pub fn force_transition(&mut self, next: StateId, ctx: &mut FsmContext) {
        if next as usize != self.current {
            self.transition(next, ctx);
        }
    }

    pub fn current_state(&self) -> StateId {
        StateId::from_index(self.current)
    }

    pub fn ticks_in_current_state(&self) -> u64 {
        self.tick_count - self.state_entry_tick
    }

    fn transition(&mut self, next_id: StateId, ctx: &mut FsmContext) {
        let next_idx = next_id as usize;
        info!(
            "FSM | {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;
        self.state_entry_tick = self.tick_count;
        ctx.ticks_in_state = 0;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::context::{FsmContext, PhaseEvent};
    use super::*;
    use crate::config::RunnerConfig;
    use crate::program::{Program, Segment};

    fn program(segments: Vec<Segment>) -> Program {
        Program::new("test", segments, 1290.0).unwrap()
    }

    /// FSM already moved into the first ramp from `start_temp`.
    fn started(segments: Vec<Segment>, start_temp: f64) -> (Fsm, FsmContext) {
        let mut ctx = FsmContext::new(RunnerConfig::default(), program(segments));
        let mut fsm = Fsm::new(states::build_state_table(), StateId::Idle);
        fsm.start(&mut ctx);
        ctx.measured = start_temp;
        fsm.force_transition(StateId::Ramp, &mut ctx);
        (fsm, ctx)
    }

    #[test]
    fn starts_in_idle_and_stays_there() {
        let mut ctx = FsmContext::new(RunnerConfig::default(), program(vec![Segment::new(100.0, 100.0, 0.0)]));
        let mut fsm = Fsm::new(states::build_state_table(), StateId::Idle);
        fsm.start(&mut ctx);
        for _ in 0..3 {
            fsm.tick(&mut ctx);
        }
        assert_eq!(fsm.current_state(), StateId::Idle);
        assert_eq!(fsm.ticks_in_current_state(), 3);
    }

    #[test]
    fn setpoint_advances_by_rate_times_cycle() {
        let (mut fsm, mut ctx) = started(vec![Segment::new(200.0, 300.0, 0.0)], 20.0);
        assert_eq!(ctx.setpoint, 20.0);
        fsm.tick(&mut ctx);
        assert!((ctx.setpoint - 22.5).abs() < 1e-12);
        assert_eq!(fsm.current_state(), StateId::Ramp);
    }

    #[test]
    fn setpoint_never_passes_target() {
        let (mut fsm, mut ctx) = started(vec![Segment::new(25.0, 3600.0, 0.0)], 20.0);
        ctx.measured = 0.0;
        fsm.tick(&mut ctx);
        assert_eq!(ctx.setpoint, 25.0);
    }

    #[test]
    fn ramp_completes_on_measured_temperature_not_setpoint() {
        let (mut fsm, mut ctx) = started(vec![Segment::new(200.0, 50.0, 30.0)], 20.0);
        ctx.measured = 150.0;
        fsm.tick(&mut ctx);
        assert_eq!(fsm.current_state(), StateId::Ramp);
        ctx.measured = 191.0;
        fsm.tick(&mut ctx);
        assert_eq!(fsm.current_state(), StateId::Hold);
        assert_eq!(ctx.setpoint, 200.0);
        assert_eq!(ctx.hold_remaining_secs, 1800.0);
    }

    #[test]
    fn cooling_ramp_moves_setpoint_down() {
        let (mut fsm, mut ctx) = started(vec![Segment::new(500.0, 120.0, 0.0)], 900.0);
        assert!(!ctx.heating);
        fsm.tick(&mut ctx);
        assert!((ctx.setpoint - 899.0).abs() < 1e-12);
        ctx.measured = 509.0;
        fsm.tick(&mut ctx);
        assert_eq!(fsm.current_state(), StateId::Complete);
    }

    #[test]
    fn hold_pauses_out_of_band() {
        let (mut fsm, mut ctx) = started(vec![Segment::new(500.0, 100.0, 2.0)], 495.0);
        fsm.tick(&mut ctx);
        assert_eq!(fsm.current_state(), StateId::Hold);

        ctx.measured = 470.0;
        fsm.tick(&mut ctx);
        assert_eq!(ctx.hold_remaining_secs, 120.0);

        ctx.measured = 510.0;
        fsm.tick(&mut ctx);
        assert_eq!(ctx.hold_remaining_secs, 90.0);
    }

    #[test]
    fn hold_countdown_ends_at_zero_and_advances() {
        let (mut fsm, mut ctx) = started(
            vec![Segment::new(500.0, 100.0, 1.0), Segment::new(600.0, 100.0, 0.0)],
            495.0,
        );
        fsm.tick(&mut ctx);
        ctx.measured = 500.0;
        fsm.tick(&mut ctx);
        fsm.tick(&mut ctx);
        assert_eq!(fsm.current_state(), StateId::Ramp);
        assert_eq!(ctx.segment, 1);
        assert_eq!(ctx.hold_remaining_secs, 0.0);
        assert_eq!(ctx.setpoint, 500.0);
    }

    #[test]
    fn zero_hold_skips_straight_to_next_ramp() {
        let (mut fsm, mut ctx) = started(
            vec![Segment::new(100.0, 100.0, 0.0), Segment::new(300.0, 100.0, 0.0)],
            95.0,
        );
        fsm.tick(&mut ctx);
        assert_eq!(fsm.current_state(), StateId::Ramp);
        assert_eq!(ctx.segment, 1);
        let kinds: Vec<_> = ctx.events.drain(..).collect();
        assert!(kinds.contains(&PhaseEvent::SegmentComplete {
            index: 0,
            total: 2,
            target: 100.0
        }));
        assert!(!kinds.iter().any(|e| matches!(e, PhaseEvent::HoldStart { .. })));
    }

    #[test]
    fn final_segment_completes_program() {
        let (mut fsm, mut ctx) = started(vec![Segment::new(100.0, 100.0, 0.0)], 100.0);
        fsm.tick(&mut ctx);
        assert_eq!(fsm.current_state(), StateId::Complete);
        assert!(ctx.events.contains(&PhaseEvent::ProgramComplete));
        fsm.tick(&mut ctx);
        assert_eq!(fsm.current_state(), StateId::Complete);
    }

    #[test]
    fn stop_is_reachable_from_any_active_phase() {
        for phase in [StateId::Ramp, StateId::Hold] {
            let (mut fsm, mut ctx) = started(vec![Segment::new(500.0, 100.0, 10.0)], 20.0);
            fsm.force_transition(phase, &mut ctx);
            fsm.force_transition(StateId::Stopped, &mut ctx);
            assert_eq!(fsm.current_state(), StateId::Stopped);
            fsm.tick(&mut ctx);
            assert_eq!(fsm.current_state(), StateId::Stopped);
        }
    }

    #[test]
    fn state_id_from_index_roundtrip() {
        for i in 0..StateId::COUNT {
            assert_eq!(StateId::from_index(i) as usize, i);
        }
    }
}

#[cfg(test)]
mod proptests {
    use super::context::FsmContext;
    use super::*;
    use crate::config::RunnerConfig;
    use crate::program::{Program, Segment};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn hold_remaining_never_negative_and_only_counts_in_band(
            temps in proptest::collection::vec(400.0f64..600.0, 1..200),
        ) {
            let config = RunnerConfig::default();
            let program = Program::new("p", vec![Segment::new(500.0, 100.0, 30.0)], 1290.0).unwrap();
            let mut ctx = FsmContext::new(config.clone(), program);
            let mut fsm = Fsm::new(states::build_state_table(), StateId::Idle);
            fsm.start(&mut ctx);
            ctx.measured = 500.0;
            fsm.force_transition(StateId::Ramp, &mut ctx);
            fsm.tick(&mut ctx);
            prop_assert_eq!(fsm.current_state(), StateId::Hold);

            for t in temps {
                let before = ctx.hold_remaining_secs;
                ctx.measured = t;
                fsm.tick(&mut ctx);
                prop_assert!(ctx.hold_remaining_secs >= 0.0);
                if (t - 500.0).abs() > config.hold_tolerance {
                    prop_assert_eq!(ctx.hold_remaining_secs, before);
                }
                if fsm.current_state() == StateId::Complete {
                    break;
                }
            }
        }

        #[test]
        fn setpoint_stays_between_start_and_target(
            start in 0.0f64..1200.0,
            target in 0.0f64..1200.0,
            rate in 1.0f64..2000.0,
            cycles in 1usize..100,
        ) {
            let program = Program::new("p", vec![Segment::new(target, rate, 0.0)], 1290.0).unwrap();
            let mut ctx = FsmContext::new(RunnerConfig::default(), program);
            let mut fsm = Fsm::new(states::build_state_table(), StateId::Idle);
            fsm.start(&mut ctx);
            ctx.measured = start;
            fsm.force_transition(StateId::Ramp, &mut ctx);
            let (lo, hi) = (start.min(target), start.max(target));
            for _ in 0..cycles {
                fsm.tick(&mut ctx);
                prop_assert!(ctx.setpoint >= lo - 1e-9 && ctx.setpoint <= hi + 1e-9);
                if fsm.current_state() != StateId::Ramp {
                    break;
                }
            }
        }
    }
}
