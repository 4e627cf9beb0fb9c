//! Program phase handlers and table builder.
//!
//! ```text
//!  IDLE ──start──▶ RAMP ──[measured within tolerance]──▶ HOLD
//!                   ▲  │                                   │
//!                   │  └──[hold = 0]──┐        [countdown done]
//!                   │                 ▼                    ▼
//!                   └──[more segments]── segment complete ◀┘
//!                                          │
//!                                   [last segment]
//!                                          ▼
//!                                       COMPLETE
//!
//!  RAMP / HOLD ──stop / emergency──▶ STOPPED      actuator fault ──▶ ERROR
//! ```
//!
//! Stop, emergency and actuator faults are forced by the runner; the
//! handlers below only implement the temperature-driven transitions.

use super::context::{FsmContext, PhaseEvent};
use super::{StateDescriptor, StateId};
use log::{debug, info, warn};

pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        StateDescriptor {
            id: StateId::Idle,
            name: "Idle",
            on_enter: None,
            on_exit: None,
            on_update: stay,
        },
        StateDescriptor {
            id: StateId::Ramp,
            name: "Ramp",
            on_enter: Some(ramp_enter),
            on_exit: None,
            on_update: ramp_update,
        },
        StateDescriptor {
            id: StateId::Hold,
            name: "Hold",
            on_enter: Some(hold_enter),
            on_exit: None,
            on_update: hold_update,
        },
        StateDescriptor {
            id: StateId::Complete,
            name: "Complete",
            on_enter: Some(complete_enter),
            on_exit: None,
            on_update: stay,
        },
        StateDescriptor {
            id: StateId::Stopped,
            name: "Stopped",
            on_enter: Some(stopped_enter),
            on_exit: None,
            on_update: stay,
        },
        StateDescriptor {
            id: StateId::Error,
            name: "Error",
            on_enter: Some(error_enter),
            on_exit: None,
            on_update: stay,
        },
    ]
}

fn stay(_ctx: &mut FsmContext) -> Option<StateId> {
    None
}

/// Leave the finished segment: next ramp, or the end of the program.
fn segment_done(ctx: &mut FsmContext) -> Option<StateId> {
    let seg = ctx.current();
    ctx.events.push(PhaseEvent::SegmentComplete {
        index: ctx.segment,
        total: ctx.segment_count(),
        target: seg.target,
    });
    if ctx.is_last_segment() {
        Some(StateId::Complete)
    } else {
        ctx.segment += 1;
        Some(StateId::Ramp)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  RAMP
// ═══════════════════════════════════════════════════════════════════════════

fn ramp_enter(ctx: &mut FsmContext) {
    let seg = ctx.current();
    ctx.ramp_start_temp = ctx.measured;
    ctx.setpoint = ctx.measured;
    ctx.heating = seg.target > ctx.measured;
    ctx.hold_total_secs = 0.0;
    ctx.hold_remaining_secs = 0.0;
    info!(
        "RAMP {}/{}: {:.1}\u{00b0}C -> {:.0}\u{00b0}C at {:.0}\u{00b0}C/h ({})",
        ctx.segment + 1,
        ctx.segment_count(),
        ctx.measured,
        seg.target,
        seg.rate,
        if ctx.heating { "heating" } else { "cooling" }
    );
    ctx.events.push(PhaseEvent::RampStart {
        index: ctx.segment,
        from: ctx.measured,
        target: seg.target,
        rate: seg.rate,
        heating: ctx.heating,
    });
}

fn ramp_update(ctx: &mut FsmContext) -> Option<StateId> {
    let seg = ctx.current();
    let step = seg.rate / 3600.0 * ctx.cycle_secs;
    let tolerance = ctx.config.ramp_tolerance;

    let reached = if ctx.heating {
        ctx.setpoint = (ctx.setpoint + step).min(seg.target);
        ctx.measured >= seg.target - tolerance
    } else {
        ctx.setpoint = (ctx.setpoint - step).max(seg.target);
        ctx.measured <= seg.target + tolerance
    };
    debug!(
        "RAMP {}: T={:.1} SP={:.1} target={:.0}",
        ctx.segment + 1,
        ctx.measured,
        ctx.setpoint,
        seg.target
    );
    if !reached {
        return None;
    }

    info!(
        "RAMP {} reached: T={:.1}\u{00b0}C, target {:.0}\u{00b0}C (\u{00b1}{:.0})",
        ctx.segment + 1,
        ctx.measured,
        seg.target,
        tolerance
    );
    ctx.events.push(PhaseEvent::RampComplete {
        index: ctx.segment,
        temperature: ctx.measured,
        target: seg.target,
    });
    if seg.hold_minutes > 0.0 {
        Some(StateId::Hold)
    } else {
        segment_done(ctx)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  HOLD: countdown only runs while the measured temperature is in band
// ═══════════════════════════════════════════════════════════════════════════

fn hold_enter(ctx: &mut FsmContext) {
    let seg = ctx.current();
    ctx.setpoint = seg.target;
    ctx.hold_total_secs = seg.hold_minutes * 60.0;
    ctx.hold_remaining_secs = ctx.hold_total_secs;
    info!("HOLD: {:.0}\u{00b0}C for {:.0} min", seg.target, seg.hold_minutes);
    ctx.events.push(PhaseEvent::HoldStart {
        index: ctx.segment,
        target: seg.target,
        minutes: seg.hold_minutes,
    });
}

fn hold_update(ctx: &mut FsmContext) -> Option<StateId> {
    let seg = ctx.current();
    ctx.setpoint = seg.target;

    let diff = ctx.measured - seg.target;
    if diff.abs() > ctx.config.hold_tolerance {
        debug!(
            "HOLD paused: {:.1}\u{00b0}C {} target, {:.1} min left",
            diff.abs(),
            if diff > 0.0 { "above" } else { "below" },
            ctx.hold_remaining_secs / 60.0
        );
        return None;
    }

    ctx.hold_remaining_secs = (ctx.hold_remaining_secs - ctx.cycle_secs).max(0.0);
    if ctx.hold_remaining_secs > 0.0 {
        return None;
    }
    info!("HOLD complete: {:.0}\u{00b0}C for {:.0} min", seg.target, seg.hold_minutes);
    ctx.events.push(PhaseEvent::HoldComplete {
        index: ctx.segment,
        target: seg.target,
        minutes: seg.hold_minutes,
    });
    segment_done(ctx)
}

// ═══════════════════════════════════════════════════════════════════════════
//  Terminal phases
// ═══════════════════════════════════════════════════════════════════════════

fn complete_enter(ctx: &mut FsmContext) {
    info!("COMPLETE: \"{}\" finished", ctx.program.name);
    ctx.events.push(PhaseEvent::ProgramComplete);
}

fn stopped_enter(ctx: &mut FsmContext) {
    info!(
        "STOPPED: \"{}\" halted in segment {}",
        ctx.program.name,
        ctx.segment + 1
    );
}

fn error_enter(ctx: &mut FsmContext) {
    warn!(
        "ERROR: \"{}\" aborted in segment {} at {:.1}\u{00b0}C",
        ctx.program.name,
        ctx.segment + 1,
        ctx.measured
    );
}
