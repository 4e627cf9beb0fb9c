//! Program runner: drives one firing through the phase FSM.
//!
//! ```text
//!   TemperatureSample ─▶ smoothing ─▶ Fsm tick (setpoint, hold) ─▶ PID
//!                                                                  │
//!        ExecutionSnapshot ◀─ publish ◀─ FiringLog ◀─ limiter ─▶ GuardedValve
//! ```
//!
//! The runner is driven by the control loop, one [`ProgramRunner::cycle`]
//! per cycle interval.  It is the only writer of the execution snapshot.
//! Phase handlers report transitions as events; the runner turns them
//! into firing-log entries and notifications.

use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::app::notify::{Notification, NotificationDispatcher};
use crate::app::ports::StoragePort;
use crate::config::{KilnConfig, RunnerConfig};
use crate::control::limiter::ValveRateLimiter;
use crate::control::pid::PidController;
use crate::control::scheduling::AdaptivePidManager;
use crate::drivers::valve::GuardedValve;
use crate::error::{ActuatorError, Error, Result};
use crate::firing_log::{ControlCycleRecord, EventKind, FiringLog, FiringOutcome};
use crate::fsm::context::{FsmContext, PhaseEvent};
use crate::fsm::{Fsm, StateId, states};
use crate::program::Program;
use crate::sensors::{SmoothingWindow, TemperatureSample};
use crate::sync::Publisher;

/// Published view of the running program.  Values are rounded for display.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ExecutionSnapshot {
    pub running: bool,
    pub program_name: String,
    pub phase: StateId,
    /// 1-based; 0 when nothing has run.
    pub segment: usize,
    pub total_segments: usize,
    pub setpoint: f64,
    pub target: f64,
    pub rate: f64,
    pub hold_remaining_minutes: f64,
    pub valve: f64,
    pub valve_limited: bool,
    pub temperature: f64,
    pub temp_cold: f64,
    pub ramp_progress: f64,
    pub elapsed_minutes: f64,
    pub remaining_minutes: f64,
}

/// What one call to [`ProgramRunner::cycle`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No program is executing.
    Idle,
    /// No usable reading; valve left where it was.
    Skipped,
    Continue,
    Finished(FiringOutcome),
}

struct Execution {
    fsm: Fsm,
    ctx: FsmContext,
    started_at: f64,
}

fn r1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

pub struct ProgramRunner {
    config: RunnerConfig,
    pid: PidController,
    limiter: ValveRateLimiter,
    smoothing: SmoothingWindow,
    scheduler: Option<AdaptivePidManager>,
    valve: Arc<GuardedValve>,
    notify: NotificationDispatcher,
    store: Arc<dyn StoragePort>,
    publisher: Publisher<ExecutionSnapshot>,
    log: FiringLog,
    exec: Option<Execution>,
    last_valve: f64,
    last_limited: bool,
    last_log_at: Option<f64>,
    previous: Option<(f64, f64)>,
    last_sample: TemperatureSample,
    last_firing_key: Option<String>,
}

impl ProgramRunner {
    pub fn new(
        config: &KilnConfig,
        valve: Arc<GuardedValve>,
        notify: NotificationDispatcher,
        store: Arc<dyn StoragePort>,
        publisher: Publisher<ExecutionSnapshot>,
    ) -> Self {
        Self {
            config: config.runner.clone(),
            pid: PidController::new(&config.pid),
            limiter: ValveRateLimiter::new(config.runner.valve_max_step),
            smoothing: SmoothingWindow::new(config.runner.smoothing_window),
            scheduler: None,
            valve,
            notify,
            store,
            publisher,
            log: FiringLog::new(),
            exec: None,
            last_valve: 0.0,
            last_limited: false,
            last_log_at: None,
            previous: None,
            last_sample: TemperatureSample::default(),
            last_firing_key: None,
        }
    }

    /// Schedule PID gains by temperature from the adaptive table.
    pub fn with_scheduler(mut self, scheduler: AdaptivePidManager) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Begin executing `program` from the temperature in `sample`.
    pub fn start(&mut self, program: Program, sample: &TemperatureSample, now: f64) -> Result<()> {
        if self.is_running() {
            return Err(Error::Busy);
        }
        if self.valve.is_latched() {
            return Err(Error::EmergencyLatched);
        }
        if !sample.connected {
            return Err(Error::SensorUnavailable);
        }

        self.pid.reset(now);
        self.smoothing.clear();
        let measured = self.smoothing.push(sample.hot);
        self.last_valve = self.valve.position();
        self.limiter.reset(self.last_valve);
        self.last_limited = false;
        self.last_log_at = None;
        self.previous = None;
        self.last_sample = *sample;

        let name = program.name.clone();
        let segments = program.len();
        let mut ctx = FsmContext::new(self.config.clone(), program);
        let mut fsm = Fsm::new(states::build_state_table(), StateId::Idle);
        fsm.start(&mut ctx);
        ctx.measured = measured;

        self.log.start(&name, now);
        self.notify.send(Notification::program_start(&name));

        fsm.force_transition(StateId::Ramp, &mut ctx);
        let events: Vec<PhaseEvent> = ctx.events.drain(..).collect();
        self.exec = Some(Execution {
            fsm,
            ctx,
            started_at: now,
        });
        self.handle_events(&events, now);
        info!("RUNNER | \"{name}\" started at {measured:.1}\u{00b0}C, {segments} segments");
        self.publish(now);
        Ok(())
    }

    /// One control cycle.
    pub fn cycle(&mut self, sample: &TemperatureSample, now: f64) -> CycleOutcome {
        if !self.is_running() {
            return CycleOutcome::Idle;
        }
        self.last_sample = *sample;
        if !sample.connected {
            warn!("RUNNER | no valid reading, cycle skipped");
            self.publish(now);
            return CycleOutcome::Skipped;
        }
        let measured = self.smoothing.push(sample.hot);

        // ── Phase logic ──
        let Some(exec) = self.exec.as_mut() else {
            return CycleOutcome::Idle;
        };
        exec.ctx.measured = measured;
        exec.fsm.tick(&mut exec.ctx);
        let phase = exec.fsm.current_state();
        let setpoint = exec.ctx.setpoint;
        let events: Vec<PhaseEvent> = exec.ctx.events.drain(..).collect();
        self.handle_events(&events, now);

        if phase == StateId::Complete {
            self.complete(now);
            return CycleOutcome::Finished(FiringOutcome::Completed);
        }

        // ── PID ──
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.update_tunings(measured, &mut self.pid);
        }
        let raw = self.pid.compute(setpoint, measured, now);
        let cmd = self.limiter.limit(raw);
        if cmd.limited {
            warn!(
                "RUNNER | valve step limited: PID {:.1}% -> {:.1}%",
                cmd.requested, cmd.value
            );
            if !self.last_limited {
                self.log.event(
                    EventKind::ValveLimited,
                    format!("PID {:.1}% limited to {:.1}%", cmd.requested, cmd.value),
                    now,
                );
            }
        }
        self.last_limited = cmd.limited;

        // ── Valve ──
        match self.valve.set_position(cmd.value) {
            Ok(actual) => {
                if (actual - cmd.value).abs() > 0.5 {
                    debug!("RUNNER | valve stopped at {actual:.1}% (asked {:.1}%)", cmd.value);
                }
                self.last_valve = actual;
                self.limiter.reset(actual);
            }
            Err(ActuatorError::EmergencyLatched) => {
                warn!("RUNNER | valve latched by an emergency, aborting");
                self.emergency_stop(now);
                return CycleOutcome::Finished(FiringOutcome::Aborted);
            }
            Err(e) => {
                self.fault(e, now);
                return CycleOutcome::Finished(FiringOutcome::Aborted);
            }
        }

        // ── Log ──
        let temp_rate = match self.previous {
            Some((t, temp)) if now > t => (measured - temp) / ((now - t) / 60.0),
            _ => 0.0,
        };
        self.previous = Some((now, measured));
        if self
            .last_log_at
            .is_none_or(|t| now - t >= self.config.log_interval_secs)
        {
            let terms = self.pid.terms();
            self.log.record_cycle(ControlCycleRecord {
                time_min: (self.log.elapsed_minutes(now) * 100.0).round() / 100.0,
                temp: measured,
                temp_cold: sample.cold,
                temp_rate,
                setpoint,
                error: terms.error,
                valve_position: self.last_valve,
                pid_raw: raw,
                valve_limited: cmd.limited,
                pid: terms,
                cooling_rate: sample.cooling_rate,
            });
            self.last_log_at = Some(now);
        }

        debug!(
            "RUNNER | T={measured:.1} SP={setpoint:.1} PID={raw:.1}% V={:.1}%{} [{phase:?}]",
            self.last_valve,
            if cmd.limited { " [LIM]" } else { "" }
        );
        self.publish(now);
        CycleOutcome::Continue
    }

    /// Manual stop.  Closes the valve and saves the log as `stopped`.
    pub fn stop(&mut self, now: f64) -> bool {
        if !self.halt(StateId::Stopped) {
            return false;
        }
        if let Err(e) = self.valve.set_position(0.0) {
            debug!("RUNNER | close on stop: {e}");
        }
        self.settle_closed();
        self.last_firing_key = self.log.finish(FiringOutcome::Stopped, now, self.store.as_ref());
        self.notify.send(Notification::program_stopped(self.program_name()));
        self.publish(now);
        true
    }

    /// Emergency stop.  Latches and closes the valve; the log is saved as
    /// `aborted` without statistics.  Alerts are left to the caller.
    pub fn emergency_stop(&mut self, now: f64) -> bool {
        let was_running = self.halt(StateId::Stopped);
        if let Err(e) = self.valve.emergency_close() {
            error!("RUNNER | emergency close failed: {e}");
        }
        self.settle_closed();
        if was_running {
            error!("RUNNER | EMERGENCY STOP");
            self.last_firing_key =
                self.log
                    .finish(FiringOutcome::Aborted, now, self.store.as_ref());
            self.publish(now);
        }
        was_running
    }

    fn fault(&mut self, e: ActuatorError, now: f64) {
        error!("RUNNER | valve fault ({e}), aborting program");
        self.halt(StateId::Error);
        if let Err(e) = self.valve.emergency_close() {
            error!("RUNNER | emergency close failed: {e}");
        }
        self.settle_closed();
        self.last_firing_key = self.log.finish(FiringOutcome::Aborted, now, self.store.as_ref());
        self.notify
            .send(Notification::emergency_stop(&format!("valve fault: {e}")));
        self.publish(now);
    }

    fn complete(&mut self, now: f64) {
        if let Err(e) = self.valve.set_position(0.0) {
            warn!("RUNNER | close on completion: {e}");
        }
        self.settle_closed();
        let elapsed = self.elapsed_minutes(now);
        self.last_firing_key =
            self.log
                .finish(FiringOutcome::Completed, now, self.store.as_ref());
        info!(
            "RUNNER | \"{}\" complete in {elapsed:.1} min",
            self.program_name()
        );
        self.notify
            .send(Notification::program_complete(self.program_name(), elapsed));
        self.publish(now);
    }

    /// Force the FSM into `phase` if a program is active.
    fn halt(&mut self, phase: StateId) -> bool {
        match self.exec.as_mut() {
            Some(exec) if exec.fsm.current_state().is_active() => {
                exec.fsm.force_transition(phase, &mut exec.ctx);
                exec.ctx.events.clear();
                true
            }
            _ => false,
        }
    }

    fn settle_closed(&mut self) {
        self.last_valve = 0.0;
        self.last_limited = false;
        self.limiter.reset(0.0);
    }

    fn handle_events(&mut self, events: &[PhaseEvent], now: f64) {
        for event in events {
            match *event {
                PhaseEvent::RampStart {
                    index,
                    from,
                    target,
                    rate,
                    heating,
                } => {
                    let total = self.exec.as_ref().map_or(0, |e| e.ctx.segment_count());
                    self.log.event(
                        EventKind::RampStart,
                        format!(
                            "ramp {}/{total}: {from:.1} -> {target:.0}\u{00b0}C at {rate:.0}\u{00b0}C/h ({})",
                            index + 1,
                            if heating { "heating" } else { "cooling" }
                        ),
                        now,
                    );
                    if !heating {
                        self.notify.send(Notification::cooling_start(from));
                    }
                }
                PhaseEvent::RampComplete {
                    index,
                    temperature,
                    target,
                } => self.log.event(
                    EventKind::RampComplete,
                    format!(
                        "ramp {} reached {temperature:.1}\u{00b0}C (target {target:.0}\u{00b0}C)",
                        index + 1
                    ),
                    now,
                ),
                PhaseEvent::HoldStart {
                    target, minutes, ..
                } => {
                    self.log.event(
                        EventKind::HoldStart,
                        format!("hold {target:.0}\u{00b0}C for {minutes:.0} min"),
                        now,
                    );
                    self.notify.send(Notification::hold_start(target, minutes));
                }
                PhaseEvent::HoldComplete {
                    target, minutes, ..
                } => self.log.event(
                    EventKind::HoldComplete,
                    format!("hold {target:.0}\u{00b0}C complete ({minutes:.0} min)"),
                    now,
                ),
                PhaseEvent::SegmentComplete {
                    index,
                    total,
                    target,
                } => {
                    self.log.event(
                        EventKind::SegmentComplete,
                        format!("segment {}/{total} complete", index + 1),
                        now,
                    );
                    self.notify
                        .send(Notification::ramp_complete(index + 1, total, target));
                }
                PhaseEvent::ProgramComplete => {}
            }
        }
    }

    // ── Read side ─────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.exec
            .as_ref()
            .is_some_and(|e| e.fsm.current_state().is_active())
    }

    pub fn phase(&self) -> StateId {
        self.exec
            .as_ref()
            .map_or(StateId::Idle, |e| e.fsm.current_state())
    }

    pub fn setpoint(&self) -> Option<f64> {
        self.exec.as_ref().map(|e| e.ctx.setpoint)
    }

    pub fn hold_remaining_secs(&self) -> f64 {
        self.exec.as_ref().map_or(0.0, |e| e.ctx.hold_remaining_secs)
    }

    pub fn valve_output(&self) -> f64 {
        self.last_valve
    }

    pub fn pid(&self) -> &PidController {
        &self.pid
    }

    /// Storage key of the last saved firing log.
    pub fn last_firing_key(&self) -> Option<&str> {
        self.last_firing_key.as_deref()
    }

    fn program_name(&self) -> &str {
        self.exec.as_ref().map_or("", |e| e.ctx.program.name.as_str())
    }

    fn elapsed_minutes(&self, now: f64) -> f64 {
        self.exec
            .as_ref()
            .map_or(0.0, |e| (now - e.started_at) / 60.0)
    }

    pub fn snapshot(&self, now: f64) -> ExecutionSnapshot {
        let Some(exec) = self.exec.as_ref() else {
            return ExecutionSnapshot::default();
        };
        let ctx = &exec.ctx;
        let phase = exec.fsm.current_state();
        let seg = ctx.current();
        let hold_left = (phase == StateId::Hold).then(|| ctx.hold_remaining_secs / 60.0);
        let remaining = if phase.is_active() {
            ctx.program.remaining_minutes(
                ctx.segment,
                ctx.measured,
                hold_left,
                self.config.min_estimate_rate,
            )
        } else {
            0.0
        };
        let ramp_progress = match phase {
            StateId::Ramp => ctx.ramp_progress(),
            StateId::Hold | StateId::Complete => 100.0,
            _ => 0.0,
        };
        ExecutionSnapshot {
            running: phase.is_active(),
            program_name: ctx.program.name.clone(),
            phase,
            segment: ctx.segment + 1,
            total_segments: ctx.segment_count(),
            setpoint: r1(ctx.setpoint),
            target: seg.target,
            rate: seg.rate,
            hold_remaining_minutes: r1(hold_left.unwrap_or(0.0)),
            valve: r1(self.last_valve),
            valve_limited: self.last_limited,
            temperature: r1(ctx.measured),
            temp_cold: r1(self.last_sample.cold),
            ramp_progress: r1(ramp_progress),
            elapsed_minutes: r1((now - exec.started_at) / 60.0),
            remaining_minutes: r1(remaining.max(0.0)),
        }
    }

    fn publish(&self, now: f64) {
        self.publisher.publish(self.snapshot(now));
    }
}
