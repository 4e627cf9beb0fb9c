//! Control-loop sessions.
//!
//! A session is one program firing or one autotune run on its own
//! thread, stopped through its own [`CancelToken`].  The worker owns the
//! runner (or autotuner) for the whole session and hands it back through
//! the join handle, so no lock sits on the control path.
//!
//! ```text
//!   service ──spawn──▶ session thread ──every cycle──▶ read sample snapshot
//!      │                     │                              │
//!      │                     └──▶ runner.cycle / tuner.step ─┴─▶ GuardedValve
//!      └──cancel(Manual)──▶ token ◀──cancel(Emergency)── sensor loop
//! ```

use core::cell::RefCell;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{error, info, warn};
use serde::Serialize;

use super::notify::{Notification, NotificationDispatcher};
use super::ports::{Clock, StoragePort};
use crate::config::GainVariant;
use crate::control::adaptive::AdaptivePidTable;
use crate::control::autotune::{self, AutotunePhase, AutotuneResult, AutotuneStatus, RelayAutotuner};
use crate::drivers::valve::GuardedValve;
use crate::error::ActuatorError;
use crate::firing_log::FiringOutcome;
use crate::runner::{CycleOutcome, ProgramRunner};
use crate::sensors::TemperatureSample;
use crate::sync::{CancelToken, Publisher, StopReason, Subscriber};

// ───────────────────────────────────────────────────────────────
// Active-session slot
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Program,
    Autotune,
}

/// The cancel token of whichever session is running, shared with the
/// sensor loop so a safety emergency can stop it.
#[derive(Clone)]
pub struct SessionSlot {
    inner: Arc<Mutex<CriticalSectionRawMutex, RefCell<Option<(SessionKind, CancelToken)>>>>,
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RefCell::new(None))),
        }
    }
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Occupy the slot.  Returns `false` if a session is already there.
    pub fn claim(&self, kind: SessionKind, token: CancelToken) -> bool {
        self.inner.lock(|s| {
            let mut s = s.borrow_mut();
            if s.is_some() {
                return false;
            }
            *s = Some((kind, token));
            true
        })
    }

    pub fn clear(&self) {
        self.inner.lock(|s| *s.borrow_mut() = None);
    }

    pub fn kind(&self) -> Option<SessionKind> {
        self.inner.lock(|s| s.borrow().as_ref().map(|(k, _)| *k))
    }

    /// Cancel the active session, if any.  Returns the kind cancelled.
    pub fn cancel(&self, reason: StopReason) -> Option<SessionKind> {
        self.inner.lock(|s| {
            s.borrow().as_ref().map(|(kind, token)| {
                token.cancel(reason);
                *kind
            })
        })
    }
}

// ───────────────────────────────────────────────────────────────
// Shared session inputs
// ───────────────────────────────────────────────────────────────

/// Everything a session reads or drives besides its own controller.
#[derive(Clone)]
pub struct ControlDeps {
    pub clock: Arc<dyn Clock>,
    pub samples: Subscriber<TemperatureSample>,
    pub valve: Arc<GuardedValve>,
    pub notify: NotificationDispatcher,
    pub store: Arc<dyn StoragePort>,
    /// Real time between cycles.
    pub period: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    Completed,
    Stopped,
    Aborted,
    Failed,
}

impl From<FiringOutcome> for SessionEnd {
    fn from(o: FiringOutcome) -> Self {
        match o {
            FiringOutcome::Completed => Self::Completed,
            FiringOutcome::Running | FiringOutcome::Stopped => Self::Stopped,
            FiringOutcome::Aborted => Self::Aborted,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Program session
// ───────────────────────────────────────────────────────────────

/// Run an already started `runner` until it finishes or `cancel` fires.
pub fn run_program(runner: &mut ProgramRunner, deps: &ControlDeps, cancel: &CancelToken) -> SessionEnd {
    info!("CONTROL | program session running");
    loop {
        if cancel.sleep(deps.period) {
            break;
        }
        let sample = deps.samples.read();
        let now = deps.clock.now_secs();
        match runner.cycle(&sample, now) {
            CycleOutcome::Continue | CycleOutcome::Skipped => {}
            CycleOutcome::Finished(outcome) => return outcome.into(),
            CycleOutcome::Idle => return SessionEnd::Stopped,
        }
    }

    let now = deps.clock.now_secs();
    match cancel.reason() {
        Some(StopReason::Emergency) => {
            runner.emergency_stop(now);
            SessionEnd::Aborted
        }
        _ => {
            runner.stop(now);
            SessionEnd::Stopped
        }
    }
}

pub fn spawn_program(
    mut runner: ProgramRunner,
    deps: ControlDeps,
    cancel: CancelToken,
    slot: SessionSlot,
) -> std::io::Result<JoinHandle<(ProgramRunner, SessionEnd)>> {
    std::thread::Builder::new()
        .name("control".into())
        .spawn(move || {
            let end = run_program(&mut runner, &deps, &cancel);
            slot.clear();
            info!("CONTROL | program session ended: {end:?}");
            (runner, end)
        })
}

// ───────────────────────────────────────────────────────────────
// Autotune session
// ───────────────────────────────────────────────────────────────

/// Where a finished autotune lands its gains.
pub struct AutotuneSink {
    pub table: Arc<std::sync::Mutex<AdaptivePidTable>>,
    pub variant: GainVariant,
    pub status: Publisher<AutotuneStatus>,
}

/// Drive a started `tuner` until it completes, fails or is cancelled.
pub fn run_autotune(
    tuner: &mut RelayAutotuner,
    deps: &ControlDeps,
    sink: &AutotuneSink,
    cancel: &CancelToken,
) -> SessionEnd {
    info!("CONTROL | autotune session running");
    let end = loop {
        if cancel.sleep(deps.period) {
            break None;
        }
        let sample = deps.samples.read();
        if !sample.connected {
            warn!("AUTOTUNE | no valid reading, step skipped");
            continue;
        }
        let now = deps.clock.now_secs();
        let command = tuner.step(sample.hot, now);
        sink.status.publish(tuner.status());
        match command {
            Some(valve) if tuner.is_running() => match deps.valve.set_position(valve) {
                Ok(_) => {}
                Err(ActuatorError::EmergencyLatched) => {
                    warn!("AUTOTUNE | valve latched by an emergency, aborting");
                    tuner.stop();
                    break Some(SessionEnd::Aborted);
                }
                Err(e) => {
                    error!("AUTOTUNE | valve fault ({e}), aborting");
                    tuner.stop();
                    if let Err(e) = deps.valve.emergency_close() {
                        error!("AUTOTUNE | emergency close failed: {e}");
                    }
                    break Some(SessionEnd::Failed);
                }
            },
            _ => break Some(finish_autotune(tuner, deps, sink)),
        }
    };

    let end = end.unwrap_or_else(|| {
        tuner.stop();
        match cancel.reason() {
            Some(StopReason::Emergency) => {
                if let Err(e) = deps.valve.emergency_close() {
                    error!("AUTOTUNE | emergency close failed: {e}");
                }
                SessionEnd::Aborted
            }
            _ => {
                close_valve(&deps.valve);
                SessionEnd::Stopped
            }
        }
    });
    sink.status.publish(tuner.status());
    end
}

fn close_valve(valve: &GuardedValve) {
    if let Err(e) = valve.set_position(0.0) {
        warn!("CONTROL | close valve: {e}");
    }
}

fn finish_autotune(tuner: &RelayAutotuner, deps: &ControlDeps, sink: &AutotuneSink) -> SessionEnd {
    close_valve(&deps.valve);
    match (tuner.phase(), tuner.result()) {
        (AutotunePhase::Complete, Some(result)) => {
            apply_autotune(result, deps, sink);
            SessionEnd::Completed
        }
        _ => {
            if let Some(e) = tuner.error() {
                error!("AUTOTUNE | failed: {e}");
            }
            SessionEnd::Failed
        }
    }
}

/// Persist the result, seed the gain table and tell the operator.
pub fn apply_autotune(result: &AutotuneResult, deps: &ControlDeps, sink: &AutotuneSink) {
    if let Err(e) = autotune::save_result(deps.store.as_ref(), result) {
        warn!("AUTOTUNE | result not saved: {e}");
    }
    let gains = result.gains(sink.variant);
    sink.table
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .set_base_from_autotuning(gains);
    info!(
        "AUTOTUNE | {:?} gains applied: Kp={:.4} Ki={:.6} Kd={:.2}",
        sink.variant, gains.kp, gains.ki, gains.kd
    );
    deps.notify
        .send(Notification::autotune_complete(gains.kp, gains.ki, gains.kd));
}

pub fn spawn_autotune(
    mut tuner: RelayAutotuner,
    deps: ControlDeps,
    sink: AutotuneSink,
    cancel: CancelToken,
    slot: SessionSlot,
) -> std::io::Result<JoinHandle<(RelayAutotuner, AutotuneSink, SessionEnd)>> {
    std::thread::Builder::new()
        .name("autotune".into())
        .spawn(move || {
            let end = run_autotune(&mut tuner, &deps, &sink, &cancel);
            slot.clear();
            info!("CONTROL | autotune session ended: {end:?}");
            (tuner, sink, end)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_holds_one_session() {
        let slot = SessionSlot::new();
        let a = CancelToken::new();
        assert!(slot.claim(SessionKind::Program, a.clone()));
        assert!(!slot.claim(SessionKind::Autotune, CancelToken::new()));
        assert_eq!(slot.kind(), Some(SessionKind::Program));

        assert_eq!(slot.cancel(StopReason::Emergency), Some(SessionKind::Program));
        assert_eq!(a.reason(), Some(StopReason::Emergency));

        slot.clear();
        assert_eq!(slot.cancel(StopReason::Manual), None);
        assert!(slot.claim(SessionKind::Autotune, CancelToken::new()));
    }

    #[test]
    fn firing_outcome_maps_to_session_end() {
        assert_eq!(SessionEnd::from(FiringOutcome::Completed), SessionEnd::Completed);
        assert_eq!(SessionEnd::from(FiringOutcome::Aborted), SessionEnd::Aborted);
    }
}
