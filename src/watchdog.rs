//! Independent supervisory watchdog.
//!
//! Runs on its own thread with its own cadence and never waits on the
//! control loop.  Any one of three conditions trips it:
//!
//! 1. **Heartbeat stale**: the sensor loop stopped calling [`Watchdog::feed`].
//! 2. **Sensor stale**: no valid reading reported for longer than the
//!    sensor timeout.
//! 3. **Over-temperature**: the last known temperature is above the
//!    ceiling.  This duplicates the safety monitor on purpose so either
//!    path alone can shut the kiln down.
//!
//! ## Shutdown cascade
//!
//! ```text
//!   trigger ──▶ solenoid.close()          (fastest physical cutoff)
//!           ──▶ valve.emergency_close()   (latches the guarded valve)
//!           ──▶ watchdog alert            (rate limited by cooldown)
//! ```
//!
//! The latch is sticky.  While triggered the loop keeps running but
//! skips its checks until [`Watchdog::reset`].

use core::cell::RefCell;
use core::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::notify::{Notification, NotificationDispatcher};
use crate::app::ports::Clock;
use crate::config::WatchdogConfig;
use crate::drivers::solenoid::SolenoidValve;
use crate::drivers::valve::GuardedValve;
use crate::error::ActuatorError;
use crate::sync::CancelToken;

/// Why the watchdog tripped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerReason {
    HeartbeatStale { age: f64 },
    SensorStale { age: f64 },
    OverTemperature { temp: f64, limit: f64 },
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeartbeatStale { age } => {
                write!(f, "sensor loop heartbeat stale for {age:.0}s")
            }
            Self::SensorStale { age } => write!(f, "no valid sensor reading for {age:.0}s"),
            Self::OverTemperature { temp, limit } => write!(
                f,
                "over-temperature {temp:.1}\u{00b0}C (limit {limit:.0}\u{00b0}C)"
            ),
        }
    }
}

/// What one trigger did, step by step.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerReport {
    pub reason: TriggerReason,
    pub solenoid: Result<(), ActuatorError>,
    pub valve: Result<(), ActuatorError>,
    /// False when the alert was suppressed by the cooldown.
    pub notified: bool,
}

/// Result of a single supervisory check.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Healthy,
    AlreadyTriggered,
    Triggered(TriggerReport),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchdogStatus {
    pub running: bool,
    pub triggered: bool,
    pub reason: Option<TriggerReason>,
    pub trigger_count: u32,
    pub heartbeat_age_secs: f64,
    pub sensor_age_secs: f64,
    pub last_temperature: f64,
    pub check_failures: u32,
    pub solenoid_enabled: bool,
    pub solenoid_open: bool,
}

struct WatchdogState {
    last_heartbeat: f64,
    last_sensor_ok: f64,
    last_temperature: f64,
    triggered: bool,
    reason: Option<TriggerReason>,
    trigger_count: u32,
    last_notification: Option<f64>,
    check_failures: u32,
}

pub struct Watchdog {
    config: WatchdogConfig,
    clock: Arc<dyn Clock>,
    solenoid: Arc<SolenoidValve>,
    valve: Arc<GuardedValve>,
    notify: NotificationDispatcher,
    state: Mutex<CriticalSectionRawMutex, RefCell<WatchdogState>>,
    running: AtomicBool,
}

impl Watchdog {
    pub fn new(
        config: &WatchdogConfig,
        clock: Arc<dyn Clock>,
        solenoid: Arc<SolenoidValve>,
        valve: Arc<GuardedValve>,
        notify: NotificationDispatcher,
    ) -> Self {
        let now = clock.now_secs();
        Self {
            config: config.clone(),
            clock,
            solenoid,
            valve,
            notify,
            state: Mutex::new(RefCell::new(WatchdogState {
                last_heartbeat: now,
                last_sensor_ok: now,
                last_temperature: 0.0,
                triggered: false,
                reason: None,
                trigger_count: 0,
                last_notification: None,
                check_failures: 0,
            })),
            running: AtomicBool::new(false),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Arm the watchdog and open the gas solenoid.  A tripped latch
    /// survives a restart: the solenoid stays shut until [`Watchdog::reset`].
    pub fn start(&self) -> Result<(), ActuatorError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let now = self.clock.now_secs();
        let triggered = self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.last_heartbeat = now;
            s.last_sensor_ok = now;
            s.triggered
        });
        info!(
            "WATCHDOG | armed (interval {}s, sensor timeout {}s, heartbeat timeout {}s)",
            self.config.interval_secs,
            self.config.sensor_timeout_secs,
            self.config.heartbeat_timeout_secs
        );
        if triggered {
            warn!("WATCHDOG | still triggered, solenoid kept closed until reset");
            return Ok(());
        }
        self.solenoid.open()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        info!("WATCHDOG | stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run [`Watchdog::check`] every `interval` until `cancel` fires or
    /// [`Watchdog::stop`] is called.  A panic inside a check is caught,
    /// counted and logged; the loop carries on.
    pub fn run(&self, cancel: &CancelToken, interval: Duration) {
        info!("WATCHDOG | loop running");
        while self.is_running() && !cancel.is_cancelled() {
            if catch_unwind(AssertUnwindSafe(|| self.check())).is_err() {
                let failures = self.state.lock(|s| {
                    let mut s = s.borrow_mut();
                    s.check_failures += 1;
                    s.check_failures
                });
                error!("WATCHDOG | check panicked (failure #{failures}), continuing");
            }
            if cancel.sleep(interval) {
                break;
            }
        }
        info!("WATCHDOG | loop exited");
    }

    pub fn spawn(
        self: Arc<Self>,
        cancel: CancelToken,
        interval: Duration,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || self.run(&cancel, interval))
    }

    // ── Inputs from the sensor loop ───────────────────────────

    /// Heartbeat.  The sensor loop calls this once per tick.
    pub fn feed(&self) {
        let now = self.clock.now_secs();
        self.state.lock(|s| s.borrow_mut().last_heartbeat = now);
    }

    pub fn report_sensor_ok(&self, temperature: f64) {
        let now = self.clock.now_secs();
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.last_sensor_ok = now;
            s.last_temperature = temperature;
        });
    }

    /// A failed read.  Freshness is not refreshed, so the sensor timeout
    /// fires on its own if the outage persists.
    pub fn report_sensor_error(&self) {}

    // ── Supervision ───────────────────────────────────────────

    /// One supervisory pass.  Checks run in order heartbeat, sensor
    /// freshness, over-temperature; the first failing one trips the latch.
    pub fn check(&self) -> CheckOutcome {
        let now = self.clock.now_secs();
        let (triggered, heartbeat_age, sensor_age, last_temp) = self.state.lock(|s| {
            let s = s.borrow();
            (
                s.triggered,
                now - s.last_heartbeat,
                now - s.last_sensor_ok,
                s.last_temperature,
            )
        });
        if triggered {
            return CheckOutcome::AlreadyTriggered;
        }

        let reason = if heartbeat_age > self.config.heartbeat_timeout_secs {
            TriggerReason::HeartbeatStale { age: heartbeat_age }
        } else if sensor_age > self.config.sensor_timeout_secs {
            TriggerReason::SensorStale { age: sensor_age }
        } else if last_temp > self.config.over_temp {
            TriggerReason::OverTemperature {
                temp: last_temp,
                limit: self.config.over_temp,
            }
        } else {
            return CheckOutcome::Healthy;
        };
        CheckOutcome::Triggered(self.trigger(reason, now))
    }

    fn trigger(&self, reason: TriggerReason, now: f64) -> TriggerReport {
        let count = self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.triggered = true;
            s.reason = Some(reason);
            s.trigger_count += 1;
            s.trigger_count
        });
        error!("WATCHDOG | EMERGENCY #{count}: {reason}");

        let solenoid = self.solenoid.close();
        let valve = self
            .valve
            .emergency_close()
            .inspect_err(|e| error!("WATCHDOG | valve emergency close failed: {e}"));

        let due = self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let due = s
                .last_notification
                .is_none_or(|t| now - t > self.config.notification_cooldown_secs);
            if due {
                s.last_notification = Some(now);
            }
            due
        });
        let notified = due
            && self
                .notify
                .send(Notification::watchdog_emergency(&reason.to_string(), count));
        if !due {
            warn!("WATCHDOG | alert suppressed by cooldown");
        }

        TriggerReport {
            reason,
            solenoid,
            valve,
            notified,
        }
    }

    /// Clear the latch after a manual intervention and reopen the solenoid.
    /// The guarded valve latch is released separately by the service.
    pub fn reset(&self) -> Result<(), ActuatorError> {
        let now = self.clock.now_secs();
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.triggered = false;
            s.reason = None;
            s.last_heartbeat = now;
            s.last_sensor_ok = now;
        });
        info!("WATCHDOG | reset, back to normal");
        self.solenoid.open()
    }

    pub fn is_triggered(&self) -> bool {
        self.state.lock(|s| s.borrow().triggered)
    }

    pub fn status(&self) -> WatchdogStatus {
        let now = self.clock.now_secs();
        self.state.lock(|s| {
            let s = s.borrow();
            WatchdogStatus {
                running: self.is_running(),
                triggered: s.triggered,
                reason: s.reason,
                trigger_count: s.trigger_count,
                heartbeat_age_secs: ((now - s.last_heartbeat) * 10.0).round() / 10.0,
                sensor_age_secs: ((now - s.last_sensor_ok) * 10.0).round() / 10.0,
                last_temperature: s.last_temperature,
                check_failures: s.check_failures,
                solenoid_enabled: self.solenoid.is_enabled(),
                solenoid_open: self.solenoid.is_open(),
            }
        })
    }
}
