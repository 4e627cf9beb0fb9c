//! Sensor and safety polling loop.
//!
//! ```text
//!  every tick:  watchdog.feed()
//!               sensor.read() ──▶ TemperatureSample ──▶ cooling-rate tracker
//!                    │                                        │
//!                    ├── connected ──▶ watchdog.report_sensor_ok
//!                    └── lost ───────▶ monitor.check_sensor_health
//!               monitor.check_all ──▶ emergency edge? ──▶ valve latch + cancel session
//!               publish sample and safety report
//! ```
//!
//! This loop is the only writer of the published temperature and safety
//! snapshots.  Notifications are edge-triggered: one per outage, one per
//! reconnect, one per fast-cooling episode, one per emergency.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{error, info, warn};

use super::commands::SensorCommand;
use super::control_loop::SessionSlot;
use super::notify::{Notification, NotificationDispatcher};
use super::ports::{Clock, SensorPort};
use crate::config::KilnConfig;
use crate::drivers::valve::GuardedValve;
use crate::safety::{AlarmCode, AlarmLevel, SafetyAction, SafetyMonitor, SafetyReport};
use crate::sensors::{CoolingRateTracker, TemperatureSample};
use crate::sync::{CancelToken, Publisher, StopReason};
use crate::watchdog::Watchdog;

pub type SensorCommands = Channel<CriticalSectionRawMutex, SensorCommand, 4>;

/// What one tick observed.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub sample: TemperatureSample,
    pub safety: SafetyReport,
    /// True on the tick that latched the emergency.
    pub emergency_triggered: bool,
}

pub struct SensorLoop {
    sensor: Box<dyn SensorPort>,
    monitor: SafetyMonitor,
    cooling: CoolingRateTracker,
    clock: Arc<dyn Clock>,
    watchdog: Arc<Watchdog>,
    valve: Arc<GuardedValve>,
    notify: NotificationDispatcher,
    session: SessionSlot,
    commands: Arc<SensorCommands>,
    samples: Publisher<TemperatureSample>,
    safety: Publisher<SafetyReport>,
    last: TemperatureSample,
    connected: bool,
    outage_notified: bool,
    fast_cooling: bool,
    emergency: bool,
}

impl SensorLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &KilnConfig,
        sensor: Box<dyn SensorPort>,
        clock: Arc<dyn Clock>,
        watchdog: Arc<Watchdog>,
        valve: Arc<GuardedValve>,
        notify: NotificationDispatcher,
        session: SessionSlot,
        samples: Publisher<TemperatureSample>,
        safety: Publisher<SafetyReport>,
    ) -> Self {
        let s = &config.sensor;
        Self {
            sensor,
            monitor: SafetyMonitor::new(&config.safety),
            cooling: CoolingRateTracker::new(
                s.history_size,
                s.cooling_window_secs,
                s.cooling_min_temp,
                s.cooling_max_temp,
            ),
            clock,
            watchdog,
            valve,
            notify,
            session,
            commands: Arc::new(Channel::new()),
            samples,
            safety,
            last: TemperatureSample::default(),
            // a sensor missing at boot still gets its outage alert
            connected: true,
            outage_notified: false,
            fast_cooling: false,
            emergency: false,
        }
    }

    /// Sender for [`SensorCommand`]s, drained at the start of each tick.
    pub fn commands(&self) -> Arc<SensorCommands> {
        self.commands.clone()
    }

    pub fn monitor(&self) -> &SafetyMonitor {
        &self.monitor
    }

    fn handle_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_receive() {
            match cmd {
                SensorCommand::ResetEmergency => {
                    self.monitor.reset_emergency();
                    self.emergency = false;
                    self.fast_cooling = false;
                    info!("SAFETY | monitor reset");
                }
            }
        }
    }

    /// One polling pass.
    pub fn tick(&mut self) -> TickReport {
        self.handle_commands();
        self.watchdog.feed();

        let now = self.clock.now_secs();
        let reading = self.sensor.read();
        let mut sensor_alarm = None;
        let sample = if reading.connected {
            let mut sample = TemperatureSample::new(reading.hot, reading.cold, now);
            sample.cooling_rate = self.cooling.record(now, reading.hot);
            self.watchdog.report_sensor_ok(reading.hot);
            if !self.connected && self.outage_notified {
                info!("SAFETY | sensor reconnected at {:.1}\u{00b0}C", reading.hot);
                self.notify.send(Notification::sensor_reconnect(reading.hot));
            }
            self.connected = true;
            self.outage_notified = false;
            sample
        } else {
            self.watchdog.report_sensor_error();
            sensor_alarm = self.monitor.check_sensor_health(false);
            if !self.outage_notified {
                warn!("SAFETY | sensor read failed");
                self.notify.send(Notification::sensor_error());
                self.outage_notified = true;
            }
            self.connected = false;
            TemperatureSample::disconnected(&self.last, now)
        };
        self.last = sample;

        let mut report = self
            .monitor
            .check_all(sample.hot, sample.cold, sample.cooling_rate, now);
        if let Some(alarm) = sensor_alarm {
            report.is_safe = false;
            report.emergency_stop = true;
            report.alarms.insert(0, alarm);
            report.actions.insert(0, SafetyAction::EmergencyShutdown);
        }

        // ── Fast cooling, once per episode ──
        let cooling_now = report.has(AlarmCode::FastCooling);
        if cooling_now && !self.fast_cooling {
            self.notify
                .send(Notification::fast_cooling(sample.cooling_rate));
        }
        self.fast_cooling = cooling_now;

        // ── Emergency edge ──
        let emergency_triggered = report.emergency_stop && !self.emergency;
        if emergency_triggered {
            self.emergency_shutdown(&report, &sample);
        }
        self.emergency = report.emergency_stop;

        self.samples.publish(sample);
        self.safety.publish(report.clone());
        TickReport {
            sample,
            safety: report,
            emergency_triggered,
        }
    }

    fn emergency_shutdown(&self, report: &SafetyReport, sample: &TemperatureSample) {
        let reason = report
            .alarms
            .iter()
            .find(|a| a.level == AlarmLevel::Critical)
            .map_or_else(|| "safety limit".to_owned(), |a| a.message.clone());
        error!("SAFETY | EMERGENCY: {reason}");
        if let Err(e) = self.valve.emergency_close() {
            error!("SAFETY | emergency close failed: {e}");
        }
        if let Some(kind) = self.session.cancel(StopReason::Emergency) {
            warn!("SAFETY | {kind:?} session cancelled");
        }
        if report.has(AlarmCode::OverTemp) {
            self.notify.send(Notification::over_temp(sample.hot));
        }
        self.notify.send(Notification::emergency_stop(&reason));
    }

    pub fn run(&mut self, cancel: &CancelToken, interval: Duration) {
        info!("SENSOR | loop running every {interval:?}");
        loop {
            self.tick();
            if cancel.sleep(interval) {
                break;
            }
        }
        info!("SENSOR | loop exited");
    }

    pub fn spawn(mut self, cancel: CancelToken, interval: Duration) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("sensor".into())
            .spawn(move || self.run(&cancel, interval))
    }
}
