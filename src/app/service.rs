//! Kiln service: the hexagonal core's outer shell.
//!
//! [`KilnService`] wires the loops together, owns every long-lived handle
//! and exposes the command API.  All I/O flows through the port traits
//! in [`KilnPorts`], so the whole service runs against mocks or the
//! simulated kiln exactly as it runs against hardware.
//!
//! ```text
//!  SensorPort ──▶ sensor loop ──▶ samples ──▶ control session ──▶ GuardedValve ──▶ ValvePort
//!                    │  │                         ▲
//!                    │  └── emergency ── cancel ──┘
//!                    └──▶ watchdog.feed          watchdog ──▶ SolenoidPort
//!
//!  every loop ──▶ NotificationDispatcher ──▶ notify worker ──▶ Notifier
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{error, info, warn};
use serde::Serialize;

use crate::config::KilnConfig;
use crate::control::adaptive::{AdaptivePidTable, TableSummary};
use crate::control::autotune::{AutotuneStatus, RelayAutotuner};
use crate::control::pid::PidGains;
use crate::control::scheduling::AdaptivePidManager;
use crate::drivers::solenoid::SolenoidValve;
use crate::drivers::valve::GuardedValve;
use crate::error::{Error, Result};
use crate::learning::analyzer::{FiringAnalysis, PidAnalyzer};
use crate::learning::learner::{LearnOutcome, LearnerMode, LearnerStatus, PidLearner};
use crate::program::Program;
use crate::runner::{ExecutionSnapshot, ProgramRunner};
use crate::safety::SafetyReport;
use crate::sensors::TemperatureSample;
use crate::sync::{CancelToken, StopReason, Subscriber, snapshot};
use crate::watchdog::{Watchdog, WatchdogStatus};

use super::commands::{AppCommand, SensorCommand};
use super::control_loop::{
    self, AutotuneSink, ControlDeps, SessionEnd, SessionKind, SessionSlot,
};
use super::notify::{Notification, NotificationDispatcher};
use super::ports::{Clock, Notifier, SensorPort, SolenoidPort, StoragePort, ValvePort};
use super::sensor_loop::{SensorCommands, SensorLoop};

/// The adapters a service runs against.
pub struct KilnPorts {
    pub sensor: Box<dyn SensorPort>,
    pub valve: Arc<dyn ValvePort>,
    /// `None` when no fail-safe solenoid is fitted.
    pub solenoid: Option<Arc<dyn SolenoidPort>>,
    pub notifier: Box<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn StoragePort>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KilnStatus {
    pub session: Option<SessionKind>,
    pub last_session_end: Option<SessionEnd>,
    pub temperature: TemperatureSample,
    pub safety: SafetyReport,
    pub valve_latched: bool,
    pub execution: ExecutionSnapshot,
    pub autotune: AutotuneStatus,
    pub watchdog: WatchdogStatus,
    pub learner: LearnerStatus,
    pub notifications_dropped: u32,
}

enum Session {
    Program(JoinHandle<(ProgramRunner, SessionEnd)>),
    Autotune(JoinHandle<(RelayAutotuner, AutotuneSink, SessionEnd)>),
}

impl Session {
    fn is_finished(&self) -> bool {
        match self {
            Self::Program(h) => h.is_finished(),
            Self::Autotune(h) => h.is_finished(),
        }
    }
}

pub struct KilnService {
    config: KilnConfig,
    time_scale: f64,
    clock: Arc<dyn Clock>,
    store: Arc<dyn StoragePort>,
    valve: Arc<GuardedValve>,
    solenoid: Arc<SolenoidValve>,
    watchdog: Arc<Watchdog>,
    notify: NotificationDispatcher,
    slot: SessionSlot,
    sensor_commands: Arc<SensorCommands>,

    samples: Subscriber<TemperatureSample>,
    safety: Subscriber<SafetyReport>,
    execution: Subscriber<ExecutionSnapshot>,
    autotune_status: Subscriber<AutotuneStatus>,

    runner: Option<ProgramRunner>,
    tuner: Option<(RelayAutotuner, AutotuneSink)>,
    session: Option<Session>,
    last_end: Option<SessionEnd>,

    table: Arc<Mutex<AdaptivePidTable>>,
    analyzer: PidAnalyzer,
    learner: PidLearner,

    loops: CancelToken,
    threads: Vec<JoinHandle<()>>,
}

impl KilnService {
    // ── Lifecycle ─────────────────────────────────────────────

    /// Validate `config`, spawn the sensor, watchdog and notification
    /// threads, and open the gas solenoid.
    pub fn start(config: KilnConfig, ports: KilnPorts) -> Result<Self> {
        Self::start_scaled(config, ports, 1.0)
    }

    /// As [`KilnService::start`], with every loop period divided by
    /// `time_scale`.  Used with a scaled clock for accelerated simulation.
    pub fn start_scaled(config: KilnConfig, ports: KilnPorts, time_scale: f64) -> Result<Self> {
        config.validate()?;
        let time_scale = if time_scale.is_finite() { time_scale.max(1.0) } else { 1.0 };
        let KilnPorts {
            sensor,
            valve,
            solenoid,
            notifier,
            clock,
            store,
        } = ports;

        let valve = Arc::new(GuardedValve::new(valve));
        let solenoid = Arc::new(SolenoidValve::new(
            solenoid.filter(|_| config.watchdog.solenoid_enabled),
        ));
        let (notify, worker) = NotificationDispatcher::new(notifier);
        let watchdog = Arc::new(Watchdog::new(
            &config.watchdog,
            clock.clone(),
            solenoid.clone(),
            valve.clone(),
            notify.clone(),
        ));

        // ── Learning side ──
        let static_gains = PidGains::new(config.pid.kp, config.pid.ki, config.pid.kd);
        let table = AdaptivePidTable::load_or_create(&config.adaptive, static_gains, store.clone());
        let mut analyzer = PidAnalyzer::new(&config.analyzer, &config.adaptive.bands);
        match analyzer.load_saved(store.as_ref()) {
            Ok(n) if n > 0 => info!("ANALYZER | {n} saved analyses loaded"),
            Ok(_) => {}
            Err(e) => warn!("ANALYZER | saved analyses unreadable: {e}"),
        }
        let learner = PidLearner::load(&config.learner, store.clone());
        let table = Arc::new(Mutex::new(table));

        // ── Snapshots ──
        let (sample_tx, samples) = snapshot(TemperatureSample::default());
        let (safety_tx, safety) = snapshot(SafetyReport::default());
        let (exec_tx, execution) = snapshot(ExecutionSnapshot::default());
        let tuner = RelayAutotuner::new(&config.autotune, config.safety.max_temp);
        let (tune_tx, autotune_status) = snapshot(tuner.status());

        let schedule = table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe();
        let runner = ProgramRunner::new(&config, valve.clone(), notify.clone(), store.clone(), exec_tx)
            .with_scheduler(AdaptivePidManager::new(schedule, &config.adaptive, static_gains));
        let sink = AutotuneSink {
            table: table.clone(),
            variant: config.autotune.apply,
            status: tune_tx,
        };

        // ── Loops ──
        let slot = SessionSlot::new();
        let loops = CancelToken::new();
        let pace = |secs: f64| Duration::from_secs_f64((secs / time_scale).max(0.001));
        let sensor_loop = SensorLoop::new(
            &config,
            sensor,
            clock.clone(),
            watchdog.clone(),
            valve.clone(),
            notify.clone(),
            slot.clone(),
            sample_tx,
            safety_tx,
        );
        let sensor_commands = sensor_loop.commands();

        if let Err(e) = watchdog.start() {
            error!("WATCHDOG | solenoid did not open: {e}");
        }
        let threads = vec![
            worker.spawn(loops.clone())?,
            sensor_loop.spawn(loops.clone(), pace(config.sensor.update_interval_secs))?,
            watchdog
                .clone()
                .spawn(loops.clone(), pace(config.watchdog.interval_secs))?,
        ];
        notify.send(Notification::system_start());
        info!("SERVICE | kiln controller v{} started", env!("CARGO_PKG_VERSION"));

        Ok(Self {
            config,
            time_scale,
            clock,
            store,
            valve,
            solenoid,
            watchdog,
            notify,
            slot,
            sensor_commands,
            samples,
            safety,
            execution,
            autotune_status,
            runner: Some(runner),
            tuner: Some((tuner, sink)),
            session: None,
            last_end: None,
            table,
            analyzer,
            learner,
            loops,
            threads,
        })
    }

    /// Stop any session, halt the loops and leave the gas shut off.
    pub fn shutdown(mut self) {
        if self.slot.cancel(StopReason::Manual).is_some() {
            self.wait_session();
        }
        self.watchdog.stop();
        self.loops.cancel(StopReason::Manual);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("SERVICE | a loop thread panicked");
            }
        }
        if let Err(e) = self.valve.set_position(0.0) {
            warn!("SERVICE | valve close on shutdown: {e}");
        }
        if let Err(e) = self.solenoid.close() {
            error!("SERVICE | solenoid close on shutdown: {e}");
        }
        info!("SERVICE | shut down");
    }

    fn pace(&self, secs: f64) -> Duration {
        Duration::from_secs_f64((secs / self.time_scale).max(0.001))
    }

    fn deps(&self) -> ControlDeps {
        ControlDeps {
            clock: self.clock.clone(),
            samples: self.samples.clone(),
            valve: self.valve.clone(),
            notify: self.notify.clone(),
            store: self.store.clone(),
            period: self.pace(self.config.runner.cycle_interval_secs),
        }
    }

    /// Common preconditions for starting a session.
    fn ready_sample(&mut self) -> Result<TemperatureSample> {
        self.reap();
        if self.slot.kind().is_some() || self.session.is_some() {
            return Err(Error::Busy);
        }
        if self.valve.is_latched() || self.watchdog.is_triggered() {
            return Err(Error::EmergencyLatched);
        }
        let sample = self.samples.read();
        if !sample.connected {
            return Err(Error::SensorUnavailable);
        }
        Ok(sample)
    }

    // ── Program ───────────────────────────────────────────────

    pub fn start_program(&mut self, program: Program) -> Result<()> {
        let sample = self.ready_sample()?;
        let mut runner = match self.runner.take() {
            Some(r) => r,
            None => self.fresh_runner(),
        };
        let now = self.clock.now_secs();
        if let Err(e) = runner.start(program, &sample, now) {
            self.runner = Some(runner);
            return Err(e);
        }
        let token = CancelToken::new();
        self.slot.claim(SessionKind::Program, token.clone());
        match control_loop::spawn_program(runner, self.deps(), token, self.slot.clone()) {
            Ok(handle) => {
                self.session = Some(Session::Program(handle));
                Ok(())
            }
            Err(e) => {
                self.slot.clear();
                if let Err(e) = self.valve.set_position(0.0) {
                    warn!("SERVICE | valve close: {e}");
                }
                Err(e.into())
            }
        }
    }

    /// Replacement for a runner lost with a failed session thread.
    fn fresh_runner(&mut self) -> ProgramRunner {
        let (tx, rx) = snapshot(ExecutionSnapshot::default());
        self.execution = rx;
        let static_gains = PidGains::new(self.config.pid.kp, self.config.pid.ki, self.config.pid.kd);
        let schedule = self.table().subscribe();
        ProgramRunner::new(&self.config, self.valve.clone(), self.notify.clone(), self.store.clone(), tx)
            .with_scheduler(AdaptivePidManager::new(schedule, &self.config.adaptive, static_gains))
    }

    /// Manual stop of whichever session runs.  Returns how it ended.
    pub fn stop_program(&mut self) -> Option<SessionEnd> {
        self.slot.cancel(StopReason::Manual)?;
        self.wait_session()
    }

    /// Latch the valve shut, close the solenoid and abort any session.
    pub fn emergency_stop(&mut self) -> Option<SessionEnd> {
        error!("SERVICE | EMERGENCY STOP requested");
        if let Err(e) = self.valve.emergency_close() {
            error!("SERVICE | emergency close failed: {e}");
        }
        if let Err(e) = self.solenoid.close() {
            error!("SERVICE | solenoid close failed: {e}");
        }
        self.notify
            .send(Notification::emergency_stop("manual emergency stop"));
        self.slot.cancel(StopReason::Emergency)?;
        self.wait_session()
    }

    // ── Autotune ──────────────────────────────────────────────

    pub fn start_autotune(&mut self, target: Option<f64>) -> Result<()> {
        self.ready_sample()?;
        let (mut tuner, sink) = self.tuner.take().ok_or(Error::Busy)?;
        let target = target.unwrap_or(self.config.autotune.default_temperature);
        if let Err(e) = tuner.start(target, self.clock.now_secs()) {
            self.tuner = Some((tuner, sink));
            return Err(e.into());
        }
        sink.status.publish(tuner.status());
        let token = CancelToken::new();
        self.slot.claim(SessionKind::Autotune, token.clone());
        match control_loop::spawn_autotune(tuner, self.deps(), sink, token, self.slot.clone()) {
            Ok(handle) => {
                self.session = Some(Session::Autotune(handle));
                Ok(())
            }
            Err(e) => {
                self.slot.clear();
                Err(e.into())
            }
        }
    }

    pub fn stop_autotune(&mut self) -> Option<SessionEnd> {
        if self.slot.kind() != Some(SessionKind::Autotune) {
            return None;
        }
        self.stop_program()
    }

    // ── Session bookkeeping ───────────────────────────────────

    /// Collect a session that ended on its own.
    fn reap(&mut self) {
        if self.session.as_ref().is_some_and(Session::is_finished) {
            self.wait_session();
        }
    }

    /// Block until the current session ends and take its controller back.
    pub fn wait_session(&mut self) -> Option<SessionEnd> {
        let end = match self.session.take()? {
            Session::Program(handle) => match handle.join() {
                Ok((runner, end)) => {
                    let key = runner.last_firing_key().map(str::to_owned);
                    self.runner = Some(runner);
                    if end == SessionEnd::Completed
                        && let Some(key) = key
                    {
                        self.learn_from_firing(&key);
                    }
                    end
                }
                Err(_) => {
                    error!("SERVICE | program session panicked");
                    self.slot.clear();
                    self.close_after_panic();
                    SessionEnd::Failed
                }
            },
            Session::Autotune(handle) => match handle.join() {
                Ok((tuner, sink, end)) => {
                    self.tuner = Some((tuner, sink));
                    end
                }
                Err(_) => {
                    error!("SERVICE | autotune session panicked");
                    self.slot.clear();
                    self.close_after_panic();
                    let tuner = RelayAutotuner::new(&self.config.autotune, self.config.safety.max_temp);
                    let (tx, rx) = snapshot(tuner.status());
                    self.autotune_status = rx;
                    self.tuner = Some((
                        tuner,
                        AutotuneSink {
                            table: self.table.clone(),
                            variant: self.config.autotune.apply,
                            status: tx,
                        },
                    ));
                    SessionEnd::Failed
                }
            },
        };
        self.last_end = Some(end);
        Some(end)
    }

    fn close_after_panic(&self) {
        if let Err(e) = self.valve.emergency_close() {
            error!("SERVICE | emergency close failed: {e}");
        }
    }

    // ── Safety ────────────────────────────────────────────────

    /// Operator acknowledgement after an emergency.  Clears the monitor
    /// (on the sensor loop's next tick), the watchdog and the valve latch,
    /// and reopens the solenoid.
    pub fn reset_emergency(&mut self) -> Result<()> {
        if self
            .sensor_commands
            .try_send(SensorCommand::ResetEmergency)
            .is_err()
        {
            warn!("SERVICE | sensor command queue full");
        }
        self.valve.release();
        self.watchdog.reset()?;
        info!("SERVICE | emergency reset");
        Ok(())
    }

    // ── Learning ──────────────────────────────────────────────

    fn table(&self) -> std::sync::MutexGuard<'_, AdaptivePidTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Analyze one completed firing and hand the result to the learner.
    fn learn_from_firing(&mut self, key: &str) {
        match self.analyzer.analyze_firing(self.store.as_ref(), key) {
            Ok(Some(analysis)) => {
                let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
                let outcome = self.learner.process_analysis(&analysis, &mut table);
                info!(
                    "LEARNER | {key}: score {}, {} applied, {} pending",
                    analysis.overall_score, outcome.applied, outcome.pending
                );
            }
            Ok(None) => info!("ANALYZER | {key} not analyzable"),
            Err(e) => warn!("ANALYZER | {key}: {e}"),
        }
    }

    /// Analyze one stored firing.
    pub fn analyze(&mut self, key: &str) -> Result<Option<FiringAnalysis>> {
        Ok(self.analyzer.analyze_firing(self.store.as_ref(), key)?)
    }

    /// Analyze every stored firing, then learn.  With `all`, only issues
    /// recurring across recent firings are acted on; otherwise the latest
    /// analysis is used as is.
    pub fn learn(&mut self, all: bool) -> Result<LearnOutcome> {
        self.analyzer.analyze_all(self.store.as_ref())?;
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = if all {
            self.learner
                .process_all_analyses(self.analyzer.analyses(), &mut table)
        } else if let Some(latest) = self.analyzer.latest() {
            self.learner.process_analysis(latest, &mut table)
        } else {
            LearnOutcome::default()
        };
        Ok(outcome)
    }

    pub fn analyses(&self) -> &[FiringAnalysis] {
        self.analyzer.analyses()
    }

    pub fn approve_adjustments(&mut self) -> usize {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        self.learner.approve_pending(&mut table)
    }

    pub fn reject_adjustments(&mut self) -> usize {
        self.learner.reject_pending()
    }

    pub fn set_learner_mode(&mut self, mode: LearnerMode) {
        self.learner.set_mode(mode);
    }

    pub fn rollback_band(&mut self, band: u32) -> bool {
        self.table().rollback_band(band)
    }

    pub fn rollback_all(&mut self) {
        self.table().rollback_all();
    }

    pub fn table_summary(&self) -> TableSummary {
        self.table().summary()
    }

    // ── Commands ──────────────────────────────────────────────

    /// Process an external command.
    pub fn handle_command(&mut self, cmd: AppCommand) -> Result<()> {
        match cmd {
            AppCommand::StartProgram(program) => self.start_program(program)?,
            AppCommand::StopProgram => {
                self.stop_program();
            }
            AppCommand::EmergencyStop => {
                self.emergency_stop();
            }
            AppCommand::StartAutotune(target) => self.start_autotune(target)?,
            AppCommand::StopAutotune => {
                self.stop_autotune();
            }
            AppCommand::ResetEmergency => self.reset_emergency()?,
            AppCommand::Learn => {
                self.learn(true)?;
            }
            AppCommand::ApproveAdjustments => {
                self.approve_adjustments();
            }
            AppCommand::RejectAdjustments => {
                self.reject_adjustments();
            }
            AppCommand::SetLearnerMode(mode) => self.set_learner_mode(mode),
            AppCommand::RollbackBand(band) => {
                if !self.rollback_band(band) {
                    warn!("SERVICE | no band {band} to roll back");
                }
            }
            AppCommand::RollbackAll => self.rollback_all(),
        }
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn samples(&self) -> Subscriber<TemperatureSample> {
        self.samples.clone()
    }

    pub fn execution(&self) -> Subscriber<ExecutionSnapshot> {
        self.execution.clone()
    }

    pub fn session(&self) -> Option<SessionKind> {
        self.slot.kind()
    }

    pub fn config(&self) -> &KilnConfig {
        &self.config
    }

    pub fn status(&self) -> KilnStatus {
        KilnStatus {
            session: self.slot.kind(),
            last_session_end: self.last_end,
            temperature: self.samples.read(),
            safety: self.safety.read(),
            valve_latched: self.valve.is_latched(),
            execution: self.execution.read(),
            autotune: self.autotune_status.read(),
            watchdog: self.watchdog.status(),
            learner: self.learner.status(),
            notifications_dropped: self.notify.dropped(),
        }
    }
}
