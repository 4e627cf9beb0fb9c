//! Relay-feedback autotuner (Åström–Hägglund).
//!
//! ```text
//!   Idle ──start──▶ Heating ──(within margin)──▶ Relay ──(N oscillations)──▶ Complete
//!                      │                           │
//!                      └──────(timeout)────────────┴──▶ Error
//! ```
//!
//! *Heating* opens the valve by a step table keyed on the distance to the
//! test temperature.  *Relay* toggles between `relay_high` and
//! `relay_low` with a hysteresis band, which drives the kiln into a limit
//! cycle.  Setpoint crossings give the critical period Pu and the peak
//! envelope gives the amplitude `a`; the critical gain follows as
//! `Ku = 4d / (πa)` with `d` the relay swing.

use heapless::HistoryBuffer;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::pid::PidGains;
use crate::app::ports::{StorageError, StoragePort};
use crate::config::{AutotuneConfig, GainVariant};
use crate::error::AutotuneError;
use crate::storage::{self, Document};

/// Rolling window used for crossing and peak detection.
const BUFFER_LEN: usize = 10;
/// Peaks of each kind averaged into the amplitude.
const AMPLITUDE_PEAKS: usize = 3;
/// Minimum peaks (of either kind) before the amplitude is trusted.
const MIN_PEAKS: usize = 4;

pub const RESULT_KEY: &str = "autotune_result";
pub const HISTORY_KEY: &str = "autotune_history";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutotunePhase {
    Idle,
    Heating,
    Relay,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Crossing {
    pub time: f64,
    pub direction: CrossingDirection,
    pub temp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakKind {
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub time: f64,
    pub kind: PeakKind,
    pub temp: f64,
}

/// Relay levels chosen for a test temperature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelayParams {
    pub high: f64,
    pub low: f64,
    pub hysteresis: f64,
}

impl RelayParams {
    /// Hotter kilns lose more heat, so they get a wider swing and band.
    pub fn for_temperature(target: f64) -> Self {
        let (high, hysteresis) = if target <= 200.0 {
            (15.0, 3.0)
        } else if target <= 400.0 {
            (20.0, 4.0)
        } else if target <= 600.0 {
            (25.0, 5.0)
        } else {
            (30.0, 6.0)
        };
        Self {
            high,
            low: 0.0,
            hysteresis,
        }
    }

    pub fn swing(&self) -> f64 {
        self.high - self.low
    }
}

/// Valve opening during the heating approach.
pub fn heating_valve(distance: f64) -> f64 {
    match distance {
        d if d > 400.0 => 35.0,
        d if d > 300.0 => 30.0,
        d if d > 200.0 => 25.0,
        d if d > 100.0 => 20.0,
        d if d > 50.0 => 15.0,
        d if d > 20.0 => 10.0,
        _ => 5.0,
    }
}

/// Critical-point measurements from a relay experiment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriticalPoint {
    pub ku: f64,
    /// Critical period, seconds.
    pub pu: f64,
    pub amplitude: f64,
}

impl CriticalPoint {
    /// Classic Ziegler–Nichols PID.
    pub fn standard(&self) -> PidGains {
        PidGains::new(
            0.6 * self.ku,
            1.2 * self.ku / self.pu,
            0.075 * self.ku * self.pu,
        )
    }

    /// Softer PI tuning.  No derivative: on a system this slow it mostly
    /// amplifies sensor noise.
    pub fn conservative(&self) -> PidGains {
        PidGains::new(0.45 * self.ku, 0.54 * self.ku / self.pu, 0.0)
    }
}

/// Derive Ku, Pu and amplitude from recorded crossings and peaks.
///
/// Pu is the mean of every-other-crossing interval; the amplitude is half
/// the gap between the mean of the last three maxima and the last three
/// minima.
pub fn critical_point(
    crossings: &[Crossing],
    peaks: &[Peak],
    relay_swing: f64,
    min_crossings: usize,
) -> Result<CriticalPoint, AutotuneError> {
    if crossings.len() < min_crossings.max(3) {
        return Err(AutotuneError::InsufficientCrossings(crossings.len()));
    }
    let periods: Vec<f64> = (2..crossings.len())
        .step_by(2)
        .map(|i| crossings[i].time - crossings[i - 2].time)
        .collect();
    let pu = periods.iter().sum::<f64>() / periods.len() as f64;

    if peaks.len() < MIN_PEAKS {
        return Err(AutotuneError::InsufficientPeaks(peaks.len()));
    }
    let last_mean = |kind: PeakKind| -> Option<f64> {
        let temps: Vec<f64> = peaks
            .iter()
            .filter(|p| p.kind == kind)
            .map(|p| p.temp)
            .collect();
        let tail = &temps[temps.len().saturating_sub(AMPLITUDE_PEAKS)..];
        (!tail.is_empty()).then(|| tail.iter().sum::<f64>() / tail.len() as f64)
    };
    let (Some(avg_max), Some(avg_min)) = (last_mean(PeakKind::Max), last_mean(PeakKind::Min))
    else {
        return Err(AutotuneError::InsufficientPeaks(peaks.len()));
    };
    let amplitude = (avg_max - avg_min) / 2.0;
    if amplitude <= 0.0 || pu <= 0.0 {
        return Err(AutotuneError::ZeroAmplitude);
    }

    Ok(CriticalPoint {
        ku: 4.0 * relay_swing / (core::f64::consts::PI * amplitude),
        pu,
        amplitude,
    })
}

/// Outcome of a completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutotuneResult {
    pub test_temperature: f64,
    pub critical: CriticalPoint,
    pub standard: PidGains,
    pub conservative: PidGains,
    pub relay: RelayParams,
    pub oscillations: usize,
    pub duration_secs: f64,
}

impl AutotuneResult {
    pub fn gains(&self, variant: GainVariant) -> PidGains {
        match variant {
            GainVariant::Standard => self.standard,
            GainVariant::Conservative => self.conservative,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutotuneStatus {
    pub running: bool,
    pub phase: AutotunePhase,
    pub test_temperature: f64,
    pub oscillations: usize,
    pub required_oscillations: usize,
    /// 0–100.
    pub progress: f64,
    pub duration_secs: f64,
    pub relay_state: bool,
    pub relay: RelayParams,
    pub data_points: usize,
}

pub struct RelayAutotuner {
    config: AutotuneConfig,
    max_target: f64,
    phase: AutotunePhase,
    running: bool,
    setpoint: f64,
    relay: RelayParams,
    relay_state: bool,
    started_at: f64,
    last_time: f64,
    buffer: HistoryBuffer<f64, BUFFER_LEN>,
    last_direction: Option<CrossingDirection>,
    crossings: Vec<Crossing>,
    peaks: Vec<Peak>,
    data_points: usize,
    result: Option<AutotuneResult>,
    error: Option<AutotuneError>,
}

impl RelayAutotuner {
    /// `max_target` is the highest test temperature accepted.
    pub fn new(config: &AutotuneConfig, max_target: f64) -> Self {
        Self {
            config: config.clone(),
            max_target,
            phase: AutotunePhase::Idle,
            running: false,
            setpoint: config.default_temperature,
            relay: RelayParams::for_temperature(config.default_temperature),
            relay_state: false,
            started_at: 0.0,
            last_time: 0.0,
            buffer: HistoryBuffer::new(),
            last_direction: None,
            crossings: Vec::new(),
            peaks: Vec::new(),
            data_points: 0,
            result: None,
            error: None,
        }
    }

    pub fn start(&mut self, target: f64, now: f64) -> Result<(), AutotuneError> {
        if self.running {
            return Err(AutotuneError::AlreadyRunning);
        }
        if !target.is_finite() || target <= 0.0 || target > self.max_target {
            return Err(AutotuneError::InvalidTarget(target));
        }
        self.relay = RelayParams::for_temperature(target);
        self.setpoint = target;
        self.phase = AutotunePhase::Heating;
        self.running = true;
        self.relay_state = false;
        self.started_at = now;
        self.last_time = now;
        self.buffer.clear();
        self.last_direction = None;
        self.crossings.clear();
        self.peaks.clear();
        self.data_points = 0;
        self.result = None;
        self.error = None;
        info!(
            "AUTOTUNE | start at {target:.0}\u{00b0}C, relay {:.0}%<->{:.0}%, hysteresis \u{00b1}{:.0}\u{00b0}C, {} oscillations",
            self.relay.low, self.relay.high, self.relay.hysteresis, self.config.min_oscillations
        );
        Ok(())
    }

    /// Abort without producing gains.  The caller closes the valve.
    pub fn stop(&mut self) {
        if self.running {
            info!("AUTOTUNE | stopped by operator");
        }
        self.running = false;
        self.phase = AutotunePhase::Idle;
    }

    /// Feed one reading; returns the valve command, or `None` when no
    /// session is running.
    pub fn step(&mut self, temp: f64, now: f64) -> Option<f64> {
        if !self.running {
            return match self.phase {
                AutotunePhase::Complete | AutotunePhase::Error => Some(0.0),
                _ => None,
            };
        }
        let elapsed = now - self.started_at;
        self.last_time = now;
        self.data_points += 1;
        self.buffer.write(temp);

        if elapsed > self.config.max_duration_secs {
            error!(
                "AUTOTUNE | timeout after {:.0} min, aborting",
                self.config.max_duration_secs / 60.0
            );
            self.fail(AutotuneError::Timeout);
            return Some(0.0);
        }

        match self.phase {
            AutotunePhase::Heating => Some(self.heating_step(temp)),
            AutotunePhase::Relay => Some(self.relay_step(temp, elapsed)),
            AutotunePhase::Complete | AutotunePhase::Error => Some(0.0),
            AutotunePhase::Idle => None,
        }
    }

    fn heating_step(&mut self, temp: f64) -> f64 {
        let distance = self.setpoint - temp;
        if distance < self.config.relay_switch_margin {
            info!("AUTOTUNE | {temp:.1}\u{00b0}C reached, relay feedback active");
            self.phase = AutotunePhase::Relay;
            self.relay_state = false;
        }
        let valve = heating_valve(distance);
        debug!("AUTOTUNE | heating {temp:.1}\u{00b0}C, valve {valve:.0}%");
        valve
    }

    fn relay_step(&mut self, temp: f64, elapsed: f64) -> f64 {
        if temp < self.setpoint - self.relay.hysteresis {
            self.relay_state = true;
        } else if temp > self.setpoint + self.relay.hysteresis {
            self.relay_state = false;
        }
        let valve = if self.relay_state {
            self.relay.high
        } else {
            self.relay.low
        };

        self.detect_crossing(temp, elapsed);
        self.detect_peak(elapsed);

        if self.crossings.len() / 2 >= self.config.min_oscillations {
            info!(
                "AUTOTUNE | {} oscillations collected",
                self.crossings.len() / 2
            );
            self.finish(elapsed);
            return 0.0;
        }
        valve
    }

    fn last_n<const N: usize>(&self) -> Option<[f64; N]> {
        let len = self.buffer.len();
        if len < N {
            return None;
        }
        let mut out = [0.0; N];
        for (slot, v) in out.iter_mut().zip(self.buffer.oldest_ordered().skip(len - N)) {
            *slot = *v;
        }
        Some(out)
    }

    fn detect_crossing(&mut self, temp: f64, elapsed: f64) {
        let Some([prev, _]) = self.last_n::<2>() else {
            return;
        };
        let sp = self.setpoint;
        let direction = if prev < sp && sp <= temp {
            CrossingDirection::Up
        } else if prev > sp && sp >= temp {
            CrossingDirection::Down
        } else {
            return;
        };
        if self.last_direction == Some(direction) {
            return;
        }
        debug!("AUTOTUNE | crossing {direction:?} at {elapsed:.1}s, {temp:.1}\u{00b0}C");
        self.crossings.push(Crossing {
            time: elapsed,
            direction,
            temp,
        });
        self.last_direction = Some(direction);
    }

    fn detect_peak(&mut self, elapsed: f64) {
        let Some([a, b, c]) = self.last_n::<3>() else {
            return;
        };
        let kind = if a < b && b > c {
            PeakKind::Max
        } else if a > b && b < c {
            PeakKind::Min
        } else {
            return;
        };
        debug!("AUTOTUNE | peak {kind:?} {b:.1}\u{00b0}C");
        self.peaks.push(Peak {
            time: elapsed,
            kind,
            temp: b,
        });
    }

    fn finish(&mut self, elapsed: f64) {
        self.running = false;
        match critical_point(
            &self.crossings,
            &self.peaks,
            self.relay.swing(),
            self.config.min_oscillations * 2,
        ) {
            Ok(critical) => {
                let result = AutotuneResult {
                    test_temperature: self.setpoint,
                    critical,
                    standard: critical.standard(),
                    conservative: critical.conservative(),
                    relay: self.relay,
                    oscillations: self.crossings.len() / 2,
                    duration_secs: elapsed,
                };
                info!(
                    "AUTOTUNE | Ku={:.3} Pu={:.1}s a={:.1}\u{00b0}C -> standard Kp={:.4} Ki={:.6} Kd={:.2}, conservative Kp={:.4} Ki={:.6}",
                    critical.ku,
                    critical.pu,
                    critical.amplitude,
                    result.standard.kp,
                    result.standard.ki,
                    result.standard.kd,
                    result.conservative.kp,
                    result.conservative.ki
                );
                self.phase = AutotunePhase::Complete;
                self.result = Some(result);
            }
            Err(e) => {
                error!("AUTOTUNE | cannot derive gains: {e}");
                self.phase = AutotunePhase::Error;
                self.error = Some(e);
            }
        }
    }

    fn fail(&mut self, e: AutotuneError) {
        self.running = false;
        self.phase = AutotunePhase::Error;
        self.error = Some(e);
    }

    pub fn phase(&self) -> AutotunePhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    /// Present only once the session completed.
    pub fn result(&self) -> Option<&AutotuneResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&AutotuneError> {
        self.error.as_ref()
    }

    pub fn crossings(&self) -> &[Crossing] {
        &self.crossings
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn status(&self) -> AutotuneStatus {
        let oscillations = self.crossings.len() / 2;
        let required = self.config.min_oscillations;
        let progress = (oscillations as f64 / required as f64 * 100.0).min(100.0);
        AutotuneStatus {
            running: self.running,
            phase: self.phase,
            test_temperature: self.setpoint,
            oscillations,
            required_oscillations: required,
            progress: (progress * 10.0).round() / 10.0,
            duration_secs: if self.phase == AutotunePhase::Idle {
                0.0
            } else {
                self.last_time - self.started_at
            },
            relay_state: self.relay_state,
            relay: self.relay,
            data_points: self.data_points,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Persistence
// ───────────────────────────────────────────────────────────────

/// Latest completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutotuneRecord {
    pub version: u32,
    pub date: String,
    pub result: AutotuneResult,
}

impl Document for AutotuneRecord {
    const NAMESPACE: &'static str = "autotune";
    const VERSION: u32 = 1;
}

/// Cross-run summary, for comparing tunings at different temperatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutotuneHistoryEntry {
    pub date: String,
    pub temperature: f64,
    pub duration_minutes: f64,
    pub ku: f64,
    pub pu: f64,
    pub amplitude: f64,
    pub kp: f64,
    pub ki: f64,
    pub relay_high: f64,
    pub hysteresis: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AutotuneHistory {
    pub version: u32,
    pub entries: Vec<AutotuneHistoryEntry>,
}

impl Document for AutotuneHistory {
    const NAMESPACE: &'static str = "autotune";
    const VERSION: u32 = 1;
}

/// Persist a completed result and append it to the history.
pub fn save_result(store: &dyn StoragePort, result: &AutotuneResult) -> Result<(), StorageError> {
    let date = chrono::Local::now().to_rfc3339();
    storage::save(
        store,
        RESULT_KEY,
        &AutotuneRecord {
            version: AutotuneRecord::VERSION,
            date: date.clone(),
            result: result.clone(),
        },
    )?;

    let mut history = match storage::load::<AutotuneHistory>(store, HISTORY_KEY) {
        Ok(Some(h)) => h,
        Ok(None) => AutotuneHistory::default(),
        Err(e) => {
            warn!("AUTOTUNE | history unreadable ({e}), starting a new one");
            AutotuneHistory::default()
        }
    };
    history.version = AutotuneHistory::VERSION;
    history.entries.push(AutotuneHistoryEntry {
        date,
        temperature: result.test_temperature,
        duration_minutes: (result.duration_secs / 6.0).round() / 10.0,
        ku: result.critical.ku,
        pu: result.critical.pu,
        amplitude: result.critical.amplitude,
        kp: result.conservative.kp,
        ki: result.conservative.ki,
        relay_high: result.relay.high,
        hysteresis: result.relay.hysteresis,
    });
    storage::save(store, HISTORY_KEY, &history)?;
    info!("AUTOTUNE | history now holds {} runs", history.entries.len());
    Ok(())
}

pub fn load_history(store: &dyn StoragePort) -> Result<Vec<AutotuneHistoryEntry>, StorageError> {
    Ok(storage::load::<AutotuneHistory>(store, HISTORY_KEY)?
        .map(|h| h.entries)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::json_store::MemoryStore;

    fn tuner() -> RelayAutotuner {
        RelayAutotuner::new(&AutotuneConfig::default(), 1300.0)
    }

    /// Triangle wave around `center` with the given half-amplitude and
    /// period, sampled every `dt` seconds.
    fn triangle(center: f64, amp: f64, period: f64, t: f64) -> f64 {
        let phase = (t % period) / period;
        let x = if phase < 0.5 {
            4.0 * phase - 1.0
        } else {
            3.0 - 4.0 * phase
        };
        center + amp * x
    }

    #[test]
    fn relay_params_follow_temperature() {
        assert_eq!(RelayParams::for_temperature(150.0).high, 15.0);
        assert_eq!(RelayParams::for_temperature(400.0).hysteresis, 4.0);
        assert_eq!(RelayParams::for_temperature(500.0).high, 25.0);
        assert_eq!(RelayParams::for_temperature(900.0).hysteresis, 6.0);
    }

    #[test]
    fn heating_table_is_coarser_further_away() {
        assert_eq!(heating_valve(450.0), 35.0);
        assert_eq!(heating_valve(150.0), 20.0);
        assert_eq!(heating_valve(25.0), 10.0);
        assert_eq!(heating_valve(5.0), 5.0);
    }

    #[test]
    fn rejects_bad_targets_and_double_start() {
        let mut t = tuner();
        assert_eq!(t.start(-1.0, 0.0), Err(AutotuneError::InvalidTarget(-1.0)));
        assert!(t.start(1500.0, 0.0).is_err());
        t.start(500.0, 0.0).unwrap();
        assert_eq!(t.start(500.0, 0.0), Err(AutotuneError::AlreadyRunning));
    }

    #[test]
    fn heating_hands_over_to_relay() {
        let mut t = tuner();
        t.start(500.0, 0.0).unwrap();
        assert_eq!(t.step(20.0, 1.0), Some(35.0));
        assert_eq!(t.phase(), AutotunePhase::Heating);
        assert_eq!(t.step(485.0, 2.0), Some(5.0));
        assert_eq!(t.phase(), AutotunePhase::Relay);
    }

    #[test]
    fn relay_uses_hysteresis() {
        let mut t = tuner();
        t.start(500.0, 0.0).unwrap();
        t.step(490.0, 1.0);
        assert_eq!(t.step(494.0, 2.0), Some(25.0));
        // Inside the band the previous state holds.
        assert_eq!(t.step(503.0, 3.0), Some(25.0));
        assert_eq!(t.step(506.0, 4.0), Some(0.0));
        assert_eq!(t.step(498.0, 5.0), Some(0.0));
    }

    #[test]
    fn synthetic_oscillation_yields_ziegler_nichols_gains() {
        let mut t = tuner();
        t.start(500.0, 0.0).unwrap();
        t.step(triangle(500.0, 10.0, 600.0, 0.0), 0.0);
        let mut now = 0.0;
        while t.is_running() {
            now += 10.0;
            t.step(triangle(500.0, 10.0, 600.0, now), now);
            assert!(now < 10_000.0, "never completed");
        }
        assert_eq!(t.phase(), AutotunePhase::Complete);
        let r = t.result().unwrap();
        assert!((r.critical.pu - 600.0).abs() < 1e-6);
        assert!((r.critical.amplitude - 10.0).abs() < 1e-6);
        let ku = 4.0 * 25.0 / (core::f64::consts::PI * 10.0);
        assert!((r.critical.ku - ku).abs() < 1e-9);
        assert!((r.standard.kp - 0.6 * ku).abs() < 1e-9);
        assert_eq!(r.conservative.kd, 0.0);
        assert_eq!(t.status().progress, 100.0);
    }

    #[test]
    fn critical_point_needs_peaks_of_both_kinds() {
        let crossings: Vec<Crossing> = (0..6)
            .map(|i| Crossing {
                time: f64::from(i) * 100.0,
                direction: if i % 2 == 0 {
                    CrossingDirection::Up
                } else {
                    CrossingDirection::Down
                },
                temp: 500.0,
            })
            .collect();
        let maxima: Vec<Peak> = (0..4)
            .map(|i| Peak {
                time: f64::from(i),
                kind: PeakKind::Max,
                temp: 510.0,
            })
            .collect();
        assert_eq!(
            critical_point(&crossings, &maxima, 25.0, 6),
            Err(AutotuneError::InsufficientPeaks(4))
        );
        assert_eq!(
            critical_point(&crossings[..4], &maxima, 25.0, 6),
            Err(AutotuneError::InsufficientCrossings(4))
        );
    }

    #[test]
    fn timeout_aborts_with_closed_valve() {
        let mut t = tuner();
        t.start(500.0, 0.0).unwrap();
        assert_eq!(t.step(100.0, 43_201.0), Some(0.0));
        assert_eq!(t.phase(), AutotunePhase::Error);
        assert_eq!(t.error(), Some(&AutotuneError::Timeout));
        assert!(t.result().is_none());
    }

    #[test]
    fn stop_returns_to_idle() {
        let mut t = tuner();
        t.start(300.0, 0.0).unwrap();
        t.stop();
        assert_eq!(t.phase(), AutotunePhase::Idle);
        assert_eq!(t.step(100.0, 5.0), None);
    }

    #[test]
    fn results_are_persisted_with_history() {
        let store = MemoryStore::new();
        let critical = CriticalPoint {
            ku: 3.0,
            pu: 600.0,
            amplitude: 10.0,
        };
        let result = AutotuneResult {
            test_temperature: 500.0,
            critical,
            standard: critical.standard(),
            conservative: critical.conservative(),
            relay: RelayParams::for_temperature(500.0),
            oscillations: 3,
            duration_secs: 3600.0,
        };
        save_result(&store, &result).unwrap();
        save_result(&store, &result).unwrap();
        let history = load_history(&store).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].duration_minutes, 60.0);
        let saved: AutotuneRecord = storage::load(&store, RESULT_KEY).unwrap().unwrap();
        assert_eq!(saved.result, result);
    }
}
