//! Controller configuration parameters
//!
//! Every constant the control and safety core consumes lives here: safety
//! ceilings, tolerance bands, cycle intervals, smoothing window, valve step
//! limit and watchdog timeouts.  Values load from a JSON file; every section
//! is `#[serde(default)]` so a file only needs the keys it overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::learning::learner::LearnerMode;

/// Top-level controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    pub safety: SafetyConfig,
    pub pid: PidConfig,
    pub runner: RunnerConfig,
    pub sensor: SensorConfig,
    pub watchdog: WatchdogConfig,
    pub autotune: AutotuneConfig,
    pub adaptive: AdaptiveConfig,
    pub analyzer: AnalyzerConfig,
    pub learner: LearnerConfig,
    /// Root directory for persisted tables, histories and firing logs.
    pub data_dir: PathBuf,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            safety: SafetyConfig::default(),
            pid: PidConfig::default(),
            runner: RunnerConfig::default(),
            sensor: SensorConfig::default(),
            watchdog: WatchdogConfig::default(),
            autotune: AutotuneConfig::default(),
            adaptive: AdaptiveConfig::default(),
            analyzer: AnalyzerConfig::default(),
            learner: LearnerConfig::default(),
            data_dir: PathBuf::from("data"),
        }
    }
}

// --- Safety ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Warning threshold (°C); above this power should be reduced.
    pub max_temp: f64,
    /// Hard ceiling (°C); above this the emergency flag latches.
    pub over_temp: f64,
    /// Maximum heating rate (°C/h) before a warning.
    pub max_heating_rate: f64,
    /// Cooling rate magnitude (°C/h) that risks thermal shock.
    pub cooling_rate_warning: f64,
    /// Fast-cooling checks only apply below this temperature (°C).
    pub cooling_check_below: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_temp: 1290.0,
            over_temp: 1310.0,
            max_heating_rate: 400.0,
            cooling_rate_warning: 300.0,
            cooling_check_below: 700.0,
        }
    }
}

// --- PID ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Anti-windup clamp for the integral accumulator.
    pub integral_min: f64,
    pub integral_max: f64,
    pub output_min: f64,
    pub output_max: f64,
    /// dt substituted when the clock did not advance (seconds).
    pub dt_fallback_secs: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 2.5,
            ki: 0.03,
            kd: 1.8,
            integral_min: -500.0,
            integral_max: 500.0,
            output_min: 0.0,
            output_max: 100.0,
            dt_fallback_secs: 0.1,
        }
    }
}

// --- Program runner ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Control cycle period (seconds).
    pub cycle_interval_secs: f64,
    /// Readings averaged into the smoothed temperature.
    pub smoothing_window: usize,
    /// A ramp is reached when measured temp is within this of target (°C).
    pub ramp_tolerance: f64,
    /// Hold countdown only runs within this band around target (°C).
    pub hold_tolerance: f64,
    /// Largest valve change allowed per cycle (%).
    pub valve_max_step: f64,
    /// Period between logged control-cycle records (seconds).
    pub log_interval_secs: f64,
    /// Rate floor used by duration estimates (°C/h).
    pub min_estimate_rate: f64,
    /// Assumed start temperature for estimates (°C).
    pub ambient_temp: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 30.0,
            smoothing_window: 5,
            ramp_tolerance: 10.0,
            hold_tolerance: 15.0,
            valve_max_step: 10.0,
            log_interval_secs: 30.0,
            min_estimate_rate: 10.0,
            ambient_temp: 20.0,
        }
    }
}

// --- Sensor loop ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Sensor + safety polling period (seconds).
    pub update_interval_secs: f64,
    /// Samples kept for the cooling-rate estimate.
    pub history_size: usize,
    /// Span used for the cooling-rate estimate (seconds).
    pub cooling_window_secs: f64,
    /// Cooling rate is only estimated strictly between these (°C).
    pub cooling_min_temp: f64,
    pub cooling_max_temp: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 2.0,
            history_size: 1000,
            cooling_window_secs: 600.0,
            cooling_min_temp: 50.0,
            cooling_max_temp: 700.0,
        }
    }
}

// --- Watchdog ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub interval_secs: f64,
    pub sensor_timeout_secs: f64,
    pub heartbeat_timeout_secs: f64,
    /// Redundant over-temperature ceiling (°C).
    pub over_temp: f64,
    /// Minimum spacing between emergency alerts (seconds).
    pub notification_cooldown_secs: f64,
    /// When false the solenoid driver is simulated.
    pub solenoid_enabled: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5.0,
            sensor_timeout_secs: 30.0,
            heartbeat_timeout_secs: 15.0,
            over_temp: 1310.0,
            notification_cooldown_secs: 60.0,
            solenoid_enabled: true,
        }
    }
}

// --- Autotune ---

/// Which Ziegler–Nichols triple seeds the adaptive table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainVariant {
    Standard,
    Conservative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutotuneConfig {
    pub default_temperature: f64,
    /// Oscillations required before gains are computed.
    pub min_oscillations: usize,
    pub max_duration_secs: f64,
    /// Heating phase hands over to the relay within this distance (°C).
    pub relay_switch_margin: f64,
    pub apply: GainVariant,
}

impl Default for AutotuneConfig {
    fn default() -> Self {
        Self {
            default_temperature: 500.0,
            min_oscillations: 3,
            max_duration_secs: 12.0 * 3600.0,
            relay_switch_margin: 20.0,
            apply: GainVariant::Conservative,
        }
    }
}

// --- Adaptive gain table ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    /// Band lower boundaries (°C), ascending.
    pub bands: Vec<u32>,
    pub kp_limits: (f64, f64),
    pub ki_limits: (f64, f64),
    pub kd_limits: (f64, f64),
    /// Maximum deviation of current gains from base (%).
    pub max_deviation_percent: f64,
    /// Temperature movement (°C) before gains are re-scheduled.
    pub update_threshold: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bands: vec![0, 200, 400, 600, 800, 1000, 1200],
            kp_limits: (0.5, 10.0),
            ki_limits: (0.001, 0.2),
            kd_limits: (0.0, 8.0),
            max_deviation_percent: 50.0,
            update_threshold: 10.0,
        }
    }
}

// --- Analyzer ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub overshoot_good: f64,
    pub overshoot_bad: f64,
    pub mae_good: f64,
    pub mae_bad: f64,
    pub rms_good: f64,
    pub rms_bad: f64,
    pub oscillation_good: f64,
    pub oscillation_bad: f64,
    /// Mean signed error beyond which Ki is nudged (°C).
    pub bias_limit: f64,
    /// |error| beyond this counts as out of band (°C).
    pub settling_tolerance: f64,
    pub min_samples: usize,
    pub min_band_samples: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            overshoot_good: 5.0,
            overshoot_bad: 15.0,
            mae_good: 3.0,
            mae_bad: 10.0,
            rms_good: 5.0,
            rms_bad: 15.0,
            oscillation_good: 0.1,
            oscillation_bad: 0.3,
            bias_limit: 5.0,
            settling_tolerance: 5.0,
            min_samples: 10,
            min_band_samples: 5,
        }
    }
}

// --- Learner ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    pub mode: LearnerMode,
    pub small_step_percent: f64,
    pub large_step_percent: f64,
    pub min_firings: usize,
    /// Recent analyses inspected for recurrence.
    pub recurrence_window: usize,
    /// Occurrences within the window required to act.
    pub recurrence_min: usize,
    /// Adjustment entries retained in the persisted history.
    pub history_limit: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            mode: LearnerMode::Suggest,
            small_step_percent: 5.0,
            large_step_percent: 10.0,
            min_firings: 2,
            recurrence_window: 5,
            recurrence_min: 2,
            history_limit: 100,
        }
    }
}

impl KilnConfig {
    /// Load and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.kind()))?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would disable a safety layer or make the
    /// control arithmetic meaningless.  Values are never clamped here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.safety;
        if !(s.max_temp > 0.0 && s.max_temp < s.over_temp) {
            return Err(ConfigError::ValidationFailed(
                "safety.max_temp must be positive and below safety.over_temp",
            ));
        }
        if !(500.0..=1400.0).contains(&s.over_temp) {
            return Err(ConfigError::ValidationFailed(
                "safety.over_temp must be 500–1400",
            ));
        }
        if s.max_heating_rate <= 0.0 || s.cooling_rate_warning <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "safety rate limits must be positive",
            ));
        }

        let p = &self.pid;
        if p.integral_min >= p.integral_max || p.output_min >= p.output_max {
            return Err(ConfigError::ValidationFailed(
                "pid clamp ranges must be ordered",
            ));
        }
        if p.output_min < 0.0 || p.output_max > 100.0 {
            return Err(ConfigError::ValidationFailed(
                "pid output range must lie within 0–100",
            ));
        }
        if p.dt_fallback_secs <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "pid.dt_fallback_secs must be positive",
            ));
        }

        let r = &self.runner;
        if r.cycle_interval_secs <= 0.0 || r.log_interval_secs <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "runner intervals must be positive",
            ));
        }
        if r.smoothing_window == 0 {
            return Err(ConfigError::ValidationFailed(
                "runner.smoothing_window must be at least 1",
            ));
        }
        if !(r.valve_max_step > 0.0 && r.valve_max_step <= 100.0) {
            return Err(ConfigError::ValidationFailed(
                "runner.valve_max_step must be in (0, 100]",
            ));
        }
        if r.ramp_tolerance <= 0.0 || r.hold_tolerance <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "runner tolerances must be positive",
            ));
        }

        if self.sensor.update_interval_secs <= 0.0 || self.sensor.history_size < 2 {
            return Err(ConfigError::ValidationFailed(
                "sensor.update_interval_secs must be positive and history_size >= 2",
            ));
        }

        let w = &self.watchdog;
        if w.interval_secs <= 0.0 || w.sensor_timeout_secs <= 0.0 || w.heartbeat_timeout_secs <= 0.0
        {
            return Err(ConfigError::ValidationFailed(
                "watchdog timings must be positive",
            ));
        }
        if w.heartbeat_timeout_secs <= self.sensor.update_interval_secs {
            return Err(ConfigError::ValidationFailed(
                "watchdog.heartbeat_timeout_secs must exceed the sensor interval",
            ));
        }
        if w.over_temp > s.over_temp + 50.0 {
            return Err(ConfigError::ValidationFailed(
                "watchdog.over_temp must not sit far above safety.over_temp",
            ));
        }

        let a = &self.adaptive;
        if a.bands.is_empty() || a.bands.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::ValidationFailed(
                "adaptive.bands must be non-empty and strictly ascending",
            ));
        }
        for (lo, hi) in [a.kp_limits, a.ki_limits, a.kd_limits] {
            if lo < 0.0 || lo > hi {
                return Err(ConfigError::ValidationFailed(
                    "adaptive gain limits must be non-negative and ordered",
                ));
            }
        }
        if !(0.0..=100.0).contains(&a.max_deviation_percent) {
            return Err(ConfigError::ValidationFailed(
                "adaptive.max_deviation_percent must be 0–100",
            ));
        }

        if self.autotune.min_oscillations == 0 || self.autotune.max_duration_secs <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "autotune oscillations and duration must be positive",
            ));
        }

        if self.learner.recurrence_min == 0 || self.learner.history_limit == 0 {
            return Err(ConfigError::ValidationFailed(
                "learner recurrence and history limits must be positive",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = KilnConfig::default();
        assert!(c.safety.max_temp < c.safety.over_temp);
        assert!(c.runner.valve_max_step > 0.0 && c.runner.valve_max_step <= 100.0);
        assert!(c.runner.smoothing_window > 0);
        assert!(c.adaptive.bands.windows(2).all(|w| w[0] < w[1]));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn serde_roundtrip() {
        let c = KilnConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2: KilnConfig = serde_json::from_str(&json).unwrap();
        assert!((c.pid.kp - c2.pid.kp).abs() < 1e-12);
        assert_eq!(c.adaptive.bands, c2.adaptive.bands);
        assert_eq!(c.learner.mode, c2.learner.mode);
        assert_eq!(c.autotune.apply, c2.autotune.apply);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: KilnConfig =
            serde_json::from_str(r#"{ "runner": { "cycle_interval_secs": 10 } }"#).unwrap();
        assert!((c.runner.cycle_interval_secs - 10.0).abs() < 1e-12);
        assert_eq!(c.runner.smoothing_window, 5);
        assert!((c.safety.over_temp - 1310.0).abs() < 1e-12);
    }

    #[test]
    fn timing_ratios_make_sense() {
        let c = KilnConfig::default();
        assert!(
            c.sensor.update_interval_secs < c.runner.cycle_interval_secs,
            "sensor polling should be faster than the control cycle"
        );
        assert!(
            c.watchdog.heartbeat_timeout_secs > c.sensor.update_interval_secs,
            "heartbeat timeout must tolerate at least one sensor period"
        );
    }

    #[test]
    fn watchdog_ceiling_matches_safety_ceiling_by_default() {
        let c = KilnConfig::default();
        assert_eq!(c.watchdog.over_temp, c.safety.over_temp);
    }

    #[test]
    fn validation_rejects_inverted_ceilings() {
        let mut c = KilnConfig::default();
        c.safety.max_temp = 1400.0;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn validation_rejects_unsorted_bands() {
        let mut c = KilnConfig::default();
        c.adaptive.bands = vec![0, 400, 200];
        assert!(c.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_valve_step() {
        let mut c = KilnConfig::default();
        c.runner.valve_max_step = 0.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.json");
        std::fs::write(&path, r#"{ "pid": { "kp": 3.0 } }"#).unwrap();
        let c = KilnConfig::load(&path).unwrap();
        assert!((c.pid.kp - 3.0).abs() < 1e-12);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = KilnConfig::load(Path::new("/nonexistent/kiln.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
