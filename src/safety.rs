//! Safety monitor.
//!
//! Evaluated by the sensor loop on **every** reading, before anything else
//! acts on the temperature.  Produces a [`SafetyReport`] of alarms and
//! recommended actions, and owns the sticky emergency flag.
//!
//! ## Emergency lifecycle
//!
//! 1. Over-temperature or sensor loss sets the emergency flag.
//! 2. Every later report carries `emergency_stop = true`, whatever the
//!    temperature does next.
//! 3. Only [`SafetyMonitor::reset_emergency`] (a manual operator action)
//!    clears it.
//!
//! Warnings (near-ceiling temperature, fast cooling, fast heating) are
//! re-evaluated from scratch each call and never latch.

use heapless::HistoryBuffer;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::SafetyConfig;

/// Samples kept for the heating-rate estimate.
const HEATING_WINDOW: usize = 100;
/// Samples averaged at each end of the heating window.
const HEATING_GROUP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmCode {
    MaxTemp,
    OverTemp,
    FastCooling,
    FastHeating,
    SensorError,
}

/// What the monitor recommends doing about an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyAction {
    ReducePower,
    EmergencyShutdown,
    NotifyUser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAlarm {
    pub level: AlarmLevel,
    pub code: AlarmCode,
    pub message: String,
    pub value: Option<f64>,
    pub limit: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SafetyReport {
    /// No CRITICAL alarm was raised by this evaluation.
    pub is_safe: bool,
    pub alarms: Vec<SafetyAlarm>,
    pub actions: Vec<SafetyAction>,
    /// Sticky emergency flag.
    pub emergency_stop: bool,
}

impl SafetyReport {
    pub fn has(&self, code: AlarmCode) -> bool {
        self.alarms.iter().any(|a| a.code == code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyStatus {
    pub emergency: bool,
    pub alarm_count: usize,
    pub last_alarms: Vec<SafetyAlarm>,
}

/// Safety monitor.
pub struct SafetyMonitor {
    config: SafetyConfig,
    /// `(t, hot)` for the heating-rate estimate.
    history: HistoryBuffer<(f64, f64), HEATING_WINDOW>,
    emergency: bool,
    last_report: SafetyReport,
}

impl SafetyMonitor {
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            config: config.clone(),
            history: HistoryBuffer::new(),
            emergency: false,
            last_report: SafetyReport {
                is_safe: true,
                ..SafetyReport::default()
            },
        }
    }

    /// Evaluate every temperature and rate bound.
    ///
    /// `cooling_rate` is °C/h, negative while cooling; `now` is monotonic seconds.
    pub fn check_all(&mut self, hot: f64, _cold: f64, cooling_rate: f64, now: f64) -> SafetyReport {
        let mut alarms = Vec::new();
        let mut actions = Vec::new();

        self.history.write((now, hot));

        // ── Over-temperature ceiling ──────────────────────────────
        if hot > self.config.over_temp {
            if !self.emergency {
                error!(
                    "SAFETY | OVER_TEMP {:.1}\u{00b0}C > {:.0}\u{00b0}C, emergency latched",
                    hot, self.config.over_temp
                );
            }
            alarms.push(SafetyAlarm {
                level: AlarmLevel::Critical,
                code: AlarmCode::OverTemp,
                message: format!("critical over-temperature: {hot:.1}\u{00b0}C"),
                value: Some(hot),
                limit: Some(self.config.over_temp),
            });
            actions.push(SafetyAction::EmergencyShutdown);
            self.emergency = true;
        } else if hot > self.config.max_temp {
            alarms.push(SafetyAlarm {
                level: AlarmLevel::Warning,
                code: AlarmCode::MaxTemp,
                message: format!("temperature near limit: {hot:.1}\u{00b0}C"),
                value: Some(hot),
                limit: Some(self.config.max_temp),
            });
            actions.push(SafetyAction::ReducePower);
        }

        // ── Thermal shock ─────────────────────────────────────────
        if hot < self.config.cooling_check_below
            && cooling_rate.abs() > self.config.cooling_rate_warning
        {
            alarms.push(SafetyAlarm {
                level: AlarmLevel::Warning,
                code: AlarmCode::FastCooling,
                message: format!("cooling too fast: {cooling_rate:.1}\u{00b0}C/h"),
                value: Some(cooling_rate.abs()),
                limit: Some(self.config.cooling_rate_warning),
            });
            actions.push(SafetyAction::NotifyUser);
        }

        // ── Heating rate ──────────────────────────────────────────
        let rate_up = self.heating_rate();
        if rate_up > self.config.max_heating_rate {
            alarms.push(SafetyAlarm {
                level: AlarmLevel::Warning,
                code: AlarmCode::FastHeating,
                message: format!("heating too fast: {rate_up:.1}\u{00b0}C/h"),
                value: Some(rate_up),
                limit: Some(self.config.max_heating_rate),
            });
            actions.push(SafetyAction::ReducePower);
        }

        for alarm in alarms.iter().filter(|a| a.level == AlarmLevel::Warning) {
            warn!("SAFETY | {:?}: {}", alarm.code, alarm.message);
        }

        let report = SafetyReport {
            is_safe: !alarms.iter().any(|a| a.level == AlarmLevel::Critical),
            alarms,
            actions,
            emergency_stop: self.emergency,
        };
        self.last_report = report.clone();
        report
    }

    /// Sensor loss is itself critical: returns the alarm and latches the
    /// emergency flag when the sensor is not connected.
    pub fn check_sensor_health(&mut self, connected: bool) -> Option<SafetyAlarm> {
        if connected {
            return None;
        }
        if !self.emergency {
            error!("SAFETY | SENSOR_ERROR thermocouple unavailable, emergency latched");
        }
        self.emergency = true;
        Some(SafetyAlarm {
            level: AlarmLevel::Critical,
            code: AlarmCode::SensorError,
            message: "thermocouple disconnected or faulty".into(),
            value: None,
            limit: None,
        })
    }

    /// °C/h from the mean of the newest vs. oldest samples in the window,
    /// floored at zero.
    pub fn heating_rate(&self) -> f64 {
        let len = self.history.len();
        if len < 2 {
            return 0.0;
        }
        let group = HEATING_GROUP.min(len);
        let old: Vec<(f64, f64)> = self.history.oldest_ordered().take(group).copied().collect();
        let recent: Vec<(f64, f64)> = self
            .history
            .oldest_ordered()
            .skip(len - group)
            .copied()
            .collect();
        if old.len() < 2 || recent.len() < 2 {
            return 0.0;
        }
        let mean = |s: &[(f64, f64)]| s.iter().map(|(_, t)| t).sum::<f64>() / s.len() as f64;
        let dt = recent[recent.len() - 1].0 - old[0].0;
        if dt <= 0.0 {
            return 0.0;
        }
        ((mean(&recent) - mean(&old)) / dt * 3600.0).max(0.0)
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency
    }

    pub fn last_report(&self) -> &SafetyReport {
        &self.last_report
    }

    pub fn status(&self) -> SafetyStatus {
        SafetyStatus {
            emergency: self.emergency,
            alarm_count: self.last_report.alarms.len(),
            last_alarms: self.last_report.alarms.clone(),
        }
    }

    /// Clear the sticky emergency flag.  Manual operator action only.
    pub fn reset_emergency(&mut self) {
        if self.emergency {
            info!("SAFETY | emergency reset by operator");
        }
        self.emergency = false;
        self.history.clear();
        self.last_report = SafetyReport {
            is_safe: true,
            ..SafetyReport::default()
        };
    }
}
