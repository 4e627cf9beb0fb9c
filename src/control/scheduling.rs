//! Hysteretic gain scheduling.
//!
//! Reads the published [`GainSchedule`] and re-tunes a live
//! [`PidController`] only after the temperature has moved by at least
//! `update_threshold` since the last re-tune, so gains do not chatter
//! while the kiln sits near a band boundary.

use serde::Serialize;

use super::adaptive::GainSchedule;
use super::pid::{PidController, PidGains};
use crate::config::AdaptiveConfig;
use crate::sync::Subscriber;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub current_band: Option<u32>,
    pub last_update_temp: Option<f64>,
    pub last_gains: Option<PidGains>,
}

pub struct AdaptivePidManager {
    schedule: Subscriber<GainSchedule>,
    enabled: bool,
    threshold: f64,
    static_gains: PidGains,
    last_update_temp: Option<f64>,
    current_band: Option<u32>,
    last_gains: Option<PidGains>,
}

impl AdaptivePidManager {
    pub fn new(
        schedule: Subscriber<GainSchedule>,
        config: &AdaptiveConfig,
        static_gains: PidGains,
    ) -> Self {
        Self {
            schedule,
            enabled: config.enabled,
            threshold: config.update_threshold,
            static_gains,
            last_update_temp: None,
            current_band: None,
            last_gains: None,
        }
    }

    /// Apply interpolated gains for `temp` if scheduling is enabled and
    /// the temperature moved far enough.  Returns the gains applied.
    pub fn update_tunings(&mut self, temp: f64, pid: &mut PidController) -> Option<PidGains> {
        if !self.enabled {
            return None;
        }
        if self
            .last_update_temp
            .is_some_and(|last| (temp - last).abs() < self.threshold)
        {
            return None;
        }
        let (gains, band) = self
            .schedule
            .with(|s| (s.gains_at(temp), s.band_for(temp)));
        let gains = gains?;
        pid.set_tunings(gains);
        if band != self.current_band {
            log::info!(
                "SCHEDULE | band {:?} at {temp:.0}\u{00b0}C, Kp={:.4} Ki={:.6} Kd={:.2}",
                band,
                gains.kp,
                gains.ki,
                gains.kd
            );
        }
        self.last_update_temp = Some(temp);
        self.current_band = band;
        self.last_gains = Some(gains);
        Some(gains)
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        self.last_update_temp = None;
        log::info!("SCHEDULE | adaptive gains enabled");
    }

    /// Stop scheduling and fall back to the static configured gains.
    pub fn disable(&mut self, pid: &mut PidController) {
        self.enabled = false;
        pid.set_tunings(self.static_gains);
        log::info!("SCHEDULE | adaptive gains disabled, static gains restored");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            enabled: self.enabled,
            current_band: self.current_band,
            last_update_temp: self.last_update_temp,
            last_gains: self.last_gains,
        }
    }
}
