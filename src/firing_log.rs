//! Per-firing execution log.
//!
//! One [`FiringRecord`] per program run: a periodic time series of
//! [`ControlCycleRecord`]s, a typed event list and, on a graceful end,
//! summary statistics.  Records are saved under the `firings` namespace
//! as `execution_<program>_<YYYYmmdd_HHMMSS>`; the analyzer reads them
//! back after the firing.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{StorageError, StoragePort};
use crate::control::pid::PidTerms;
use crate::storage::{self, Document};

pub const KEY_PREFIX: &str = "execution_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FiringOutcome {
    Running,
    Completed,
    Stopped,
    /// Ended by an emergency; never analyzed.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProgramStart,
    RampStart,
    RampComplete,
    HoldStart,
    HoldComplete,
    SegmentComplete,
    ValveLimited,
    ProgramComplete,
    ProgramStop,
    EmergencyStop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiringEvent {
    /// Minutes since the firing started.
    pub time_min: f64,
    pub kind: EventKind,
    pub message: String,
    pub timestamp: String,
}

/// One logged control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlCycleRecord {
    pub time_min: f64,
    pub temp: f64,
    pub temp_cold: f64,
    /// °C/min from consecutive cycles.
    pub temp_rate: f64,
    pub setpoint: f64,
    /// setpoint − temp, as the PID saw it.
    pub error: f64,
    pub valve_position: f64,
    /// PID output before the step limiter.
    pub pid_raw: f64,
    pub valve_limited: bool,
    pub pid: PidTerms,
    pub cooling_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FiringStatistics {
    pub max_temp: f64,
    pub min_temp: f64,
    pub avg_temp: f64,
    pub total_samples: usize,
    pub total_events: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiringRecord {
    pub version: u32,
    pub program_name: String,
    /// Wall-clock start, RFC 3339.
    pub start_time: String,
    pub duration_minutes: f64,
    pub outcome: FiringOutcome,
    pub temperatures: Vec<ControlCycleRecord>,
    pub events: Vec<FiringEvent>,
    pub statistics: Option<FiringStatistics>,
}

impl Document for FiringRecord {
    const NAMESPACE: &'static str = "firings";
    const VERSION: u32 = 1;
}

impl FiringRecord {
    fn statistics(&self) -> Option<FiringStatistics> {
        if self.temperatures.is_empty() {
            return None;
        }
        let temps = self.temperatures.iter().map(|r| r.temp);
        let max = temps.clone().fold(f64::MIN, f64::max);
        let min = temps.clone().fold(f64::MAX, f64::min);
        let avg = temps.sum::<f64>() / self.temperatures.len() as f64;
        let r1 = |v: f64| (v * 10.0).round() / 10.0;
        Some(FiringStatistics {
            max_temp: r1(max),
            min_temp: r1(min),
            avg_temp: r1(avg),
            total_samples: self.temperatures.len(),
            total_events: self.events.len(),
        })
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Storage key for a firing of `program` started at `stamp`.
pub fn firing_key(program: &str, stamp: &chrono::DateTime<chrono::Local>) -> String {
    format!(
        "{KEY_PREFIX}{}_{}",
        sanitize(program),
        stamp.format("%Y%m%d_%H%M%S")
    )
}

/// Firing log keys, oldest first.
pub fn list_firings(store: &dyn StoragePort) -> Result<Vec<String>, StorageError> {
    Ok(store
        .list(FiringRecord::NAMESPACE)?
        .into_iter()
        .filter(|k| k.starts_with(KEY_PREFIX))
        .collect())
}

pub fn load_firing(store: &dyn StoragePort, key: &str) -> Result<Option<FiringRecord>, StorageError> {
    storage::load(store, key)
}

/// Accumulates the record of the running firing.
#[derive(Default)]
pub struct FiringLog {
    record: Option<FiringRecord>,
    key: String,
    started_at: f64,
}

impl FiringLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new record.  Any unfinished record is discarded.
    pub fn start(&mut self, program_name: &str, now: f64) {
        let wall = chrono::Local::now();
        self.key = firing_key(program_name, &wall);
        self.started_at = now;
        self.record = Some(FiringRecord {
            version: FiringRecord::VERSION,
            program_name: program_name.to_owned(),
            start_time: wall.to_rfc3339(),
            duration_minutes: 0.0,
            outcome: FiringOutcome::Running,
            temperatures: Vec::new(),
            events: Vec::new(),
            statistics: None,
        });
        self.event(
            EventKind::ProgramStart,
            format!("program \"{program_name}\" started"),
            now,
        );
        info!("FIRING LOG | started {}", self.key);
    }

    pub fn is_active(&self) -> bool {
        self.record.is_some()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn elapsed_minutes(&self, now: f64) -> f64 {
        (now - self.started_at) / 60.0
    }

    pub fn record_cycle(&mut self, cycle: ControlCycleRecord) {
        if let Some(r) = self.record.as_mut() {
            r.temperatures.push(cycle);
        }
    }

    pub fn event(&mut self, kind: EventKind, message: impl Into<String>, now: f64) {
        let time_min = self.elapsed_minutes(now);
        if let Some(r) = self.record.as_mut() {
            let message = message.into();
            info!("FIRING LOG | [{kind:?}] {message}");
            r.events.push(FiringEvent {
                time_min: (time_min * 100.0).round() / 100.0,
                kind,
                message,
                timestamp: chrono::Local::now().to_rfc3339(),
            });
        }
    }

    pub fn record(&self) -> Option<&FiringRecord> {
        self.record.as_ref()
    }

    /// Close the record with `outcome` and save it.  Aborted records carry
    /// no statistics.  Returns the storage key on success; a failed save
    /// is logged and the record dropped.
    pub fn finish(
        &mut self,
        outcome: FiringOutcome,
        now: f64,
        store: &dyn StoragePort,
    ) -> Option<String> {
        let (kind, message) = match outcome {
            FiringOutcome::Completed => (EventKind::ProgramComplete, "program complete"),
            FiringOutcome::Stopped => (EventKind::ProgramStop, "program stopped"),
            FiringOutcome::Aborted => (EventKind::EmergencyStop, "emergency stop"),
            FiringOutcome::Running => return None,
        };
        self.event(kind, message, now);
        let duration = self.elapsed_minutes(now);
        let mut record = self.record.take()?;
        record.outcome = outcome;
        record.duration_minutes = (duration * 10.0).round() / 10.0;
        if outcome != FiringOutcome::Aborted {
            record.statistics = record.statistics();
        }
        match storage::save(store, &self.key, &record) {
            Ok(()) => {
                info!("FIRING LOG | saved {} ({outcome:?})", self.key);
                Some(self.key.clone())
            }
            Err(e) => {
                warn!("FIRING LOG | save of {} failed: {e}", self.key);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::json_store::MemoryStore;

    fn cycle(temp: f64) -> ControlCycleRecord {
        ControlCycleRecord {
            temp,
            setpoint: temp,
            ..ControlCycleRecord::default()
        }
    }

    #[test]
    fn completed_firing_is_saved_with_statistics() {
        let store = MemoryStore::new();
        let mut log = FiringLog::new();
        log.start("Bisque 950", 0.0);
        for t in [100.0, 200.0, 300.0] {
            log.record_cycle(cycle(t));
        }
        let key = log.finish(FiringOutcome::Completed, 600.0, &store).unwrap();
        assert!(key.starts_with("execution_Bisque_950_"));
        assert!(!log.is_active());

        let rec = load_firing(&store, &key).unwrap().unwrap();
        assert_eq!(rec.outcome, FiringOutcome::Completed);
        assert_eq!(rec.duration_minutes, 10.0);
        let stats = rec.statistics.unwrap();
        assert_eq!(stats.max_temp, 300.0);
        assert_eq!(stats.avg_temp, 200.0);
        assert_eq!(stats.total_events, 2);
        assert_eq!(list_firings(&store).unwrap(), vec![key]);
    }

    #[test]
    fn aborted_firing_has_no_statistics() {
        let store = MemoryStore::new();
        let mut log = FiringLog::new();
        log.start("glaze", 0.0);
        log.record_cycle(cycle(1000.0));
        let key = log.finish(FiringOutcome::Aborted, 60.0, &store).unwrap();
        let rec = load_firing(&store, &key).unwrap().unwrap();
        assert_eq!(rec.outcome, FiringOutcome::Aborted);
        assert!(rec.statistics.is_none());
        assert_eq!(rec.events.last().unwrap().kind, EventKind::EmergencyStop);
    }

    #[test]
    fn inactive_log_ignores_input() {
        let store = MemoryStore::new();
        let mut log = FiringLog::new();
        log.record_cycle(cycle(100.0));
        log.event(EventKind::RampStart, "ignored", 0.0);
        assert!(log.finish(FiringOutcome::Completed, 1.0, &store).is_none());
    }
}
