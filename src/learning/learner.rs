//! Incremental gain learner.
//!
//! Turns analyzer suggestions into bounded percentage nudges of a band's
//! **current** gains (steps compound across firings).  In `Suggest` mode
//! the nudges wait in a queue for operator approval; in `Auto` mode they
//! are applied at once.  Every change goes through
//! [`AdaptivePidTable::update_band`] and is recorded in a persisted
//! adjustment history.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::analyzer::FiringAnalysis;
use super::{Direction, GainParam, Magnitude, Quality, Suggestion};
use crate::app::ports::StoragePort;
use crate::config::LearnerConfig;
use crate::control::adaptive::AdaptivePidTable;
use crate::control::pid::PidGains;
use crate::storage::{self, Document};

pub const HISTORY_KEY: &str = "pid_learning_history";

const APPROVAL_PREFIX: &str = "manual approval: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnerMode {
    /// Queue adjustments until an operator approves them.
    #[default]
    Suggest,
    Auto,
}

impl fmt::Display for LearnerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Suggest => "suggest",
            Self::Auto => "auto",
        })
    }
}

impl FromStr for LearnerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "suggest" => Ok(Self::Suggest),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown learner mode '{other}' (expected suggest|auto)")),
        }
    }
}

/// How an adjustment reached the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentMode {
    Auto,
    Approved,
}

/// A queued single-gain change awaiting approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAdjustment {
    pub band: u32,
    pub param: GainParam,
    pub old_value: f64,
    pub new_value: f64,
    /// Signed step, e.g. −10 for a large decrease.
    pub change_percent: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub timestamp: String,
    pub band: u32,
    pub old: PidGains,
    /// Gains the table actually applied, after its clamps.
    pub new: PidGains,
    pub reasons: Vec<String>,
    pub mode: AdjustmentMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandChange {
    pub band: u32,
    pub params: Vec<GainParam>,
    pub applied: PidGains,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearnOutcome {
    pub applied: usize,
    /// Suggestions dropped by the same-(band, param) conflict rule.
    pub skipped: usize,
    pub pending: usize,
    pub changes: Vec<BandChange>,
}

/// Persisted learner state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerHistory {
    pub version: u32,
    pub mode: LearnerMode,
    pub last_updated: String,
    pub total_adjustments: usize,
    pub history: Vec<Adjustment>,
}

impl Document for LearnerHistory {
    const NAMESPACE: &'static str = "learner";
    const VERSION: u32 = 1;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearnerStatus {
    pub mode: LearnerMode,
    pub pending: Vec<PendingAdjustment>,
    pub total_adjustments: usize,
    pub last_adjustment: Option<Adjustment>,
}

pub struct PidLearner {
    config: LearnerConfig,
    mode: LearnerMode,
    history: Vec<Adjustment>,
    total_adjustments: usize,
    pending: Vec<PendingAdjustment>,
    store: Arc<dyn StoragePort>,
}

impl PidLearner {
    /// Restore mode and history from `store`; the configured mode applies
    /// when nothing is stored.
    pub fn load(config: &LearnerConfig, store: Arc<dyn StoragePort>) -> Self {
        let mut learner = Self {
            config: config.clone(),
            mode: config.mode,
            history: Vec::new(),
            total_adjustments: 0,
            pending: Vec::new(),
            store,
        };
        match storage::load::<LearnerHistory>(learner.store.as_ref(), HISTORY_KEY) {
            Ok(Some(doc)) => {
                learner.mode = doc.mode;
                learner.total_adjustments = doc.total_adjustments.max(doc.history.len());
                learner.history = doc.history;
                info!(
                    "LEARNER | history loaded: mode {}, {} adjustments",
                    learner.mode, learner.total_adjustments
                );
            }
            Ok(None) => {}
            Err(e) => warn!("LEARNER | stored history unusable ({e}), starting fresh"),
        }
        learner
    }

    pub fn mode(&self) -> LearnerMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: LearnerMode) {
        self.mode = mode;
        info!("LEARNER | mode set to {mode}");
        self.persist();
    }

    pub fn pending(&self) -> &[PendingAdjustment] {
        &self.pending
    }

    pub fn history(&self) -> &[Adjustment] {
        &self.history
    }

    // ── Processing ────────────────────────────────────────────

    /// Act on one analysis.  Suggestions for bands already rated good or
    /// excellent are dropped.
    pub fn process_analysis(
        &mut self,
        analysis: &FiringAnalysis,
        table: &mut AdaptivePidTable,
    ) -> LearnOutcome {
        table.record_firing_analyzed();
        if analysis.suggestions.is_empty() {
            info!("LEARNER | {}: nothing to learn", analysis.firing_key);
            return LearnOutcome::default();
        }
        let filtered: Vec<Suggestion> = analysis
            .suggestions
            .iter()
            .filter(|s| {
                analysis
                    .band_metrics
                    .get(&s.band)
                    .is_none_or(|m| m.quality < Quality::Good)
            })
            .cloned()
            .collect();
        let dropped = analysis.suggestions.len() - filtered.len();
        if dropped > 0 {
            info!("LEARNER | {dropped} suggestions dropped (band already good)");
        }
        self.dispatch(&filtered, table)
    }

    /// Act on the latest analysis, keeping only issues that recur across
    /// the recent window.  `analyses` must be oldest first.
    pub fn process_all_analyses(
        &mut self,
        analyses: &[FiringAnalysis],
        table: &mut AdaptivePidTable,
    ) -> LearnOutcome {
        if analyses.len() < self.config.min_firings {
            info!(
                "LEARNER | need {} firings, have {}",
                self.config.min_firings,
                analyses.len()
            );
            return LearnOutcome::default();
        }
        let Some(latest) = analyses.last() else {
            return LearnOutcome::default();
        };
        table.record_firing_analyzed();
        let confirmed = self.confirm_recurring(&latest.suggestions, analyses);
        self.dispatch(&confirmed, table)
    }

    /// Keep suggestions whose (band, param, direction) appears in at least
    /// `recurrence_min` of the last `recurrence_window` analyses.  A firing
    /// counts once per key however many rules raised it.
    fn confirm_recurring(
        &self,
        suggestions: &[Suggestion],
        analyses: &[FiringAnalysis],
    ) -> Vec<Suggestion> {
        let window = &analyses[analyses.len().saturating_sub(self.config.recurrence_window)..];
        let mut counts: HashMap<(u32, GainParam, Direction), usize> = HashMap::new();
        for analysis in window {
            let keys: HashSet<_> = analysis
                .suggestions
                .iter()
                .map(|s| (s.band, s.param, s.direction))
                .collect();
            for key in keys {
                *counts.entry(key).or_default() += 1;
            }
        }
        let confirmed: Vec<Suggestion> = suggestions
            .iter()
            .filter(|s| {
                counts
                    .get(&(s.band, s.param, s.direction))
                    .is_some_and(|&n| n >= self.config.recurrence_min)
            })
            .cloned()
            .collect();
        let episodic = suggestions.len() - confirmed.len();
        if episodic > 0 {
            info!("LEARNER | {episodic} one-off issues ignored");
        }
        confirmed
    }

    fn dispatch(&mut self, suggestions: &[Suggestion], table: &mut AdaptivePidTable) -> LearnOutcome {
        match self.mode {
            LearnerMode::Auto => self.apply(suggestions, table),
            LearnerMode::Suggest => self.queue(suggestions, table),
        }
    }

    fn step_percent(&self, magnitude: Magnitude) -> f64 {
        match magnitude {
            Magnitude::Small => self.config.small_step_percent,
            Magnitude::Large => self.config.large_step_percent,
        }
    }

    fn nudged(&self, current: f64, s: &Suggestion) -> f64 {
        current * (1.0 + s.direction.sign() * self.step_percent(s.magnitude) / 100.0)
    }

    /// Apply immediately.  Within a band the first suggestion for a gain
    /// wins; later ones for the same gain are counted as skipped.
    fn apply(&mut self, suggestions: &[Suggestion], table: &mut AdaptivePidTable) -> LearnOutcome {
        let mut by_band: BTreeMap<u32, Vec<&Suggestion>> = BTreeMap::new();
        for s in suggestions {
            by_band.entry(s.band).or_default().push(s);
        }

        let mut outcome = LearnOutcome::default();
        for (band, list) in by_band {
            let Some(current) = table.band(band).map(|e| e.current) else {
                warn!("LEARNER | suggestion for unknown band {band}");
                continue;
            };
            let mut proposed = current;
            let mut params = Vec::new();
            let mut reasons = Vec::new();
            for s in list {
                if params.contains(&s.param) {
                    outcome.skipped += 1;
                    continue;
                }
                s.param.set(&mut proposed, self.nudged(s.param.get(&current), s));
                params.push(s.param);
                reasons.push(s.reason.clone());
            }

            if let Some(applied) = table.update_band(band, proposed, &reasons.join("; ")) {
                outcome.applied += params.len();
                self.record(band, current, applied, reasons.clone(), AdjustmentMode::Auto);
                outcome.changes.push(BandChange {
                    band,
                    params,
                    applied,
                    reasons,
                });
            }
        }
        self.persist();
        info!(
            "LEARNER | {} adjustments applied, {} skipped",
            outcome.applied, outcome.skipped
        );
        outcome
    }

    /// Replace the pending queue with `suggestions`.
    fn queue(&mut self, suggestions: &[Suggestion], table: &AdaptivePidTable) -> LearnOutcome {
        self.pending = suggestions
            .iter()
            .filter_map(|s| {
                let current = table.band(s.band)?.current;
                let old_value = s.param.get(&current);
                let new_value = self.nudged(old_value, s);
                Some(PendingAdjustment {
                    band: s.band,
                    param: s.param,
                    old_value,
                    new_value: (new_value * 1e6).round() / 1e6,
                    change_percent: s.direction.sign() * self.step_percent(s.magnitude),
                    reason: s.reason.clone(),
                })
            })
            .collect();
        info!("LEARNER | {} adjustments awaiting approval", self.pending.len());
        LearnOutcome {
            pending: self.pending.len(),
            ..LearnOutcome::default()
        }
    }

    // ── Operator decisions ────────────────────────────────────

    /// Apply the whole queue.  When several queued entries target the same
    /// gain of a band, the first one wins, as in auto mode.  Returns the
    /// number of gains changed.
    pub fn approve_pending(&mut self, table: &mut AdaptivePidTable) -> usize {
        if self.pending.is_empty() {
            info!("LEARNER | nothing to approve");
            return 0;
        }
        let mut by_band: BTreeMap<u32, BTreeMap<GainParam, PendingAdjustment>> = BTreeMap::new();
        let mut skipped = 0;
        for p in std::mem::take(&mut self.pending) {
            match by_band.entry(p.band).or_default().entry(p.param) {
                Entry::Vacant(slot) => {
                    slot.insert(p);
                }
                Entry::Occupied(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            info!("LEARNER | {skipped} conflicting approvals skipped");
        }

        let mut applied = 0;
        for (band, params) in by_band {
            let Some(current) = table.band(band).map(|e| e.current) else {
                continue;
            };
            let mut proposed = current;
            let mut reasons = Vec::new();
            for (param, p) in &params {
                param.set(&mut proposed, p.new_value);
                reasons.push(p.reason.clone());
            }
            let reason = format!("{APPROVAL_PREFIX}{}", reasons.join("; "));
            if let Some(new) = table.update_band(band, proposed, &reason) {
                applied += params.len();
                self.record(band, current, new, reasons, AdjustmentMode::Approved);
            }
        }
        self.persist();
        info!("LEARNER | {applied} approved adjustments applied");
        applied
    }

    /// Drop the whole queue.  Returns how many entries were discarded.
    pub fn reject_pending(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        info!("LEARNER | {n} pending adjustments rejected");
        n
    }

    pub fn status(&self) -> LearnerStatus {
        LearnerStatus {
            mode: self.mode,
            pending: self.pending.clone(),
            total_adjustments: self.total_adjustments,
            last_adjustment: self.history.last().cloned(),
        }
    }

    // ── Persistence ───────────────────────────────────────────

    fn record(
        &mut self,
        band: u32,
        old: PidGains,
        new: PidGains,
        reasons: Vec<String>,
        mode: AdjustmentMode,
    ) {
        self.history.push(Adjustment {
            timestamp: chrono::Local::now().to_rfc3339(),
            band,
            old,
            new,
            reasons,
            mode,
        });
        self.total_adjustments += 1;
        let excess = self.history.len().saturating_sub(self.config.history_limit);
        self.history.drain(..excess);
    }

    fn persist(&self) {
        let doc = LearnerHistory {
            version: LearnerHistory::VERSION,
            mode: self.mode,
            last_updated: chrono::Local::now().to_rfc3339(),
            total_adjustments: self.total_adjustments,
            history: self.history.clone(),
        };
        if let Err(e) = storage::save(self.store.as_ref(), HISTORY_KEY, &doc) {
            warn!("LEARNER | history save failed: {e}");
        }
    }
}
