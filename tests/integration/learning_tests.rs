//! Firing logs → analyzer → learner → gain table, over a shared store.

use std::sync::Arc;

use kilnctl::adapters::json_store::MemoryStore;
use kilnctl::app::ports::StoragePort;
use kilnctl::config::KilnConfig;
use kilnctl::control::adaptive::AdaptivePidTable;
use kilnctl::control::pid::PidGains;
use kilnctl::firing_log::{ControlCycleRecord, FiringOutcome, FiringRecord};
use kilnctl::learning::analyzer::PidAnalyzer;
use kilnctl::learning::learner::{LearnerMode, PidLearner};
use kilnctl::learning::{Direction, GainParam, Quality};
use kilnctl::storage;

const BAND: u32 = 400;

/// A firing that ran `offset` °C above a 500 °C setpoint throughout.
fn firing(outcome: FiringOutcome, samples: usize, offset: f64) -> FiringRecord {
    FiringRecord {
        version: 1,
        program_name: "glaze".into(),
        start_time: "2026-03-01T08:00:00+00:00".into(),
        duration_minutes: samples as f64 * 0.5,
        outcome,
        temperatures: (0..samples)
            .map(|i| ControlCycleRecord {
                time_min: i as f64 * 0.5,
                temp: 500.0 + offset,
                temp_cold: 30.0,
                setpoint: 500.0,
                error: -offset,
                ..ControlCycleRecord::default()
            })
            .collect(),
        events: Vec::new(),
        statistics: None,
    }
}

struct Lab {
    config: KilnConfig,
    store: Arc<dyn StoragePort>,
    table: AdaptivePidTable,
    analyzer: PidAnalyzer,
    learner: PidLearner,
}

impl Lab {
    fn new() -> Self {
        let config = KilnConfig::default();
        let store: Arc<dyn StoragePort> = Arc::new(MemoryStore::new());
        let table = AdaptivePidTable::load_or_create(&config.adaptive, defaults(), store.clone());
        let analyzer = PidAnalyzer::new(&config.analyzer, &config.adaptive.bands);
        let learner = PidLearner::load(&config.learner, store.clone());
        Self {
            config,
            store,
            table,
            analyzer,
            learner,
        }
    }

    fn save(&self, n: u32, record: &FiringRecord) -> String {
        let key = format!("execution_glaze_20260301_0800{n:02}");
        storage::save(self.store.as_ref(), &key, record).unwrap();
        key
    }

    /// Save an overshooting firing and learn from it alone.
    fn learn_once(&mut self, n: u32) -> kilnctl::learning::learner::LearnOutcome {
        let key = self.save(n, &firing(FiringOutcome::Completed, 20, 20.0));
        let analysis = self
            .analyzer
            .analyze_firing(self.store.as_ref(), &key)
            .unwrap()
            .unwrap();
        self.learner.process_analysis(&analysis, &mut self.table)
    }

    fn gains(&self) -> PidGains {
        self.table.band(BAND).unwrap().current
    }
}

fn defaults() -> PidGains {
    PidGains::new(2.5, 0.03, 1.8)
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn overshooting_firing_is_rated_poor_with_expected_suggestions() {
    let mut lab = Lab::new();
    let key = lab.save(1, &firing(FiringOutcome::Completed, 20, 20.0));
    let analysis = lab
        .analyzer
        .analyze_firing(lab.store.as_ref(), &key)
        .unwrap()
        .unwrap();

    let metrics = &analysis.band_metrics[&BAND];
    assert_eq!(metrics.samples, 20);
    assert_eq!(metrics.overshoot, 20.0);
    assert_eq!(metrics.bias, 20.0);
    assert_eq!(metrics.quality, Quality::Poor);
    assert!(analysis.suggestions.iter().any(|s| s.param == GainParam::Kp
        && s.direction == Direction::Decrease
        && s.band == BAND));
    assert!(analysis.suggestions.iter().any(|s| s.param == GainParam::Ki
        && s.direction == Direction::Decrease));
    assert_eq!(lab.analyzer.analyses().len(), 1);
}

#[test]
fn auto_mode_applies_first_suggestion_per_gain() {
    let mut lab = Lab::new();
    lab.learner.set_mode(LearnerMode::Auto);
    let outcome = lab.learn_once(1);

    assert_eq!(outcome.applied, 2);
    assert_eq!(outcome.skipped, 1);
    let g = lab.gains();
    assert!(close(g.kp, 2.25));
    assert!(close(g.ki, 0.0285));
    assert!(close(g.kd, 1.8));
    // other bands untouched
    assert!(close(lab.table.band(800).unwrap().current.kp, 2.5));
    assert_eq!(lab.table.metadata().total_firings_analyzed, 1);
}

#[test]
fn suggest_mode_waits_for_approval() {
    let mut lab = Lab::new();
    assert_eq!(lab.learner.mode(), LearnerMode::Suggest);
    let outcome = lab.learn_once(1);
    assert_eq!(outcome.applied, 0);
    assert_eq!(outcome.pending, 3);
    assert!(close(lab.gains().kp, 2.5));

    // approval resolves conflicts the same way auto mode does
    assert_eq!(lab.learner.approve_pending(&mut lab.table), 2);
    assert!(lab.learner.pending().is_empty());
    let g = lab.gains();
    assert!(close(g.kp, 2.25));
    assert!(close(g.ki, 0.0285));
}

#[test]
fn rejected_suggestions_leave_table_alone() {
    let mut lab = Lab::new();
    lab.learn_once(1);
    assert_eq!(lab.learner.reject_pending(), 3);
    assert_eq!(lab.learner.approve_pending(&mut lab.table), 0);
    assert!(close(lab.gains().kp, 2.5));
}

#[test]
fn repeated_learning_stays_inside_deviation_cap() {
    let mut lab = Lab::new();
    lab.learner.set_mode(LearnerMode::Auto);
    for n in 1..=20 {
        lab.learn_once(n);
    }
    let g = lab.gains();
    let dev = lab.config.adaptive.max_deviation_percent / 100.0;
    assert!(g.kp >= 2.5 * (1.0 - dev) - 1e-9);
    assert!(g.ki >= 0.03 * (1.0 - dev) - 1e-12);
    assert!(close(g.kp, 1.25));
}

#[test]
fn only_completed_firings_with_enough_samples_are_analyzed() {
    let mut lab = Lab::new();
    lab.save(1, &firing(FiringOutcome::Aborted, 20, 20.0));
    lab.save(2, &firing(FiringOutcome::Stopped, 20, 20.0));
    lab.save(3, &firing(FiringOutcome::Completed, 4, 20.0));
    let good = lab.save(4, &firing(FiringOutcome::Completed, 20, 0.5));

    let analyses = lab.analyzer.analyze_all(lab.store.as_ref()).unwrap();
    assert_eq!(analyses.len(), 1);
    assert_eq!(analyses[0].firing_key, good);
    assert!(analyses[0].suggestions.is_empty());
    assert_eq!(analyses[0].band_metrics[&BAND].quality, Quality::Excellent);
}

#[test]
fn cross_firing_learning_needs_recurring_issues() {
    let mut lab = Lab::new();
    lab.learner.set_mode(LearnerMode::Auto);
    lab.save(1, &firing(FiringOutcome::Completed, 20, 20.0));
    let first = lab.analyzer.analyze_all(lab.store.as_ref()).unwrap();
    let outcome = lab.learner.process_all_analyses(&first, &mut lab.table);
    assert_eq!(outcome.applied, 0);

    lab.save(2, &firing(FiringOutcome::Completed, 20, 20.0));
    let both = lab.analyzer.analyze_all(lab.store.as_ref()).unwrap();
    assert_eq!(both.len(), 2);
    let outcome = lab.learner.process_all_analyses(&both, &mut lab.table);
    assert_eq!(outcome.applied, 2);
    assert!(close(lab.gains().kp, 2.25));
}

#[test]
fn learner_and_table_state_survive_reload() {
    let mut lab = Lab::new();
    lab.learner.set_mode(LearnerMode::Auto);
    lab.learn_once(1);

    let learner = PidLearner::load(&lab.config.learner, lab.store.clone());
    assert_eq!(learner.mode(), LearnerMode::Auto);
    assert_eq!(learner.history().len(), 1);
    assert_eq!(learner.status().total_adjustments, 1);

    let table = AdaptivePidTable::load_or_create(&lab.config.adaptive, defaults(), lab.store.clone());
    assert!(close(table.band(BAND).unwrap().current.kp, 2.25));

    let mut analyzer = PidAnalyzer::new(&lab.config.analyzer, &lab.config.adaptive.bands);
    assert_eq!(analyzer.load_saved(lab.store.as_ref()).unwrap(), 1);
}

#[test]
fn rollback_restores_base_gains() {
    let mut lab = Lab::new();
    lab.learner.set_mode(LearnerMode::Auto);
    lab.learn_once(1);
    assert!(lab.table.rollback_band(BAND));
    assert_eq!(lab.gains(), defaults());
    assert!(!lab.table.rollback_band(123));
}
