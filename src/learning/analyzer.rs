//! Control-quality analysis of completed firings.
//!
//! Samples are grouped by the band of their **setpoint** (performance is
//! judged against the intended target), scored per band, and turned into
//! directional gain suggestions by a fixed rule table.

use std::collections::BTreeMap;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{Direction, GainParam, Magnitude, Quality, Suggestion};
use crate::app::ports::{StorageError, StoragePort};
use crate::config::AnalyzerConfig;
use crate::firing_log::{self, ControlCycleRecord, FiringOutcome, FiringRecord};
use crate::storage::{self, Document};

pub const KEY_PREFIX: &str = "analysis_";

fn round_to(v: f64, places: i32) -> f64 {
    let m = 10f64.powi(places);
    (v * m).round() / m
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandMetrics {
    pub samples: usize,
    /// Largest excursion above the setpoint, °C (≥ 0).
    pub overshoot: f64,
    pub mae: f64,
    pub rms: f64,
    /// Mean of temp − setpoint; positive means running hot.
    pub bias: f64,
    /// Error sign changes per sample.
    pub oscillation_index: f64,
    pub settling_out_percent: f64,
    pub quality: Quality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiringAnalysis {
    pub version: u32,
    pub firing_key: String,
    pub program_name: String,
    pub date: String,
    pub duration_minutes: f64,
    pub total_samples: usize,
    pub band_metrics: BTreeMap<u32, BandMetrics>,
    /// 0–100, sample-weighted across bands.
    pub overall_score: u32,
    pub suggestions: Vec<Suggestion>,
}

impl Document for FiringAnalysis {
    const NAMESPACE: &'static str = "analyses";
    const VERSION: u32 = 1;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandAggregate {
    pub avg_mae: f64,
    pub avg_overshoot: f64,
    pub avg_rms: f64,
    pub avg_bias: f64,
    pub avg_oscillation: f64,
    pub firings_analyzed: usize,
}

pub struct PidAnalyzer {
    config: AnalyzerConfig,
    bands: Vec<u32>,
    analyses: Vec<FiringAnalysis>,
}

impl PidAnalyzer {
    /// `bands` are the ascending lower boundaries shared with the gain table.
    pub fn new(config: &AnalyzerConfig, bands: &[u32]) -> Self {
        Self {
            config: config.clone(),
            bands: bands.to_vec(),
            analyses: Vec::new(),
        }
    }

    // ── Pure analysis ─────────────────────────────────────────

    /// Analyze one record.  `None` unless the firing completed and logged
    /// enough samples.
    pub fn analyze(&self, key: &str, record: &FiringRecord) -> Option<FiringAnalysis> {
        if record.outcome != FiringOutcome::Completed {
            info!("ANALYZER | {key} skipped ({:?})", record.outcome);
            return None;
        }
        if record.temperatures.len() < self.config.min_samples {
            warn!(
                "ANALYZER | {key} has too few samples ({})",
                record.temperatures.len()
            );
            return None;
        }

        let mut by_band: BTreeMap<u32, Vec<&ControlCycleRecord>> = BTreeMap::new();
        for s in &record.temperatures {
            by_band.entry(self.band_for(s.setpoint)).or_default().push(s);
        }
        let band_metrics: BTreeMap<u32, BandMetrics> = by_band
            .into_iter()
            .filter(|(_, samples)| samples.len() >= self.config.min_band_samples)
            .filter_map(|(band, samples)| Some((band, self.band_metrics(&samples)?)))
            .collect();

        let analysis = FiringAnalysis {
            version: FiringAnalysis::VERSION,
            firing_key: key.to_owned(),
            program_name: record.program_name.clone(),
            date: record.start_time.clone(),
            duration_minutes: record.duration_minutes,
            total_samples: record.temperatures.len(),
            overall_score: Self::overall_score(&band_metrics),
            suggestions: self.suggestions(&band_metrics),
            band_metrics,
        };
        info!(
            "ANALYZER | {key}: score {}/100, {} bands, {} suggestions",
            analysis.overall_score,
            analysis.band_metrics.len(),
            analysis.suggestions.len()
        );
        Some(analysis)
    }

    /// Greatest boundary ≤ `setpoint`; the first band below the table.
    pub fn band_for(&self, setpoint: f64) -> u32 {
        let first = self.bands.first().copied().unwrap_or(0);
        self.bands
            .iter()
            .copied()
            .filter(|&b| setpoint >= f64::from(b))
            .last()
            .unwrap_or(first)
    }

    /// Metrics over the samples of one band.  Samples with a zero
    /// setpoint carry no target and are ignored.
    pub fn band_metrics(&self, samples: &[&ControlCycleRecord]) -> Option<BandMetrics> {
        let errors: Vec<f64> = samples
            .iter()
            .filter(|s| s.setpoint != 0.0)
            .map(|s| s.temp - s.setpoint)
            .collect();
        let n = errors.len();
        if n == 0 {
            return None;
        }
        let nf = n as f64;

        let overshoot = errors.iter().copied().fold(0.0, f64::max);
        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / nf;
        let rms = (errors.iter().map(|e| e * e).sum::<f64>() / nf).sqrt();
        let bias = errors.iter().sum::<f64>() / nf;
        let sign = |e: f64| if e >= 0.0 { 1 } else { -1 };
        let sign_changes = errors
            .windows(2)
            .filter(|w| sign(w[0]) != sign(w[1]))
            .count();
        let oscillation_index = if n > 1 { sign_changes as f64 / nf } else { 0.0 };
        let out_of_band = errors
            .iter()
            .filter(|e| e.abs() > self.config.settling_tolerance)
            .count();

        Some(BandMetrics {
            samples: n,
            overshoot: round_to(overshoot, 1),
            mae: round_to(mae, 2),
            rms: round_to(rms, 2),
            bias: round_to(bias, 2),
            oscillation_index: round_to(oscillation_index, 4),
            settling_out_percent: round_to(out_of_band as f64 / nf * 100.0, 1),
            quality: self.rate_quality(mae, overshoot, oscillation_index),
        })
    }

    pub fn rate_quality(&self, mae: f64, overshoot: f64, oscillation: f64) -> Quality {
        let c = &self.config;
        let tier = |v: f64, good: f64, bad: f64, top: u32| {
            if v <= good {
                top
            } else if v <= bad {
                1
            } else {
                0
            }
        };
        let score = tier(mae, c.mae_good, c.mae_bad, 3)
            + tier(overshoot, c.overshoot_good, c.overshoot_bad, 3)
            + tier(oscillation, c.oscillation_good, c.oscillation_bad, 2);
        match score {
            7.. => Quality::Excellent,
            5..=6 => Quality::Good,
            3..=4 => Quality::Acceptable,
            _ => Quality::Poor,
        }
    }

    pub fn overall_score(metrics: &BTreeMap<u32, BandMetrics>) -> u32 {
        let weight: usize = metrics.values().map(|m| m.samples).sum();
        if weight == 0 {
            return 0;
        }
        let total: f64 = metrics
            .values()
            .map(|m| f64::from(m.quality.score()) * m.samples as f64)
            .sum();
        (total / weight as f64).round() as u32
    }

    /// Rule table.  Several rules may fire for the same band.
    pub fn suggestions(&self, metrics: &BTreeMap<u32, BandMetrics>) -> Vec<Suggestion> {
        let c = &self.config;
        let mut out = Vec::new();
        for (&band, m) in metrics {
            if m.quality == Quality::Excellent {
                continue;
            }
            let mut push = |param, direction, magnitude, reason: String| {
                out.push(Suggestion {
                    band,
                    param,
                    direction,
                    magnitude,
                    reason,
                });
            };

            if m.overshoot > c.overshoot_bad {
                push(
                    GainParam::Kp,
                    Direction::Decrease,
                    Magnitude::Large,
                    format!("overshoot {:.1}\u{00b0}C in band {band}\u{00b0}C", m.overshoot),
                );
            } else if m.overshoot > c.overshoot_good {
                push(
                    GainParam::Kp,
                    Direction::Decrease,
                    Magnitude::Small,
                    format!(
                        "moderate overshoot {:.1}\u{00b0}C in band {band}\u{00b0}C",
                        m.overshoot
                    ),
                );
            }

            if m.bias > c.bias_limit {
                push(
                    GainParam::Ki,
                    Direction::Decrease,
                    Magnitude::Small,
                    format!("running {:.1}\u{00b0}C above setpoint in band {band}\u{00b0}C", m.bias),
                );
            } else if m.bias < -c.bias_limit {
                push(
                    GainParam::Ki,
                    Direction::Increase,
                    Magnitude::Small,
                    format!(
                        "running {:.1}\u{00b0}C below setpoint in band {band}\u{00b0}C",
                        -m.bias
                    ),
                );
            }

            if m.oscillation_index > c.oscillation_bad {
                push(
                    GainParam::Kp,
                    Direction::Decrease,
                    Magnitude::Small,
                    format!(
                        "high oscillation ({:.3}) in band {band}\u{00b0}C",
                        m.oscillation_index
                    ),
                );
                push(
                    GainParam::Kd,
                    Direction::Decrease,
                    Magnitude::Small,
                    format!("high oscillation, less derivative in band {band}\u{00b0}C"),
                );
            }

            if m.mae > c.mae_bad && m.oscillation_index < c.oscillation_good {
                push(
                    GainParam::Kp,
                    Direction::Increase,
                    Magnitude::Small,
                    format!(
                        "high mean error ({:.1}\u{00b0}C) without oscillation in band {band}\u{00b0}C",
                        m.mae
                    ),
                );
            }
        }
        out
    }

    // ── Stored analyses ───────────────────────────────────────

    /// Analyze the firing stored under `key`, persist the analysis and keep
    /// it in memory.
    pub fn analyze_firing(
        &mut self,
        store: &dyn StoragePort,
        key: &str,
    ) -> Result<Option<FiringAnalysis>, StorageError> {
        let Some(record) = firing_log::load_firing(store, key)? else {
            return Err(StorageError::NotFound);
        };
        let Some(analysis) = self.analyze(key, &record) else {
            return Ok(None);
        };
        let save_key = format!("{KEY_PREFIX}{key}");
        if let Err(e) = storage::save(store, &save_key, &analysis) {
            warn!("ANALYZER | could not save {save_key}: {e}");
        }
        self.remember(analysis.clone());
        Ok(Some(analysis))
    }

    /// Analyze every stored firing, oldest first.
    pub fn analyze_all(&mut self, store: &dyn StoragePort) -> Result<Vec<FiringAnalysis>, StorageError> {
        let mut out = Vec::new();
        for key in firing_log::list_firings(store)? {
            match self.analyze_firing(store, &key) {
                Ok(Some(a)) => out.push(a),
                Ok(None) => {}
                Err(e) => warn!("ANALYZER | {key} unreadable: {e}"),
            }
        }
        info!("ANALYZER | analyzed {} firings", out.len());
        Ok(out)
    }

    /// Load previously saved analyses, oldest first.
    pub fn load_saved(&mut self, store: &dyn StoragePort) -> Result<usize, StorageError> {
        let keys = store.list(FiringAnalysis::NAMESPACE)?;
        for key in keys.iter().filter(|k| k.starts_with(KEY_PREFIX)) {
            match storage::load::<FiringAnalysis>(store, key) {
                Ok(Some(a)) => self.remember(a),
                Ok(None) => {}
                Err(e) => warn!("ANALYZER | skipping {key}: {e}"),
            }
        }
        Ok(self.analyses.len())
    }

    fn remember(&mut self, analysis: FiringAnalysis) {
        self.analyses.retain(|a| a.firing_key != analysis.firing_key);
        self.analyses.push(analysis);
    }

    pub fn analyses(&self) -> &[FiringAnalysis] {
        &self.analyses
    }

    pub fn latest(&self) -> Option<&FiringAnalysis> {
        self.analyses.last()
    }

    /// Per-band averages across every analysis held in memory.
    pub fn aggregated_metrics(&self) -> BTreeMap<u32, BandAggregate> {
        let mut acc: BTreeMap<u32, (BandAggregate, usize)> = BTreeMap::new();
        for (band, m) in self.analyses.iter().flat_map(|a| a.band_metrics.iter()) {
            if m.samples == 0 {
                continue;
            }
            let (sum, n) = acc.entry(*band).or_insert((
                BandAggregate {
                    avg_mae: 0.0,
                    avg_overshoot: 0.0,
                    avg_rms: 0.0,
                    avg_bias: 0.0,
                    avg_oscillation: 0.0,
                    firings_analyzed: 0,
                },
                0,
            ));
            sum.avg_mae += m.mae;
            sum.avg_overshoot += m.overshoot;
            sum.avg_rms += m.rms;
            sum.avg_bias += m.bias;
            sum.avg_oscillation += m.oscillation_index;
            *n += 1;
        }
        acc.into_iter()
            .map(|(band, (sum, n))| {
                let nf = n as f64;
                (
                    band,
                    BandAggregate {
                        avg_mae: round_to(sum.avg_mae / nf, 2),
                        avg_overshoot: round_to(sum.avg_overshoot / nf, 1),
                        avg_rms: round_to(sum.avg_rms / nf, 2),
                        avg_bias: round_to(sum.avg_bias / nf, 2),
                        avg_oscillation: round_to(sum.avg_oscillation / nf, 4),
                        firings_analyzed: n,
                    },
                )
            })
            .collect()
    }
}
