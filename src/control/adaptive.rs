//! Adaptive gain table: temperature band → PID gains.
//!
//! Each band keeps two triples:
//!
//! - **base**: set by a fresh autotune run (or the configured defaults)
//!   and otherwise immutable;
//! - **current**: nudged by the learner, always inside the hard safety
//!   limits and inside `base ± max_deviation_percent`.
//!
//! Every mutation appends an audit entry, persists the whole table and
//! publishes an immutable [`GainSchedule`] so the control loop can read
//! gains without touching the table.
//!
//! ```text
//!   learner / autotune ──update──▶ AdaptivePidTable ──publish──▶ GainSchedule
//!                                        │                          │
//!                                   StoragePort             AdaptivePidManager
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::pid::PidGains;
use crate::app::ports::StoragePort;
use crate::config::AdaptiveConfig;
use crate::storage::{self, Document};
use crate::sync::{Publisher, Subscriber, snapshot};

pub const TABLE_KEY: &str = "pid_adaptive_table";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableAction {
    AutotuneReset,
    LearnerUpdate,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub action: TableAction,
    pub old: Option<PidGains>,
    pub new: PidGains,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandEntry {
    pub base: PidGains,
    pub current: PidGains,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub created: String,
    pub last_updated: String,
    pub source: String,
    pub base_params: PidGains,
    pub total_adjustments: u32,
    pub total_firings_analyzed: u32,
}

/// Persisted form of the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveTableDocument {
    pub version: u32,
    pub bands: BTreeMap<u32, BandEntry>,
    pub metadata: TableMetadata,
}

impl Document for AdaptiveTableDocument {
    const NAMESPACE: &'static str = "adaptive";
    const VERSION: u32 = 1;
}

// ───────────────────────────────────────────────────────────────
// Published schedule
// ───────────────────────────────────────────────────────────────

/// Immutable copy of every band's current gains, ascending by band.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GainSchedule {
    pub bands: Vec<(u32, PidGains)>,
}

impl GainSchedule {
    /// Interpolated gains at `temp`.  Outside the table the nearest end
    /// band is returned unchanged.  `None` for an empty schedule.
    pub fn gains_at(&self, temp: f64) -> Option<PidGains> {
        let (first, last) = (self.bands.first()?, self.bands.last()?);
        if temp <= f64::from(first.0) {
            return Some(first.1);
        }
        if temp >= f64::from(last.0) {
            return Some(last.1);
        }
        let (lo, hi) = self
            .bands
            .windows(2)
            .map(|w| (w[0], w[1]))
            .find(|(lo, hi)| f64::from(lo.0) <= temp && temp < f64::from(hi.0))?;
        let span = f64::from(hi.0) - f64::from(lo.0);
        let f = if span > 0.0 {
            (temp - f64::from(lo.0)) / span
        } else {
            0.0
        };
        let lerp = |a: f64, b: f64| a + f * (b - a);
        Some(PidGains::new(
            lerp(lo.1.kp, hi.1.kp),
            lerp(lo.1.ki, hi.1.ki),
            lerp(lo.1.kd, hi.1.kd),
        ))
    }

    /// Greatest band boundary ≤ `temp`, or the first band below the table.
    pub fn band_for(&self, temp: f64) -> Option<u32> {
        self.bands
            .iter()
            .rev()
            .find(|(b, _)| temp >= f64::from(*b))
            .or(self.bands.first())
            .map(|(b, _)| *b)
    }
}

// ───────────────────────────────────────────────────────────────
// Summary
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandSummary {
    pub band: u32,
    pub base: PidGains,
    pub current: PidGains,
    /// (current − base) / base · 100, per gain; 0 when base is 0.
    pub deviation_percent: PidGains,
    pub adjustments: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub metadata: TableMetadata,
    pub bands: Vec<BandSummary>,
}

// ───────────────────────────────────────────────────────────────
// Table
// ───────────────────────────────────────────────────────────────

fn now_stamp() -> String {
    chrono::Local::now().to_rfc3339()
}

pub struct AdaptivePidTable {
    config: AdaptiveConfig,
    doc: AdaptiveTableDocument,
    store: Arc<dyn StoragePort>,
    publisher: Publisher<GainSchedule>,
}

impl AdaptivePidTable {
    /// Load the persisted table, or build one from `defaults` when none
    /// exists or the stored one cannot be read.
    pub fn load_or_create(
        config: &AdaptiveConfig,
        defaults: PidGains,
        store: Arc<dyn StoragePort>,
    ) -> Self {
        let loaded = match storage::load::<AdaptiveTableDocument>(store.as_ref(), TABLE_KEY) {
            Ok(Some(doc)) if !doc.bands.is_empty() => {
                info!("ADAPTIVE | table loaded ({} bands)", doc.bands.len());
                Some(doc)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("ADAPTIVE | stored table unusable ({e}), rebuilding from defaults");
                None
            }
        };
        let fresh = loaded.is_none();
        let doc = loaded.unwrap_or_else(|| Self::default_document(config, defaults));
        let (publisher, _) = snapshot(GainSchedule::default());
        let table = Self {
            config: config.clone(),
            doc,
            store,
            publisher,
        };
        if fresh {
            info!(
                "ADAPTIVE | default table created (Kp={} Ki={} Kd={})",
                defaults.kp, defaults.ki, defaults.kd
            );
            table.persist();
        }
        table.publish();
        table
    }

    fn default_document(config: &AdaptiveConfig, defaults: PidGains) -> AdaptiveTableDocument {
        let stamp = now_stamp();
        AdaptiveTableDocument {
            version: AdaptiveTableDocument::VERSION,
            bands: config
                .bands
                .iter()
                .map(|&b| {
                    (
                        b,
                        BandEntry {
                            base: defaults,
                            current: defaults,
                            history: Vec::new(),
                        },
                    )
                })
                .collect(),
            metadata: TableMetadata {
                created: stamp.clone(),
                last_updated: stamp,
                source: "default_from_config".into(),
                base_params: defaults,
                total_adjustments: 0,
                total_firings_analyzed: 0,
            },
        }
    }

    // ── Read side ─────────────────────────────────────────────

    pub fn subscribe(&self) -> Subscriber<GainSchedule> {
        self.publisher.subscribe()
    }

    pub fn schedule(&self) -> GainSchedule {
        GainSchedule {
            bands: self
                .doc
                .bands
                .iter()
                .map(|(b, e)| (*b, e.current))
                .collect(),
        }
    }

    pub fn bands(&self) -> Vec<u32> {
        self.doc.bands.keys().copied().collect()
    }

    pub fn band(&self, band: u32) -> Option<&BandEntry> {
        self.doc.bands.get(&band)
    }

    pub fn metadata(&self) -> &TableMetadata {
        &self.doc.metadata
    }

    pub fn document(&self) -> &AdaptiveTableDocument {
        &self.doc
    }

    /// Interpolated current gains at `temp`.
    pub fn get_params(&self, temp: f64) -> PidGains {
        self.schedule()
            .gains_at(temp)
            .unwrap_or(self.doc.metadata.base_params)
    }

    // ── Bounded updates ───────────────────────────────────────

    /// Clamp one proposed gain: hard range, then base ± deviation, then
    /// hard range again.
    fn cap_one(&self, value: f64, base: f64, (lo, hi): (f64, f64)) -> f64 {
        let dev = self.config.max_deviation_percent / 100.0;
        let value = if value.is_finite() { value } else { base };
        let value = value.clamp(lo, hi);
        let (a, b) = (base * (1.0 - dev), base * (1.0 + dev));
        let value = value.clamp(a.min(b), a.max(b));
        value.clamp(lo, hi)
    }

    pub fn cap(&self, base: PidGains, proposed: PidGains) -> PidGains {
        PidGains::new(
            self.cap_one(proposed.kp, base.kp, self.config.kp_limits),
            self.cap_one(proposed.ki, base.ki, self.config.ki_limits),
            self.cap_one(proposed.kd, base.kd, self.config.kd_limits),
        )
    }

    fn clamp_hard(&self, g: PidGains) -> PidGains {
        let c = &self.config;
        PidGains::new(
            g.kp.clamp(c.kp_limits.0, c.kp_limits.1),
            g.ki.clamp(c.ki_limits.0, c.ki_limits.1),
            g.kd.clamp(c.kd_limits.0, c.kd_limits.1),
        )
    }

    /// Set a band's current gains, bounded by the safety limits.  Returns
    /// the gains actually applied, or `None` for an unknown band.
    pub fn update_band(&mut self, band: u32, proposed: PidGains, reason: &str) -> Option<PidGains> {
        let base = self.doc.bands.get(&band)?.base;
        let capped = self.cap(base, proposed);
        let entry = self.doc.bands.get_mut(&band)?;
        let old = entry.current;
        entry.current = capped;
        entry.history.push(HistoryEntry {
            timestamp: now_stamp(),
            action: TableAction::LearnerUpdate,
            old: Some(old),
            new: capped,
            reason: reason.to_owned(),
        });
        self.doc.metadata.last_updated = now_stamp();
        self.doc.metadata.total_adjustments += 1;
        info!(
            "ADAPTIVE | band {band}\u{00b0}C -> Kp={:.4} Ki={:.6} Kd={:.2} ({reason})",
            capped.kp, capped.ki, capped.kd
        );
        self.persist();
        self.publish();
        Some(capped)
    }

    /// Restore a band's current gains to its base.  `false` for an unknown band.
    pub fn rollback_band(&mut self, band: u32) -> bool {
        let Some(entry) = self.doc.bands.get_mut(&band) else {
            warn!("ADAPTIVE | rollback of unknown band {band}");
            return false;
        };
        let old = entry.current;
        entry.current = entry.base;
        entry.history.push(HistoryEntry {
            timestamp: now_stamp(),
            action: TableAction::Rollback,
            old: Some(old),
            new: entry.base,
            reason: "manual rollback to base".into(),
        });
        self.doc.metadata.last_updated = now_stamp();
        info!("ADAPTIVE | band {band}\u{00b0}C rolled back to base");
        self.persist();
        self.publish();
        true
    }

    pub fn rollback_all(&mut self) {
        for band in self.bands() {
            self.rollback_band(band);
        }
    }

    /// Replace base **and** current of every band with a fresh tuning.
    /// All incremental learning is discarded.
    pub fn set_base_from_autotuning(&mut self, gains: PidGains) {
        let gains = self.clamp_hard(gains);
        let stamp = now_stamp();
        for entry in self.doc.bands.values_mut() {
            entry.base = gains;
            entry.current = gains;
            entry.history.push(HistoryEntry {
                timestamp: stamp.clone(),
                action: TableAction::AutotuneReset,
                old: None,
                new: gains,
                reason: "new base gains from autotune".into(),
            });
        }
        let md = &mut self.doc.metadata;
        md.last_updated = stamp;
        md.source = format!("autotune_{}", chrono::Local::now().format("%Y%m%d"));
        md.base_params = gains;
        warn!(
            "ADAPTIVE | base reset from autotune (Kp={:.4} Ki={:.6} Kd={:.2}); previous learning discarded",
            gains.kp, gains.ki, gains.kd
        );
        self.persist();
        self.publish();
    }

    pub fn record_firing_analyzed(&mut self) {
        self.doc.metadata.total_firings_analyzed += 1;
        self.persist();
    }

    pub fn summary(&self) -> TableSummary {
        let dev = |cur: f64, base: f64| {
            if base > 0.0 {
                ((cur - base) / base * 1000.0).round() / 10.0
            } else {
                0.0
            }
        };
        TableSummary {
            metadata: self.doc.metadata.clone(),
            bands: self
                .doc
                .bands
                .iter()
                .map(|(band, e)| BandSummary {
                    band: *band,
                    base: e.base,
                    current: e.current,
                    deviation_percent: PidGains::new(
                        dev(e.current.kp, e.base.kp),
                        dev(e.current.ki, e.base.ki),
                        dev(e.current.kd, e.base.kd),
                    ),
                    adjustments: e.history.len(),
                })
                .collect(),
        }
    }

    // ── Side effects ──────────────────────────────────────────

    /// A failed write is logged; the in-memory table stays authoritative.
    fn persist(&self) {
        if let Err(e) = storage::save(self.store.as_ref(), TABLE_KEY, &self.doc) {
            warn!("ADAPTIVE | persist failed ({e}), keeping in-memory table");
        }
    }

    fn publish(&self) {
        self.publisher.publish(self.schedule());
    }
}
