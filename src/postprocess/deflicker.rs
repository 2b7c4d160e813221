//! Temporal cache that keeps class-based detections alive across short
//! classifier dropouts.
//!
//! Each tick the raw class-based records are matched against the cache by
//! kind and planar distance. Matches are merged with an exponential moving
//! average and their deadline is pushed out; unmatched detections open new
//! entries; entries past their deadline that were not matched are evicted.
//! The raw records are then replaced with the cache contents.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::PostProcess;
use crate::geometry::SE3;
use crate::objects::{FusedObjectRecord, ObjectIdentity, ObjectKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeflickerConfig {
    /// How long an entry survives without a matching detection.
    pub ttl_ms: u64,
    /// Max XY distance (m) for a detection to match an entry.
    pub match_radius: f64,
    /// Weight of the new detection in the moving average, in (0, 1].
    pub smoothing: f64,
}

impl Default for DeflickerConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 1000,
            match_radius: 0.15,
            smoothing: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeflickerEntry {
    pub kind: ObjectKind,
    pub position: Vector3<f64>,
    pub confidence: f32,
    pub deadline: Instant,
    pub associated: bool,
    pub hits: u32,
    /// Tick of the last matched detection.
    pub tick: u64,
}

impl DeflickerEntry {
    fn planar_distance(&self, position: &Vector3<f64>) -> f64 {
        (self.position.xy() - position.xy()).norm()
    }
}

pub struct Deflicker {
    config: DeflickerConfig,
    entries: Vec<DeflickerEntry>,
}

impl Deflicker {
    pub fn new(config: DeflickerConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[DeflickerEntry] {
        &self.entries
    }

    fn ttl(&self) -> Duration {
        Duration::from_millis(self.config.ttl_ms)
    }

    /// Replace the class-based records in `records` with the stabilised
    /// cache contents.
    pub fn process(&mut self, records: &mut Vec<FusedObjectRecord>, now: Instant) {
        let ttl = self.ttl();
        let alpha = self.config.smoothing.clamp(f64::EPSILON, 1.0);
        for entry in &mut self.entries {
            entry.associated = false;
        }

        let (mut linked, mut created) = (0, 0);
        for record in records.iter().filter(|r| r.kind().is_class_based()) {
            let position = record.transform.translation;
            let radius = self.config.match_radius;
            let matched = self.entries.iter_mut().find(|e| {
                !e.associated && e.kind == record.kind() && e.planar_distance(&position) <= radius
            });
            match matched {
                Some(entry) => {
                    entry.position += (position - entry.position) * alpha;
                    entry.confidence += (record.confidence - entry.confidence) * alpha as f32;
                    entry.associated = true;
                    entry.deadline = now + ttl;
                    entry.hits += 1;
                    entry.tick = record.tick;
                    linked += 1;
                }
                None => {
                    self.entries.push(DeflickerEntry {
                        kind: record.kind(),
                        position,
                        confidence: record.confidence,
                        deadline: now + ttl,
                        associated: true,
                        hits: 1,
                        tick: record.tick,
                    });
                    created += 1;
                }
            }
        }

        let before = self.entries.len();
        self.entries.retain(|e| e.associated || e.deadline >= now);
        trace!(
            "deflicker: {} linked, {} new, {} evicted, {} cached",
            linked,
            created,
            before - self.entries.len(),
            self.entries.len()
        );

        records.retain(|r| !r.kind().is_class_based());
        records.extend(self.cached_records());
    }

    fn cached_records(&self) -> Vec<FusedObjectRecord> {
        let mut numerals: HashMap<ObjectKind, u32> = HashMap::new();
        self.entries
            .iter()
            .map(|e| {
                let numeral = numerals.entry(e.kind).or_insert(0);
                let identity = ObjectIdentity::new(e.kind, *numeral, e.kind.to_string());
                *numeral += 1;
                FusedObjectRecord::new(identity, SE3::from_translation(e.position), e.tick)
                    .with_confidence(e.confidence)
            })
            .collect()
    }
}

impl Default for Deflicker {
    fn default() -> Self {
        Self::new(DeflickerConfig::default())
    }
}

impl PostProcess for Deflicker {
    fn name(&self) -> &str {
        "deflicker"
    }

    fn process(&mut self, records: &mut Vec<FusedObjectRecord>, now: Instant) {
        Deflicker::process(self, records, now);
    }
}
