//! Output records produced by the fusion engine once per tick.

use serde::{Deserialize, Serialize};

use crate::geometry::SE3;

/// Type tag carried by every fused record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Unknown,
    Team,
    Board,
    Camera,
    Robot,
    TopTracker,
    SolarPanel,
    // Class-based kinds come from the external classifier, not from markers.
    Fragile,
    Resistant,
    Pot,
    PottedPlant,
}

impl ObjectKind {
    /// Kinds produced by the class detector and stabilised by the deflicker
    /// cache.
    pub fn is_class_based(self) -> bool {
        matches!(
            self,
            ObjectKind::Fragile | ObjectKind::Resistant | ObjectKind::Pot | ObjectKind::PottedPlant
        )
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObjectKind::Unknown => "unknown",
            ObjectKind::Team => "team",
            ObjectKind::Board => "board",
            ObjectKind::Camera => "camera",
            ObjectKind::Robot => "robot",
            ObjectKind::TopTracker => "top_tracker",
            ObjectKind::SolarPanel => "solar_panel",
            ObjectKind::Fragile => "fragile",
            ObjectKind::Resistant => "resistant",
            ObjectKind::Pot => "pot",
            ObjectKind::PottedPlant => "potted_plant",
        };
        f.write_str(s)
    }
}

/// Identity of an emitted record: type tag, sequence numeral and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectIdentity {
    pub kind: ObjectKind,
    pub numeral: u32,
    pub name: String,
}

impl ObjectIdentity {
    pub fn new(kind: ObjectKind, numeral: u32, name: impl Into<String>) -> Self {
        Self {
            kind,
            numeral,
            name: name.into(),
        }
    }
}

/// One object in the per-tick output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedObjectRecord {
    pub identity: ObjectIdentity,
    /// World ← object transform.
    pub transform: SE3,
    /// Tick of the last successful pose update.
    pub tick: u64,
    pub confidence: f32,
}

impl FusedObjectRecord {
    pub fn new(identity: ObjectIdentity, transform: SE3, tick: u64) -> Self {
        Self {
            identity,
            transform,
            tick,
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn kind(&self) -> ObjectKind {
        self.identity.kind
    }
}
