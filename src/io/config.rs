//! YAML configuration: component tuning plus the tracked scene.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cameras::CameraManagerConfig;
use crate::fusion::{EngineConfig, SideConfig};
use crate::geometry::SE3;
use crate::markers::{Marker, MarkerId};
use crate::objects::{AnchorObject, MarkerArray, ObjectKind, RigidBody, SingleMarkerBody, TrackableObject};
use crate::postprocess::DeflickerConfig;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub engine: EngineConfig,
    pub side: SideConfig,
    pub deflicker: DeflickerConfig,
    pub cameras: CameraManagerConfig,
    pub scene: SceneConfig,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            side: SideConfig::default(),
            deflicker: DeflickerConfig::default(),
            cameras: CameraManagerConfig::default(),
            scene: SceneConfig::competition(),
        }
    }
}

impl FusionConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let config: FusionConfig =
            serde_yaml::from_reader(file).with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: FusionConfig = serde_yaml::from_str(text).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if !(self.engine.min_surface >= 0.0) {
            return invalid(format!("engine.min_surface must be >= 0, got {}", self.engine.min_surface));
        }
        if !(self.side.tolerance > 0.0) {
            return invalid(format!("side.tolerance must be > 0, got {}", self.side.tolerance));
        }
        if !(self.deflicker.smoothing > 0.0 && self.deflicker.smoothing <= 1.0) {
            return invalid(format!("deflicker.smoothing must be in (0, 1], got {}", self.deflicker.smoothing));
        }
        if !(self.deflicker.match_radius >= 0.0) {
            return invalid(format!("deflicker.match_radius must be >= 0, got {}", self.deflicker.match_radius));
        }
        if self.cameras.error_threshold == 0 {
            return invalid("cameras.error_threshold must be > 0".into());
        }
        for spec in self.scene.all() {
            spec.validate()?;
        }
        Ok(())
    }
}

/// Objects to track, by the registries that should see them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Registered with both sides.
    pub common: Vec<ObjectSpec>,
    pub blue: Vec<ObjectSpec>,
    pub yellow: Vec<ObjectSpec>,
}

impl SceneConfig {
    pub fn all(&self) -> impl Iterator<Item = &ObjectSpec> {
        self.common.iter().chain(&self.blue).chain(&self.yellow)
    }

    /// The competition field: board anchor, solar panel row and ten top
    /// trackers shared by both sides, plus two tracker cubes per side.
    pub fn competition() -> Self {
        let board_markers = [(20, -0.9, 0.5), (21, 0.9, 0.5), (22, -0.9, -0.5), (23, 0.9, -0.5)]
            .into_iter()
            .map(|(id, x, y)| MarkerSpec {
                id,
                size: 0.1,
                position: Vector3::new(x, y, 0.0),
                rotation: Vector3::zeros(),
            })
            .collect();
        let mut common = vec![
            ObjectSpec::Anchor {
                name: "board".into(),
                markers: board_markers,
                position: Vector3::zeros(),
                rotation: Vector3::zeros(),
                adjustable: false,
            },
            ObjectSpec::SolarPanels,
        ];
        common.extend((1..=10).map(|i| ObjectSpec::TopTracker {
            name: format!("top tracker {i}"),
            marker: MarkerSpec::centered(i, 0.07),
        }));

        let cube = |name: &str, first: u32| ObjectSpec::Cube {
            name: name.into(),
            ids: [first, first + 1, first + 2, first + 3],
            marker_size: 0.05,
            size: Vector2::new(0.085065, 0.085065),
        };
        Self {
            common,
            blue: vec![cube("blue1", 51), cube("blue2", 56)],
            yellow: vec![cube("yellow1", 71), cube("yellow2", 76)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerSpec {
    pub id: u32,
    /// Side length in metres.
    pub size: f64,
    #[serde(default)]
    pub position: Vector3<f64>,
    /// Rotation vector (axis · angle, radians).
    #[serde(default)]
    pub rotation: Vector3<f64>,
}

impl MarkerSpec {
    pub fn centered(id: u32, size: f64) -> Self {
        Self {
            id,
            size,
            position: Vector3::zeros(),
            rotation: Vector3::zeros(),
        }
    }

    pub fn build(&self) -> Marker {
        Marker::new(
            MarkerId(self.id),
            self.size,
            SE3::from_rotation_vector(self.rotation, self.position),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectSpec {
    Anchor {
        name: String,
        markers: Vec<MarkerSpec>,
        /// World position of the anchor origin.
        #[serde(default)]
        position: Vector3<f64>,
        /// Rotation vector (axis · angle, radians) of the anchor in the world.
        #[serde(default)]
        rotation: Vector3<f64>,
        #[serde(default)]
        adjustable: bool,
    },
    Cube {
        name: String,
        ids: [u32; 4],
        marker_size: f64,
        size: Vector2<f64>,
    },
    Rigid {
        name: String,
        kind: ObjectKind,
        markers: Vec<MarkerSpec>,
    },
    TopTracker {
        name: String,
        marker: MarkerSpec,
    },
    Single {
        name: String,
        kind: ObjectKind,
        marker: MarkerSpec,
    },
    Array {
        name: String,
        kind: ObjectKind,
        marker_id: u32,
        marker_size: f64,
        positions: Vec<Vector3<f64>>,
    },
    SolarPanels,
}

impl ObjectSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |what: &str, v: f64| {
            if v > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{what} must be > 0, got {v}")))
            }
        };
        match self {
            ObjectSpec::Anchor { name, markers, .. } | ObjectSpec::Rigid { name, markers, .. } => {
                if markers.is_empty() {
                    return Err(ConfigError::Invalid(format!("{name}: no markers")));
                }
                markers.iter().try_for_each(|m| positive("marker size", m.size))
            }
            ObjectSpec::Cube { marker_size, size, .. } => {
                positive("marker size", *marker_size)?;
                positive("cube width", size.x)?;
                positive("cube depth", size.y)
            }
            ObjectSpec::TopTracker { marker, .. } | ObjectSpec::Single { marker, .. } => {
                positive("marker size", marker.size)
            }
            ObjectSpec::Array { name, marker_size, positions, .. } => {
                if positions.is_empty() {
                    return Err(ConfigError::Invalid(format!("{name}: no slots")));
                }
                positive("marker size", *marker_size)
            }
            ObjectSpec::SolarPanels => Ok(()),
        }
    }

    pub fn build(&self) -> TrackableObject {
        match self {
            ObjectSpec::Anchor {
                name,
                markers,
                position,
                rotation,
                adjustable,
            } => AnchorObject::new(
                name.clone(),
                SE3::from_rotation_vector(*rotation, *position),
                markers.iter().map(MarkerSpec::build).collect(),
            )
            .adjustable(*adjustable)
            .into(),
            ObjectSpec::Cube {
                name,
                ids,
                marker_size,
                size,
            } => RigidBody::cube(name.clone(), ids.map(MarkerId), *marker_size, (size.x, size.y)).into(),
            ObjectSpec::Rigid { name, kind, markers } => {
                RigidBody::new(name.clone(), *kind, markers.iter().map(MarkerSpec::build).collect()).into()
            }
            ObjectSpec::TopTracker { name, marker } => SingleMarkerBody::top_tracker(name.clone(), marker.build()).into(),
            ObjectSpec::Single { name, kind, marker } => {
                SingleMarkerBody::new(name.clone(), *kind, marker.build()).into()
            }
            ObjectSpec::Array {
                name,
                kind,
                marker_id,
                marker_size,
                positions,
            } => MarkerArray::new(name.clone(), *kind, MarkerId(*marker_id), *marker_size, positions.clone()).into(),
            ObjectSpec::SolarPanels => MarkerArray::solar_panels().into(),
        }
    }
}
