//! Which side of the field we are playing on, voted by camera positions.

use std::collections::HashMap;

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Blue,
    Yellow,
    #[default]
    Unknown,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Side::Blue => "Blue",
            Side::Yellow => "Yellow",
            Side::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Expected camera mounting positions per side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SideConfig {
    /// Max XY distance (m) between a camera and a reference position.
    pub tolerance: f64,
    pub blue: Vec<Vector2<f64>>,
    pub yellow: Vec<Vector2<f64>>,
}

impl Default for SideConfig {
    fn default() -> Self {
        let blue = vec![
            Vector2::new(0.0, 1.1),
            Vector2::new(-1.45, -1.1),
            Vector2::new(1.45, -1.1),
            Vector2::new(-1.622, -0.1),
        ];
        let yellow = blue.iter().map(|p| Vector2::new(p.x, -p.y)).collect();
        Self {
            tolerance: 0.5,
            blue,
            yellow,
        }
    }
}

pub struct SideResolver {
    config: SideConfig,
}

impl SideResolver {
    pub fn new(config: SideConfig) -> Self {
        Self { config }
    }

    /// Side whose reference position is closest to `position` within
    /// tolerance.
    fn vote(&self, position: &Vector3<f64>) -> Option<Side> {
        let xy = position.xy();
        let mut best: Option<(Side, f64)> = None;
        for (side, refs) in [(Side::Blue, &self.config.blue), (Side::Yellow, &self.config.yellow)] {
            for r in refs {
                let d = (r - xy).norm();
                if d < self.config.tolerance && best.map_or(true, |(_, bd)| d < bd) {
                    best = Some((side, d));
                }
            }
        }
        best.map(|(side, _)| side)
    }

    /// Majority vote over camera world positions. Ties and no votes give
    /// [`Side::Unknown`].
    pub fn resolve<'a>(&self, camera_positions: impl IntoIterator<Item = &'a Vector3<f64>>) -> Side {
        let mut votes: HashMap<Side, usize> = HashMap::new();
        for p in camera_positions {
            if let Some(side) = self.vote(p) {
                *votes.entry(side).or_default() += 1;
            }
        }
        let blue = votes.get(&Side::Blue).copied().unwrap_or(0);
        let yellow = votes.get(&Side::Yellow).copied().unwrap_or(0);
        match blue.cmp(&yellow) {
            std::cmp::Ordering::Greater => Side::Blue,
            std::cmp::Ordering::Less => Side::Yellow,
            std::cmp::Ordering::Equal => Side::Unknown,
        }
    }
}

impl Default for SideResolver {
    fn default() -> Self {
        Self::new(SideConfig::default())
    }
}
