//! Marker catalog: which fiducial IDs exist and which live object owns them.

use std::collections::HashMap;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::SE3;
use crate::objects::ObjectKey;

/// Global fiducial identifier as decoded by the marker detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(pub u32);

impl std::fmt::Display for MarkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A printed square marker attached to an object.
///
/// Corners in the marker frame follow detector order (top-left, top-right,
/// bottom-right, bottom-left) in the XY plane; +Z points out of the printed
/// face. `offset` maps marker-frame points into the owning object's frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub id: MarkerId,
    pub side_length: f64,
    pub offset: SE3,
}

impl Marker {
    pub fn new(id: MarkerId, side_length: f64, offset: SE3) -> Self {
        Self {
            id,
            side_length,
            offset,
        }
    }

    /// Marker sitting at its object's origin.
    pub fn centered(id: MarkerId, side_length: f64) -> Self {
        Self::new(id, side_length, SE3::identity())
    }

    /// Corners in the marker's own frame.
    pub fn local_corners(&self) -> [Vector3<f64>; 4] {
        let h = self.side_length / 2.0;
        [
            Vector3::new(-h, h, 0.0),
            Vector3::new(h, h, 0.0),
            Vector3::new(h, -h, 0.0),
            Vector3::new(-h, -h, 0.0),
        ]
    }

    /// Corners expressed in the owning object's frame.
    pub fn object_corners(&self) -> [Vector3<f64>; 4] {
        self.local_corners().map(|c| self.offset.transform_point(&c))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("marker {id} is already claimed by another live object")]
    AlreadyClaimed { id: MarkerId },
}

/// Single source of truth for marker ID → owning object.
///
/// Shared markers (one ID printed many times on an independent array) are
/// claimed once by the array.
#[derive(Debug, Default)]
pub struct MarkerCatalog {
    owners: HashMap<MarkerId, ObjectKey>,
}

impl MarkerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim every ID in `ids` for `owner`. Either all IDs are claimed or none.
    pub fn claim_all(&mut self, ids: &[MarkerId], owner: ObjectKey) -> Result<(), CatalogError> {
        if let Some(id) = ids
            .iter()
            .find(|id| self.owners.get(id).is_some_and(|o| *o != owner))
        {
            return Err(CatalogError::AlreadyClaimed { id: *id });
        }
        for id in ids {
            self.owners.insert(*id, owner);
        }
        Ok(())
    }

    /// Release every ID owned by `owner`.
    pub fn release_owner(&mut self, owner: ObjectKey) {
        self.owners.retain(|_, o| *o != owner);
    }

    pub fn owner_of(&self, id: MarkerId) -> Option<ObjectKey> {
        self.owners.get(&id).copied()
    }

    /// IDs with no live owner are ignored by every object; useful for
    /// diagnosing stray detections.
    pub fn is_known(&self, id: MarkerId) -> bool {
        self.owners.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use slotmap::SlotMap;

    #[test]
    fn test_object_corners_apply_offset() {
        let marker = Marker::new(
            MarkerId(3),
            0.1,
            SE3::from_translation(Vector3::new(1.0, 0.0, 0.0)),
        );
        let corners = marker.object_corners();

        assert_relative_eq!(corners[0], Vector3::new(0.95, 0.05, 0.0));
        assert_relative_eq!(corners[2], Vector3::new(1.05, -0.05, 0.0));
    }

    #[test]
    fn test_claim_conflict_is_atomic() {
        let mut keys: SlotMap<ObjectKey, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let mut catalog = MarkerCatalog::new();

        catalog.claim_all(&[MarkerId(1), MarkerId(2)], a).unwrap();
        let err = catalog.claim_all(&[MarkerId(5), MarkerId(2)], b).unwrap_err();

        assert_eq!(err, CatalogError::AlreadyClaimed { id: MarkerId(2) });
        assert!(!catalog.is_known(MarkerId(5)));
        assert_eq!(catalog.owner_of(MarkerId(2)), Some(a));
    }

    #[test]
    fn test_release_frees_ids_for_new_owner() {
        let mut keys: SlotMap<ObjectKey, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let mut catalog = MarkerCatalog::new();

        catalog.claim_all(&[MarkerId(7)], a).unwrap();
        catalog.release_owner(a);
        catalog.claim_all(&[MarkerId(7)], b).unwrap();

        assert_eq!(catalog.owner_of(MarkerId(7)), Some(b));
        assert_eq!(catalog.len(), 1);
    }
}
