//! Owning storage for trackable objects.
//!
//! Registries only hold [`ObjectKey`] handles; a key whose object has been
//! removed simply fails to resolve.

use slotmap::{new_key_type, SlotMap};
use thiserror::Error;
use tracing::debug;

use super::TrackableObject;
use crate::markers::{CatalogError, MarkerCatalog};

new_key_type! {
    /// Handle to an object stored in an [`ObjectArena`].
    pub struct ObjectKey;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArenaError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("a unique object named {name:?} is already live")]
    DuplicateUnique { name: String },
}

#[derive(Debug, Default)]
pub struct ObjectArena {
    objects: SlotMap<ObjectKey, TrackableObject>,
    catalog: MarkerCatalog,
}

impl ObjectArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `object` and claim its markers. Nothing is stored on error.
    pub fn insert(&mut self, object: impl Into<TrackableObject>) -> Result<ObjectKey, ArenaError> {
        let object = object.into();
        if object.is_unique()
            && self
                .objects
                .values()
                .any(|o| o.is_unique() && o.name() == object.name())
        {
            return Err(ArenaError::DuplicateUnique {
                name: object.name().to_string(),
            });
        }
        let ids = object.marker_ids();
        let key = self.objects.insert(object);
        if let Err(e) = self.catalog.claim_all(&ids, key) {
            self.objects.remove(key);
            return Err(e.into());
        }
        debug!("arena: inserted {:?} ({} markers)", key, ids.len());
        Ok(key)
    }

    /// Remove an object and release its markers.
    pub fn remove(&mut self, key: ObjectKey) -> Option<TrackableObject> {
        let object = self.objects.remove(key)?;
        self.catalog.release_owner(key);
        Some(object)
    }

    pub fn get(&self, key: ObjectKey) -> Option<&TrackableObject> {
        self.objects.get(key)
    }

    pub fn get_mut(&mut self, key: ObjectKey) -> Option<&mut TrackableObject> {
        self.objects.get_mut(key)
    }

    pub fn contains(&self, key: ObjectKey) -> bool {
        self.objects.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectKey, &TrackableObject)> {
        self.objects.iter()
    }

    pub fn catalog(&self) -> &MarkerCatalog {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
