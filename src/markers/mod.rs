//! Fiducial markers: the static catalog and per-image detections.

pub mod catalog;
pub mod detection;

pub use catalog::{CatalogError, Marker, MarkerCatalog, MarkerId};
pub use detection::MarkerDetection;
