//! fleetform resource model
//!
//! Dynamically-typed values that flow between the engine and providers.
//!
//! - [`PropertyValue`] / [`PropertyMap`]: the value bag every provider call carries
//! - [`PropertyPath`]: addressing into nested values (`a.b[0]["x.y"]`)
//! - [`Urn`]: stable logical identity of a resource
//! - [`diff`]: deterministic property diffs with declared replace-forcing keys

pub mod diff;
pub mod error;
pub mod path;
pub mod urn;
pub mod value;

// Re-exports
pub use diff::{
    DiffClassification, ObjectDiff, PropertyChange, PropertyDiff, diff_properties,
    diff_with_ignore_changes,
};
pub use error::{ResourceError, Result};
pub use path::{PathSegment, PropertyPath, apply_ignore_changes};
pub use urn::Urn;
pub use value::{Archive, ArchiveSource, Asset, AssetSource, PropertyMap, PropertyValue};
