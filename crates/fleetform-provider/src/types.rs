//! Request and response records of the provider protocol

use fleetform_resource::{
    DiffClassification, ObjectDiff, PropertyDiff, PropertyMap, PropertyPath, Urn,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// A request to validate the inputs (or provider configuration) of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub urn: Urn,

    #[serde(rename = "type")]
    pub type_token: String,

    pub name: String,

    /// Inputs from the last successful Check, empty for a new resource
    pub olds: PropertyMap,

    /// Desired inputs
    pub news: PropertyMap,

    /// Random bytes for providers that need to generate unique names
    pub random_seed: Vec<u8>,
}

/// A property that failed validation, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    pub property: String,
    pub reason: String,
}

impl CheckFailure {
    pub fn new(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResponse {
    /// Inputs to pass to subsequent Diff/Create/Update calls
    pub inputs: PropertyMap,

    /// Validation failures; non-empty blocks mutation of this resource
    pub failures: Vec<CheckFailure>,
}

impl CheckResponse {
    /// Accept the inputs unchanged
    pub fn ok(inputs: PropertyMap) -> Self {
        Self {
            inputs,
            failures: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffRequest {
    pub id: String,
    pub urn: Urn,

    #[serde(rename = "type")]
    pub type_token: String,

    pub name: String,
    pub olds: PropertyMap,
    pub news: PropertyMap,

    /// Property paths treated as unchanged
    pub ignore_changes: Vec<PropertyPath>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResponse {
    pub classification: DiffClassification,
    pub changed_keys: BTreeSet<String>,
    pub replace_keys: BTreeSet<String>,
    pub detailed_diff: BTreeMap<String, PropertyDiff>,

    /// Replacement must delete the old resource before creating the new one
    pub delete_before_replace: bool,
}

impl DiffResponse {
    pub fn no_change() -> Self {
        Self::default()
    }

    pub fn has_changes(&self) -> bool {
        self.classification != DiffClassification::NoChange
    }
}

impl From<ObjectDiff> for DiffResponse {
    fn from(diff: ObjectDiff) -> Self {
        Self {
            classification: diff.classification(),
            changed_keys: diff.changed_keys(),
            replace_keys: diff.replace_keys(),
            detailed_diff: diff.changes,
            delete_before_replace: false,
        }
    }
}

/// Provider-wide configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigureRequest {
    pub variables: PropertyMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub urn: Urn,

    #[serde(rename = "type")]
    pub type_token: String,

    pub name: String,
    pub properties: PropertyMap,
    pub timeout: Duration,

    /// When set the provider must not touch real infrastructure
    pub preview: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResponse {
    /// Provider-assigned ID; `None` during preview
    pub id: Option<String>,

    /// Outputs; may contain computed placeholders during preview only for
    /// values that cannot be known before apply
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub id: String,
    pub urn: Urn,

    #[serde(rename = "type")]
    pub type_token: String,

    pub name: String,

    /// Current state, enough to identify the resource
    pub properties: PropertyMap,

    /// Current inputs, if known
    pub inputs: PropertyMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResponse {
    /// Empty when the resource no longer exists
    pub id: String,
    pub properties: PropertyMap,
    pub inputs: PropertyMap,
}

impl ReadResponse {
    pub fn gone() -> Self {
        Self {
            id: String::new(),
            properties: PropertyMap::new(),
            inputs: PropertyMap::new(),
        }
    }

    pub fn exists(&self) -> bool {
        !self.id.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub id: String,
    pub urn: Urn,

    #[serde(rename = "type")]
    pub type_token: String,

    pub name: String,
    pub olds: PropertyMap,
    pub news: PropertyMap,
    pub timeout: Duration,
    pub ignore_changes: Vec<PropertyPath>,
    pub preview: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub id: String,
    pub urn: Urn,

    #[serde(rename = "type")]
    pub type_token: String,

    pub name: String,
}
