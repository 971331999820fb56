//! In-memory snapshot of a stack's resource state
//!
//! The resource list is always a valid topological order of the dependency
//! graph: every record appears after its parent and after every resource it
//! depends on. All mutating operations keep that invariant or fail without
//! changing the snapshot.

use crate::error::{Result, StateError};
use chrono::{DateTime, Utc};
use fleetform_resource::{PropertyMap, Urn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

/// Status of a resource record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Resource exists and its outputs are trusted
    Created,
    /// A create was interrupted; the resource may or may not exist
    PendingCreate,
    /// A delete was interrupted; the resource may still exist
    PendingDelete,
    /// Resource is read from a provider but not managed by this stack
    External,
    /// An update failed without a confirmed rollback
    Indeterminate,
}

impl ResourceStatus {
    /// Needs a reconciling Read before its outputs are trusted
    pub fn is_pending(&self) -> bool {
        matches!(self, ResourceStatus::PendingCreate | ResourceStatus::PendingDelete)
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Created => write!(f, "created"),
            ResourceStatus::PendingCreate => write!(f, "pending-create"),
            ResourceStatus::PendingDelete => write!(f, "pending-delete"),
            ResourceStatus::External => write!(f, "external"),
            ResourceStatus::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

/// Per-operation timeout overrides, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTimeouts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<u64>,
}

impl CustomTimeouts {
    pub fn create_timeout(&self) -> Option<Duration> {
        self.create.map(Duration::from_secs)
    }

    pub fn update_timeout(&self) -> Option<Duration> {
        self.update.map(Duration::from_secs)
    }

    pub fn delete_timeout(&self) -> Option<Duration> {
        self.delete.map(Duration::from_secs)
    }
}

/// Which provider instance manages a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderReference {
    pub package: String,
    #[serde(default)]
    pub config: PropertyMap,
}

impl ProviderReference {
    pub fn new(package: impl Into<String>, config: PropertyMap) -> Self {
        Self {
            package: package.into(),
            config,
        }
    }

    /// Default provider for a type token: its first `:` component, unconfigured
    pub fn default_for_type(type_token: &str) -> Self {
        let package = type_token.split(':').next().unwrap_or(type_token);
        Self::new(package, PropertyMap::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub urn: Urn,

    #[serde(rename = "type")]
    pub type_token: String,

    /// Provider-assigned ID; empty until Create completes
    #[serde(default)]
    pub id: String,

    /// Last checked inputs
    #[serde(default)]
    pub inputs: PropertyMap,

    /// Last Create/Update/Read outputs
    #[serde(default)]
    pub outputs: PropertyMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Urn>,

    #[serde(default)]
    pub dependencies: BTreeSet<Urn>,

    #[serde(default)]
    pub protect: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_timeouts: Option<CustomTimeouts>,

    pub status: ResourceStatus,
}

impl ResourceRecord {
    pub fn new(urn: Urn, type_token: impl Into<String>) -> Self {
        Self {
            urn,
            type_token: type_token.into(),
            id: String::new(),
            inputs: PropertyMap::new(),
            outputs: PropertyMap::new(),
            parent: None,
            dependencies: BTreeSet::new(),
            protect: false,
            provider: None,
            custom_timeouts: None,
            status: ResourceStatus::Created,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_inputs(mut self, inputs: PropertyMap) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: PropertyMap) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_parent(mut self, parent: Urn) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_dependency(mut self, dependency: Urn) -> Self {
        self.dependencies.insert(dependency);
        self
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_protect(mut self, protect: bool) -> Self {
        self.protect = protect;
        self
    }

    pub fn with_provider(mut self, provider: ProviderReference) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Parent and dependencies: every resource that must precede this one
    pub fn references(&self) -> impl Iterator<Item = &Urn> {
        self.parent.iter().chain(self.dependencies.iter())
    }

    pub fn references_urn(&self, urn: &Urn) -> bool {
        self.references().any(|r| r == urn)
    }

    /// The provider that manages this record
    pub fn provider_reference(&self) -> ProviderReference {
        self.provider
            .clone()
            .unwrap_or_else(|| ProviderReference::default_for_type(&self.type_token))
    }
}

/// A stack configuration value, with its secret marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigValue {
    pub value: String,
    #[serde(default)]
    pub secret: bool,
}

impl ConfigValue {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: false,
        }
    }

    pub fn secret(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: true,
        }
    }
}

pub type ConfigMap = BTreeMap<String, ConfigValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub time: DateTime<Utc>,

    /// Engine version that wrote the checkpoint
    pub version: String,

    #[serde(default)]
    pub plugins: Vec<PluginInfo>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            time: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            plugins: Vec::new(),
        }
    }
}

impl Manifest {
    /// Record the write time and the plugins in use
    pub fn stamp(&mut self, plugins: &BTreeMap<String, String>) {
        self.time = Utc::now();
        self.version = env!("CARGO_PKG_VERSION").to_string();
        for (name, version) in plugins {
            match self.plugins.iter_mut().find(|p| &p.name == name) {
                Some(existing) => existing.version = version.clone(),
                None => self.plugins.push(PluginInfo {
                    name: name.clone(),
                    version: version.clone(),
                }),
            }
        }
        self.plugins.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub stack: String,
    pub config: ConfigMap,
    pub manifest: Manifest,
    resources: Vec<ResourceRecord>,
}

impl Snapshot {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            config: ConfigMap::new(),
            manifest: Manifest::default(),
            resources: Vec::new(),
        }
    }

    /// Build from parts, checking uniqueness and order
    pub fn from_parts(
        stack: impl Into<String>,
        config: ConfigMap,
        manifest: Manifest,
        resources: Vec<ResourceRecord>,
    ) -> Result<Self> {
        let snapshot = Self {
            stack: stack.into(),
            config,
            manifest,
            resources,
        };
        snapshot.check_order()?;
        Ok(snapshot)
    }

    pub fn resources(&self) -> &[ResourceRecord] {
        &self.resources
    }

    pub fn into_resources(self) -> Vec<ResourceRecord> {
        self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn position(&self, urn: &Urn) -> Option<usize> {
        self.resources.iter().position(|r| &r.urn == urn)
    }

    pub fn get(&self, urn: &Urn) -> Option<&ResourceRecord> {
        self.resources.iter().find(|r| &r.urn == urn)
    }

    pub fn contains(&self, urn: &Urn) -> bool {
        self.position(urn).is_some()
    }

    /// Records whose last operation was interrupted
    pub fn pending(&self) -> Vec<&ResourceRecord> {
        self.resources.iter().filter(|r| r.status.is_pending()).collect()
    }

    pub fn push(&mut self, record: ResourceRecord) -> Result<()> {
        self.insert_at(self.resources.len(), record)
    }

    /// Insert `record` at `index`; every resource it references must already
    /// appear before that position
    pub fn insert_at(&mut self, index: usize, record: ResourceRecord) -> Result<()> {
        if self.contains(&record.urn) {
            return Err(StateError::DuplicateUrn(record.urn));
        }
        let index = index.min(self.resources.len());
        for reference in record.references() {
            match self.position(reference) {
                Some(pos) if pos < index => {}
                Some(_) => {
                    return Err(StateError::DependencyOrder {
                        urn: record.urn.clone(),
                        dependency: reference.clone(),
                    });
                }
                None => {
                    return Err(StateError::Integrity(format!(
                        "{} references unknown resource {}",
                        record.urn, reference
                    )));
                }
            }
        }
        self.resources.insert(index, record);
        Ok(())
    }

    /// Replace the record with the same URN (or append it), then restore
    /// topological order, keeping the existing relative order where possible
    pub fn upsert(&mut self, record: ResourceRecord) -> Result<()> {
        let mut resources = self.resources.clone();
        match resources.iter().position(|r| r.urn == record.urn) {
            Some(pos) => resources[pos] = record,
            None => resources.push(record),
        }
        self.resources = stable_topological_order(resources)?;
        Ok(())
    }

    /// Remove a record nothing references any more
    pub fn remove(&mut self, urn: &Urn) -> Result<ResourceRecord> {
        let pos = self
            .position(urn)
            .ok_or_else(|| StateError::NotFound(urn.clone()))?;
        if let Some(by) = self.resources.iter().find(|r| r.references_urn(urn)) {
            return Err(StateError::StillReferenced {
                urn: urn.clone(),
                by: by.urn.clone(),
            });
        }
        Ok(self.resources.remove(pos))
    }

    /// Remove a record and drop every reference to it
    pub fn remove_and_unlink(&mut self, urn: &Urn) -> Result<ResourceRecord> {
        let pos = self
            .position(urn)
            .ok_or_else(|| StateError::NotFound(urn.clone()))?;
        let removed = self.resources.remove(pos);
        for record in &mut self.resources {
            record.dependencies.remove(urn);
            if record.parent.as_ref() == Some(urn) {
                record.parent = None;
            }
        }
        Ok(removed)
    }

    pub fn set_status(&mut self, urn: &Urn, status: ResourceStatus) -> Result<()> {
        let pos = self
            .position(urn)
            .ok_or_else(|| StateError::NotFound(urn.clone()))?;
        self.resources[pos].status = status;
        Ok(())
    }

    /// Operator acknowledgement that an indeterminate resource is in the
    /// state its record describes
    pub fn resolve_indeterminate(&mut self, urn: &Urn) -> Result<()> {
        let record = self
            .get(urn)
            .ok_or_else(|| StateError::NotFound(urn.clone()))?;
        if record.status != ResourceStatus::Indeterminate {
            return Err(StateError::Integrity(format!(
                "{} is {}, not indeterminate",
                urn, record.status
            )));
        }
        self.set_status(urn, ResourceStatus::Created)
    }

    fn check_order(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for record in &self.resources {
            for reference in record.references() {
                if seen.contains(reference) {
                    continue;
                }
                if self.contains(reference) {
                    return Err(StateError::DependencyOrder {
                        urn: record.urn.clone(),
                        dependency: reference.clone(),
                    });
                }
                return Err(StateError::Integrity(format!(
                    "{} references unknown resource {}",
                    record.urn, reference
                )));
            }
            if !seen.insert(&record.urn) {
                return Err(StateError::DuplicateUrn(record.urn.clone()));
            }
        }
        Ok(())
    }

    /// Full integrity check: unique URNs, topological order, no dangling
    /// references and, for a finalized snapshot, no computed values
    pub fn verify_integrity(&self, finalized: bool) -> Result<()> {
        self.check_order()?;
        if finalized
            && let Some(record) = self
                .resources
                .iter()
                .find(|r| r.outputs.contains_unknowns() || r.inputs.contains_unknowns())
        {
            return Err(StateError::Integrity(format!(
                "{} contains computed values",
                record.urn
            )));
        }
        Ok(())
    }
}

/// Order records so each follows everything it references, preferring the
/// given order among ready records
fn stable_topological_order(mut pending: Vec<ResourceRecord>) -> Result<Vec<ResourceRecord>> {
    let known: HashSet<Urn> = pending.iter().map(|r| r.urn.clone()).collect();
    if known.len() != pending.len() {
        let mut seen = HashSet::new();
        if let Some(dup) = pending.iter().find(|r| !seen.insert(&r.urn)) {
            return Err(StateError::DuplicateUrn(dup.urn.clone()));
        }
    }
    if let Some((record, reference)) = pending
        .iter()
        .find_map(|r| r.references().find(|d| !known.contains(*d)).map(|d| (r, d)))
    {
        return Err(StateError::Integrity(format!(
            "{} references unknown resource {}",
            record.urn, reference
        )));
    }

    let mut placed: HashSet<Urn> = HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|r| r.references().all(|d| placed.contains(d)))
            .ok_or_else(|| {
                StateError::Integrity(format!(
                    "dependency cycle involving {}",
                    pending[0].urn
                ))
            })?;
        let record = pending.remove(ready);
        placed.insert(record.urn.clone());
        ordered.push(record);
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetform_resource::PropertyValue;

    fn urn(name: &str) -> Urn {
        Urn::parse(format!("stack::proj::test:index:Thing::{}", name)).unwrap()
    }

    fn record(name: &str) -> ResourceRecord {
        ResourceRecord::new(urn(name), "test:index:Thing").with_id(name)
    }

    #[test]
    fn test_push_rejects_missing_and_duplicate() {
        let mut snapshot = Snapshot::new("dev");
        snapshot.push(record("a")).unwrap();

        let err = snapshot.push(record("a")).unwrap_err();
        assert!(matches!(err, StateError::DuplicateUrn(_)));

        let err = snapshot
            .push(record("b").with_dependency(urn("missing")))
            .unwrap_err();
        assert!(matches!(err, StateError::Integrity(_)));
    }

    #[test]
    fn test_insert_before_dependency_is_rejected() {
        let mut snapshot = Snapshot::new("dev");
        snapshot.push(record("a")).unwrap();
        snapshot.push(record("b")).unwrap();

        let err = snapshot
            .insert_at(1, record("c").with_dependency(urn("b")))
            .unwrap_err();
        assert!(matches!(err, StateError::DependencyOrder { .. }));
        assert_eq!(snapshot.len(), 2);

        snapshot
            .insert_at(1, record("c").with_dependency(urn("a")))
            .unwrap();
        let names: Vec<_> = snapshot.resources().iter().map(|r| r.urn.name()).collect();
        assert_eq!(names, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_upsert_reorders_after_new_dependency() {
        let mut snapshot = Snapshot::new("dev");
        snapshot.push(record("a")).unwrap();
        snapshot.push(record("b")).unwrap();
        snapshot.push(record("c")).unwrap();

        // a now depends on c
        snapshot.upsert(record("a").with_dependency(urn("c"))).unwrap();
        let names: Vec<_> = snapshot.resources().iter().map(|r| r.urn.name()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
        snapshot.verify_integrity(true).unwrap();
    }

    #[test]
    fn test_upsert_cycle_leaves_snapshot_unchanged() {
        let mut snapshot = Snapshot::new("dev");
        snapshot.push(record("a")).unwrap();
        snapshot.push(record("b").with_dependency(urn("a"))).unwrap();

        let before = snapshot.clone();
        let err = snapshot.upsert(record("a").with_dependency(urn("b")));
        assert!(err.is_err());
        assert_eq!(snapshot, before);
    }

    #[test]
    fn test_remove_referenced_and_unlink() {
        let mut snapshot = Snapshot::new("dev");
        snapshot.push(record("a")).unwrap();
        snapshot.push(record("b").with_parent(urn("a"))).unwrap();
        snapshot.push(record("c").with_dependency(urn("a"))).unwrap();

        let err = snapshot.remove(&urn("a")).unwrap_err();
        assert!(matches!(err, StateError::StillReferenced { .. }));

        snapshot.remove_and_unlink(&urn("a")).unwrap();
        assert!(snapshot.get(&urn("b")).unwrap().parent.is_none());
        assert!(snapshot.get(&urn("c")).unwrap().dependencies.is_empty());
        snapshot.remove(&urn("c")).unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_resolve_indeterminate() {
        let mut snapshot = Snapshot::new("dev");
        snapshot
            .push(record("a").with_status(ResourceStatus::Indeterminate))
            .unwrap();
        snapshot.push(record("b")).unwrap();

        snapshot.resolve_indeterminate(&urn("a")).unwrap();
        assert_eq!(snapshot.get(&urn("a")).unwrap().status, ResourceStatus::Created);
        assert!(snapshot.resolve_indeterminate(&urn("b")).is_err());
        assert!(matches!(
            snapshot.resolve_indeterminate(&urn("zzz")),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn test_verify_integrity_rejects_computed_when_finalized() {
        let mut snapshot = Snapshot::new("dev");
        snapshot
            .push(record("a").with_outputs(PropertyMap::new().with("ip", PropertyValue::Computed)))
            .unwrap();
        assert!(snapshot.verify_integrity(false).is_ok());
        assert!(snapshot.verify_integrity(true).is_err());
    }

    #[test]
    fn test_from_parts_rejects_bad_order() {
        let resources = vec![record("b").with_dependency(urn("a")), record("a")];
        let err = Snapshot::from_parts("dev", ConfigMap::new(), Manifest::default(), resources)
            .unwrap_err();
        assert!(matches!(err, StateError::DependencyOrder { .. }));
    }

    #[test]
    fn test_pending_and_manifest_stamp() {
        let mut snapshot = Snapshot::new("dev");
        snapshot
            .push(record("a").with_status(ResourceStatus::PendingCreate))
            .unwrap();
        snapshot.push(record("b")).unwrap();
        assert_eq!(snapshot.pending().len(), 1);

        let mut plugins = BTreeMap::new();
        plugins.insert("sakura".to_string(), "1.0.0".to_string());
        snapshot.manifest.stamp(&plugins);
        plugins.insert("sakura".to_string(), "1.1.0".to_string());
        snapshot.manifest.stamp(&plugins);
        assert_eq!(snapshot.manifest.plugins.len(), 1);
        assert_eq!(snapshot.manifest.plugins[0].version, "1.1.0");
    }

    #[test]
    fn test_default_provider_reference() {
        let record = record("a");
        assert_eq!(record.provider_reference().package, "test");
    }
}
