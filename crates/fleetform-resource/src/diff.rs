//! Property diffs between two property maps
//!
//! Whether a change forces replacement is a declared trait of the property
//! (from the provider's schema), never inferred from the values. A `Null`
//! value is treated the same as an absent property.

use crate::error::Result;
use crate::path::{PropertyPath, apply_ignore_changes};
use crate::value::{PropertyMap, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Kind of change for a single property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyChange {
    Added,
    Deleted,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDiff {
    pub kind: PropertyChange,

    /// Whether this change forces the resource to be replaced
    pub replace: bool,
}

/// Overall classification of a resource diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffClassification {
    #[default]
    NoChange,
    Update,
    Replace,
}

impl fmt::Display for DiffClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffClassification::NoChange => write!(f, "no-change"),
            DiffClassification::Update => write!(f, "update"),
            DiffClassification::Replace => write!(f, "replace"),
        }
    }
}

/// Per-property diff of two property maps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDiff {
    pub changes: BTreeMap<String, PropertyDiff>,
    pub unchanged: BTreeSet<String>,
}

impl ObjectDiff {
    pub fn any_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn changed_keys(&self) -> BTreeSet<String> {
        self.changes.keys().cloned().collect()
    }

    pub fn replace_keys(&self) -> BTreeSet<String> {
        self.changes
            .iter()
            .filter(|(_, d)| d.replace)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn classification(&self) -> DiffClassification {
        if self.changes.values().any(|d| d.replace) {
            DiffClassification::Replace
        } else if self.any_changes() {
            DiffClassification::Update
        } else {
            DiffClassification::NoChange
        }
    }
}

fn present(value: Option<&PropertyValue>) -> Option<&PropertyValue> {
    value.filter(|v| !v.is_null())
}

/// Diff `olds` against `news`
///
/// An unresolved (computed) new value always counts as an update, and only
/// forces replacement when its property is listed in `replace_on_changes`.
pub fn diff_properties(
    olds: &PropertyMap,
    news: &PropertyMap,
    replace_on_changes: &BTreeSet<String>,
) -> ObjectDiff {
    let keys: BTreeSet<&String> = olds.keys().chain(news.keys()).collect();
    let mut diff = ObjectDiff::default();

    for key in keys {
        let kind = match (present(olds.get(key)), present(news.get(key))) {
            (None, None) => None,
            (Some(_), None) => Some(PropertyChange::Deleted),
            (None, Some(_)) => Some(PropertyChange::Added),
            (Some(_), Some(new)) if new.contains_unknowns() => Some(PropertyChange::Updated),
            (Some(old), Some(new)) if old != new => Some(PropertyChange::Updated),
            (Some(_), Some(_)) => None,
        };

        match kind {
            Some(kind) => {
                diff.changes.insert(
                    key.clone(),
                    PropertyDiff {
                        kind,
                        replace: replace_on_changes.contains(key),
                    },
                );
            }
            None => {
                diff.unchanged.insert(key.clone());
            }
        }
    }

    diff
}

/// Mask `ignore_changes` out of `news`, then diff
pub fn diff_with_ignore_changes(
    olds: &PropertyMap,
    news: &PropertyMap,
    ignore_changes: &[PropertyPath],
    replace_on_changes: &BTreeSet<String>,
) -> Result<ObjectDiff> {
    let masked = apply_ignore_changes(olds, news, ignore_changes)?;
    Ok(diff_properties(olds, &masked, replace_on_changes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replace(keys: &[&str]) -> BTreeSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_classifies_each_property() {
        let olds = PropertyMap::new()
            .with("size", 1)
            .with("name", "a")
            .with("gone", true);
        let news = PropertyMap::new()
            .with("size", 2)
            .with("name", "a")
            .with("fresh", "x");

        let diff = diff_properties(&olds, &news, &BTreeSet::new());
        assert_eq!(diff.changes["size"].kind, PropertyChange::Updated);
        assert_eq!(diff.changes["gone"].kind, PropertyChange::Deleted);
        assert_eq!(diff.changes["fresh"].kind, PropertyChange::Added);
        assert!(diff.unchanged.contains("name"));
        assert_eq!(diff.classification(), DiffClassification::Update);
    }

    #[test]
    fn test_replace_is_declared_not_inferred() {
        let olds = PropertyMap::new().with("zone", "tk1a").with("memo", "x");
        let news = PropertyMap::new().with("zone", "is1a").with("memo", "y");

        let diff = diff_properties(&olds, &news, &replace(&["zone"]));
        assert!(diff.changes["zone"].replace);
        assert!(!diff.changes["memo"].replace);
        assert_eq!(diff.replace_keys(), replace(&["zone"]));
        assert_eq!(diff.classification(), DiffClassification::Replace);
    }

    #[test]
    fn test_computed_value_is_update_safe_unless_declared() {
        let olds = PropertyMap::new().with("ip", "10.0.0.1").with("zone", "tk1a");
        let news = PropertyMap::new()
            .with("ip", PropertyValue::Computed)
            .with("zone", "tk1a");

        let diff = diff_properties(&olds, &news, &BTreeSet::new());
        assert_eq!(diff.classification(), DiffClassification::Update);

        let diff = diff_properties(&olds, &news, &replace(&["ip"]));
        assert_eq!(diff.classification(), DiffClassification::Replace);
    }

    #[test]
    fn test_secret_marker_change_counts() {
        let olds = PropertyMap::new().with("password", "pw");
        let news = PropertyMap::new().with("password", PropertyValue::secret("pw"));

        let diff = diff_properties(&olds, &news, &BTreeSet::new());
        assert_eq!(diff.changes["password"].kind, PropertyChange::Updated);
    }

    #[test]
    fn test_null_equals_absent() {
        let olds = PropertyMap::new().with("memo", PropertyValue::Null);
        let news = PropertyMap::new();
        let diff = diff_properties(&olds, &news, &BTreeSet::new());
        assert_eq!(diff.classification(), DiffClassification::NoChange);
    }

    #[test]
    fn test_masked_paths_yield_no_change() {
        let olds = PropertyMap::new()
            .with("tags", PropertyMap::new().with("owner", "ops"))
            .with("size", 1);
        let news = PropertyMap::new()
            .with("tags", PropertyMap::new().with("owner", "dev"))
            .with("size", 1);
        let ignore = vec![PropertyPath::parse("tags.owner").unwrap()];

        let diff = diff_with_ignore_changes(&olds, &news, &ignore, &replace(&["tags"])).unwrap();
        assert_eq!(diff.classification(), DiffClassification::NoChange);
    }
}
