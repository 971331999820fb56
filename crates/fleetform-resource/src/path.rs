//! Property paths such as `spec.ports[0]["host.name"]`
//!
//! Paths address nested values inside a [`PropertyMap`]. Secret wrappers are
//! traversed transparently. Used to mask `ignore_changes` before Check/Diff.

use crate::error::{ResourceError, Result};
use crate::value::{PropertyMap, PropertyValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed property path; always starts with a property name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PropertyPath {
    root: String,
    rest: Vec<PathSegment>,
}

impl PropertyPath {
    /// Path to a top-level property
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            root: name.into(),
            rest: Vec::new(),
        }
    }

    pub fn parse(path: &str) -> Result<Self> {
        path.parse()
    }

    /// Name of the top-level property this path lives under
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn segments(&self) -> impl Iterator<Item = PathSegment> + '_ {
        std::iter::once(PathSegment::Key(self.root.clone())).chain(self.rest.iter().cloned())
    }

    pub fn get<'a>(&self, map: &'a PropertyMap) -> Option<&'a PropertyValue> {
        let mut current = map.get(&self.root)?;
        for segment in &self.rest {
            current = step(current, segment)?;
        }
        Some(current)
    }

    /// Set the value at this path, creating intermediate objects as needed
    pub fn set(&self, map: &mut PropertyMap, value: PropertyValue) -> Result<()> {
        let Some(first) = self.rest.first() else {
            map.insert(self.root.clone(), value);
            return Ok(());
        };
        let slot = map
            .entry(self.root.clone())
            .or_insert_with(|| container_for(first));
        if set_in(slot, &self.rest, value) {
            Ok(())
        } else {
            Err(ResourceError::PathMismatch(self.to_string()))
        }
    }

    /// Remove the value at this path, returning it if present
    pub fn delete(&self, map: &mut PropertyMap) -> Option<PropertyValue> {
        if self.rest.is_empty() {
            return map.remove(&self.root);
        }
        delete_in(map.get_mut(&self.root)?, &self.rest)
    }
}

fn step<'a>(value: &'a PropertyValue, segment: &PathSegment) -> Option<&'a PropertyValue> {
    match (value, segment) {
        (PropertyValue::Secret(inner), _) => step(inner, segment),
        (PropertyValue::Object(map), PathSegment::Key(k)) => map.get(k),
        (PropertyValue::Array(items), PathSegment::Index(i)) => items.get(*i),
        _ => None,
    }
}

fn container_for(segment: &PathSegment) -> PropertyValue {
    match segment {
        PathSegment::Key(_) => PropertyValue::Object(PropertyMap::new()),
        PathSegment::Index(_) => PropertyValue::Array(Vec::new()),
    }
}

fn set_in(target: &mut PropertyValue, path: &[PathSegment], value: PropertyValue) -> bool {
    let Some((segment, rest)) = path.split_first() else {
        *target = value;
        return true;
    };
    let next = || rest.first().map(container_for).unwrap_or(PropertyValue::Null);
    match (target, segment) {
        (PropertyValue::Secret(inner), _) => set_in(inner, path, value),
        (PropertyValue::Object(map), PathSegment::Key(k)) => {
            let slot = map.entry(k.clone()).or_insert_with(next);
            set_in(slot, rest, value)
        }
        (PropertyValue::Array(items), PathSegment::Index(i)) => {
            if *i == items.len() {
                items.push(next());
            }
            match items.get_mut(*i) {
                Some(slot) => set_in(slot, rest, value),
                None => false,
            }
        }
        _ => false,
    }
}

fn delete_in(target: &mut PropertyValue, path: &[PathSegment]) -> Option<PropertyValue> {
    let (segment, rest) = path.split_first()?;
    match (target, segment) {
        (PropertyValue::Secret(inner), _) => delete_in(inner, path),
        (PropertyValue::Object(map), PathSegment::Key(k)) => {
            if rest.is_empty() {
                map.remove(k)
            } else {
                delete_in(map.get_mut(k)?, rest)
            }
        }
        (PropertyValue::Array(items), PathSegment::Index(i)) => {
            if rest.is_empty() {
                (*i < items.len()).then(|| items.remove(*i))
            } else {
                delete_in(items.get_mut(*i)?, rest)
            }
        }
        _ => None,
    }
}

/// Copy the old value of each masked path into `news`
///
/// After masking, `olds` and the returned map agree on every path in
/// `ignore_changes`, so differences confined to those paths disappear.
pub fn apply_ignore_changes(
    olds: &PropertyMap,
    news: &PropertyMap,
    ignore_changes: &[PropertyPath],
) -> Result<PropertyMap> {
    let mut masked = news.clone();
    for path in ignore_changes {
        match path.get(olds) {
            Some(old) => path.set(&mut masked, old.clone())?,
            None => {
                path.delete(&mut masked);
            }
        }
    }
    Ok(masked)
}

impl FromStr for PropertyPath {
    type Err = ResourceError;

    fn from_str(path: &str) -> Result<Self> {
        let invalid = |reason: &str| ResourceError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut rest = path;
        let mut after_dot = false;
        loop {
            if let Some(quoted) = rest.strip_prefix("[\"") {
                if after_dot {
                    return Err(invalid("'[' cannot follow '.'"));
                }
                let close = quoted
                    .find("\"]")
                    .ok_or_else(|| invalid("unterminated quoted key"))?;
                segments.push(PathSegment::Key(quoted[..close].to_string()));
                rest = &quoted[close + 2..];
            } else if let Some(bracketed) = rest.strip_prefix('[') {
                if after_dot {
                    return Err(invalid("'[' cannot follow '.'"));
                }
                let close = bracketed
                    .find(']')
                    .ok_or_else(|| invalid("unterminated '['"))?;
                let index = bracketed[..close]
                    .parse::<usize>()
                    .map_err(|_| invalid("index must be a non-negative integer"))?;
                segments.push(PathSegment::Index(index));
                rest = &bracketed[close + 1..];
            } else {
                let end = rest.find(['.', '[']).unwrap_or(rest.len());
                if end == 0 {
                    return Err(invalid("empty property name"));
                }
                segments.push(PathSegment::Key(rest[..end].to_string()));
                rest = &rest[end..];
            }

            if rest.is_empty() {
                break;
            }
            after_dot = match rest.strip_prefix('.') {
                Some(r) => {
                    rest = r;
                    true
                }
                None if rest.starts_with('[') => false,
                None => return Err(invalid("expected '.' or '[' between segments")),
            };
            if rest.is_empty() {
                return Err(invalid("trailing '.'"));
            }
        }

        let mut segments = segments.into_iter();
        match segments.next() {
            Some(PathSegment::Key(root)) => Ok(Self {
                root,
                rest: segments.collect(),
            }),
            _ => Err(invalid("path must start with a property name")),
        }
    }
}

fn needs_quoting(key: &str) -> bool {
    key.is_empty() || key.contains(['.', '[', ']', '"'])
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments().enumerate() {
            match segment {
                PathSegment::Key(k) if needs_quoting(&k) => write!(f, "[\"{}\"]", k)?,
                PathSegment::Key(k) if i == 0 => write!(f, "{}", k)?,
                PathSegment::Key(k) => write!(f, ".{}", k)?,
                PathSegment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

impl TryFrom<String> for PropertyPath {
    type Error = ResourceError;

    fn try_from(path: String) -> Result<Self> {
        path.parse()
    }
}

impl From<PropertyPath> for String {
    fn from(path: PropertyPath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PropertyMap {
        PropertyMap::new()
            .with(
                "spec",
                PropertyMap::new()
                    .with("ports", vec![PropertyValue::from(80), PropertyValue::from(443)])
                    .with("host.name", "example.com"),
            )
            .with("password", PropertyValue::secret(PropertyMap::new().with("value", "pw")))
    }

    #[test]
    fn test_parse_and_display() {
        let path = PropertyPath::parse("spec.ports[1]").unwrap();
        assert_eq!(path.root(), "spec");
        assert_eq!(path.to_string(), "spec.ports[1]");

        let quoted = PropertyPath::parse("spec[\"host.name\"]").unwrap();
        assert_eq!(quoted.to_string(), "spec[\"host.name\"]");
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        for bad in ["", ".a", "a.", "a..b", "[0]", "a[x]", "a[1", "a.[0]", "a[\"b", "a[0]b"] {
            assert!(PropertyPath::parse(bad).is_err(), "expected '{}' to fail", bad);
        }
    }

    #[test]
    fn test_get_traverses_secrets() {
        let map = sample();
        let port = PropertyPath::parse("spec.ports[1]").unwrap();
        assert_eq!(port.get(&map), Some(&PropertyValue::from(443)));

        let inside_secret = PropertyPath::parse("password.value").unwrap();
        assert_eq!(inside_secret.get(&map), Some(&PropertyValue::from("pw")));
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut map = PropertyMap::new();
        PropertyPath::parse("a.b.c")
            .unwrap()
            .set(&mut map, PropertyValue::from(true))
            .unwrap();
        assert_eq!(
            PropertyPath::parse("a.b.c").unwrap().get(&map),
            Some(&PropertyValue::Bool(true))
        );
    }

    #[test]
    fn test_set_into_scalar_is_a_mismatch() {
        let mut map = PropertyMap::new().with("a", "scalar");
        let result = PropertyPath::parse("a.b")
            .unwrap()
            .set(&mut map, PropertyValue::Null);
        assert!(matches!(result, Err(ResourceError::PathMismatch(_))));
    }

    #[test]
    fn test_delete_nested() {
        let mut map = sample();
        let path = PropertyPath::parse("spec[\"host.name\"]").unwrap();
        assert_eq!(path.delete(&mut map), Some(PropertyValue::from("example.com")));
        assert_eq!(path.get(&map), None);
    }

    #[test]
    fn test_apply_ignore_changes_restores_old_values() {
        let olds = PropertyMap::new().with("tags", PropertyMap::new().with("owner", "ops"));
        let news = PropertyMap::new()
            .with("tags", PropertyMap::new().with("owner", "dev"))
            .with("added", "x");
        let paths = vec![
            PropertyPath::parse("tags.owner").unwrap(),
            PropertyPath::key("added"),
        ];

        let masked = apply_ignore_changes(&olds, &news, &paths).unwrap();
        assert_eq!(masked, olds);
    }
}
