//! Property values exchanged with providers
//!
//! Plain values encode as plain JSON. Secrets, computed placeholders, assets
//! and archives encode as JSON objects carrying the reserved
//! [`SIGNATURE_KEY`], so they stay distinguishable on the wire and in
//! checkpoints.

use crate::error::{ResourceError, Result};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::collections::btree_map;

/// Reserved object key marking a non-plain value
pub const SIGNATURE_KEY: &str = "__fleetform";

const SIG_SECRET: &str = "secret";
const SIG_COMPUTED: &str = "computed";
const SIG_ASSET: &str = "asset";
const SIG_ARCHIVE: &str = "archive";

/// A dynamically-typed property value
///
/// Equality is structural and marker-aware: `Secret(x)` never equals `x`,
/// and `Computed` only equals `Computed`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<PropertyValue>),
    Object(PropertyMap),
    Asset(Asset),
    Archive(Archive),
    /// Placeholder for an output that is not known until apply
    Computed,
    Secret(Box<PropertyValue>),
}

impl PropertyValue {
    /// Wrap a value as secret (idempotent)
    pub fn secret(value: impl Into<PropertyValue>) -> Self {
        match value.into() {
            secret @ PropertyValue::Secret(_) => secret,
            plain => PropertyValue::Secret(Box::new(plain)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, PropertyValue::Secret(_))
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, PropertyValue::Computed)
    }

    /// Whether a secret marker appears anywhere inside this value
    pub fn contains_secrets(&self) -> bool {
        match self {
            PropertyValue::Secret(_) => true,
            PropertyValue::Array(items) => items.iter().any(PropertyValue::contains_secrets),
            PropertyValue::Object(map) => map.contains_secrets(),
            _ => false,
        }
    }

    /// Whether a computed placeholder appears anywhere inside this value
    pub fn contains_unknowns(&self) -> bool {
        match self {
            PropertyValue::Computed => true,
            PropertyValue::Secret(inner) => inner.contains_unknowns(),
            PropertyValue::Array(items) => items.iter().any(PropertyValue::contains_unknowns),
            PropertyValue::Object(map) => map.contains_unknowns(),
            _ => false,
        }
    }

    /// Strip every secret marker, recursively
    pub fn declassify(self) -> Self {
        match self {
            PropertyValue::Secret(inner) => inner.declassify(),
            PropertyValue::Array(items) => {
                PropertyValue::Array(items.into_iter().map(PropertyValue::declassify).collect())
            }
            PropertyValue::Object(map) => PropertyValue::Object(
                map.into_iter().map(|(k, v)| (k, v.declassify())).collect(),
            ),
            other => other,
        }
    }

    /// Short name of the value's kind, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            PropertyValue::Null => "null",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Number(_) => "number",
            PropertyValue::String(_) => "string",
            PropertyValue::Array(_) => "array",
            PropertyValue::Object(_) => "object",
            PropertyValue::Asset(_) => "asset",
            PropertyValue::Archive(_) => "archive",
            PropertyValue::Computed => "computed",
            PropertyValue::Secret(_) => "secret",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&PropertyMap> {
        match self {
            PropertyValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Decode from the JSON encoding
    pub fn from_json(value: Value) -> Result<Self> {
        Ok(match value {
            Value::Null => PropertyValue::Null,
            Value::Bool(b) => PropertyValue::Bool(b),
            Value::Number(n) => PropertyValue::Number(n.as_f64().ok_or_else(|| {
                ResourceError::InvalidValue(format!("number {} is not representable", n))
            })?),
            Value::String(s) => PropertyValue::String(s),
            Value::Array(items) => PropertyValue::Array(
                items
                    .into_iter()
                    .map(PropertyValue::from_json)
                    .collect::<Result<_>>()?,
            ),
            Value::Object(mut obj) => match obj.remove(SIGNATURE_KEY) {
                None => PropertyValue::Object(PropertyMap::from_json_object(obj)?),
                Some(Value::String(sig)) => decode_special(&sig, obj)?,
                Some(other) => {
                    return Err(ResourceError::UnknownSignature(other.to_string()));
                }
            },
        })
    }

    /// First NaN or infinite number inside this value
    pub fn non_finite(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) if !n.is_finite() => Some(*n),
            PropertyValue::Secret(inner) => inner.non_finite(),
            PropertyValue::Array(items) => items.iter().find_map(PropertyValue::non_finite),
            PropertyValue::Object(map) => map.iter().find_map(|(_, v)| v.non_finite()),
            _ => None,
        }
    }

    /// Encode into the JSON encoding
    ///
    /// JSON has no NaN or infinity, so those numbers come out as null here.
    /// Serializing through serde rejects them instead.
    pub fn to_json(&self) -> Value {
        match self {
            PropertyValue::Null => Value::Null,
            PropertyValue::Bool(b) => Value::Bool(*b),
            PropertyValue::Number(n) => Value::from(*n),
            PropertyValue::String(s) => Value::String(s.clone()),
            PropertyValue::Array(items) => {
                Value::Array(items.iter().map(PropertyValue::to_json).collect())
            }
            PropertyValue::Object(map) => map.to_json(),
            PropertyValue::Asset(asset) => asset.to_json(),
            PropertyValue::Archive(archive) => archive.to_json(),
            PropertyValue::Computed => signed(SIG_COMPUTED, Map::new()),
            PropertyValue::Secret(inner) => {
                let mut body = Map::new();
                body.insert("value".to_string(), inner.to_json());
                signed(SIG_SECRET, body)
            }
        }
    }
}

fn signed(sig: &str, mut body: Map<String, Value>) -> Value {
    body.insert(SIGNATURE_KEY.to_string(), Value::String(sig.to_string()));
    Value::Object(body)
}

fn decode_special(sig: &str, mut body: Map<String, Value>) -> Result<PropertyValue> {
    match sig {
        SIG_SECRET => {
            let inner = body.remove("value").ok_or_else(|| {
                ResourceError::InvalidValue("secret is missing its 'value'".to_string())
            })?;
            let inner = PropertyValue::from_json(inner)?;
            Ok(PropertyValue::Secret(Box::new(inner)))
        }
        SIG_COMPUTED => Ok(PropertyValue::Computed),
        SIG_ASSET => Ok(PropertyValue::Asset(Asset::from_json_object(body)?)),
        SIG_ARCHIVE => Ok(PropertyValue::Archive(Archive::from_json_object(body)?)),
        other => Err(ResourceError::UnknownSignature(other.to_string())),
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if let Some(n) = self.non_finite() {
            return Err(serde::ser::Error::custom(ResourceError::InvalidValue(
                format!("{} has no JSON encoding", n),
            )));
        }
        self.to_json().serialize(serializer)
    }
}

impl From<PropertyValue> for Value {
    fn from(value: PropertyValue) -> Self {
        value.to_json()
    }
}

impl TryFrom<Value> for PropertyValue {
    type Error = ResourceError;

    fn try_from(value: Value) -> Result<Self> {
        PropertyValue::from_json(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<f64> for PropertyValue {
    fn from(n: f64) -> Self {
        PropertyValue::Number(n)
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        PropertyValue::Number(n as f64)
    }
}

impl From<i32> for PropertyValue {
    fn from(n: i32) -> Self {
        PropertyValue::Number(f64::from(n))
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(items: Vec<PropertyValue>) -> Self {
        PropertyValue::Array(items)
    }
}

impl From<PropertyMap> for PropertyValue {
    fn from(map: PropertyMap) -> Self {
        PropertyValue::Object(map)
    }
}

/// Mapping from property name to value
///
/// Keys are kept sorted so iteration, diffs and encodings are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyMap(BTreeMap<String, PropertyValue>);

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut PropertyValue> {
        self.0.get_mut(key)
    }

    pub fn entry(&mut self, key: impl Into<String>) -> btree_map::Entry<'_, String, PropertyValue> {
        self.0.entry(key.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    pub fn contains_secrets(&self) -> bool {
        self.0.values().any(PropertyValue::contains_secrets)
    }

    pub fn contains_unknowns(&self) -> bool {
        self.0.values().any(PropertyValue::contains_unknowns)
    }

    /// Mark every output whose same-named input is secret as secret too
    pub fn propagate_secrets(mut self, inputs: &PropertyMap) -> Self {
        for (key, value) in self.0.iter_mut() {
            let input_secret = inputs.get(key).is_some_and(PropertyValue::contains_secrets);
            if input_secret && !value.is_secret() {
                let plain = std::mem::replace(value, PropertyValue::Null);
                *value = PropertyValue::secret(plain);
            }
        }
        self
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Decode a JSON object into a property map
    pub fn from_json(value: Value) -> Result<Self> {
        match PropertyValue::from_json(value)? {
            PropertyValue::Object(map) => Ok(map),
            other => Err(ResourceError::InvalidValue(format!(
                "expected an object, found {}",
                other.kind()
            ))),
        }
    }

    fn from_json_object(obj: Map<String, Value>) -> Result<Self> {
        obj.into_iter()
            .map(|(k, v)| PropertyValue::from_json(v).map(|v| (k, v)))
            .collect()
    }
}

impl FromIterator<(String, PropertyValue)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for PropertyMap {
    type Item = (String, PropertyValue);
    type IntoIter = btree_map::IntoIter<String, PropertyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a PropertyMap {
    type Item = (&'a String, &'a PropertyValue);
    type IntoIter = btree_map::Iter<'a, String, PropertyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A single file-like blob referenced by a property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub hash: Option<String>,
    pub source: AssetSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    Text(String),
    Path(String),
    Uri(String),
}

impl Asset {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            hash: None,
            source: AssetSource::Text(text.into()),
        }
    }

    pub fn path(path: impl Into<String>) -> Self {
        Self {
            hash: None,
            source: AssetSource::Path(path.into()),
        }
    }

    fn body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        if let Some(hash) = &self.hash {
            body.insert("hash".to_string(), Value::String(hash.clone()));
        }
        let (key, value) = match &self.source {
            AssetSource::Text(t) => ("text", t),
            AssetSource::Path(p) => ("path", p),
            AssetSource::Uri(u) => ("uri", u),
        };
        body.insert(key.to_string(), Value::String(value.clone()));
        body
    }

    fn to_json(&self) -> Value {
        signed(SIG_ASSET, self.body())
    }

    fn from_json_object(mut body: Map<String, Value>) -> Result<Self> {
        let hash = take_string(&mut body, "hash")?;
        let source = if let Some(text) = take_string(&mut body, "text")? {
            AssetSource::Text(text)
        } else if let Some(path) = take_string(&mut body, "path")? {
            AssetSource::Path(path)
        } else if let Some(uri) = take_string(&mut body, "uri")? {
            AssetSource::Uri(uri)
        } else {
            return Err(ResourceError::InvalidValue(
                "asset needs one of 'text', 'path' or 'uri'".to_string(),
            ));
        };
        Ok(Self { hash, source })
    }
}

/// A collection of assets referenced by a property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub hash: Option<String>,
    pub source: ArchiveSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    Path(String),
    Uri(String),
    Assets(BTreeMap<String, Asset>),
}

impl Archive {
    fn to_json(&self) -> Value {
        let mut body = Map::new();
        if let Some(hash) = &self.hash {
            body.insert("hash".to_string(), Value::String(hash.clone()));
        }
        match &self.source {
            ArchiveSource::Path(p) => {
                body.insert("path".to_string(), Value::String(p.clone()));
            }
            ArchiveSource::Uri(u) => {
                body.insert("uri".to_string(), Value::String(u.clone()));
            }
            ArchiveSource::Assets(assets) => {
                let members = assets
                    .iter()
                    .map(|(name, asset)| (name.clone(), asset.to_json()))
                    .collect();
                body.insert("assets".to_string(), Value::Object(members));
            }
        }
        signed(SIG_ARCHIVE, body)
    }

    fn from_json_object(mut body: Map<String, Value>) -> Result<Self> {
        let hash = take_string(&mut body, "hash")?;
        let source = if let Some(path) = take_string(&mut body, "path")? {
            ArchiveSource::Path(path)
        } else if let Some(uri) = take_string(&mut body, "uri")? {
            ArchiveSource::Uri(uri)
        } else if let Some(Value::Object(members)) = body.remove("assets") {
            let mut assets = BTreeMap::new();
            for (name, member) in members {
                match PropertyValue::from_json(member)? {
                    PropertyValue::Asset(asset) => {
                        assets.insert(name, asset);
                    }
                    other => {
                        return Err(ResourceError::InvalidValue(format!(
                            "archive member '{}' is a {}, not an asset",
                            name,
                            other.kind()
                        )));
                    }
                }
            }
            ArchiveSource::Assets(assets)
        } else {
            return Err(ResourceError::InvalidValue(
                "archive needs one of 'path', 'uri' or 'assets'".to_string(),
            ));
        };
        Ok(Self { hash, source })
    }
}

fn take_string(body: &mut Map<String, Value>, key: &str) -> Result<Option<String>> {
    match body.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(ResourceError::InvalidValue(format!(
            "'{}' must be a string, found {}",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_values_encode_as_plain_json() {
        let map = PropertyMap::new()
            .with("name", "web")
            .with("replicas", 3)
            .with("tags", vec![PropertyValue::from("a"), PropertyValue::from("b")]);

        assert_eq!(
            map.to_json(),
            json!({"name": "web", "replicas": 3.0, "tags": ["a", "b"]})
        );
    }

    #[test]
    fn test_secret_and_computed_stay_distinguishable() {
        let map = PropertyMap::new()
            .with("password", PropertyValue::secret("hunter2"))
            .with("ip", PropertyValue::Computed);

        let encoded = serde_json::to_value(&map).unwrap();
        assert_eq!(encoded["password"][SIGNATURE_KEY], json!("secret"));
        assert_eq!(encoded["ip"][SIGNATURE_KEY], json!("computed"));

        let decoded: PropertyMap = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn test_non_finite_numbers_are_not_serialized() {
        let map = PropertyMap::new()
            .with("ratio", f64::NAN)
            .with("ok", 1.5);
        let err = serde_json::to_value(&map).unwrap_err();
        assert!(err.to_string().contains("NaN"));

        let hidden = PropertyMap::new().with(
            "limits",
            vec![PropertyValue::secret(PropertyValue::from(f64::INFINITY))],
        );
        assert!(serde_json::to_string(&hidden).is_err());
        assert_eq!(hidden.get("limits").unwrap().non_finite(), Some(f64::INFINITY));

        let finite = PropertyMap::new().with("ratio", 0.25);
        assert_eq!(serde_json::to_value(&finite).unwrap()["ratio"], json!(0.25));
    }

    #[test]
    fn test_unknown_signature_is_rejected() {
        let mut obj = Map::new();
        obj.insert(SIGNATURE_KEY.to_string(), json!("mystery"));
        let result = PropertyValue::from_json(Value::Object(obj));
        assert!(matches!(result, Err(ResourceError::UnknownSignature(_))));
    }

    #[test]
    fn test_archive_of_assets() {
        let mut assets = BTreeMap::new();
        assets.insert("index.html".to_string(), Asset::text("<h1>hi</h1>"));
        let value = PropertyValue::Archive(Archive {
            hash: Some("abc".to_string()),
            source: ArchiveSource::Assets(assets),
        });

        let decoded = PropertyValue::from_json(value.to_json()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_equality_is_marker_aware() {
        let plain = PropertyValue::from("x");
        assert_ne!(PropertyValue::secret(plain.clone()), plain);
        assert_ne!(PropertyValue::Computed, PropertyValue::Null);
        assert_eq!(
            PropertyValue::secret(PropertyValue::secret("x")),
            PropertyValue::secret("x")
        );
    }

    #[test]
    fn test_nested_markers_are_detected() {
        let nested = PropertyValue::Object(
            PropertyMap::new().with("inner", vec![PropertyValue::secret(PropertyValue::Computed)]),
        );
        assert!(nested.contains_secrets());
        assert!(nested.contains_unknowns());
        assert!(!nested.clone().declassify().contains_secrets());
    }

    #[test]
    fn test_propagate_secrets_from_inputs() {
        let inputs = PropertyMap::new()
            .with("password", PropertyValue::secret("pw"))
            .with("name", "db");
        let outputs = PropertyMap::new()
            .with("password", "pw")
            .with("name", "db")
            .with("endpoint", "db.internal");

        let outputs = outputs.propagate_secrets(&inputs);
        assert_eq!(outputs.get("password"), Some(&PropertyValue::secret("pw")));
        assert_eq!(outputs.get("name"), Some(&PropertyValue::from("db")));
        assert_eq!(outputs.get("endpoint"), Some(&PropertyValue::from("db.internal")));
    }
}
