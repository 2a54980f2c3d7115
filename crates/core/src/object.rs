//! Raw-JSON-backed dynamic objects and their identities.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Group/version/kind triple identifying a concrete API type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into() }
    }

    /// Parse from an `apiVersion` string ("v1" or "group/v1") plus kind.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((g, v)) => Self::new(g, v, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Registry key format consumed by status-function tables:
    /// `<group>/<version>.<kind>`.
    pub fn key(&self) -> String {
        format!("{}/{}.{}", self.group, self.version, self.kind)
    }
}

impl std::fmt::Display for Gvk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Namespaced name addressing one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { namespace: None, name: name.into() }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: Some(namespace.into()), name: name.into() }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "/{}", self.name),
        }
    }
}

/// A dynamic resource instance backed by raw JSON.
///
/// Keel never interprets resource schemas; it only reads the identity and
/// lifecycle fields under `metadata` plus `apiVersion`/`kind`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawObject(Value);

impl RawObject {
    /// An empty instance of the given API type, suitable as a prototype.
    pub fn prototype(gvk: &Gvk) -> Self {
        Self(json!({
            "apiVersion": gvk.api_version(),
            "kind": gvk.kind,
            "metadata": {},
        }))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn api_version(&self) -> Option<&str> {
        self.0.get("apiVersion").and_then(Value::as_str)
    }

    pub fn kind(&self) -> Option<&str> {
        self.0.get("kind").and_then(Value::as_str)
    }

    pub fn gvk(&self) -> Option<Gvk> {
        Some(Gvk::from_api_version(self.api_version()?, self.kind()?))
    }

    pub fn name(&self) -> &str {
        self.meta_str("name").unwrap_or("")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.meta_str("namespace")
    }

    pub fn uid(&self) -> Option<&str> {
        self.meta_str("uid")
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            namespace: self.namespace().map(|s| s.to_string()),
            name: self.name().to_string(),
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata()?.get("labels")?.get(key)?.as_str()
    }

    pub fn deletion_timestamp(&self) -> Option<&str> {
        self.meta_str("deletionTimestamp")
    }

    /// Whether the object carries a pending-deletion marker.
    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp().is_some()
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.metadata_mut().insert("name".into(), Value::String(name.to_string()));
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.metadata_mut().insert("namespace".into(), Value::String(namespace.to_string()));
        self
    }

    pub fn set_meta(&mut self, key: &str, value: &str) {
        self.metadata_mut().insert(key.into(), Value::String(value.to_string()));
    }

    fn metadata(&self) -> Option<&Map<String, Value>> {
        self.0.get("metadata").and_then(Value::as_object)
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        if !self.0.is_object() {
            self.0 = Value::Object(Map::new());
        }
        let root = self.0.as_object_mut().unwrap();
        root.entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .expect("metadata is not an object")
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata()?.get(key)?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gvk_key_and_api_version() {
        let g = Gvk::new("apps", "v1", "Deployment");
        assert_eq!(g.key(), "apps/v1.Deployment");
        assert_eq!(g.api_version(), "apps/v1");
        let core = Gvk::from_api_version("v1", "Pod");
        assert_eq!(core.group, "");
        assert_eq!(core.api_version(), "v1");
    }

    #[test]
    fn prototype_roundtrips_identity() {
        let gvk = Gvk::new("core.keel.dev", "v1alpha1", "Trait");
        let obj = RawObject::prototype(&gvk).with_namespace("ns").with_name("t1");
        assert_eq!(obj.gvk(), Some(gvk));
        assert_eq!(obj.name(), "t1");
        assert_eq!(obj.namespace(), Some("ns"));
        assert!(!obj.is_deleting());
        assert_eq!(obj.object_ref().to_string(), "ns/t1");
    }

    #[test]
    fn deletion_marker_detected() {
        let mut obj = RawObject::prototype(&Gvk::new("", "v1", "Pod"));
        obj.set_meta("deletionTimestamp", "2020-01-01T00:00:00Z");
        assert!(obj.is_deleting());
    }
}
