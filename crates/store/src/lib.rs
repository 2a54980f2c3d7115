//! Keel backing store: the store contract plus an in-RAM implementation.

#![forbid(unsafe_code)]

use std::sync::RwLock;

use chrono::{SecondsFormat, Utc};
use keel_core::{Gvk, ObjectRef, RawObject};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Store errors, shaped for matching by the engine.
#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
pub enum StoreError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Equality-based label selector; all terms must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector(Vec<(String, String)>);

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, obj: &RawObject) -> bool {
        self.0.iter().all(|(k, v)| obj.label(k) == Some(v.as_str()))
    }

    /// Kubernetes label-selector query form ("k=v,k2=v2").
    pub fn to_query(&self) -> String {
        let terms: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        terms.join(",")
    }
}

/// Opaque object store the engine fetches state from and applies actions
/// against. Implementations must treat re-delivered mutations as
/// soft-successes where possible (delete of an absent object succeeds).
#[async_trait::async_trait]
pub trait BackingStore: Send + Sync {
    async fn get(&self, gvk: &Gvk, key: &ObjectRef) -> StoreResult<RawObject>;
    async fn create(&self, obj: &RawObject) -> StoreResult<()>;
    async fn update(&self, obj: &RawObject) -> StoreResult<()>;
    async fn delete(&self, obj: &RawObject) -> StoreResult<()>;
    async fn list(
        &self,
        gvk: &Gvk,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<RawObject>>;
}

type StoreKey = (String, Option<String>, String);

/// In-RAM backing store used by tests and the demo CLI.
#[derive(Default)]
pub struct MemStore {
    objects: RwLock<FxHashMap<StoreKey, RawObject>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key_of(obj: &RawObject) -> StoreResult<StoreKey> {
        let gvk = obj
            .gvk()
            .ok_or_else(|| StoreError::Invalid("object missing apiVersion/kind".into()))?;
        if obj.name().is_empty() {
            return Err(StoreError::Invalid(format!("{} object missing metadata.name", gvk)));
        }
        Ok((gvk.key(), obj.namespace().map(|s| s.to_string()), obj.name().to_string()))
    }
}

#[async_trait::async_trait]
impl BackingStore for MemStore {
    async fn get(&self, gvk: &Gvk, key: &ObjectRef) -> StoreResult<RawObject> {
        let k = (gvk.key(), key.namespace.clone(), key.name.clone());
        let objects = self.objects.read().expect("store lock poisoned");
        objects
            .get(&k)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", gvk, key)))
    }

    async fn create(&self, obj: &RawObject) -> StoreResult<()> {
        let k = Self::key_of(obj)?;
        let mut stored = obj.clone();
        if stored.uid().is_none() {
            stored.set_meta("uid", &Uuid::new_v4().to_string());
        }
        stored.set_meta(
            "creationTimestamp",
            &Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        let mut objects = self.objects.write().expect("store lock poisoned");
        if objects.insert(k, stored).is_some() {
            // Re-delivered create; last write wins.
            debug!(obj = %obj.object_ref(), "create over existing object");
        }
        Ok(())
    }

    async fn update(&self, obj: &RawObject) -> StoreResult<()> {
        let k = Self::key_of(obj)?;
        let mut objects = self.objects.write().expect("store lock poisoned");
        match objects.get_mut(&k) {
            Some(slot) => {
                *slot = obj.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("{}", obj.object_ref()))),
        }
    }

    async fn delete(&self, obj: &RawObject) -> StoreResult<()> {
        let k = Self::key_of(obj)?;
        let mut objects = self.objects.write().expect("store lock poisoned");
        if objects.remove(&k).is_none() {
            // Deleting an absent object is a soft success.
            debug!(obj = %obj.object_ref(), "delete of absent object");
        }
        Ok(())
    }

    async fn list(
        &self,
        gvk: &Gvk,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<RawObject>> {
        let gvk_key = gvk.key();
        let objects = self.objects.read().expect("store lock poisoned");
        let mut out: Vec<RawObject> = objects
            .iter()
            .filter(|((g, ns, _), _)| *g == gvk_key && namespace.map_or(true, |n| ns.as_deref() == Some(n)))
            .filter(|(_, obj)| selector.matches(obj))
            .map(|(_, obj)| obj.clone())
            .collect();
        // Stable order for callers and tests
        out.sort_by(|a, b| {
            (a.namespace().unwrap_or(""), a.name()).cmp(&(b.namespace().unwrap_or(""), b.name()))
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn child(name: &str, ns: &str, app: &str) -> RawObject {
        RawObject::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": name, "namespace": ns, "labels": { "app": app } },
        }))
    }

    #[tokio::test]
    async fn crud_roundtrip() {
        let store = MemStore::new();
        let gvk = Gvk::new("apps", "v1", "Deployment");
        let obj = child("web", "prod", "demo");
        store.create(&obj).await.unwrap();

        let key = ObjectRef::namespaced("prod", "web");
        let fetched = store.get(&gvk, &key).await.unwrap();
        assert_eq!(fetched.name(), "web");
        assert!(fetched.uid().is_some(), "create assigns a uid");

        let mut updated = fetched.clone();
        updated.set_meta("annotationsProbe", "x");
        store.update(&updated).await.unwrap();
        assert_eq!(store.get(&gvk, &key).await.unwrap(), updated);

        store.delete(&obj).await.unwrap();
        assert!(matches!(store.get(&gvk, &key).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_of_absent_object_is_soft_success() {
        let store = MemStore::new();
        store.delete(&child("gone", "ns", "a")).await.unwrap();
    }

    #[tokio::test]
    async fn update_of_missing_object_fails() {
        let store = MemStore::new();
        let err = store.update(&child("nope", "ns", "a")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_selector() {
        let store = MemStore::new();
        let gvk = Gvk::new("apps", "v1", "Deployment");
        store.create(&child("a", "ns1", "front")).await.unwrap();
        store.create(&child("b", "ns1", "back")).await.unwrap();
        store.create(&child("c", "ns2", "front")).await.unwrap();

        let all = store.list(&gvk, None, &LabelSelector::new()).await.unwrap();
        assert_eq!(all.len(), 3);

        let ns1 = store.list(&gvk, Some("ns1"), &LabelSelector::new()).await.unwrap();
        assert_eq!(ns1.len(), 2);
        assert_eq!(ns1[0].name(), "a");

        let front = store
            .list(&gvk, None, &LabelSelector::new().eq("app", "front"))
            .await
            .unwrap();
        let names: Vec<&str> = front.iter().map(|o| o.name()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }
}
