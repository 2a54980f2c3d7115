//! Keel kubehub: a kube-backed `BackingStore` routed through API discovery.

#![forbid(unsafe_code)]

use anyhow::Result;
use keel_core::{Gvk, ObjectRef, RawObject};
use keel_store::{BackingStore, LabelSelector, StoreError, StoreResult};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    core::{DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use tracing::debug;

/// Backing store over a live cluster.
///
/// Each operation resolves the target `ApiResource` via discovery; callers
/// hold one `KubeStore` per process and share it behind an `Arc`.
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig/in-cluster environment.
    pub async fn connect() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    /// Api for addressing a single object; namespaced kinds require a
    /// namespace here.
    async fn api_for(&self, gvk: &Gvk, namespace: Option<&str>) -> StoreResult<Api<DynamicObject>> {
        let (ar, namespaced) = self.resolve(gvk).await?;
        let api = if namespaced {
            match namespace {
                Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
                None => {
                    return Err(StoreError::Invalid(format!(
                        "namespace required for namespaced kind {}",
                        gvk
                    )))
                }
            }
        } else {
            Api::all_with(self.client.clone(), &ar)
        };
        Ok(api)
    }

    /// Api for listing; an unset namespace means all namespaces.
    async fn api_for_list(
        &self,
        gvk: &Gvk,
        namespace: Option<&str>,
    ) -> StoreResult<Api<DynamicObject>> {
        let (ar, namespaced) = self.resolve(gvk).await?;
        let api = match (namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        };
        Ok(api)
    }

    async fn resolve(&self, gvk: &Gvk) -> StoreResult<(kube::core::ApiResource, bool)> {
        let target = GroupVersionKind {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
        };
        find_api_resource(self.client.clone(), &target).await
    }
}

async fn find_api_resource(
    client: Client,
    gvk: &GroupVersionKind,
) -> StoreResult<(kube::core::ApiResource, bool)> {
    let discovery = Discovery::new(client)
        .run()
        .await
        .map_err(|e| StoreError::Internal(format!("discovery: {}", e)))?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(StoreError::Invalid(format!(
        "GVK not served: {}/{}/{}",
        gvk.group, gvk.version, gvk.kind
    )))
}

fn to_dynamic(obj: &RawObject) -> StoreResult<DynamicObject> {
    serde_json::from_value(obj.as_value().clone())
        .map_err(|e| StoreError::Invalid(format!("object is not a valid API object: {}", e)))
}

fn from_dynamic(obj: &DynamicObject) -> StoreResult<RawObject> {
    let raw = serde_json::to_value(obj)
        .map_err(|e| StoreError::Internal(format!("serializing object: {}", e)))?;
    Ok(RawObject::from_value(raw))
}

fn status_of(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(ae) => Some(ae.code),
        _ => None,
    }
}

fn map_err(context: &str, err: kube::Error) -> StoreError {
    match status_of(&err) {
        Some(404) => StoreError::NotFound(context.to_string()),
        Some(409) => StoreError::Conflict(format!("{}: {}", context, err)),
        _ => StoreError::Internal(format!("{}: {}", context, err)),
    }
}

#[async_trait::async_trait]
impl BackingStore for KubeStore {
    async fn get(&self, gvk: &Gvk, key: &ObjectRef) -> StoreResult<RawObject> {
        let api = self.api_for(gvk, key.namespace.as_deref()).await?;
        let found = api
            .get_opt(&key.name)
            .await
            .map_err(|e| map_err(&format!("get {} {}", gvk, key), e))?;
        match found {
            Some(obj) => from_dynamic(&obj),
            None => Err(StoreError::NotFound(format!("{} {}", gvk, key))),
        }
    }

    async fn create(&self, obj: &RawObject) -> StoreResult<()> {
        let gvk = require_gvk(obj)?;
        let api = self.api_for(&gvk, obj.namespace()).await?;
        let payload = to_dynamic(obj)?;
        match api.create(&PostParams::default(), &payload).await {
            Ok(_) => Ok(()),
            // Re-delivered create; the object is already there.
            Err(e) if status_of(&e) == Some(409) => {
                debug!(obj = %obj.object_ref(), "create: already exists");
                Ok(())
            }
            Err(e) => Err(map_err(&format!("create {}", obj.object_ref()), e)),
        }
    }

    async fn update(&self, obj: &RawObject) -> StoreResult<()> {
        let gvk = require_gvk(obj)?;
        let api = self.api_for(&gvk, obj.namespace()).await?;
        let payload = to_dynamic(obj)?;
        api.replace(obj.name(), &PostParams::default(), &payload)
            .await
            .map_err(|e| map_err(&format!("update {}", obj.object_ref()), e))?;
        Ok(())
    }

    async fn delete(&self, obj: &RawObject) -> StoreResult<()> {
        let gvk = require_gvk(obj)?;
        let api = self.api_for(&gvk, obj.namespace()).await?;
        match api.delete(obj.name(), &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            // Deleting an absent object is a soft success.
            Err(e) if status_of(&e) == Some(404) => {
                debug!(obj = %obj.object_ref(), "delete: already gone");
                Ok(())
            }
            Err(e) => Err(map_err(&format!("delete {}", obj.object_ref()), e)),
        }
    }

    async fn list(
        &self,
        gvk: &Gvk,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<RawObject>> {
        let api = self.api_for_list(gvk, namespace).await?;
        let mut lp = ListParams::default();
        if !selector.is_empty() {
            lp = lp.labels(&selector.to_query());
        }
        let objs = api
            .list(&lp)
            .await
            .map_err(|e| map_err(&format!("list {}", gvk), e))?;
        objs.items.iter().map(from_dynamic).collect()
    }
}

fn require_gvk(obj: &RawObject) -> StoreResult<Gvk> {
    obj.gvk()
        .ok_or_else(|| StoreError::Invalid("object missing apiVersion/kind".into()))
}
