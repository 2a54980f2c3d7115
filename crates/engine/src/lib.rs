//! Keel engine: kind/pipeline registries and the reconcile control loop.
//!
//! A [`Reconciler`] is wired per resource kind. Each invocation fetches
//! current state, classifies the event from the deletion marker, runs the
//! registered pre-hooks, handlers, and post-hooks against one
//! [`ActionContext`], then applies the gathered actions against the backing
//! store in order. The engine never retries; re-delivery and backoff belong
//! to the trigger layer.

#![forbid(unsafe_code)]

use std::sync::{Arc, RwLock};
use std::time::Instant;

use keel_core::{
    kind, ActionContext, ActionTarget, Command, EventKind, Gvk, Handler, Hook, ObjectRef,
    RawObject, ResourceKind,
};
use keel_store::{BackingStore, StoreError};
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// Errors surfaced by [`Reconciler::reconcile`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The host must register every kind before delivering events for it;
    /// hitting this at reconcile time is a programming error, not a
    /// runtime condition, and callers may treat it as fatal.
    #[error("kind not registered: {0}")]
    KindNotRegistered(ResourceKind),
    #[error("prototype for '{0}' is missing apiVersion/kind")]
    InvalidPrototype(ResourceKind),
    #[error("pipeline unit '{unit}' failed: {source}")]
    Pipeline {
        unit: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("apply {command:?} for '{reference}' failed: {source}")]
    Apply {
        command: Command,
        reference: ObjectRef,
        #[source]
        source: StoreError,
    },
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Maps kind identifiers to clonable prototypes of their representation.
///
/// Registration is rare and lookups frequent; both sides take the same
/// reader/writer lock. Last writer wins on re-registration.
#[derive(Default)]
pub struct KindRegistry {
    protos: RwLock<FxHashMap<ResourceKind, RawObject>>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-seeded with prototypes for the five well-known kinds
    /// under `core.keel.dev/v1alpha1`.
    pub fn with_builtin_kinds() -> Self {
        let reg = Self::new();
        let seed = [
            (kind::COMPONENT, "ComponentSchematic"),
            (kind::TRAIT, "Trait"),
            (kind::WORKLOAD_TYPE, "WorkloadType"),
            (kind::APPLICATION_CONFIGURATION, "ApplicationConfiguration"),
            (kind::SCOPE, "ApplicationScope"),
        ];
        for (name, api_kind) in seed {
            let gvk = Gvk::new("core.keel.dev", "v1alpha1", api_kind);
            reg.register(ResourceKind::from(name), RawObject::prototype(&gvk));
        }
        reg
    }

    pub fn register(&self, kind: ResourceKind, prototype: RawObject) {
        let mut protos = self.protos.write().expect("kind registry lock poisoned");
        protos.insert(kind, prototype);
    }

    /// A fresh clone of the registered prototype.
    pub fn resolve(&self, kind: &ResourceKind) -> Result<RawObject, EngineError> {
        let protos = self.protos.read().expect("kind registry lock poisoned");
        protos
            .get(kind)
            .cloned()
            .ok_or_else(|| EngineError::KindNotRegistered(kind.clone()))
    }

    /// Panicking [`resolve`](Self::resolve); an unregistered kind here is a
    /// programming error.
    pub fn must_resolve(&self, kind: &ResourceKind) -> RawObject {
        match self.resolve(kind) {
            Ok(proto) => proto,
            Err(e) => panic!("{}", e),
        }
    }
}

#[derive(Default)]
struct Pipelines {
    pre: FxHashMap<ResourceKind, Vec<Arc<dyn Hook>>>,
    handlers: FxHashMap<ResourceKind, Vec<Arc<dyn Handler>>>,
    post: FxHashMap<ResourceKind, Vec<Arc<dyn Hook>>>,
}

/// Ordered pre-hook/handler/post-hook sets per kind.
///
/// Append-only: units run for the lifetime of the process once registered,
/// and duplicate registration is the caller's concern. Accessors return
/// snapshots safe to iterate while registration proceeds elsewhere.
#[derive(Default)]
pub struct PipelineRegistry {
    inner: RwLock<Pipelines>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pre_hooks(
        &self,
        kind: &ResourceKind,
        hooks: impl IntoIterator<Item = Arc<dyn Hook>>,
    ) {
        let mut inner = self.inner.write().expect("pipeline registry lock poisoned");
        inner.pre.entry(kind.clone()).or_default().extend(hooks);
    }

    pub fn register_handlers(
        &self,
        kind: &ResourceKind,
        handlers: impl IntoIterator<Item = Arc<dyn Handler>>,
    ) {
        let mut inner = self.inner.write().expect("pipeline registry lock poisoned");
        inner.handlers.entry(kind.clone()).or_default().extend(handlers);
    }

    pub fn register_post_hooks(
        &self,
        kind: &ResourceKind,
        hooks: impl IntoIterator<Item = Arc<dyn Hook>>,
    ) {
        let mut inner = self.inner.write().expect("pipeline registry lock poisoned");
        inner.post.entry(kind.clone()).or_default().extend(hooks);
    }

    pub fn pre_hooks(&self, kind: &ResourceKind) -> Vec<Arc<dyn Hook>> {
        let inner = self.inner.read().expect("pipeline registry lock poisoned");
        inner.pre.get(kind).cloned().unwrap_or_default()
    }

    pub fn handlers(&self, kind: &ResourceKind) -> Vec<Arc<dyn Handler>> {
        let inner = self.inner.read().expect("pipeline registry lock poisoned");
        inner.handlers.get(kind).cloned().unwrap_or_default()
    }

    pub fn post_hooks(&self, kind: &ResourceKind) -> Vec<Arc<dyn Hook>> {
        let inner = self.inner.read().expect("pipeline registry lock poisoned");
        inner.post.get(kind).cloned().unwrap_or_default()
    }
}

/// Outcome of a single reconcile invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The watched object no longer exists; nothing to do.
    Gone,
    Done { actions_applied: usize },
}

/// Control loop for one resource kind.
pub struct Reconciler {
    kind: ResourceKind,
    kinds: Arc<KindRegistry>,
    pipelines: Arc<PipelineRegistry>,
    store: Arc<dyn BackingStore>,
}

impl Reconciler {
    pub fn new(
        kind: ResourceKind,
        kinds: Arc<KindRegistry>,
        pipelines: Arc<PipelineRegistry>,
        store: Arc<dyn BackingStore>,
    ) -> Self {
        Self { kind, kinds, pipelines, store }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub async fn reconcile(&self, key: &ObjectRef) -> Result<Outcome, EngineError> {
        let t0 = Instant::now();
        counter!("reconcile_attempts", 1u64);

        let proto = self.kinds.resolve(&self.kind)?;
        let gvk = proto
            .gvk()
            .ok_or_else(|| EngineError::InvalidPrototype(self.kind.clone()))?;
        let obj = match self.store.get(&gvk, key).await {
            Ok(obj) => obj,
            Err(StoreError::NotFound(_)) => {
                debug!(kind = %self.kind, key = %key, "object gone; nothing to do");
                return Ok(Outcome::Gone);
            }
            Err(e) => {
                counter!("reconcile_err", 1u64);
                error!(kind = %self.kind, key = %key, error = %e, "fetch failed");
                return Err(e.into());
            }
        };

        let event = if obj.is_deleting() { EventKind::Delete } else { EventKind::CreateOrUpdate };

        let mut cx = ActionContext::new();
        if let Err(e) = self.dispatch(&mut cx, &obj, event).await {
            counter!("reconcile_err", 1u64);
            return Err(e);
        }

        let actions_applied = match self.apply(&mut cx).await {
            Ok(n) => n,
            Err(e) => {
                counter!("reconcile_err", 1u64);
                return Err(e);
            }
        };

        histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        counter!("reconcile_ok", 1u64);
        Ok(Outcome::Done { actions_applied })
    }

    async fn dispatch(
        &self,
        cx: &mut ActionContext,
        obj: &RawObject,
        event: EventKind,
    ) -> Result<(), EngineError> {
        for hook in self.pipelines.pre_hooks(&self.kind) {
            hook.on_event(cx, obj, event)
                .await
                .map_err(|e| self.unit_err(hook.id(), e))?;
        }
        for handler in self.pipelines.handlers(&self.kind) {
            handler
                .handle(cx, obj, event)
                .await
                .map_err(|e| self.unit_err(handler.id(), e))?;
        }
        for hook in self.pipelines.post_hooks(&self.kind) {
            hook.on_event(cx, obj, event)
                .await
                .map_err(|e| self.unit_err(hook.id(), e))?;
        }
        Ok(())
    }

    fn unit_err(&self, unit: &str, source: anyhow::Error) -> EngineError {
        error!(kind = %self.kind, unit, error = %source, "pipeline unit failed");
        EngineError::Pipeline { unit: unit.to_string(), source }
    }

    async fn apply(&self, cx: &mut ActionContext) -> Result<usize, EngineError> {
        let mut applied = 0usize;
        for action in cx.gather() {
            match action.target {
                ActionTarget::Store => {}
                other => panic!("unsupported action target: {:?}", other),
            }
            let result = match action.command {
                Command::Create => self.store.create(&action.payload).await,
                Command::Update => self.store.update(&action.payload).await,
                Command::Delete => self.store.delete(&action.payload).await,
            };
            match result {
                Ok(()) => {
                    counter!("actions_applied", 1u64);
                    applied += 1;
                }
                Err(e) => {
                    let reference = action.payload.object_ref();
                    error!(
                        kind = %self.kind,
                        command = ?action.command,
                        obj = %reference,
                        error = %e,
                        "apply failed; aborting remaining actions"
                    );
                    return Err(EngineError::Apply { command: action.command, reference, source: e });
                }
            }
        }
        Ok(applied)
    }
}

/// One queued reconcile request. When `reply` is set, the worker reports the
/// result there; otherwise it logs the result.
pub struct ReconcileRequest {
    pub key: ObjectRef,
    pub reply: Option<oneshot::Sender<Result<Outcome, EngineError>>>,
}

impl From<ObjectRef> for ReconcileRequest {
    fn from(key: ObjectRef) -> Self {
        Self { key, reply: None }
    }
}

/// Spawn a worker draining reconcile requests for one kind, serially.
///
/// Serialized delivery per kind matches the engine's assumption that
/// invocations for the same namespaced name never run concurrently.
pub fn spawn(
    reconciler: Reconciler,
    cap: usize,
) -> (mpsc::Sender<ReconcileRequest>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ReconcileRequest>(cap);
    let handle = tokio::spawn(async move {
        while let Some(req) = rx.recv().await {
            let result = reconciler.reconcile(&req.key).await;
            match req.reply {
                Some(reply) => {
                    let _ = reply.send(result);
                }
                None => match result {
                    Ok(outcome) => {
                        debug!(kind = %reconciler.kind(), key = %req.key, ?outcome, "reconciled")
                    }
                    Err(e) => {
                        error!(kind = %reconciler.kind(), key = %req.key, error = %e, "reconcile failed")
                    }
                },
            }
        }
        info!(kind = %reconciler.kind(), "reconcile worker stopped");
    });
    (tx, handle)
}
