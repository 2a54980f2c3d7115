//! Keel core types: kind identifiers, actions, and the pipeline contract.

#![forbid(unsafe_code)]

pub mod context;
pub mod object;
pub mod params;

pub use context::ActionContext;
pub use object::{Gvk, ObjectRef, RawObject};

use serde::{Deserialize, Serialize};

/// Identifier for a family of managed resources ("component", "trait", ...).
///
/// Opaque to the engine; it is only ever used as a registry key. Every kind
/// delivered to a reconciler must have a registered prototype first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKind(String);

impl ResourceKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceKind {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceKind {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Well-known kind names seeded by the engine's kind registry.
pub mod kind {
    pub const COMPONENT: &str = "component";
    pub const TRAIT: &str = "trait";
    pub const WORKLOAD_TYPE: &str = "workloadType";
    pub const APPLICATION_CONFIGURATION: &str = "applicationConfiguration";
    pub const SCOPE: &str = "scope";
}

/// Why the pipeline is being invoked for an object.
///
/// This classification is the entire distinction a pipeline unit receives;
/// units always operate on current state plus the event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    CreateOrUpdate,
    Delete,
}

/// Mutation verb carried by an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Create,
    Update,
    Delete,
}

/// External system an [`Action`] is applied against.
///
/// Only the backing store exists today. The engine treats any other target
/// as a programming error and panics while applying.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionTarget {
    Store,
}

/// A deferred store mutation, staged by a pipeline unit and consumed exactly
/// once by the engine during the apply phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub target: ActionTarget,
    pub command: Command,
    pub payload: RawObject,
}

impl Action {
    pub fn create(payload: RawObject) -> Self {
        Self { target: ActionTarget::Store, command: Command::Create, payload }
    }

    pub fn update(payload: RawObject) -> Self {
        Self { target: ActionTarget::Store, command: Command::Update, payload }
    }

    pub fn delete(payload: RawObject) -> Self {
        Self { target: ActionTarget::Store, command: Command::Delete, payload }
    }
}

/// Pipeline unit run before or after the handler stage.
///
/// Hooks may record scratch values into the context and stage actions; use
/// [`ActionContext::add_pre`] for work that must land before the handler
/// stage's effects and [`ActionContext::add_post`] for work that must land
/// after.
#[async_trait::async_trait]
pub trait Hook: Send + Sync {
    /// Stable identity, attached to errors for diagnostics.
    fn id(&self) -> &str;

    async fn on_event(
        &self,
        cx: &mut ActionContext,
        obj: &RawObject,
        event: EventKind,
    ) -> anyhow::Result<()>;
}

/// Pipeline unit for the main stage; stages [`Action`]s into the context.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    /// Stable identity, attached to errors for diagnostics.
    fn id(&self) -> &str;

    async fn handle(
        &self,
        cx: &mut ActionContext,
        obj: &RawObject,
        event: EventKind,
    ) -> anyhow::Result<()>;
}
