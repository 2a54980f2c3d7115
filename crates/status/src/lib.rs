//! Keel status aggregation: per-kind readiness rolled into a composite phase.

#![forbid(unsafe_code)]

mod builtin;
mod condition;

pub use condition::{Condition, ConditionStatus, ConditionType};

use std::sync::{Arc, RwLock};

use keel_core::{Gvk, RawObject};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Readiness of one observed child resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadyState {
    Ready,
    Progressing,
    Failed,
    Unknown,
}

impl std::fmt::Display for ReadyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReadyState::Ready => "Ready",
            ReadyState::Progressing => "Progressing",
            ReadyState::Failed => "Failed",
            ReadyState::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Composite lifecycle phase. Aggregation only produces Ready/Progressing;
/// Pending and Failed are reserved for other transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Pending,
    Progressing,
    Ready,
    Failed,
}

/// Status of one child resource; recomputed wholesale each aggregation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatus {
    pub namespaced_name: String,
    pub kind: String,
    pub group_version: String,
    pub status: ReadyState,
}

impl ModuleStatus {
    fn from_child(obj: &RawObject, status: ReadyState) -> Self {
        let (kind, group_version) = match obj.gvk() {
            Some(gvk) => (gvk.kind.clone(), gvk.api_version()),
            None => (String::new(), String::new()),
        };
        Self {
            namespaced_name: obj.object_ref().to_string(),
            kind,
            group_version,
            status,
        }
    }
}

/// Aggregate status carried on a composite resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeStatus {
    pub phase: Phase,
    pub modules: Vec<ModuleStatus>,
    pub conditions: Vec<Condition>,
}

/// Per-kind readiness function over a raw child object.
pub type StatusFn = Arc<dyn Fn(&RawObject) -> ReadyState + Send + Sync>;

/// Runtime-extensible readiness functions keyed by `<group>/<version>.<kind>`,
/// consulted ahead of the built-in table so callers may override built-ins.
#[derive(Default)]
pub struct StatusFns {
    fns: RwLock<FxHashMap<String, StatusFn>>,
}

impl StatusFns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, gvk: &Gvk, f: StatusFn) {
        let mut fns = self.fns.write().expect("status fns lock poisoned");
        fns.insert(gvk.key(), f);
    }

    /// Readiness for a child: registered function, then the built-in table,
    /// then Unknown for truly-unregistered kinds.
    pub fn status_of(&self, obj: &RawObject) -> ReadyState {
        let Some(gvk) = obj.gvk() else { return ReadyState::Unknown };
        let registered = {
            let fns = self.fns.read().expect("status fns lock poisoned");
            fns.get(&gvk.key()).cloned()
        };
        if let Some(f) = registered {
            return f(obj);
        }
        builtin::builtin_status(&gvk, obj).unwrap_or(ReadyState::Unknown)
    }
}

/// Rolls child readiness into the composite phase and condition set.
pub struct Aggregator {
    fns: Arc<StatusFns>,
}

impl Aggregator {
    pub fn new(fns: Arc<StatusFns>) -> Self {
        Self { fns }
    }

    /// Rebuild the module list from `children`, compute the phase (Ready iff
    /// every module is Ready), set the Ready condition accordingly, and
    /// force-set the Error condition when `prior_error` is present. Clearing
    /// the Error condition on recovery is the caller's responsibility.
    pub fn aggregate(
        &self,
        status: &mut CompositeStatus,
        children: &[RawObject],
        prior_error: Option<&anyhow::Error>,
    ) {
        status.modules.clear();
        for child in children {
            let state = self.fns.status_of(child);
            status.modules.push(ModuleStatus::from_child(child, state));
        }

        let ready = status.modules.iter().all(|m| m.status == ReadyState::Ready);
        if ready {
            status.phase = Phase::Ready;
            status.ready("ComponentsReady", "all components ready");
        } else {
            status.phase = Phase::Progressing;
            status.not_ready("ComponentsNotReady", "some components not ready");
        }

        if let Some(err) = prior_error {
            status.set_error("ErrorSeen", &err.to_string());
        }
    }
}
