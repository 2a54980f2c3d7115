//! Per-reconcile action staging and scratch values.

use std::any::Any;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::Action;

/// Mutable scratch space owned by a single reconcile invocation.
///
/// Actions staged with [`add_pre`](Self::add_pre) are applied before those
/// staged with [`add`](Self::add), which precede those staged with
/// [`add_post`](Self::add_post), regardless of which pipeline stage staged
/// them. Insertion order within one queue is preserved.
#[derive(Default)]
pub struct ActionContext {
    pre: SmallVec<[Action; 4]>,
    normal: SmallVec<[Action; 4]>,
    post: SmallVec<[Action; 4]>,
    values: FxHashMap<String, Box<dyn Any + Send + Sync>>,
}

impl ActionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an action ahead of the normal queue.
    pub fn add_pre(&mut self, action: Action) {
        self.pre.push(action);
    }

    /// Stage an action on the normal queue.
    pub fn add(&mut self, action: Action) {
        self.normal.push(action);
    }

    /// Stage an action behind the normal queue.
    pub fn add_post(&mut self, action: Action) {
        self.post.push(action);
    }

    /// Record a value for later pipeline stages; last write wins.
    pub fn set_value<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Read back a recorded value. Values are type-erased; the read fails
    /// (returns `None`) when the key is absent or the type does not match.
    pub fn get_value<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref()
    }

    /// Number of actions currently staged across all queues.
    pub fn staged(&self) -> usize {
        self.pre.len() + self.normal.len() + self.post.len()
    }

    /// Drain all three queues in pre -> normal -> post order, leaving them
    /// empty. The context may be reused for further gather cycles.
    pub fn gather(&mut self) -> Vec<Action> {
        let mut out = Vec::with_capacity(self.staged());
        out.extend(self.pre.drain(..));
        out.extend(self.normal.drain(..));
        out.extend(self.post.drain(..));
        out
    }
}
