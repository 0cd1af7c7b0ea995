/// Realtime tree store interface consumed by the synchronization core
///
/// The store is hierarchical: every node is addressed by a slash-separated
/// [`TreePath`] and holds a JSON value. Writing `null` removes a node and
/// empty maps are never stored.
pub mod guarded;
pub mod memory;
pub mod push_id;

use crate::error::Result;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use tokio::sync::mpsc;

pub use guarded::GuardedStore;
pub use memory::MemoryTreeStore;

/// Slash-separated address of a node in the tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreePath(Vec<String>);

impl TreePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse `a/b/c`; empty segments are ignored
    pub fn parse(path: &str) -> Self {
        Self(
            path.split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.extend(segment.split('/').filter(|s| !s.is_empty()).map(str::to_string));
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// True when `prefix` is this path or one of its ancestors
    pub fn starts_with(&self, prefix: &TreePath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// First `n` segments
    pub fn truncate(&self, n: usize) -> Self {
        Self(self.0.iter().take(n).cloned().collect())
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Selects children whose value at `child` equals `value`
#[derive(Debug, Clone, PartialEq)]
pub struct EqualityFilter {
    pub child: TreePath,
    pub value: Value,
}

impl EqualityFilter {
    pub fn new(child: TreePath, value: Value) -> Self {
        Self { child, value }
    }

    pub fn matches(&self, node: &Value) -> bool {
        let mut current = node;
        for segment in self.child.segments() {
            match current.get(segment) {
                Some(next) => current = next,
                None => return false,
            }
        }
        *current == self.value
    }
}

/// Incremental change to one child of a subscribed path
#[derive(Debug, Clone, PartialEq)]
pub enum ChildEvent {
    Added { key: String, value: Value },
    Changed { key: String, value: Value },
    Removed { key: String, value: Value },
    /// Reported for completeness; ordering is by key so the core ignores it
    Moved { key: String, previous: Option<String> },
}

impl ChildEvent {
    pub fn key(&self) -> &str {
        match self {
            ChildEvent::Added { key, .. }
            | ChildEvent::Changed { key, .. }
            | ChildEvent::Removed { key, .. }
            | ChildEvent::Moved { key, .. } => key,
        }
    }
}

/// Live listener registration.
///
/// Events arrive on an unbounded channel in commit order. Releasing the
/// registration is idempotent and also happens on drop.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl<T> Subscription<T> {
    pub fn new(
        rx: mpsc::UnboundedReceiver<T>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            release: Some(Box::new(release)),
        }
    }

    /// Wait for the next event; `None` once released or the store went away
    pub async fn recv(&mut self) -> Option<T> {
        if self.release.is_none() {
            return None;
        }
        self.rx.recv().await
    }

    /// Non-blocking poll for an already delivered event
    pub fn try_recv(&mut self) -> Option<T> {
        if self.release.is_none() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            self.rx.close();
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Hierarchical realtime store with point writes, equality queries and
/// two subscription modes
pub trait RemoteTreeStore: Send + Sync + 'static {
    /// One-shot read of the subtree at `path`
    fn read(&self, path: &TreePath) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Replace the value at `path`, atomic for the subtree
    fn write(&self, path: &TreePath, value: Value) -> impl Future<Output = Result<()>> + Send;

    /// Atomic single-field update of `path/field`
    fn write_field(
        &self,
        path: &TreePath,
        field: &str,
        value: Value,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove the subtree at `path`
    fn delete(&self, path: &TreePath) -> impl Future<Output = Result<()>> + Send;

    /// One-shot snapshot of the children of `path` matching `filter`, in key order
    fn query_equal(
        &self,
        path: &TreePath,
        filter: EqualityFilter,
    ) -> impl Future<Output = Result<Vec<(String, Value)>>> + Send;

    /// Whole-subtree subscription; delivers the current value first
    fn subscribe_snapshot(
        &self,
        path: &TreePath,
    ) -> impl Future<Output = Result<Subscription<Option<Value>>>> + Send;

    /// Child-level diff subscription; delivers `Added` for existing children first
    fn subscribe_child_diff(
        &self,
        path: &TreePath,
        filter: Option<EqualityFilter>,
    ) -> impl Future<Output = Result<Subscription<ChildEvent>>> + Send;

    /// Generate a new store-ordered child key under `path` (no write happens)
    fn push(&self, path: &TreePath) -> impl Future<Output = Result<String>> + Send;
}
