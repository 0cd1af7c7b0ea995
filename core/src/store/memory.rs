/// In-process realtime tree store
///
/// Mirrors the semantics of a hosted realtime tree database: writing `null`
/// deletes, empty maps are pruned, and every listener gets its events in
/// commit order. Optionally persisted to sled, one record per second-level
/// node (`conversations/<id>`, `users/<uid>`).
use super::push_id::PushIdGenerator;
use super::{ChildEvent, EqualityFilter, RemoteTreeStore, Subscription, TreePath};
use crate::error::{ChatError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PERSIST_DEPTH: usize = 2;

enum ListenerKind {
    Snapshot {
        tx: mpsc::UnboundedSender<Option<Value>>,
        last: Option<Value>,
    },
    ChildDiff {
        tx: mpsc::UnboundedSender<ChildEvent>,
        filter: Option<EqualityFilter>,
        known: BTreeMap<String, Value>,
    },
}

struct Listener {
    id: Uuid,
    path: TreePath,
    kind: ListenerKind,
}

impl Listener {
    /// Push whatever changed under this listener; false once the receiver is gone
    fn deliver(&mut self, root: &Value, changed: &TreePath) -> bool {
        let below = changed.starts_with(&self.path);
        let above = self.path.starts_with(changed);
        if !below && !above {
            return true;
        }

        match &mut self.kind {
            ListenerKind::Snapshot { tx, last } => {
                let current = node_at(root, &self.path).cloned();
                if current == *last {
                    return true;
                }
                *last = current.clone();
                tx.send(current).is_ok()
            }
            ListenerKind::ChildDiff { tx, filter, known } => {
                if changed.len() > self.path.len() {
                    // Only one child can have changed
                    let key = changed.segments()[self.path.len()].clone();
                    let current = matching_child(root, &self.path, &key, filter.as_ref());
                    return diff_child(tx, known, key, current);
                }

                let current = matching_children(root, &self.path, filter.as_ref());
                let removed: Vec<String> = known
                    .keys()
                    .filter(|key| !current.contains_key(*key))
                    .cloned()
                    .collect();
                for key in removed {
                    if !diff_child(tx, known, key, None) {
                        return false;
                    }
                }
                for (key, value) in current {
                    if !diff_child(tx, known, key, Some(value)) {
                        return false;
                    }
                }
                true
            }
        }
    }
}

fn diff_child(
    tx: &mpsc::UnboundedSender<ChildEvent>,
    known: &mut BTreeMap<String, Value>,
    key: String,
    current: Option<Value>,
) -> bool {
    let previous = known.get(&key).cloned();
    let event = match (previous, current) {
        (None, None) => return true,
        (Some(old), Some(new)) if old == new => return true,
        (None, Some(value)) => {
            known.insert(key.clone(), value.clone());
            ChildEvent::Added { key, value }
        }
        (Some(_), Some(value)) => {
            known.insert(key.clone(), value.clone());
            ChildEvent::Changed { key, value }
        }
        (Some(value), None) => {
            known.remove(&key);
            ChildEvent::Removed { key, value }
        }
    };
    tx.send(event).is_ok()
}

struct TreeState {
    root: Value,
    listeners: Vec<Listener>,
}

impl TreeState {
    /// Apply a write and notify listeners only once `persist` accepted it;
    /// a rejected write leaves the tree as it was.
    fn commit(
        &mut self,
        path: &TreePath,
        value: Value,
        persist: impl FnOnce(&Value) -> Result<()>,
    ) -> Result<()> {
        let previous = node_at(&self.root, path).cloned();
        set_node(&mut self.root, path, value);
        if let Err(e) = persist(&self.root) {
            warn!("Failed to persist {}: {}", path, e);
            set_node(&mut self.root, path, previous.unwrap_or(Value::Null));
            return Err(e);
        }
        self.notify(path);
        Ok(())
    }

    fn notify(&mut self, changed: &TreePath) {
        let TreeState { root, listeners } = self;
        listeners.retain_mut(|listener| {
            let alive = listener.deliver(root, changed);
            if !alive {
                debug!("Dropping listener {} on {}: receiver closed", listener.id, listener.path);
            }
            alive
        });
    }
}

struct Inner {
    state: Mutex<TreeState>,
    push_ids: PushIdGenerator,
    db: Option<sled::Db>,
    offline: AtomicBool,
    writes: AtomicU64,
}

fn lock(state: &Mutex<TreeState>) -> MutexGuard<'_, TreeState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Realtime tree store living in this process
#[derive(Clone)]
pub struct MemoryTreeStore {
    inner: Arc<Inner>,
}

impl MemoryTreeStore {
    /// Create an empty, in-memory only store
    pub fn new() -> Self {
        Self::from_parts(Value::Object(Map::new()), None)
    }

    /// Create a store persisted to `data_dir/tree.db`, loading what is already there
    pub fn with_storage(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("tree.db");
        let db = sled::open(&db_path)
            .map_err(|e| ChatError::Storage(format!("Failed to open tree DB: {}", e)))?;

        let mut root = Value::Object(Map::new());
        let mut loaded = 0usize;
        for entry in db.iter() {
            let (key, value) =
                entry.map_err(|e| ChatError::Storage(format!("Failed to load tree DB: {}", e)))?;
            let path = TreePath::parse(&String::from_utf8_lossy(&key));
            match serde_json::from_slice::<Value>(&value) {
                Ok(value) => {
                    set_node(&mut root, &path, value);
                    loaded += 1;
                }
                Err(e) => warn!("Skipping unreadable record at {}: {}", path, e),
            }
        }

        info!("Tree store loaded {} records from {:?}", loaded, db_path);
        Ok(Self::from_parts(root, Some(db)))
    }

    fn from_parts(root: Value, db: Option<sled::Db>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(TreeState {
                    root,
                    listeners: Vec::new(),
                }),
                push_ids: PushIdGenerator::new(),
                db,
                offline: AtomicBool::new(false),
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Simulate losing the connection: every operation fails until turned back on
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
        info!("Tree store is now {}", if offline { "offline" } else { "online" });
    }

    /// Number of committed mutations (write, write_field, delete)
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Number of live listener registrations
    pub fn listener_count(&self) -> usize {
        lock(&self.inner.state).listeners.len()
    }

    fn ensure_online(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(ChatError::Storage("store is offline".to_string()));
        }
        Ok(())
    }

    fn mutate(&self, path: &TreePath, value: Value) -> Result<()> {
        self.ensure_online()?;
        let mut state = lock(&self.inner.state);
        state.commit(path, value, |root| match &self.inner.db {
            Some(db) => persist(db, root, path),
            None => Ok(()),
        })?;
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn register(&self, path: &TreePath, kind: ListenerKind) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.inner.state).listeners.push(Listener {
            id,
            path: path.clone(),
            kind,
        });
        debug!("Registered listener {} on {}", id, path);
        id
    }

    fn releaser(&self, id: Uuid) -> impl FnOnce() + Send + Sync + 'static {
        let weak = Arc::downgrade(&self.inner);
        move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner.state).listeners.retain(|l| l.id != id);
                debug!("Released listener {}", id);
            }
        }
    }
}

impl Default for MemoryTreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteTreeStore for MemoryTreeStore {
    async fn read(&self, path: &TreePath) -> Result<Option<Value>> {
        self.ensure_online()?;
        let state = lock(&self.inner.state);
        Ok(node_at(&state.root, path).cloned())
    }

    async fn write(&self, path: &TreePath, value: Value) -> Result<()> {
        self.mutate(path, value)
    }

    async fn write_field(&self, path: &TreePath, field: &str, value: Value) -> Result<()> {
        self.mutate(&path.child(field), value)
    }

    async fn delete(&self, path: &TreePath) -> Result<()> {
        self.mutate(path, Value::Null)
    }

    async fn query_equal(
        &self,
        path: &TreePath,
        filter: EqualityFilter,
    ) -> Result<Vec<(String, Value)>> {
        self.ensure_online()?;
        let state = lock(&self.inner.state);
        Ok(matching_children(&state.root, path, Some(&filter))
            .into_iter()
            .collect())
    }

    async fn subscribe_snapshot(&self, path: &TreePath) -> Result<Subscription<Option<Value>>> {
        self.ensure_online()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let current = {
            let state = lock(&self.inner.state);
            node_at(&state.root, path).cloned()
        };
        // Receiver is alive, cannot fail
        let _ = tx.send(current.clone());
        let id = self.register(path, ListenerKind::Snapshot { tx, last: current });
        Ok(Subscription::new(rx, self.releaser(id)))
    }

    async fn subscribe_child_diff(
        &self,
        path: &TreePath,
        filter: Option<EqualityFilter>,
    ) -> Result<Subscription<ChildEvent>> {
        self.ensure_online()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let known = {
            let state = lock(&self.inner.state);
            matching_children(&state.root, path, filter.as_ref())
        };
        for (key, value) in &known {
            let _ = tx.send(ChildEvent::Added {
                key: key.clone(),
                value: value.clone(),
            });
        }
        let id = self.register(path, ListenerKind::ChildDiff { tx, filter, known });
        Ok(Subscription::new(rx, self.releaser(id)))
    }

    async fn push(&self, _path: &TreePath) -> Result<String> {
        self.ensure_online()?;
        Ok(self.inner.push_ids.next_id())
    }
}

// ─── Tree helpers ────────────────────────────────────────────────────────────

fn node_at<'a>(root: &'a Value, path: &TreePath) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.segments() {
        current = current.as_object()?.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

fn matching_child(
    root: &Value,
    path: &TreePath,
    key: &str,
    filter: Option<&EqualityFilter>,
) -> Option<Value> {
    let child = node_at(root, &path.child(key))?;
    match filter {
        Some(f) if !f.matches(child) => None,
        _ => Some(child.clone()),
    }
}

fn matching_children(
    root: &Value,
    path: &TreePath,
    filter: Option<&EqualityFilter>,
) -> BTreeMap<String, Value> {
    let Some(Value::Object(children)) = node_at(root, path) else {
        return BTreeMap::new();
    };
    children
        .iter()
        .filter(|(_, value)| filter.map_or(true, |f| f.matches(value)))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Drop nulls and empty maps; `None` when nothing remains
fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(Value::Object(cleaned))
            }
        }
        other => Some(other),
    }
}

fn set_node(root: &mut Value, path: &TreePath, value: Value) {
    let value = normalize(value);
    if path.is_root() {
        *root = value.unwrap_or_else(|| Value::Object(Map::new()));
        return;
    }
    insert_at(root, path.segments(), value);
}

fn insert_at(node: &mut Value, segments: &[String], value: Option<Value>) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if !node.is_object() {
        if value.is_none() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        match value {
            Some(v) => {
                map.insert(head.clone(), v);
            }
            None => {
                map.remove(head);
            }
        }
        return;
    }

    if value.is_none() && !map.contains_key(head) {
        return;
    }
    let child = map
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    insert_at(child, rest, value);

    let emptied = matches!(map.get(head), Some(Value::Object(m)) if m.is_empty());
    if emptied {
        map.remove(head);
    }
}

fn storage_err(e: sled::Error) -> ChatError {
    ChatError::Storage(format!("tree DB: {}", e))
}

/// Write-through of the second-level records touched by a mutation at `changed`
fn persist(db: &sled::Db, root: &Value, changed: &TreePath) -> Result<()> {
    if changed.len() >= PERSIST_DEPTH {
        let anchor = changed.truncate(PERSIST_DEPTH);
        let key = anchor.to_string();
        match node_at(root, &anchor) {
            Some(value) => {
                db.insert(key.as_bytes(), serde_json::to_vec(value)?)
                    .map_err(storage_err)?;
            }
            None => {
                db.remove(key.as_bytes()).map_err(storage_err)?;
            }
        }
    } else {
        let prefix = if changed.is_root() {
            String::new()
        } else {
            format!("{}/", changed)
        };
        let stale: Vec<sled::IVec> = db
            .scan_prefix(prefix.as_bytes())
            .keys()
            .collect::<std::result::Result<_, _>>()
            .map_err(storage_err)?;
        for key in stale {
            db.remove(key).map_err(storage_err)?;
        }
        if !changed.is_root() {
            db.remove(changed.to_string().as_bytes()).map_err(storage_err)?;
        }

        let tops: Vec<(String, &Value)> = if changed.is_root() {
            root.as_object()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v)).collect())
                .unwrap_or_default()
        } else {
            node_at(root, changed)
                .map(|v| vec![(changed.to_string(), v)])
                .unwrap_or_default()
        };
        for (top, value) in tops {
            match value {
                Value::Object(children) => {
                    for (key, child) in children {
                        db.insert(
                            format!("{}/{}", top, key).as_bytes(),
                            serde_json::to_vec(child)?,
                        )
                        .map_err(storage_err)?;
                    }
                }
                leaf => {
                    db.insert(top.as_bytes(), serde_json::to_vec(leaf)?)
                        .map_err(storage_err)?;
                }
            }
        }
    }

    db.flush().map_err(storage_err)?;
    Ok(())
}
