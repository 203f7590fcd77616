//! In-process hierarchical store.
//!
//! DESIGN
//! ======
//! One JSON tree behind a mutex plus a list of subtree watchers. Every write
//! recomputes the snapshot of each watcher whose subtree overlaps the written
//! path and pushes it only if it actually changed.
//!
//! Participants talk to the tree through a [`StoreConnection`]. A connection
//! carries its own on-disconnect removals; they run when the connection is
//! disconnected explicitly or simply dropped, which is how a killed tab (or a
//! websocket that vanished) still gets its record cleaned up.
//!
//! The mutex is never held across an await point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info};

use super::{RealtimeStore, StoreError, Subscription, segments, writable_segments};

// =============================================================================
// TREE
// =============================================================================

struct Watcher {
    segments: Vec<String>,
    tx: watch::Sender<Value>,
}

struct Tree {
    root: Value,
    watchers: Vec<Watcher>,
}

impl Tree {
    fn get(&self, path: &[String]) -> Value {
        subtree(&self.root, path)
    }

    /// Returns true if the tree changed.
    fn put(&mut self, path: &[String], value: Value) -> bool {
        if value.is_null() {
            return self.delete(path);
        }
        let Some((leaf, parents)) = path.split_last() else {
            return false;
        };
        let mut node = &mut self.root;
        for segment in parents {
            let map = ensure_object(node);
            node = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        let map = ensure_object(node);
        if map.get(leaf) == Some(&value) {
            return false;
        }
        map.insert(leaf.clone(), value);
        true
    }

    /// Returns true if something was removed. Empty parents are pruned.
    fn delete(&mut self, path: &[String]) -> bool {
        remove_and_prune(&mut self.root, path)
    }

    fn notify(&mut self, changed: &[String]) {
        self.watchers.retain(|w| !w.tx.is_closed());
        let root = &self.root;
        for watcher in &self.watchers {
            if !overlaps(&watcher.segments, changed) {
                continue;
            }
            let snapshot = subtree(root, &watcher.segments);
            watcher.tx.send_if_modified(|current| {
                if *current == snapshot {
                    return false;
                }
                *current = snapshot;
                true
            });
        }
    }
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

fn remove_and_prune(node: &mut Value, path: &[String]) -> bool {
    let Some((first, rest)) = path.split_first() else {
        return false;
    };
    let Value::Object(map) = node else {
        return false;
    };
    if rest.is_empty() {
        return map.remove(first).is_some();
    }
    let Some(child) = map.get_mut(first) else {
        return false;
    };
    let removed = remove_and_prune(child, rest);
    if removed && child.as_object().is_some_and(Map::is_empty) {
        map.remove(first);
    }
    removed
}

fn subtree(root: &Value, path: &[String]) -> Value {
    let mut node = root;
    for segment in path {
        match node.get(segment) {
            Some(child) => node = child,
            None => return Value::Null,
        }
    }
    node.clone()
}

/// A write at `changed` affects a watcher if either path is a prefix of the other.
fn overlaps(watched: &[String], changed: &[String]) -> bool {
    watched.iter().zip(changed).all(|(a, b)| a == b)
}

// =============================================================================
// STORE
// =============================================================================

/// Shared handle to one tree. Cheap to clone.
#[derive(Clone)]
pub struct MemoryStore {
    tree: Arc<Mutex<Tree>>,
    next_connection: Arc<AtomicU64>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree { root: Value::Object(Map::new()), watchers: Vec::new() })),
            next_connection: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Open a connection with its own on-disconnect removals.
    #[must_use]
    pub fn connect(&self) -> StoreConnection {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        debug!(connection = id, "store: connection opened");
        StoreConnection { id, store: self.clone(), hooks: Mutex::new(Vec::new()), closed: false }
    }

    /// Current value at `path` (`null` when absent).
    #[must_use]
    pub fn snapshot(&self, path: &str) -> Value {
        self.lock().get(&segments(path))
    }

    /// Number of live subtree watchers.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        let mut tree = self.lock();
        tree.watchers.retain(|w| !w.tx.is_closed());
        tree.watchers.len()
    }

    /// Overwrite `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] for the root path.
    pub fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let segments = writable_segments(path)?;
        let mut tree = self.lock();
        if tree.put(&segments, value) {
            tree.notify(&segments);
        }
        Ok(())
    }

    /// Delete `path` if present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] for the root path.
    pub fn delete(&self, path: &str) -> Result<(), StoreError> {
        let segments = writable_segments(path)?;
        let mut tree = self.lock();
        if tree.delete(&segments) {
            tree.notify(&segments);
        }
        Ok(())
    }

    /// Watch the subtree at `path`.
    #[must_use]
    pub fn watch(&self, path: &str) -> Subscription {
        let segments = segments(path);
        let mut tree = self.lock();
        let (tx, rx) = watch::channel(Value::Null);
        tx.send_replace(tree.get(&segments));
        tree.watchers.push(Watcher { segments, tx });
        Subscription::new(rx)
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

/// One participant's session with a [`MemoryStore`].
pub struct StoreConnection {
    id: u64,
    store: MemoryStore,
    hooks: Mutex<Vec<String>>,
    closed: bool,
}

impl StoreConnection {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Paths this connection will remove when it goes away.
    #[must_use]
    pub fn pending_removals(&self) -> Vec<String> {
        self.hooks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// End the connection and run its on-disconnect removals.
    pub fn disconnect(mut self) {
        self.run_hooks();
    }

    fn run_hooks(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let hooks = std::mem::take(
            &mut *self
                .hooks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for path in &hooks {
            // Paths were validated when the hook was registered.
            let _ = self.store.delete(path);
        }
        info!(connection = self.id, removed = hooks.len(), "store: connection closed");
    }
}

impl Drop for StoreConnection {
    fn drop(&mut self) {
        self.run_hooks();
    }
}

#[async_trait]
impl RealtimeStore for StoreConnection {
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.store.write(path, value)
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.store.delete(path)
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        Ok(self.store.watch(path))
    }

    async fn on_disconnect_remove(&self, path: &str) -> Result<(), StoreError> {
        let normalized = writable_segments(path)?.join("/");
        let mut hooks = self
            .hooks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !hooks.contains(&normalized) {
            hooks.push(normalized);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
