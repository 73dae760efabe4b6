// SPDX-License-Identifier: GPL-3.0-only
//! Process-local registry backend.
//!
//! An [`InMemoryStore`] is a shared tree of nodes. Writers mutate it directly
//! and every [`InMemoryConnection`] opened through [`InMemoryBackend`] sees the
//! same tree and receives watch notifications for it. The store can simulate
//! session loss, transient connect failures and a digest ACL.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::registry::credentials::Credentials;
use crate::registry::error::RegistryError;
use crate::registry::models::{
    AuthType, BackendKind, RegistryConnectionConfig, RemoteNode, WatchEvent, WatchId, WatchSink,
};
use crate::registry::path;
use crate::registry::traits::{BackendFactory, RegistryConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchKind {
    Children,
    Data,
}

struct Watch {
    kind: WatchKind,
    path: String,
    sink: WatchSink,
}

struct NodeEntry {
    data: Vec<u8>,
    version: u64,
}

#[derive(Default)]
struct StoreState {
    nodes: BTreeMap<String, NodeEntry>,
    watches: HashMap<WatchId, Watch>,
    next_version: u64,
    digest_acl: Option<(String, Vec<u8>)>,
    failing_connects: u32,
}

impl StoreState {
    fn exists(&self, path: &str) -> bool {
        path == path::ROOT || self.nodes.contains_key(path)
    }

    fn children(&self, path: &str) -> BTreeSet<String> {
        self.nodes
            .keys()
            .filter(|p| p.as_str() != path && path::parent(p) == path)
            .map(|p| path::name(p).to_string())
            .collect()
    }

    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn insert(&mut self, path: &str, data: Vec<u8>) {
        let version = self.bump_version();
        self.nodes.insert(path.to_string(), NodeEntry { data, version });
        self.notify(WatchKind::Children, path::parent(path), WatchEvent::ChildAdded(path::name(path).to_string()));
    }

    fn notify(&self, kind: WatchKind, path: &str, event: WatchEvent) {
        for watch in self.watches.values() {
            if watch.kind == kind && watch.path == path && watch.sink.send(event.clone()).is_err() {
                debug!(path = %path, "Dropping notification for closed watch sink");
            }
        }
    }

    /// Remove every watch, returning one sink per distinct channel
    fn detach_watches(&mut self) -> Vec<WatchSink> {
        let mut sinks: Vec<WatchSink> = Vec::new();
        for (_, watch) in self.watches.drain() {
            if !sinks.iter().any(|s| s.same_channel(&watch.sink)) {
                sinks.push(watch.sink);
            }
        }
        sinks
    }
}

/// Shared in-memory registry tree
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a node, creating missing parents as empty containers
    pub fn create(&self, path: &str, data: &[u8]) -> Result<(), RegistryError> {
        let path = path::normalize(path)?;
        let mut state = self.state();
        if state.exists(&path) {
            return Err(RegistryError::NodeExists(path));
        }
        ensure_parents(&mut state, &path);
        state.insert(&path, data.to_vec());
        Ok(())
    }

    /// Replace the payload of an existing node
    pub fn set_data(&self, path: &str, data: &[u8]) -> Result<(), RegistryError> {
        let path = path::normalize(path)?;
        let mut state = self.state();
        if !state.nodes.contains_key(&path) {
            return Err(RegistryError::NoNode(path));
        }
        let version = state.bump_version();
        if let Some(entry) = state.nodes.get_mut(&path) {
            entry.data = data.to_vec();
            entry.version = version;
        }
        state.notify(WatchKind::Data, &path, WatchEvent::DataChanged(path::name(&path).to_string()));
        Ok(())
    }

    /// Delete a childless node
    pub fn delete(&self, path: &str) -> Result<(), RegistryError> {
        let path = path::normalize(path)?;
        let mut state = self.state();
        if !state.nodes.contains_key(&path) {
            return Err(RegistryError::NoNode(path));
        }
        if !state.children(&path).is_empty() {
            return Err(RegistryError::NotEmpty(path));
        }
        state.nodes.remove(&path);
        state.notify(
            WatchKind::Children,
            path::parent(&path),
            WatchEvent::ChildRemoved(path::name(&path).to_string()),
        );
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        let path = path::normalize(path).ok()?;
        self.state().nodes.get(&path).map(|n| n.data.clone())
    }

    pub fn children(&self, path: &str) -> BTreeSet<String> {
        match path::normalize(path) {
            Ok(path) => self.state().children(&path),
            Err(_) => BTreeSet::new(),
        }
    }

    /// Number of live watches across all connections
    pub fn watch_count(&self) -> usize {
        self.state().watches.len()
    }

    /// Require digest credentials for every new connection
    pub fn require_digest(&self, principal: &str, secret: &[u8]) {
        self.state().digest_acl = Some((principal.to_string(), secret.to_vec()));
    }

    /// Make the next `count` connect attempts fail as if the store were unreachable
    pub fn fail_next_connects(&self, count: u32) {
        self.state().failing_connects = count;
    }

    /// Drop every watch without telling subscribers, so that changes made before
    /// [`SessionLoss::expire`] go unnoticed, as they would during a real outage
    pub fn begin_session_loss(&self) -> SessionLoss {
        let sinks = self.state().detach_watches();
        info!(subscribers = sinks.len(), "Simulating registry session loss");
        SessionLoss { sinks }
    }

    fn check_connect(&self, credentials: Option<&Credentials>) -> Result<(), RegistryError> {
        let mut state = self.state();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(RegistryError::Connect {
                address: "in-memory".to_string(),
                reason: "store unavailable".to_string(),
            });
        }

        if let Some((principal, secret)) = &state.digest_acl {
            let authorized = credentials.is_some_and(|c| {
                c.auth_type == AuthType::Digest
                    && &c.principal == principal
                    && c.secret.as_ref() == Some(secret)
            });
            if !authorized {
                return Err(RegistryError::AuthFailed("digest credentials rejected".to_string()));
            }
        }
        Ok(())
    }
}

fn ensure_parents(state: &mut StoreState, path: &str) {
    let mut missing = Vec::new();
    let mut current = path::parent(path);
    while current != path::ROOT && !state.exists(current) {
        missing.push(current.to_string());
        current = path::parent(current);
    }
    for parent in missing.into_iter().rev() {
        state.insert(&parent, Vec::new());
    }
}

/// Pending session loss created by [`InMemoryStore::begin_session_loss`]
pub struct SessionLoss {
    sinks: Vec<WatchSink>,
}

impl SessionLoss {
    pub fn expire(self) {
        for sink in self.sinks {
            let _ = sink.send(WatchEvent::SessionExpired);
        }
    }
}

/// Backend factory bound to one shared store
#[derive(Clone)]
pub struct InMemoryBackend {
    store: InMemoryStore,
}

impl InMemoryBackend {
    pub fn new(store: InMemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BackendFactory for InMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InMemory
    }

    async fn connect(
        &self,
        config: &RegistryConnectionConfig,
        credentials: Option<Credentials>,
    ) -> Result<Arc<dyn RegistryConnection>, RegistryError> {
        self.store.check_connect(credentials.as_ref())?;

        let namespace = path::with_namespace(config.namespace.as_deref(), path::ROOT)?;
        info!(name = %config.name, namespace = %namespace, "Connected to in-memory registry");

        Ok(Arc::new(InMemoryConnection {
            store: self.store.clone(),
            namespace: config.namespace.clone(),
            watches: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct InMemoryConnection {
    store: InMemoryStore,
    namespace: Option<String>,
    watches: Mutex<HashSet<WatchId>>,
    closed: AtomicBool,
}

impl InMemoryConnection {
    fn full_path(&self, path: &str) -> Result<String, RegistryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::Closed);
        }
        path::with_namespace(self.namespace.as_deref(), path)
    }

    fn own_watches(&self) -> MutexGuard<'_, HashSet<WatchId>> {
        self.watches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn add_watch(&self, kind: WatchKind, path: &str, sink: WatchSink) -> Result<WatchId, RegistryError> {
        let full = self.full_path(path)?;
        let id = WatchId::new();
        self.store.state().watches.insert(id, Watch { kind, path: full, sink });
        self.own_watches().insert(id);
        Ok(id)
    }
}

#[async_trait]
impl RegistryConnection for InMemoryConnection {
    async fn exists(&self, path: &str) -> Result<bool, RegistryError> {
        let full = self.full_path(path)?;
        Ok(self.store.state().exists(&full))
    }

    async fn get_data(&self, path: &str) -> Result<RemoteNode, RegistryError> {
        let full = self.full_path(path)?;
        let state = self.store.state();
        let node = state.nodes.get(&full).ok_or_else(|| RegistryError::NoNode(path.to_string()))?;
        Ok(RemoteNode {
            path: path.to_string(),
            data: node.data.clone(),
            version: node.version,
        })
    }

    async fn list_children(&self, path: &str) -> Result<BTreeSet<String>, RegistryError> {
        let full = self.full_path(path)?;
        let state = self.store.state();
        if !state.exists(&full) {
            return Err(RegistryError::NoNode(path.to_string()));
        }
        Ok(state.children(&full))
    }

    async fn create_path(&self, path: &str, initial_data: Option<&[u8]>) -> Result<(), RegistryError> {
        let full = self.full_path(path)?;
        let mut state = self.store.state();
        if state.exists(&full) {
            return Ok(());
        }
        ensure_parents(&mut state, &full);
        state.insert(&full, initial_data.unwrap_or_default().to_vec());
        Ok(())
    }

    async fn watch_children(&self, path: &str, sink: WatchSink) -> Result<WatchId, RegistryError> {
        self.add_watch(WatchKind::Children, path, sink)
    }

    async fn watch_data(&self, path: &str, sink: WatchSink) -> Result<WatchId, RegistryError> {
        self.add_watch(WatchKind::Data, path, sink)
    }

    async fn cancel_watch(&self, id: WatchId) -> Result<(), RegistryError> {
        self.own_watches().remove(&id);
        self.store.state().watches.remove(&id);
        Ok(())
    }

    async fn close(&self) -> Result<(), RegistryError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let owned = std::mem::take(&mut *self.own_watches());
        let mut state = self.store.state();
        state.watches.retain(|id, _| !owned.contains(id));
        debug!(released = owned.len(), "Closed in-memory registry connection");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn connect(store: &InMemoryStore, namespace: Option<&str>) -> Arc<dyn RegistryConnection> {
        let mut config = RegistryConnectionConfig::new("test", "InMemory", "local");
        config.namespace = namespace.map(str::to_string);
        InMemoryBackend::new(store.clone()).connect(&config, None).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_path_and_read_back() {
        let store = InMemoryStore::new();
        let conn = connect(&store, Some("knox")).await;

        conn.create_path("/config/descriptors", None).await.unwrap();
        assert!(conn.exists("/config/descriptors").await.unwrap());
        assert!(store.get("/knox/config").is_some());

        store.create("/knox/config/descriptors/test1.json", b"{}").unwrap();
        let node = conn.get_data("/config/descriptors/test1.json").await.unwrap();
        assert_eq!(node.data, b"{}");
        assert_eq!(
            conn.list_children("/config/descriptors").await.unwrap(),
            BTreeSet::from(["test1.json".to_string()])
        );
    }

    #[tokio::test]
    async fn test_create_path_keeps_existing_node() {
        let store = InMemoryStore::new();
        store.create("/config", b"keep").unwrap();
        let conn = connect(&store, None).await;

        conn.create_path("/config", Some(b"replace")).await.unwrap();
        assert_eq!(store.get("/config").unwrap(), b"keep");
    }

    #[tokio::test]
    async fn test_watches_deliver_events() {
        let store = InMemoryStore::new();
        let conn = connect(&store, None).await;
        conn.create_path("/config/shared-providers", None).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        conn.watch_children("/config/shared-providers", tx.clone()).await.unwrap();

        store.create("/config/shared-providers/a.xml", b"A").unwrap();
        assert_eq!(rx.recv().await.unwrap(), WatchEvent::ChildAdded("a.xml".to_string()));

        conn.watch_data("/config/shared-providers/a.xml", tx).await.unwrap();
        store.set_data("/config/shared-providers/a.xml", b"B").unwrap();
        assert_eq!(rx.recv().await.unwrap(), WatchEvent::DataChanged("a.xml".to_string()));

        store.delete("/config/shared-providers/a.xml").unwrap();
        assert_eq!(rx.recv().await.unwrap(), WatchEvent::ChildRemoved("a.xml".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_and_close_release_watches() {
        let store = InMemoryStore::new();
        let conn = connect(&store, None).await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = conn.watch_children("/", tx.clone()).await.unwrap();
        conn.watch_data("/x", tx).await.unwrap();
        assert_eq!(store.watch_count(), 2);

        conn.cancel_watch(id).await.unwrap();
        assert_eq!(store.watch_count(), 1);

        conn.close().await.unwrap();
        assert_eq!(store.watch_count(), 0);
        assert!(matches!(conn.exists("/").await, Err(RegistryError::Closed)));
    }

    #[tokio::test]
    async fn test_session_loss_delivers_one_expiry_per_channel() {
        let store = InMemoryStore::new();
        let conn = connect(&store, None).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        conn.watch_children("/", tx.clone()).await.unwrap();
        conn.watch_data("/a", tx).await.unwrap();

        let loss = store.begin_session_loss();
        store.create("/a", b"missed").unwrap();
        assert!(rx.try_recv().is_err());

        loss.expire();
        assert_eq!(rx.recv().await.unwrap(), WatchEvent::SessionExpired);
        assert!(rx.try_recv().is_err());
        assert_eq!(store.watch_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_rejects_missing_and_non_empty_nodes() {
        let store = InMemoryStore::new();
        store.create("/config/descriptors/x", b"").unwrap();

        assert!(matches!(store.delete("/config/descriptors"), Err(RegistryError::NotEmpty(_))));
        assert!(matches!(store.delete("/nope"), Err(RegistryError::NoNode(_))));
    }

    #[tokio::test]
    async fn test_digest_acl() {
        let store = InMemoryStore::new();
        store.require_digest("knox", b"secret");
        let backend = InMemoryBackend::new(store.clone());
        let config = RegistryConnectionConfig::new("secure", "InMemory", "local");

        let err = backend.connect(&config, None).await.err().unwrap();
        assert!(matches!(err, RegistryError::AuthFailed(_)));

        let credentials = Credentials {
            auth_type: AuthType::Digest,
            principal: "knox".to_string(),
            secret: Some(b"secret".to_vec()),
            kerberos: None,
        };
        assert!(backend.connect(&config, Some(credentials)).await.is_ok());
    }
}
