// SPDX-License-Identifier: GPL-3.0-only
//! Registry backend over a shared directory tree.
//!
//! Containers are directories, data nodes are regular files. Entries whose
//! name starts with a dot are invisible, so writers can stage content next to
//! the target and rename it into place. A connection owns a single `notify`
//! watcher; subscriptions are routed by directory, so any number of data
//! watches in one directory share one OS watch. A watcher failure, or the
//! removal of a watched directory, is reported as `SessionExpired`.

use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::UNIX_EPOCH;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::registry::credentials::Credentials;
use crate::registry::error::RegistryError;
use crate::registry::models::{
    AuthType, BackendKind, RegistryConnectionConfig, RemoteNode, WatchEvent, WatchId, WatchSink,
};
use crate::registry::path;
use crate::registry::traits::{BackendFactory, RegistryConnection};

/// Hidden file at the registry root holding `principal:secret`. When present,
/// only connections presenting matching digest credentials are accepted.
pub const DIGEST_FILE: &str = ".digest";

#[derive(Debug, Default, Clone)]
pub struct FileSystemBackend;

impl FileSystemBackend {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a `file://` URL or plain path address to a directory
    pub fn resolve_root(config: &RegistryConnectionConfig) -> Result<PathBuf, RegistryError> {
        let address = config.address.trim();
        let base = if address.starts_with("file:") {
            let url = Url::parse(address).map_err(|e| RegistryError::InvalidConfig {
                name: config.name.clone(),
                reason: format!("invalid address '{}': {}", address, e),
            })?;
            url.to_file_path().map_err(|_| RegistryError::InvalidConfig {
                name: config.name.clone(),
                reason: format!("address '{}' is not a local path", address),
            })?
        } else if address.is_empty() {
            return Err(RegistryError::InvalidConfig {
                name: config.name.clone(),
                reason: "address is empty".to_string(),
            });
        } else {
            PathBuf::from(address)
        };

        let namespace = path::with_namespace(config.namespace.as_deref(), path::ROOT)?;
        Ok(path::segments(&namespace)?
            .into_iter()
            .fold(base, |dir, segment| dir.join(segment)))
    }
}

/// Enforce the root's digest file, if it has one
async fn check_digest(root: &Path, credentials: Option<&Credentials>) -> Result<(), RegistryError> {
    let digest_path = root.join(DIGEST_FILE);
    let expected = match tokio::fs::read(&digest_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_error(&digest_path, e)),
    };

    let offered = credentials
        .filter(|c| c.auth_type == AuthType::Digest)
        .and_then(|c| c.secret.as_ref().map(|secret| (c.principal.as_bytes(), secret)))
        .map(|(principal, secret)| [principal, b":".as_slice(), secret.as_slice()].concat());

    match offered {
        Some(offered) if offered == expected.trim_ascii() => Ok(()),
        Some(_) => Err(RegistryError::AuthFailed("digest credentials rejected".to_string())),
        None => Err(RegistryError::AuthFailed("registry requires digest credentials".to_string())),
    }
}

#[async_trait]
impl BackendFactory for FileSystemBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FileSystem
    }

    async fn connect(
        &self,
        config: &RegistryConnectionConfig,
        credentials: Option<Credentials>,
    ) -> Result<Arc<dyn RegistryConnection>, RegistryError> {
        let root = Self::resolve_root(config)?;

        // a missing root usually means the shared mount is not up yet
        match tokio::fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(RegistryError::InvalidConfig {
                    name: config.name.clone(),
                    reason: format!("{} is not a directory", root.display()),
                });
            }
            Err(e) => {
                return Err(RegistryError::Connect {
                    address: root.display().to_string(),
                    reason: e.to_string(),
                });
            }
        }

        check_digest(&root, credentials.as_ref()).await?;
        if let Some(ref creds) = credentials {
            info!(
                name = %config.name,
                principal = %creds.principal,
                auth_type = creds.auth_type.as_str(),
                "Using authenticated registry session"
            );
        }

        let routes = Arc::new(Mutex::new(Routes::default()));
        let dispatch_routes = Arc::clone(&routes);
        let watcher = RecommendedWatcher::new(
            move |event: notify::Result<notify::Event>| lock_routes(&dispatch_routes).dispatch(event),
            Config::default(),
        )?;

        info!(name = %config.name, root = %root.display(), "Connected to filesystem registry");
        Ok(Arc::new(FileSystemConnection {
            root,
            routes,
            watcher: Mutex::new(watcher),
            closed: AtomicBool::new(false),
        }))
    }
}

enum WatchFilter {
    Children { dir: PathBuf },
    Data { file: PathBuf },
}

struct Subscription {
    id: WatchId,
    filter: WatchFilter,
    sink: WatchSink,
}

/// Watch subscriptions keyed by the directory their OS watch is placed on
#[derive(Default)]
struct Routes {
    by_dir: HashMap<PathBuf, Vec<Subscription>>,
}

impl Routes {
    /// Returns true when `dir` had no subscribers before
    fn subscribe(&mut self, dir: PathBuf, subscription: Subscription) -> bool {
        let subscriptions = self.by_dir.entry(dir).or_default();
        subscriptions.push(subscription);
        subscriptions.len() == 1
    }

    /// Returns the directory of the removed subscription when it was the last one there
    fn unsubscribe(&mut self, id: WatchId) -> Option<PathBuf> {
        let dir = self
            .by_dir
            .iter()
            .find(|(_, subs)| subs.iter().any(|s| s.id == id))
            .map(|(dir, _)| dir.clone())?;

        let subscriptions = self.by_dir.get_mut(&dir)?;
        subscriptions.retain(|s| s.id != id);
        if subscriptions.is_empty() {
            self.by_dir.remove(&dir);
            Some(dir)
        } else {
            None
        }
    }

    fn dispatch(&self, event: notify::Result<notify::Event>) {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "Registry watcher error, requesting resync");
                let mut notified: Vec<&WatchSink> = Vec::new();
                for subscription in self.by_dir.values().flatten() {
                    if !notified.iter().any(|s| s.same_channel(&subscription.sink)) {
                        send(&subscription.sink, WatchEvent::SessionExpired);
                        notified.push(&subscription.sink);
                    }
                }
                return;
            }
        };

        // an event concerns the subscribers of its paths' directories, and of
        // the path itself when a watched directory is the subject
        let mut seen = HashSet::new();
        for event_path in &event.paths {
            for dir in [event_path.parent(), Some(event_path.as_path())].into_iter().flatten() {
                for subscription in self.by_dir.get(dir).into_iter().flatten() {
                    if seen.insert(subscription.id) {
                        for watch_event in translate(&subscription.filter, &event) {
                            send(&subscription.sink, watch_event);
                        }
                    }
                }
            }
        }
    }
}

fn lock_routes(routes: &Mutex<Routes>) -> MutexGuard<'_, Routes> {
    routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn send(sink: &WatchSink, event: WatchEvent) {
    if let Err(e) = sink.send(event) {
        warn!(error = %e, "Failed to send registry watch event, receiver may be closed");
    }
}

pub struct FileSystemConnection {
    root: PathBuf,
    routes: Arc<Mutex<Routes>>,
    watcher: Mutex<RecommendedWatcher>,
    closed: AtomicBool,
}

impl FileSystemConnection {
    fn local_path(&self, registry_path: &str) -> Result<PathBuf, RegistryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::Closed);
        }
        Ok(path::segments(registry_path)?
            .into_iter()
            .fold(self.root.clone(), |dir, segment| dir.join(segment)))
    }

    // Held across route changes and the matching OS watch change, never by the
    // dispatch callback, so the two cannot deadlock.
    fn watcher(&self) -> MutexGuard<'_, RecommendedWatcher> {
        self.watcher.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscribe(&self, dir: &Path, filter: WatchFilter, sink: WatchSink) -> Result<WatchId, RegistryError> {
        let id = WatchId::new();
        let mut watcher = self.watcher();
        let first = lock_routes(&self.routes).subscribe(dir.to_path_buf(), Subscription { id, filter, sink });

        if first {
            if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
                lock_routes(&self.routes).unsubscribe(id);
                return Err(e.into());
            }
            debug!(dir = %dir.display(), "Started watching registry directory");
        }
        debug!(watch_id = %id, dir = %dir.display(), "Registered registry watch");
        Ok(id)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn is_visible(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.')
}

#[async_trait]
impl RegistryConnection for FileSystemConnection {
    async fn exists(&self, registry_path: &str) -> Result<bool, RegistryError> {
        let local = self.local_path(registry_path)?;
        tokio::fs::try_exists(&local).await.map_err(|e| io_error(&local, e))
    }

    /// Directories carry no data, so only files can be fetched
    async fn get_data(&self, registry_path: &str) -> Result<RemoteNode, RegistryError> {
        let local = self.local_path(registry_path)?;
        let meta = match tokio::fs::metadata(&local).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(RegistryError::NoNode(registry_path.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RegistryError::NoNode(registry_path.to_string()));
            }
            Err(e) => return Err(io_error(&local, e)),
        };

        let version = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();

        let data = match tokio::fs::read(&local).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RegistryError::NoNode(registry_path.to_string()));
            }
            Err(e) => return Err(io_error(&local, e)),
        };

        Ok(RemoteNode {
            path: registry_path.to_string(),
            data,
            version,
        })
    }

    /// Lists the data nodes (regular files) directly under `registry_path`
    async fn list_children(&self, registry_path: &str) -> Result<BTreeSet<String>, RegistryError> {
        let local = self.local_path(registry_path)?;
        let mut entries = match tokio::fs::read_dir(&local).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RegistryError::NoNode(registry_path.to_string()));
            }
            Err(e) => return Err(io_error(&local, e)),
        };

        let mut children = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&local, e))? {
            let Some(name) = entry.file_name().to_str().filter(|n| is_visible(n)).map(str::to_string) else {
                continue;
            };
            // follows symlinks; entries that vanish meanwhile are skipped
            if tokio::fs::metadata(entry.path()).await.is_ok_and(|m| m.is_file()) {
                children.insert(name);
            }
        }
        Ok(children)
    }

    async fn create_path(&self, registry_path: &str, initial_data: Option<&[u8]>) -> Result<(), RegistryError> {
        let local = self.local_path(registry_path)?;
        if tokio::fs::try_exists(&local).await.map_err(|e| io_error(&local, e))? {
            return Ok(());
        }

        match initial_data {
            None => tokio::fs::create_dir_all(&local).await.map_err(|e| io_error(&local, e)),
            Some(data) => {
                if let Some(parent) = local.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| io_error(parent, e))?;
                }
                tokio::fs::write(&local, data).await.map_err(|e| io_error(&local, e))
            }
        }
    }

    async fn watch_children(&self, registry_path: &str, sink: WatchSink) -> Result<WatchId, RegistryError> {
        let dir = self.local_path(registry_path)?;
        self.subscribe(&dir, WatchFilter::Children { dir: dir.clone() }, sink)
    }

    async fn watch_data(&self, registry_path: &str, sink: WatchSink) -> Result<WatchId, RegistryError> {
        let file = self.local_path(registry_path)?;
        // watch the parent so replacing the file by rename is still seen
        let dir = file.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
        self.subscribe(&dir, WatchFilter::Data { file }, sink)
    }

    async fn cancel_watch(&self, id: WatchId) -> Result<(), RegistryError> {
        let mut watcher = self.watcher();
        let released = lock_routes(&self.routes).unsubscribe(id);
        if let Some(dir) = released {
            // the OS drops the watch by itself when the directory is deleted
            if let Err(e) = watcher.unwatch(&dir) {
                debug!(dir = %dir.display(), error = %e, "Directory was no longer watched");
            }
        }
        debug!(watch_id = %id, "Cancelled registry watch");
        Ok(())
    }

    async fn close(&self) -> Result<(), RegistryError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut watcher = self.watcher();
        let dirs: Vec<PathBuf> = lock_routes(&self.routes).by_dir.drain().map(|(dir, _)| dir).collect();
        for dir in &dirs {
            if let Err(e) = watcher.unwatch(dir) {
                debug!(dir = %dir.display(), error = %e, "Directory was no longer watched");
            }
        }
        info!(root = %self.root.display(), released = dirs.len(), "Closed filesystem registry connection");
        Ok(())
    }
}

fn child_name<'a>(dir: &Path, path: &'a Path) -> Option<&'a str> {
    if path.parent()? != dir {
        return None;
    }
    path.file_name()?.to_str().filter(|n| is_visible(n))
}

/// Translate a raw notify event into what one subscription should hear
fn translate(filter: &WatchFilter, event: &notify::Event) -> Vec<WatchEvent> {
    let mut outgoing = Vec::new();
    match filter {
        WatchFilter::Children { dir } => {
            let dir_gone = matches!(event.kind, EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)))
                && event.paths.iter().any(|p| p == dir);
            if dir_gone {
                warn!(dir = %dir.display(), "Watched registry directory went away, requesting resync");
                outgoing.push(WatchEvent::SessionExpired);
                return outgoing;
            }

            match event.kind {
                EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                    outgoing.extend(
                        event.paths.iter().filter_map(|p| child_name(dir, p)).map(|n| WatchEvent::ChildAdded(n.to_string())),
                    );
                }
                EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                    outgoing.extend(
                        event.paths.iter().filter_map(|p| child_name(dir, p)).map(|n| WatchEvent::ChildRemoved(n.to_string())),
                    );
                }
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                    if let [from, to] = event.paths.as_slice() {
                        if let Some(name) = child_name(dir, from) {
                            outgoing.push(WatchEvent::ChildRemoved(name.to_string()));
                        }
                        if let Some(name) = child_name(dir, to) {
                            outgoing.push(WatchEvent::ChildAdded(name.to_string()));
                        }
                    }
                }
                _ => {}
            }
        }
        WatchFilter::Data { file } => {
            let changed = match event.kind {
                // a rename pair only counts when the file is the destination
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.last() == Some(file),
                EventKind::Modify(ModifyKind::Name(RenameMode::From))
                | EventKind::Modify(ModifyKind::Metadata(_)) => false,
                EventKind::Modify(_) | EventKind::Create(_) => event.paths.iter().any(|p| p == file),
                _ => false,
            };
            if changed {
                if let Some(name) = file.file_name().and_then(|n| n.to_str()) {
                    outgoing.push(WatchEvent::DataChanged(name.to_string()));
                }
            }
        }
    }
    outgoing
}
