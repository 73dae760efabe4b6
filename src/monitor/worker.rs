// SPDX-License-Identifier: GPL-3.0-only
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::mirror::{MirrorWriter, WriteOutcome};
use crate::monitor::{MonitorTarget, TargetStatus};
use crate::registry::{RegistryConnection, RegistryError, RetryPolicy, WatchEvent, WatchId, WatchSink};
use crate::utils::validate_node_name;

/// Keeps one local directory in step with one registry subtree
///
/// A worker is the single consumer of its target's event queue, so events for
/// a node are applied one at a time and in delivery order.
pub struct TargetWorker {
    target: MonitorTarget,
    connection: Arc<dyn RegistryConnection>,
    writer: MirrorWriter,
    sink: WatchSink,
    retry: RetryPolicy,
    children_watch: Option<WatchId>,
    data_watches: HashMap<String, WatchId>,
    status: Arc<Mutex<TargetStatus>>,
}

impl TargetWorker {
    pub fn new(
        target: MonitorTarget,
        connection: Arc<dyn RegistryConnection>,
        sink: WatchSink,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            writer: MirrorWriter::new(target.local_dir.clone()),
            status: Arc::new(Mutex::new(TargetStatus::new(&target))),
            target,
            connection,
            sink,
            retry,
            children_watch: None,
            data_watches: HashMap::new(),
        }
    }

    pub fn status_handle(&self) -> Arc<Mutex<TargetStatus>> {
        Arc::clone(&self.status)
    }

    pub fn status(&self) -> TargetStatus {
        self.status.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn record(&self, update: impl FnOnce(&mut TargetStatus)) {
        let mut status = self.status.lock().unwrap_or_else(|p| p.into_inner());
        update(&mut *status);
    }

    /// Bring the mirror in line with the registry and (re)establish all watches
    ///
    /// Registry failures abort the resync; local write failures are counted and
    /// logged but do not.
    pub async fn resync(&mut self) -> Result<(), RegistryError> {
        self.record(|s| s.resync_in_progress = true);
        let result = self.reconcile().await;
        self.record(|s| {
            s.resync_in_progress = false;
            if result.is_ok() {
                s.resyncs += 1;
                s.last_resync = Some(Utc::now());
            }
        });
        result
    }

    async fn reconcile(&mut self) -> Result<(), RegistryError> {
        let remote_path = self.target.remote_path.clone();
        self.cancel_watches().await;

        self.connection.create_path(&remote_path, None).await?;

        // watch before listing so nothing created in between is missed
        let id = self.connection.watch_children(&remote_path, self.sink.clone()).await?;
        self.children_watch = Some(id);

        let remote = self.connection.list_children(&remote_path).await?;
        info!(subtree = self.target.label(), nodes = remote.len(), "Resynchronizing mirror");

        for name in &remote {
            if let Err(reason) = validate_node_name(name) {
                warn!(subtree = self.target.label(), name = %name, reason = %reason, "Skipping registry node with unusable name");
                continue;
            }
            self.apply(name).await?;
        }

        match self.writer.list().await {
            Ok(local) => {
                for stale in local.difference(&remote) {
                    self.remove(stale).await;
                }
            }
            Err(e) => {
                error!(subtree = self.target.label(), error = %e, "Failed to list local mirror directory");
                self.record(|s| s.write_failures += 1);
            }
        }

        let mirrored = self.writer.list().await.map(|l| l.len()).unwrap_or_default();
        self.record(|s| s.mirrored_files = mirrored);
        Ok(())
    }

    /// Apply a single registry notification
    pub async fn handle(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::ChildAdded(name) | WatchEvent::DataChanged(name) => {
                if self.accept(&name) {
                    self.apply_or_resync(&name).await;
                }
            }
            WatchEvent::ChildRemoved(name) => {
                if self.accept(&name) {
                    self.remove(&name).await;
                }
            }
            WatchEvent::SessionExpired => {
                if let Err(e) = self.resync().await {
                    error!(subtree = self.target.label(), error = %e, "Resync after session loss failed");
                }
            }
        }
    }

    fn accept(&self, name: &str) -> bool {
        match validate_node_name(name) {
            Ok(_) => true,
            Err(reason) => {
                warn!(subtree = self.target.label(), name = %name, reason = %reason, "Ignoring event for unusable node name");
                false
            }
        }
    }

    /// Apply a node outside of a resync; a node left unwatched forces one
    async fn apply_or_resync(&mut self, name: &str) {
        if let Err(e) = self.apply(name).await {
            warn!(subtree = self.target.label(), name = %name, error = %e, "Node is not watched, scheduling resync");
            if self.sink.send(WatchEvent::SessionExpired).is_err() {
                debug!(subtree = self.target.label(), "Event queue closed, skipping resync");
            }
        }
    }

    /// Fetch a node and mirror it; a node that is already gone counts as removed
    ///
    /// Fails only when the node could not be watched. The mirror file is still
    /// written in that case, but later changes to it would go unnoticed.
    async fn apply(&mut self, name: &str) -> Result<(), RegistryError> {
        let node_path = self.target.node_path(name);

        let mut unwatched = None;
        if !self.data_watches.contains_key(name) {
            match self.connection.watch_data(&node_path, self.sink.clone()).await {
                Ok(id) => {
                    self.data_watches.insert(name.to_string(), id);
                }
                Err(e) => {
                    error!(path = %node_path, error = %e, "Failed to watch registry node");
                    self.record(|s| s.watch_failures += 1);
                    unwatched = Some(e);
                }
            }
        }

        self.fetch_and_write(name, &node_path).await;
        unwatched.map_or(Ok(()), Err)
    }

    async fn fetch_and_write(&mut self, name: &str, node_path: &str) {
        let node = match self.connection.get_data(node_path).await {
            Ok(node) => node,
            Err(RegistryError::NoNode(_)) => {
                debug!(path = %node_path, "Registry node vanished before fetch, treating as removed");
                self.remove(name).await;
                return;
            }
            Err(e) => {
                error!(path = %node_path, error = %e, "Failed to fetch registry node");
                self.record(|s| s.fetch_failures += 1);
                return;
            }
        };

        match self.writer.write(name, node.data).await {
            Ok(WriteOutcome::Unchanged) => {}
            Ok(outcome) => self.record(|s| {
                s.events_applied += 1;
                if outcome == WriteOutcome::Created {
                    s.mirrored_files += 1;
                }
            }),
            Err(e) => {
                error!(subtree = self.target.label(), name = %name, error = %e, "Failed to write mirror file");
                self.record(|s| s.write_failures += 1);
            }
        }
    }

    async fn remove(&mut self, name: &str) {
        if let Some(id) = self.data_watches.remove(name) {
            if let Err(e) = self.connection.cancel_watch(id).await {
                debug!(name = %name, error = %e, "Failed to cancel data watch");
            }
        }

        match self.writer.remove(name).await {
            Ok(true) => self.record(|s| {
                s.events_applied += 1;
                s.mirrored_files = s.mirrored_files.saturating_sub(1);
            }),
            Ok(false) => {}
            Err(e) => {
                error!(subtree = self.target.label(), name = %name, error = %e, "Failed to remove mirror file");
                self.record(|s| s.write_failures += 1);
            }
        }
    }

    pub async fn cancel_watches(&mut self) {
        let ids: Vec<WatchId> = self
            .children_watch
            .take()
            .into_iter()
            .chain(self.data_watches.drain().map(|(_, id)| id))
            .collect();

        for id in ids {
            if let Err(e) = self.connection.cancel_watch(id).await {
                debug!(watch_id = %id, error = %e, "Failed to cancel watch");
            }
        }
    }

    /// Resync after a session loss, retrying with backoff
    ///
    /// Events queued while resyncing are deferred, coalesced per node and
    /// re-evaluated against the registry once the resync has finished.
    async fn recover(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<WatchEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let mut attempt = 0;
        loop {
            warn!(subtree = self.target.label(), "Registry session expired, resynchronizing");
            if let Err(e) = self.resync().await {
                if attempt >= self.retry.max_retries {
                    error!(subtree = self.target.label(), error = %e, "Giving up on resync, mirror may be stale until the next session event");
                    return;
                }
                let delay = self.retry.backoff(attempt);
                warn!(subtree = self.target.label(), error = %e, delay_ms = delay.as_millis() as u64, "Resync failed, retrying");
                attempt += 1;
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue,
                    _ = shutdown.changed() => return,
                }
            }

            let mut deferred = BTreeSet::new();
            let mut expired_again = false;
            while let Ok(event) = events.try_recv() {
                match event {
                    WatchEvent::SessionExpired => expired_again = true,
                    WatchEvent::ChildAdded(name)
                    | WatchEvent::ChildRemoved(name)
                    | WatchEvent::DataChanged(name) => {
                        deferred.insert(name);
                    }
                }
            }

            if expired_again {
                attempt = 0;
                continue;
            }

            for name in deferred {
                if self.accept(&name) {
                    self.apply_or_resync(&name).await;
                }
            }
            return;
        }
    }

    /// Consume events until shutdown is signalled
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<WatchEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(subtree = self.target.label(), dir = %self.target.local_dir.display(), "Mirror worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(WatchEvent::SessionExpired) => self.recover(&mut events, &mut shutdown).await,
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }

        self.cancel_watches().await;
        let status = self.status();
        info!(
            subtree = self.target.label(),
            mirrored_files = status.mirrored_files,
            events_applied = status.events_applied,
            write_failures = status.write_failures,
            watch_failures = status.watch_failures,
            "Mirror worker stopped"
        );
    }
}
