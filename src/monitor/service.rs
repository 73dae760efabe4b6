// SPDX-License-Identifier: GPL-3.0-only
use futures_util::future::join_all;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::monitor::worker::TargetWorker;
use crate::monitor::{MonitorError, MonitorSettings, TargetStatus};
use crate::registry::{ConnectionFactory, RegistryConnection, WatchEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    New,
    Running,
    Stopped,
}

struct Running {
    connection: Arc<dyn RegistryConnection>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

/// Mirrors the registry's provider and descriptor subtrees into local directories
///
/// A monitor runs at most once: `New -> Running -> Stopped`. A failed start
/// leaves it in `New` so it can be retried.
pub struct RemoteConfigMonitor {
    settings: MonitorSettings,
    factory: Arc<ConnectionFactory>,
    state: MonitorState,
    running: Option<Running>,
    statuses: Vec<Arc<Mutex<TargetStatus>>>,
}

impl RemoteConfigMonitor {
    pub fn new(settings: MonitorSettings, factory: Arc<ConnectionFactory>) -> Self {
        Self {
            settings,
            factory,
            state: MonitorState::New,
            running: None,
            statuses: Vec::new(),
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Connect, reconcile every target and begin applying registry events
    ///
    /// Returns once the initial reconciliation is complete, so the local
    /// directories reflect the registry when this succeeds.
    pub async fn start(&mut self) -> Result<(), MonitorError> {
        if self.state != MonitorState::New {
            return Err(MonitorError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }

        let config = self.settings.resolve_registry()?;
        info!(
            client = %config.name,
            backend = %config.registry_type,
            address = %config.address,
            "Starting remote configuration monitor"
        );

        let connection = self.factory.connect(&config).await?;
        let retry = self.factory.retry_policy();

        let mut prepared: Vec<(TargetWorker, mpsc::UnboundedReceiver<WatchEvent>)> = Vec::new();
        for target in &self.settings.targets {
            let (sink, events) = mpsc::unbounded_channel();
            let mut worker = TargetWorker::new(target.clone(), Arc::clone(&connection), sink, retry);

            if let Err(e) = worker.resync().await {
                error!(subtree = target.label(), error = %e, "Initial reconciliation failed");
                worker.cancel_watches().await;
                for (mut started, _) in prepared {
                    started.cancel_watches().await;
                }
                if let Err(close_err) = connection.close().await {
                    warn!(error = %close_err, "Failed to close registry connection");
                }
                return Err(e.into());
            }
            prepared.push((worker, events));
        }

        let (shutdown, _) = watch::channel(false);
        let mut workers = Vec::with_capacity(prepared.len());
        self.statuses.clear();
        for (worker, events) in prepared {
            self.statuses.push(worker.status_handle());
            workers.push(tokio::spawn(worker.run(events, shutdown.subscribe())));
        }

        info!(targets = workers.len(), "Remote configuration monitor running");
        self.running = Some(Running {
            connection,
            shutdown,
            workers,
        });
        self.state = MonitorState::Running;
        Ok(())
    }

    /// Stop applying events, wait for in-flight work and release the connection
    ///
    /// Local files are left in place. Stopping a monitor that is not running
    /// does nothing.
    pub async fn stop(&mut self) {
        if self.state != MonitorState::Running {
            debug!(state = ?self.state, "Stop requested for a monitor that is not running");
            return;
        }

        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(true);
            for result in join_all(running.workers).await {
                if let Err(e) = result {
                    error!(error = %e, "Mirror worker terminated abnormally");
                }
            }
            if let Err(e) = running.connection.close().await {
                warn!(error = %e, "Failed to close registry connection");
            }
        }

        self.state = MonitorState::Stopped;
        info!("Remote configuration monitor stopped");
    }

    /// Snapshot of every target's counters, in target order
    pub fn status(&self) -> Vec<TargetStatus> {
        self.statuses
            .iter()
            .map(|s| s.lock().unwrap_or_else(|p| p.into_inner()).clone())
            .collect()
    }
}

impl Drop for RemoteConfigMonitor {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(true);
        }
    }
}
