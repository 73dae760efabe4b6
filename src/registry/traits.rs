// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::registry::credentials::Credentials;
use crate::registry::error::RegistryError;
use crate::registry::models::{BackendKind, RegistryConnectionConfig, RemoteNode, WatchId, WatchSink};

/// A live connection to a hierarchical configuration registry
#[async_trait]
pub trait RegistryConnection: Send + Sync {
    /// Check whether a node exists
    async fn exists(&self, path: &str) -> Result<bool, RegistryError>;

    /// Fetch the payload of a node
    async fn get_data(&self, path: &str) -> Result<RemoteNode, RegistryError>;

    /// List the names of the direct children of a node
    async fn list_children(&self, path: &str) -> Result<BTreeSet<String>, RegistryError>;

    /// Create a node and any missing parents; existing nodes are left untouched
    async fn create_path(&self, path: &str, initial_data: Option<&[u8]>) -> Result<(), RegistryError>;

    /// Deliver `ChildAdded`/`ChildRemoved` for the children of `path` until cancelled
    async fn watch_children(&self, path: &str, sink: WatchSink) -> Result<WatchId, RegistryError>;

    /// Deliver `DataChanged` for `path` until cancelled
    async fn watch_data(&self, path: &str, sink: WatchSink) -> Result<WatchId, RegistryError>;

    async fn cancel_watch(&self, id: WatchId) -> Result<(), RegistryError>;

    /// Cancel all watches and release the connection
    async fn close(&self) -> Result<(), RegistryError>;
}

/// Creates connections for one backend kind
#[async_trait]
pub trait BackendFactory: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Open a connection; credentials are already resolved when the config is secure
    async fn connect(
        &self,
        config: &RegistryConnectionConfig,
        credentials: Option<Credentials>,
    ) -> Result<Arc<dyn RegistryConnection>, RegistryError>;
}
