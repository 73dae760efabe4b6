// SPDX-License-Identifier: GPL-3.0-only
use std::path::PathBuf;

use crate::secrets::SecretError;

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("Unsupported registry backend type: {0}")]
    UnsupportedBackend(String),

    #[error("Invalid registry configuration '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("Failed to resolve secret for alias '{alias}': {source}")]
    SecretResolution {
        alias: String,
        #[source]
        source: SecretError,
    },

    #[error("Failed to connect to registry at {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("Registry authentication failed: {0}")]
    AuthFailed(String),

    #[error("No such registry node: {0}")]
    NoNode(String),

    #[error("Registry node already exists: {0}")]
    NodeExists(String),

    #[error("Registry node has children: {0}")]
    NotEmpty(String),

    #[error("Invalid registry path: {0}")]
    InvalidPath(String),

    #[error("Registry connection is closed")]
    Closed,

    #[error("Registry I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to register watch: {0}")]
    Watch(#[from] notify::Error),
}

impl RegistryError {
    /// Whether a failed connect attempt is worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::Connect { .. })
    }
}
