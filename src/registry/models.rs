// SPDX-License-Identifier: GPL-3.0-only
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::registry::error::RegistryError;

/// Registry backend discriminator, matched against the `type` of a connection config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Shared directory tree, watched through the platform file notification API
    FileSystem,
    /// Process-local store, used for embedding and tests
    InMemory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::FileSystem => "FileSystem",
            BackendKind::InMemory => "InMemory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filesystem" => Ok(BackendKind::FileSystem),
            "inmemory" | "memory" => Ok(BackendKind::InMemory),
            _ => Err(RegistryError::UnsupportedBackend(s.to_string())),
        }
    }
}

/// Authentication scheme for a secure registry connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthType {
    #[default]
    None,
    Digest,
    Kerberos,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::None => "None",
            AuthType::Digest => "Digest",
            AuthType::Kerberos => "Kerberos",
        }
    }
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(AuthType::None),
            "digest" => Ok(AuthType::Digest),
            "kerberos" => Ok(AuthType::Kerberos),
            other => Err(format!("unknown auth type '{}'", other)),
        }
    }
}

/// One parsed registry connection definition
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistryConnectionConfig {
    /// Unique name the monitor selects the connection by
    pub name: String,

    /// Backend discriminator (see [`BackendKind`])
    pub registry_type: String,

    /// Backend-specific connection string
    pub address: String,

    /// Optional path prefix applied to every registry path
    pub namespace: Option<String>,

    pub secure: bool,
    pub auth_type: AuthType,
    pub principal: Option<String>,

    /// Alias looked up through the secret service for the connection secret
    pub credential_alias: Option<String>,

    pub keytab: Option<PathBuf>,
    pub use_key_tab: bool,
    pub use_ticket_cache: bool,
}

impl RegistryConnectionConfig {
    pub fn new(name: &str, registry_type: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            registry_type: registry_type.to_string(),
            address: address.to_string(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }
}

/// A leaf observed in the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNode {
    pub path: String,
    pub data: Vec<u8>,

    /// Opaque modification token supplied by the backend
    pub version: u64,
}

/// Notification delivered by a registry watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    ChildAdded(String),
    ChildRemoved(String),
    /// Payload of the named child changed
    DataChanged(String),
    /// The session was lost; previously registered watches can no longer be trusted
    SessionExpired,
}

pub type WatchSink = UnboundedSender<WatchEvent>;

/// Handle for cancelling a registered watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(Uuid);

impl WatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
