// SPDX-License-Identifier: GPL-3.0-only
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

use crate::monitor::{MonitorError, MonitorTarget};
use crate::registry::RegistryConnectionConfig;
use crate::registry_config;

/// Everything the monitor needs to know about where to connect and what to mirror
#[derive(Debug, Clone, Default)]
pub struct MonitorSettings {
    pub client_name: Option<String>,
    pub inline_registries: BTreeMap<String, String>,
    pub registries_file: Option<PathBuf>,
    pub targets: Vec<MonitorTarget>,
}

impl MonitorSettings {
    /// Find the connection config for the monitor client
    ///
    /// Inline definitions take precedence over entries in the registries file.
    pub fn resolve_registry(&self) -> Result<RegistryConnectionConfig, MonitorError> {
        let name = self
            .client_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or(MonitorError::NoClientConfigured)?;

        if let Some(definition) = self.inline_registries.get(name) {
            debug!(name = %name, "Using inline registry definition");
            return Ok(registry_config::parse_inline(name, definition)?);
        }

        if let Some(ref file) = self.registries_file {
            let configs = registry_config::parse(file)?;
            if let Some(config) = configs.into_iter().find(|c| c.name == name) {
                debug!(name = %name, file = %file.display(), "Using registry definition from file");
                return Ok(config);
            }
        }

        Err(MonitorError::UnknownRegistry(name.to_string()))
    }
}
