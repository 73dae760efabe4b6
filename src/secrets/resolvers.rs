// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::sync::Arc;
use tracing::debug;

use crate::secrets::traits::{SecretError, SecretResolver};

pub const ENV_SECRET_PREFIX: &str = "RCD_SECRET_";

/// Secrets held in memory, typically loaded from the `[secrets]` config table
#[derive(Default, Clone)]
pub struct StaticSecretResolver {
    secrets: HashMap<String, Vec<u8>>,
}

impl StaticSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_strings(secrets: &BTreeMap<String, String>) -> Self {
        Self {
            secrets: secrets
                .iter()
                .map(|(alias, value)| (alias.clone(), value.as_bytes().to_vec()))
                .collect(),
        }
    }

    pub fn with_secret(mut self, alias: &str, secret: &[u8]) -> Self {
        self.secrets.insert(alias.to_string(), secret.to_vec());
        self
    }
}

#[async_trait]
impl SecretResolver for StaticSecretResolver {
    async fn resolve_secret(&self, alias: &str) -> Result<Vec<u8>, SecretError> {
        self.secrets
            .get(alias)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(alias.to_string()))
    }
}

/// Looks secrets up in `RCD_SECRET_<ALIAS>` environment variables
#[derive(Debug, Clone)]
pub struct EnvSecretResolver {
    prefix: String,
}

impl EnvSecretResolver {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    /// Environment variable consulted for an alias
    pub fn variable_for(&self, alias: &str) -> String {
        let suffix: String = alias
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}{}", self.prefix, suffix)
    }

    fn secret_from(alias: &str, variable: &str, value: Option<OsString>) -> Result<Vec<u8>, SecretError> {
        match value {
            Some(value) if value.is_empty() => Err(SecretError::Lookup {
                alias: alias.to_string(),
                reason: format!("{} is empty", variable),
            }),
            Some(value) => Ok(value.into_encoded_bytes()),
            None => Err(SecretError::NotFound(alias.to_string())),
        }
    }
}

impl Default for EnvSecretResolver {
    fn default() -> Self {
        Self::new(ENV_SECRET_PREFIX)
    }
}

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve_secret(&self, alias: &str) -> Result<Vec<u8>, SecretError> {
        let variable = self.variable_for(alias);
        Self::secret_from(alias, &variable, std::env::var_os(&variable))
    }
}

/// Tries each resolver in order; the first hit wins
#[derive(Default, Clone)]
pub struct ChainedSecretResolver {
    resolvers: Vec<Arc<dyn SecretResolver>>,
}

impl ChainedSecretResolver {
    pub fn new(resolvers: Vec<Arc<dyn SecretResolver>>) -> Self {
        Self { resolvers }
    }
}

#[async_trait]
impl SecretResolver for ChainedSecretResolver {
    async fn resolve_secret(&self, alias: &str) -> Result<Vec<u8>, SecretError> {
        for resolver in &self.resolvers {
            match resolver.resolve_secret(alias).await {
                Ok(secret) => return Ok(secret),
                Err(SecretError::NotFound(_)) => continue,
                Err(e) => {
                    debug!(alias = %alias, error = %e, "Secret resolver failed");
                    return Err(e);
                }
            }
        }
        Err(SecretError::NotFound(alias.to_string()))
    }
}
