// SPDX-License-Identifier: GPL-3.0-only
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::registry::credentials::Credentials;
use crate::registry::error::RegistryError;
use crate::registry::models::{BackendKind, RegistryConnectionConfig};
use crate::registry::traits::{BackendFactory, RegistryConnection};
use crate::secrets::SecretResolver;

/// Bounded exponential backoff for connect attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Connects to registries by dispatching on the configured backend type
pub struct ConnectionFactory {
    backends: HashMap<BackendKind, Arc<dyn BackendFactory>>,
    secrets: Arc<dyn SecretResolver>,
    retry: RetryPolicy,
}

impl ConnectionFactory {
    pub fn new(secrets: Arc<dyn SecretResolver>) -> Self {
        Self {
            backends: HashMap::new(),
            secrets,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Register a backend, replacing any previous one of the same kind
    pub fn register(&mut self, backend: Arc<dyn BackendFactory>) {
        info!(backend = %backend.kind(), "Registered registry backend");
        self.backends.insert(backend.kind(), backend);
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Open a connection, resolving credentials first and retrying transient failures
    pub async fn connect(
        &self,
        config: &RegistryConnectionConfig,
    ) -> Result<Arc<dyn RegistryConnection>, RegistryError> {
        let kind: BackendKind = config.registry_type.parse()?;
        let backend = self
            .backends
            .get(&kind)
            .ok_or_else(|| RegistryError::UnsupportedBackend(config.registry_type.clone()))?;

        let credentials = Credentials::resolve(config, self.secrets.as_ref()).await?;

        let mut attempt = 0;
        loop {
            match backend.connect(config, credentials.clone()).await {
                Ok(connection) => {
                    info!(name = %config.name, backend = %kind, attempts = attempt + 1, "Registry connection established");
                    return Ok(connection);
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        name = %config.name,
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Registry connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
