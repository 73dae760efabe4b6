// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
pub enum SecretError {
    #[error("No secret found for alias '{0}'")]
    NotFound(String),

    #[error("Secret lookup for alias '{alias}' failed: {reason}")]
    Lookup { alias: String, reason: String },
}

/// Resolves credential aliases to secret material
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve_secret(&self, alias: &str) -> Result<Vec<u8>, SecretError>;
}
