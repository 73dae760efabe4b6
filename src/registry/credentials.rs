// SPDX-License-Identifier: GPL-3.0-only
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

use crate::registry::error::RegistryError;
use crate::registry::models::{AuthType, RegistryConnectionConfig};
use crate::secrets::SecretResolver;

/// How a Kerberos principal obtains its ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KerberosSource {
    KeyTab(PathBuf),
    TicketCache,
    Password,
}

/// Authentication material for a secure registry connection
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub auth_type: AuthType,
    pub principal: String,
    pub secret: Option<Vec<u8>>,
    pub kerberos: Option<KerberosSource>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_type", &self.auth_type)
            .field("principal", &self.principal)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("kerberos", &self.kerberos)
            .finish()
    }
}

impl Credentials {
    /// Build the credentials a secure config asks for, or `None` for an insecure one
    pub async fn resolve(
        config: &RegistryConnectionConfig,
        secrets: &dyn SecretResolver,
    ) -> Result<Option<Self>, RegistryError> {
        if !config.secure {
            return Ok(None);
        }

        let invalid = |reason: &str| RegistryError::InvalidConfig {
            name: config.name.clone(),
            reason: reason.to_string(),
        };

        let principal = config
            .principal
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| invalid("secure registry requires a principal"))?;

        let credentials = match config.auth_type {
            AuthType::None => return Err(invalid("secure registry requires an authType")),
            AuthType::Digest => {
                let secret = resolve_alias(config, secrets)
                    .await?
                    .ok_or_else(|| invalid("Digest authentication requires a credentialAlias"))?;
                Credentials {
                    auth_type: AuthType::Digest,
                    principal,
                    secret: Some(secret),
                    kerberos: None,
                }
            }
            AuthType::Kerberos => {
                // keytab wins when both sources are enabled
                if config.use_key_tab {
                    let keytab = config
                        .keytab
                        .clone()
                        .ok_or_else(|| invalid("useKeyTab is set but no keytab is configured"))?;
                    if !keytab.is_file() {
                        return Err(invalid(&format!("keytab {} is not readable", keytab.display())));
                    }
                    Credentials {
                        auth_type: AuthType::Kerberos,
                        principal,
                        secret: None,
                        kerberos: Some(KerberosSource::KeyTab(keytab)),
                    }
                } else if config.use_ticket_cache {
                    Credentials {
                        auth_type: AuthType::Kerberos,
                        principal,
                        secret: None,
                        kerberos: Some(KerberosSource::TicketCache),
                    }
                } else {
                    let secret = resolve_alias(config, secrets).await?.ok_or_else(|| {
                        invalid("Kerberos requires useKeyTab, useTicketCache or a credentialAlias")
                    })?;
                    Credentials {
                        auth_type: AuthType::Kerberos,
                        principal,
                        secret: Some(secret),
                        kerberos: Some(KerberosSource::Password),
                    }
                }
            }
        };

        debug!(name = %config.name, auth_type = config.auth_type.as_str(), "Resolved registry credentials");
        Ok(Some(credentials))
    }
}

async fn resolve_alias(
    config: &RegistryConnectionConfig,
    secrets: &dyn SecretResolver,
) -> Result<Option<Vec<u8>>, RegistryError> {
    let Some(alias) = config.credential_alias.as_deref().filter(|a| !a.is_empty()) else {
        return Ok(None);
    };

    secrets
        .resolve_secret(alias)
        .await
        .map(Some)
        .map_err(|source| RegistryError::SecretResolution {
            alias: alias.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::StaticSecretResolver;
    use tempfile::NamedTempFile;

    fn secure_config(auth_type: AuthType) -> RegistryConnectionConfig {
        RegistryConnectionConfig {
            secure: true,
            auth_type,
            principal: Some("knox".to_string()),
            credential_alias: Some("zkCredential".to_string()),
            ..RegistryConnectionConfig::new("registry1", "InMemory", "local")
        }
    }

    #[tokio::test]
    async fn test_insecure_config_has_no_credentials() {
        let config = RegistryConnectionConfig::new("plain", "InMemory", "local");
        let secrets = StaticSecretResolver::new();

        assert!(Credentials::resolve(&config, &secrets).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_digest_resolves_secret() {
        let secrets = StaticSecretResolver::new().with_secret("zkCredential", b"pw");
        let credentials = Credentials::resolve(&secure_config(AuthType::Digest), &secrets)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(credentials.auth_type, AuthType::Digest);
        assert_eq!(credentials.principal, "knox");
        assert_eq!(credentials.secret.as_deref(), Some(&b"pw"[..]));
        assert!(!format!("{:?}", credentials).contains("pw\""));
    }

    #[tokio::test]
    async fn test_digest_missing_secret_is_fatal() {
        let secrets = StaticSecretResolver::new();
        let err = Credentials::resolve(&secure_config(AuthType::Digest), &secrets)
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::SecretResolution { ref alias, .. } if alias == "zkCredential"));
    }

    #[tokio::test]
    async fn test_secure_without_auth_type_is_invalid() {
        let secrets = StaticSecretResolver::new();
        let err = Credentials::resolve(&secure_config(AuthType::None), &secrets)
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_kerberos_keytab() {
        let keytab = NamedTempFile::new().unwrap();
        let mut config = secure_config(AuthType::Kerberos);
        config.keytab = Some(keytab.path().to_path_buf());
        config.use_key_tab = true;
        config.use_ticket_cache = true;

        let credentials = Credentials::resolve(&config, &StaticSecretResolver::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(credentials.kerberos, Some(KerberosSource::KeyTab(keytab.path().to_path_buf())));
        assert!(credentials.secret.is_none());
    }

    #[tokio::test]
    async fn test_kerberos_missing_keytab_is_invalid() {
        let mut config = secure_config(AuthType::Kerberos);
        config.keytab = Some(PathBuf::from("/nonexistent/registry.keytab"));
        config.use_key_tab = true;

        let err = Credentials::resolve(&config, &StaticSecretResolver::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_kerberos_ticket_cache() {
        let mut config = secure_config(AuthType::Kerberos);
        config.use_ticket_cache = true;

        let credentials = Credentials::resolve(&config, &StaticSecretResolver::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(credentials.kerberos, Some(KerberosSource::TicketCache));
    }

    #[tokio::test]
    async fn test_kerberos_keytab_path_alone_is_not_used() {
        let keytab = NamedTempFile::new().unwrap();
        let mut config = secure_config(AuthType::Kerberos);
        config.keytab = Some(keytab.path().to_path_buf());

        let secrets = StaticSecretResolver::new().with_secret("zkCredential", b"pw");
        let credentials = Credentials::resolve(&config, &secrets).await.unwrap().unwrap();
        assert_eq!(credentials.kerberos, Some(KerberosSource::Password));
        assert_eq!(credentials.secret.as_deref(), Some(&b"pw"[..]));

        config.use_ticket_cache = true;
        let credentials = Credentials::resolve(&config, &secrets).await.unwrap().unwrap();
        assert_eq!(credentials.kerberos, Some(KerberosSource::TicketCache));
    }
}
