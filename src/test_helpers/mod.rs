// SPDX-License-Identifier: GPL-3.0-only
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::monitor::{MonitorSettings, MonitorTarget};
use crate::registry::{AuthType, ConnectionFactory, InMemoryBackend, InMemoryStore, RegistryConnectionConfig, RetryPolicy};
use crate::registry_config::parser::*;
use crate::secrets::StaticSecretResolver;

pub const MONITOR_CLIENT: &str = "remoteConfigMonitorClient";

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a temporary directory for tests
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::TempDir::new().expect("Failed to create temp directory")
}

/// Create a test configuration mirroring into `dir`
pub fn create_test_config(dir: &Path) -> Config {
    Config {
        providers_dir: dir.join("shared-providers"),
        descriptors_dir: dir.join("descriptors"),
        monitor_client_name: Some(MONITOR_CLIENT.to_string()),
        connect_retries: 2,
        connect_backoff_ms: 1,
        log_level: "error".to_string(), // Reduce log noise in tests
        ..Config::default()
    }
}

/// Factory serving the given in-memory store with fast retries
pub fn memory_factory(store: &InMemoryStore, secrets: StaticSecretResolver) -> Arc<ConnectionFactory> {
    let mut factory = ConnectionFactory::new(Arc::new(secrets))
        .with_retry(RetryPolicy::new(3, Duration::from_millis(1)));
    factory.register(Arc::new(InMemoryBackend::new(store.clone())));
    Arc::new(factory)
}

/// Monitor settings for [`MONITOR_CLIENT`] defined inline as `definition`
pub fn monitor_settings(definition: &str, providers_dir: &Path, descriptors_dir: &Path) -> MonitorSettings {
    let mut inline_registries = BTreeMap::new();
    inline_registries.insert(MONITOR_CLIENT.to_string(), definition.to_string());

    MonitorSettings {
        client_name: Some(MONITOR_CLIENT.to_string()),
        inline_registries,
        registries_file: None,
        targets: vec![
            MonitorTarget::providers(providers_dir.to_path_buf()),
            MonitorTarget::descriptors(descriptors_dir.to_path_buf()),
        ],
    }
}

/// Render connection configs as a `[[registry]]` file
pub fn registries_toml(configs: &[RegistryConnectionConfig]) -> String {
    let quote = |value: &str| toml::Value::String(value.to_string()).to_string();
    let flag = |value: bool| quote(if value { "true" } else { "false" });

    let mut out = String::new();
    for config in configs {
        out.push_str("[[registry]]\n");
        let mut field = |key: &str, value: String| out.push_str(&format!("{} = {}\n", key, value));

        field(PROPERTY_NAME, quote(&config.name));
        field(PROPERTY_TYPE, quote(&config.registry_type));
        field(PROPERTY_ADDRESS, quote(&config.address));
        if let Some(ref namespace) = config.namespace {
            field(PROPERTY_NAMESPACE, quote(namespace));
        }
        field(PROPERTY_SECURE, flag(config.secure));
        if config.auth_type != AuthType::None {
            field(PROPERTY_AUTH_TYPE, quote(config.auth_type.as_str()));
        }
        if let Some(ref principal) = config.principal {
            field(PROPERTY_PRINCIPAL, quote(principal));
        }
        if let Some(ref alias) = config.credential_alias {
            field(PROPERTY_CRED_ALIAS, quote(alias));
        }
        if let Some(ref keytab) = config.keytab {
            field(PROPERTY_KEYTAB, quote(&keytab.to_string_lossy()));
        }
        field(PROPERTY_USE_KEYTAB, flag(config.use_key_tab));
        field(PROPERTY_USE_TICKET_CACHE, flag(config.use_ticket_cache));
        out.push('\n');
    }
    out
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

pub async fn wait_for_content(path: &Path, expected: &[u8]) -> bool {
    wait_until(WAIT_TIMEOUT, || std::fs::read(path).is_ok_and(|bytes| bytes == expected)).await
}

pub async fn wait_for_absence(path: &Path) -> bool {
    wait_until(WAIT_TIMEOUT, || !path.exists()).await
}
