// SPDX-License-Identifier: GPL-3.0-only
mod config;
mod logging;
mod mirror;
mod monitor;
mod registry;
mod registry_config;
mod secrets;
mod utils;

#[cfg(test)]
mod test_helpers;

use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use config::Config;
use logging::setup_logging;
use monitor::RemoteConfigMonitor;
use registry::{ConnectionFactory, FileSystemBackend};
use secrets::{ChainedSecretResolver, EnvSecretResolver, SecretResolver, StaticSecretResolver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    setup_logging(&config.log_level, config.log_format)?;

    info!("Starting RemoteConfigDaemon v{}", env!("CARGO_PKG_VERSION"));

    let settings = config.monitor_settings();
    if settings.client_name.as_deref().is_none_or(str::is_empty) {
        warn!("No monitor client name configured, remote configuration monitoring is disabled");
        return Ok(());
    }

    // Secrets from the config file take precedence over the environment
    let secrets: Arc<dyn SecretResolver> = Arc::new(ChainedSecretResolver::new(vec![
        Arc::new(StaticSecretResolver::from_strings(&config.secrets)),
        Arc::new(EnvSecretResolver::default()),
    ]));

    let mut factory = ConnectionFactory::new(secrets).with_retry(config.retry_policy());
    factory.register(Arc::new(FileSystemBackend::new()));

    let mut monitor = RemoteConfigMonitor::new(settings, Arc::new(factory));
    monitor.start().await?;

    info!(
        providers = %config.providers_dir.display(),
        descriptors = %config.descriptors_dir.display(),
        "Mirroring remote configuration. Waiting for shutdown signal..."
    );

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal (Ctrl+C)");
        }
        Err(err) => {
            error!(error = %err, "Unable to listen for shutdown signal");
        }
    }

    info!("Initiating graceful shutdown...");
    monitor.stop().await;

    for status in monitor.status() {
        info!(
            remote_path = %status.remote_path,
            local_dir = %status.local_dir.display(),
            mirrored_files = status.mirrored_files,
            events_applied = status.events_applied,
            write_failures = status.write_failures,
            fetch_failures = status.fetch_failures,
            watch_failures = status.watch_failures,
            resyncs = status.resyncs,
            "Target summary"
        );
    }

    info!("Shutdown complete");
    Ok(())
}
