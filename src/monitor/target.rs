// SPDX-License-Identifier: GPL-3.0-only
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::registry::path;

pub const CONFIG_ROOT: &str = "/config";
pub const PROVIDERS_PATH: &str = "/config/shared-providers";
pub const DESCRIPTORS_PATH: &str = "/config/descriptors";

/// A registry subtree mirrored into a local directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorTarget {
    pub remote_path: String,
    pub local_dir: PathBuf,
}

impl MonitorTarget {
    pub fn new(remote_path: &str, local_dir: PathBuf) -> Self {
        Self {
            remote_path: remote_path.to_string(),
            local_dir,
        }
    }

    pub fn providers(local_dir: PathBuf) -> Self {
        Self::new(PROVIDERS_PATH, local_dir)
    }

    pub fn descriptors(local_dir: PathBuf) -> Self {
        Self::new(DESCRIPTORS_PATH, local_dir)
    }

    /// Short name used in logs
    pub fn label(&self) -> &str {
        path::name(&self.remote_path)
    }

    pub fn node_path(&self, name: &str) -> String {
        path::join(&self.remote_path, name)
    }
}

/// Counters describing how a target's mirror has been maintained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetStatus {
    pub remote_path: String,
    pub local_dir: PathBuf,
    pub mirrored_files: usize,
    pub events_applied: u64,
    pub write_failures: u64,
    pub fetch_failures: u64,
    pub watch_failures: u64,
    pub resyncs: u64,
    pub last_resync: Option<DateTime<Utc>>,
    pub resync_in_progress: bool,
}

impl TargetStatus {
    pub fn new(target: &MonitorTarget) -> Self {
        Self {
            remote_path: target.remote_path.clone(),
            local_dir: target.local_dir.clone(),
            mirrored_files: 0,
            events_applied: 0,
            write_failures: 0,
            fetch_failures: 0,
            watch_failures: 0,
            resyncs: 0,
            last_resync: None,
            resync_in_progress: false,
        }
    }
}
