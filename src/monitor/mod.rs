// SPDX-License-Identifier: GPL-3.0-only
pub mod error;
pub mod service;
pub mod settings;
pub mod target;
pub mod worker;

pub use error::MonitorError;
pub use service::{MonitorState, RemoteConfigMonitor};
pub use settings::MonitorSettings;
pub use target::{MonitorTarget, TargetStatus};
