// SPDX-License-Identifier: GPL-3.0-only
use crate::monitor::MonitorState;
use crate::registry::RegistryError;
use crate::registry_config::ParseError;

#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
    #[error("Cannot {operation} a monitor in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: MonitorState,
    },

    #[error("No remote configuration monitor client name configured")]
    NoClientConfigured,

    #[error("No registry configuration named '{0}'")]
    UnknownRegistry(String),

    #[error("Invalid registry configuration: {0}")]
    Parse(#[from] ParseError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
