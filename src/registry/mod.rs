// SPDX-License-Identifier: GPL-3.0-only
pub mod credentials;
pub mod error;
pub mod factory;
pub mod filesystem;
pub mod memory;
pub mod models;
pub mod path;
pub mod traits;

pub use error::RegistryError;
pub use factory::{ConnectionFactory, RetryPolicy};
pub use filesystem::FileSystemBackend;
pub use memory::{InMemoryBackend, InMemoryStore};
pub use models::{AuthType, RegistryConnectionConfig, WatchEvent, WatchId, WatchSink};
pub use traits::RegistryConnection;
