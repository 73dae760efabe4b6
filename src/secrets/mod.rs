// SPDX-License-Identifier: GPL-3.0-only
pub mod traits;
pub mod resolvers;

pub use traits::{SecretError, SecretResolver};
pub use resolvers::{ChainedSecretResolver, EnvSecretResolver, StaticSecretResolver};
