// SPDX-License-Identifier: GPL-3.0-only
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("Failed to read registry config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid registry config syntax: {0}")]
    Syntax(#[from] toml::de::Error),

    #[error("Malformed registry config: {0}")]
    Malformed(String),

    #[error("Registry entry {entry} is missing required field '{field}'")]
    MissingRequiredField { field: &'static str, entry: String },

    #[error("Duplicate registry name: {0}")]
    DuplicateName(String),

    #[error("Registry entry {entry} has invalid {field} '{value}'")]
    InvalidValue {
        entry: String,
        field: &'static str,
        value: String,
    },
}
