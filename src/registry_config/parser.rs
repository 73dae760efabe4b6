// SPDX-License-Identifier: GPL-3.0-only
//! Parser for declarative registry connection definitions.
//!
//! A registries file is TOML holding an array of `[[registry]]` tables:
//!
//! ```toml
//! [[registry]]
//! type = "FileSystem"
//! name = "sandbox"
//! address = "/srv/registry"
//! secure = "true"
//! authType = "Digest"
//! principal = "gateway"
//! credentialAlias = "registry.password"
//! ```
//!
//! The same keys are accepted inline as `type=FileSystem;address=/srv/registry`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::registry::models::{AuthType, RegistryConnectionConfig};
use crate::registry_config::error::ParseError;

pub const PROPERTY_TYPE: &str = "type";
pub const PROPERTY_NAME: &str = "name";
pub const PROPERTY_ADDRESS: &str = "address";
pub const PROPERTY_NAMESPACE: &str = "namespace";
pub const PROPERTY_SECURE: &str = "secure";
pub const PROPERTY_AUTH_TYPE: &str = "authType";
pub const PROPERTY_PRINCIPAL: &str = "principal";
pub const PROPERTY_CRED_ALIAS: &str = "credentialAlias";
pub const PROPERTY_KEYTAB: &str = "keytab";
pub const PROPERTY_USE_KEYTAB: &str = "useKeyTab";
pub const PROPERTY_USE_TICKET_CACHE: &str = "useTicketCache";

const REGISTRY_TABLE: &str = "registry";

type Properties = BTreeMap<String, String>;

/// Parse a registries file, preserving declaration order
pub fn parse(path: &Path) -> Result<Vec<RegistryConnectionConfig>, ParseError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let configs = parse_str(&contents)?;
    debug!(path = %path.display(), count = configs.len(), "Parsed registry configurations");
    Ok(configs)
}

pub fn parse_str(contents: &str) -> Result<Vec<RegistryConnectionConfig>, ParseError> {
    let document: toml::Table = toml::from_str(contents)?;

    let entries = match document.get(REGISTRY_TABLE) {
        None => return Ok(Vec::new()),
        Some(toml::Value::Array(entries)) => entries,
        Some(_) => {
            return Err(ParseError::Malformed(format!(
                "'{}' must be an array of tables",
                REGISTRY_TABLE
            )));
        }
    };

    let mut seen = HashSet::new();
    let mut configs = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let table = entry.as_table().ok_or_else(|| {
            ParseError::Malformed(format!("registry entry #{} is not a table", index + 1))
        })?;

        let config = build_config(table_properties(table), &format!("#{}", index + 1))?;
        if !seen.insert(config.name.clone()) {
            return Err(ParseError::DuplicateName(config.name));
        }
        configs.push(config);
    }
    Ok(configs)
}

/// Parse an inline `key=value;key=value` definition registered under `name`
pub fn parse_inline(name: &str, definition: &str) -> Result<RegistryConnectionConfig, ParseError> {
    let mut properties = Properties::new();
    properties.insert(PROPERTY_NAME.to_string(), name.to_string());

    for pair in definition.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            ParseError::Malformed(format!("registry '{}': expected key=value, got '{}'", name, pair))
        })?;
        properties.insert(key.trim().to_string(), value.trim().to_string());
    }

    build_config(properties, name)
}

fn table_properties(table: &toml::Table) -> Properties {
    table
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                toml::Value::String(s) => s.clone(),
                toml::Value::Boolean(b) => b.to_string(),
                toml::Value::Integer(i) => i.to_string(),
                _ => return None,
            };
            Some((key.clone(), text))
        })
        .collect()
}

fn build_config(mut props: Properties, position: &str) -> Result<RegistryConnectionConfig, ParseError> {
    let name = optional(&mut props, PROPERTY_NAME);
    let entry = name.clone().unwrap_or_else(|| position.to_string());

    let required = |value: Option<String>, field: &'static str| {
        value.ok_or_else(|| ParseError::MissingRequiredField {
            field,
            entry: entry.clone(),
        })
    };

    let name = required(name, PROPERTY_NAME)?;
    let registry_type = required(optional(&mut props, PROPERTY_TYPE), PROPERTY_TYPE)?;
    let address = required(optional(&mut props, PROPERTY_ADDRESS), PROPERTY_ADDRESS)?;

    let auth_type = match optional(&mut props, PROPERTY_AUTH_TYPE) {
        None => AuthType::None,
        Some(value) => value.parse().map_err(|_| ParseError::InvalidValue {
            entry: entry.clone(),
            field: PROPERTY_AUTH_TYPE,
            value,
        })?,
    };

    let secure = flag(&mut props, PROPERTY_SECURE, &entry)?;
    if secure && auth_type == AuthType::None {
        return Err(ParseError::InvalidValue {
            entry,
            field: PROPERTY_AUTH_TYPE,
            value: "<unset>".to_string(),
        });
    }

    let config = RegistryConnectionConfig {
        namespace: optional(&mut props, PROPERTY_NAMESPACE),
        secure,
        auth_type,
        principal: optional(&mut props, PROPERTY_PRINCIPAL),
        credential_alias: optional(&mut props, PROPERTY_CRED_ALIAS),
        keytab: optional(&mut props, PROPERTY_KEYTAB).map(PathBuf::from),
        use_key_tab: flag(&mut props, PROPERTY_USE_KEYTAB, &entry)?,
        use_ticket_cache: flag(&mut props, PROPERTY_USE_TICKET_CACHE, &entry)?,
        name,
        registry_type,
        address,
    };

    if !props.is_empty() {
        debug!(entry = %config.name, ignored = ?props.keys().collect::<Vec<_>>(), "Ignoring unknown registry properties");
    }
    Ok(config)
}

fn optional(props: &mut Properties, key: &str) -> Option<String> {
    props.remove(key).filter(|v| !v.trim().is_empty())
}

fn flag(props: &mut Properties, key: &'static str, entry: &str) -> Result<bool, ParseError> {
    match optional(props, key) {
        None => Ok(false),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(ParseError::InvalidValue {
                entry: entry.to_string(),
                field: key,
                value,
            }),
        },
    }
}
