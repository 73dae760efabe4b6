// SPDX-License-Identifier: GPL-3.0-only
use std::path::{Component, Path};

/// Maximum length of a single file name on common filesystems
pub const MAX_NAME_LEN: usize = 255;

/// Validate that a registry node name can be used as a file name in a mirror directory
///
/// Rejects anything that could escape the directory or collide with the
/// writer's hidden staging files: path separators, `.`/`..`, NUL bytes and
/// names starting with a dot.
pub fn validate_node_name(name: &str) -> Result<&str, String> {
    if name.is_empty() {
        return Err("name is empty".to_string());
    }

    if name.len() > MAX_NAME_LEN {
        return Err(format!("name too long (max {} bytes)", MAX_NAME_LEN));
    }

    if name.starts_with('.') {
        return Err("name cannot start with '.'".to_string());
    }

    if name.contains(['/', '\\', '\0']) {
        return Err("name contains a path separator or NUL".to_string());
    }

    // must be exactly one normal path component
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err("name is not a plain file name".to_string()),
    }
}

/// Whether a directory entry is a staging file left by an atomic write
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert_eq!(validate_node_name("providers-config1.xml").unwrap(), "providers-config1.xml");
        assert!(validate_node_name("test1.json").is_ok());
        assert!(validate_node_name("sandbox providers.xml").is_ok());
    }

    #[test]
    fn test_rejects_traversal_and_separators() {
        assert!(validate_node_name("").is_err());
        assert!(validate_node_name(".").is_err());
        assert!(validate_node_name("..").is_err());
        assert!(validate_node_name("../etc/passwd").is_err());
        assert!(validate_node_name("a/b").is_err());
        assert!(validate_node_name("a\\b").is_err());
        assert!(validate_node_name("a\0b").is_err());
    }

    #[test]
    fn test_rejects_hidden_and_long_names() {
        assert!(validate_node_name(".hidden").is_err());
        assert!(validate_node_name(&"a".repeat(256)).is_err());
        assert!(validate_node_name(&"a".repeat(255)).is_ok());
    }

    #[test]
    fn test_staging_names() {
        assert!(is_staging_name(".providers.xml.tmp"));
        assert!(!is_staging_name("providers.xml"));
    }
}
