// SPDX-License-Identifier: GPL-3.0-only
//! Helpers for slash-separated registry paths.
//!
//! Registry paths are absolute (`/config/descriptors`), never end with a slash
//! (except the root itself) and never contain empty, `.` or `..` segments.

use crate::registry::error::RegistryError;

pub const ROOT: &str = "/";

/// Validate and normalize an absolute registry path
pub fn normalize(path: &str) -> Result<String, RegistryError> {
    if !path.starts_with('/') {
        return Err(RegistryError::InvalidPath(path.to_string()));
    }

    let segments = segments(path)?;
    if segments.is_empty() {
        return Ok(ROOT.to_string());
    }

    Ok(format!("/{}", segments.join("/")))
}

/// Split a path into its segments, rejecting traversal
pub fn segments(path: &str) -> Result<Vec<&str>, RegistryError> {
    let mut out = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" => continue,
            "." | ".." => return Err(RegistryError::InvalidPath(path.to_string())),
            s if s.contains('\0') || s.contains('\\') => {
                return Err(RegistryError::InvalidPath(path.to_string()));
            }
            s => out.push(s),
        }
    }
    Ok(out)
}

/// Join a child name onto a parent path
pub fn join(parent: &str, child: &str) -> String {
    let child = child.trim_matches('/');
    if parent == ROOT || parent.is_empty() {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), child)
    }
}

/// Parent of a path; the root is its own parent
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT,
        Some(idx) => &path[..idx],
    }
}

/// Last segment of a path
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Apply an optional namespace prefix to a registry path
pub fn with_namespace(namespace: Option<&str>, path: &str) -> Result<String, RegistryError> {
    let path = normalize(path)?;
    match namespace.map(|ns| ns.trim_matches('/')).filter(|ns| !ns.is_empty()) {
        None => Ok(path),
        Some(ns) => {
            let root = normalize(&format!("/{}", ns))?;
            if path == ROOT {
                Ok(root)
            } else {
                Ok(format!("{}{}", root, path))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("/config//descriptors/").unwrap(), "/config/descriptors");
        assert!(normalize("config").is_err());
        assert!(normalize("/config/../etc").is_err());
    }

    #[test]
    fn test_join_and_parent() {
        assert_eq!(join("/", "config"), "/config");
        assert_eq!(join("/config", "descriptors"), "/config/descriptors");
        assert_eq!(parent("/config/descriptors"), "/config");
        assert_eq!(parent("/config"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(name("/config/descriptors/test1.json"), "test1.json");
    }

    #[test]
    fn test_with_namespace() {
        assert_eq!(with_namespace(None, "/config").unwrap(), "/config");
        assert_eq!(with_namespace(Some("knox"), "/config").unwrap(), "/knox/config");
        assert_eq!(with_namespace(Some("/knox/"), "/").unwrap(), "/knox");
        assert_eq!(with_namespace(Some(""), "/config").unwrap(), "/config");
        assert!(with_namespace(Some(".."), "/config").is_err());
    }
}
