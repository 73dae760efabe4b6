// SPDX-License-Identifier: GPL-3.0-only
use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::utils::{is_staging_name, validate_node_name};

#[derive(thiserror::Error, Debug)]
pub enum MirrorError {
    #[error("Invalid mirror file name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Mirror I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Mirror task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> MirrorError + '_ {
    move |source| MirrorError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Result of a successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    /// The file already held exactly these bytes
    Unchanged,
}

/// Atomically replace `path` with `data`
///
/// The bytes are staged in a hidden temporary file in the same directory and
/// renamed over the target, so concurrent readers see either the old or the
/// new content in full. Missing parent directories are created. On failure the
/// existing file is left untouched and the staging file is removed.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<WriteOutcome, MirrorError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir).map_err(io_error(dir))?;

    let existing = match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(io_error(path)(e)),
    };
    if existing.as_deref() == Some(data) {
        return Ok(WriteOutcome::Unchanged);
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("mirror");
    let mut staged = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(io_error(dir))?;

    staged.write_all(data).map_err(io_error(staged.path()))?;
    staged.as_file().sync_all().map_err(io_error(staged.path()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // staging files are created 0600; mirrored files must stay readable by consumers
        let mode = fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o7777)
            .unwrap_or(0o644);
        staged
            .as_file()
            .set_permissions(fs::Permissions::from_mode(mode))
            .map_err(io_error(staged.path()))?;
    }

    staged.persist(path).map_err(|e| io_error(path)(e.error))?;

    Ok(if existing.is_some() {
        WriteOutcome::Updated
    } else {
        WriteOutcome::Created
    })
}

/// Delete `path` if present; returns whether a file was removed
pub fn remove_if_exists(path: &Path) -> Result<bool, MirrorError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error(path)(e)),
    }
}

/// Writes registry payloads into one local mirror directory
#[derive(Debug, Clone)]
pub struct MirrorWriter {
    dir: PathBuf,
}

impl MirrorWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Local path for a node name, rejecting names that could escape the directory
    pub fn path_for(&self, name: &str) -> Result<PathBuf, MirrorError> {
        validate_node_name(name)
            .map(|n| self.dir.join(n))
            .map_err(|reason| MirrorError::InvalidName {
                name: name.to_string(),
                reason,
            })
    }

    pub async fn write(&self, name: &str, data: Vec<u8>) -> Result<WriteOutcome, MirrorError> {
        let path = self.path_for(name)?;
        let outcome = tokio::task::spawn_blocking(move || write_atomic(&path, &data)).await??;
        match outcome {
            WriteOutcome::Unchanged => debug!(dir = %self.dir.display(), name = %name, "Mirror file already up to date"),
            _ => info!(dir = %self.dir.display(), name = %name, outcome = ?outcome, "Wrote mirror file"),
        }
        Ok(outcome)
    }

    pub async fn remove(&self, name: &str) -> Result<bool, MirrorError> {
        let path = self.path_for(name)?;
        let removed = tokio::task::spawn_blocking(move || remove_if_exists(&path)).await??;
        if removed {
            info!(dir = %self.dir.display(), name = %name, "Removed mirror file");
        }
        Ok(removed)
    }

    /// Names of the mirrored files currently in the directory
    pub async fn list(&self) -> Result<BTreeSet<String>, MirrorError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(io_error(&self.dir)(e)),
        };

        let mut names = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&self.dir))? {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if let Some(name) = entry.file_name().to_str() {
                if is_file && !is_staging_name(name) {
                    names.insert(name.to_string());
                }
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("conf/shared-providers/providers.xml");

        assert_eq!(write_atomic(&path, b"<gateway/>").unwrap(), WriteOutcome::Created);
        assert_eq!(fs::read(&path).unwrap(), b"<gateway/>");
    }

    #[test]
    fn test_write_atomic_update_and_unchanged() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test1.json");

        write_atomic(&path, b"one").unwrap();
        assert_eq!(write_atomic(&path, b"two").unwrap(), WriteOutcome::Updated);
        assert_eq!(write_atomic(&path, b"two").unwrap(), WriteOutcome::Unchanged);
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_leaves_file_readable() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test1.json");

        write_atomic(&path, b"{}").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_failed_write_leaves_no_staging_files() {
        let temp = TempDir::new().unwrap();
        // a directory in the way of the target file
        let target = temp.path().join("blocked");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("inner"), b"keep").unwrap();

        assert!(matches!(write_atomic(&target, b"data"), Err(MirrorError::Io { .. })));
        assert_eq!(fs::read(target.join("inner")).unwrap(), b"keep");

        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_remove_if_exists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gone.xml");
        fs::write(&path, b"x").unwrap();

        assert!(remove_if_exists(&path).unwrap());
        assert!(!remove_if_exists(&path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_readers_never_see_partial_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("big.xml");
        let first = vec![b'a'; 256 * 1024];
        let second = vec![b'b'; 128 * 1024];
        write_atomic(&path, &first).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let (path, first, second, done) = (path.clone(), first.clone(), second.clone(), Arc::clone(&done));
            std::thread::spawn(move || {
                let mut reads = 0;
                while !done.load(Ordering::SeqCst) {
                    let content = fs::read(&path).unwrap();
                    assert!(content == first || content == second, "observed a partial write");
                    reads += 1;
                }
                reads
            })
        };

        for i in 0..100 {
            let data = if i % 2 == 0 { &second } else { &first };
            write_atomic(&path, data).unwrap();
        }
        done.store(true, Ordering::SeqCst);
        assert!(reader.join().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_mirror_writer_roundtrip() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("descriptors");
        let writer = MirrorWriter::new(dir.clone());

        assert!(writer.list().await.unwrap().is_empty());
        assert_eq!(writer.write("test1.json", b"{}".to_vec()).await.unwrap(), WriteOutcome::Created);
        assert_eq!(fs::read(dir.join("test1.json")).unwrap(), b"{}");

        fs::write(dir.join(".test2.json.abc.tmp"), b"staged").unwrap();
        assert_eq!(writer.list().await.unwrap(), BTreeSet::from(["test1.json".to_string()]));

        assert!(writer.remove("test1.json").await.unwrap());
        assert!(!writer.remove("test1.json").await.unwrap());
        assert!(!dir.join("test1.json").exists());
    }

    #[tokio::test]
    async fn test_mirror_writer_rejects_unsafe_names() {
        let temp = TempDir::new().unwrap();
        let writer = MirrorWriter::new(temp.path().to_path_buf());

        for name in ["../escape.xml", "a/b.xml", ".hidden", ""] {
            assert!(matches!(
                writer.write(name, b"x".to_vec()).await,
                Err(MirrorError::InvalidName { .. })
            ));
        }
    }
}
