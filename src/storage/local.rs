//! Local-filesystem storage backend.
//!
//! Used by tests and single-node deployments; object-store backends plug in
//! through the same trait.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use walkdir::WalkDir;

use crate::error::{BackupError, Result};
use crate::storage::{ExternalStorage, StorageConf, StorageFactory};

pub struct LocalStorage {
    root: PathBuf,
    uri: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let uri = root.display().to_string();
        Self { root, uri }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl ExternalStorage for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<Bytes> {
        match tokio::fs::read(self.resolve(path)).await {
            Ok(contents) => Ok(Bytes::from(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BackupError::NotFound(path.to_string()))
            }
            Err(e) => Err(BackupError::Io(e)),
        }
    }

    async fn write_file(&self, path: &str, contents: Bytes) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(full, &contents).await?;
        Ok(())
    }

    async fn list_files(&self, pattern: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let pattern = pattern.to_string();

        // Directory walks are blocking work.
        let names = tokio::task::spawn_blocking(move || {
            let mut names = Vec::new();
            for entry in WalkDir::new(&root) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(_) => continue,
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = match entry.path().strip_prefix(&root) {
                    Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                    Err(_) => continue,
                };
                if glob_match(&pattern, &rel) {
                    names.push(rel);
                }
            }
            names
        })
        .await
        .map_err(|e| BackupError::Storage(format!("listing files: {e}")))?;

        Ok(names)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        tokio::fs::remove_file(self.resolve(path)).await?;
        Ok(())
    }

    fn conf(&self) -> StorageConf {
        StorageConf {
            uri: self.uri.clone(),
        }
    }
}

/// Factory treating destination URIs as local filesystem paths.
pub struct LocalStorageFactory;

#[async_trait]
impl StorageFactory for LocalStorageFactory {
    async fn open(&self, uri: &str) -> Result<Box<dyn ExternalStorage>> {
        Ok(Box::new(LocalStorage::new(uri)))
    }
}

/// Minimal glob matcher covering the patterns used for layer discovery:
/// `*` matches any run of characters within one path segment, `[...]`
/// character classes support literals and ranges, everything else is
/// literal.
pub(crate) fn glob_match(pattern: &str, name: &str) -> bool {
    match_bytes(pattern.as_bytes(), name.as_bytes())
}

fn match_bytes(pattern: &[u8], name: &[u8]) -> bool {
    let Some(&head) = pattern.first() else {
        return name.is_empty();
    };
    match head {
        b'*' => {
            if match_bytes(&pattern[1..], name) {
                return true;
            }
            !name.is_empty() && name[0] != b'/' && match_bytes(pattern, &name[1..])
        }
        b'[' => {
            let Some(end) = pattern.iter().position(|&c| c == b']') else {
                return false;
            };
            if name.is_empty() || !class_matches(&pattern[1..end], name[0]) {
                return false;
            }
            match_bytes(&pattern[end + 1..], &name[1..])
        }
        c => !name.is_empty() && name[0] == c && match_bytes(&pattern[1..], &name[1..]),
    }
}

fn class_matches(class: &[u8], b: u8) -> bool {
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == b'-' {
            if class[i] <= b && b <= class[i + 2] {
                return true;
            }
            i += 3;
        } else {
            if class[i] == b {
                return true;
            }
            i += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{BACKUP_MANIFEST_NAME, INCREMENTAL_LAYER_GLOB};
    use tempfile::TempDir;

    #[test]
    fn test_glob_match_literals() {
        assert!(glob_match("BACKUP", "BACKUP"));
        assert!(!glob_match("BACKUP", "BACKUP2"));
    }

    #[test]
    fn test_glob_match_star_within_segment() {
        assert!(glob_match("[0-9]*", "20240301"));
        assert!(!glob_match("[0-9]*", "20240301/120000.00"));
    }

    #[test]
    fn test_glob_match_layer_pattern() {
        let pattern = format!("{INCREMENTAL_LAYER_GLOB}/{BACKUP_MANIFEST_NAME}");
        assert!(glob_match(&pattern, "20240301/120000.00/BACKUP_MANIFEST"));
        assert!(glob_match(&pattern, "20241231/235959.75/BACKUP_MANIFEST"));
        assert!(!glob_match(&pattern, "20240301/120000.00/BACKUP_PART_x"));
        assert!(!glob_match(&pattern, "notadate/120000.00/BACKUP_MANIFEST"));
        assert!(!glob_match(&pattern, "BACKUP_MANIFEST"));
    }

    #[tokio::test]
    async fn test_read_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path());
        let err = store.read_file("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path());

        store
            .write_file("sub/file.bin", Bytes::from_static(b"contents"))
            .await
            .unwrap();
        let read = store.read_file("sub/file.bin").await.unwrap();
        assert_eq!(&read[..], b"contents");

        store.delete("sub/file.bin").await.unwrap();
        assert!(store.read_file("sub/file.bin").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_files_matches_layer_dirs() {
        let dir = TempDir::new().unwrap();
        let store = LocalStorage::new(dir.path());

        for name in [
            "20240301/120000.00/BACKUP_MANIFEST",
            "20240302/080000.50/BACKUP_MANIFEST",
            "20240302/080000.50/BACKUP_PART_region=a",
            "BACKUP_MANIFEST",
        ] {
            store.write_file(name, Bytes::from_static(b"x")).await.unwrap();
        }

        let pattern = format!("{INCREMENTAL_LAYER_GLOB}/{BACKUP_MANIFEST_NAME}");
        let mut names = store.list_files(&pattern).await.unwrap();
        names.sort();
        assert_eq!(
            names,
            vec![
                "20240301/120000.00/BACKUP_MANIFEST".to_string(),
                "20240302/080000.50/BACKUP_MANIFEST".to_string(),
            ]
        );
    }
}
