// src/file_store.rs
//
// FileSystemObjectStore implementation for POSIX file I/O
// This provides the ObjectStore interface for local filesystem operations

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::trace;

use crate::object_store::ObjectStore;

/// FileSystem adapter that implements ObjectStore for local POSIX file operations.
///
/// URI Mapping:
/// - `file:///absolute/path/to/file` -> `/absolute/path/to/file`
/// - `file://./relative/path/to/file` -> `./relative/path/to/file`
/// - `file://../relative/path/to/file` -> `../relative/path/to/file`
#[derive(Debug, Clone, Default)]
pub struct FileSystemObjectStore;

impl FileSystemObjectStore {
    pub fn new() -> Self {
        Self
    }

    /// Convert a URI to a filesystem path
    pub fn uri_to_path(uri: &str) -> Result<PathBuf> {
        match uri.strip_prefix("file://") {
            Some(path) => Ok(PathBuf::from(path)),
            None => bail!("FileSystemObjectStore expects file:// URI, got: {}", uri),
        }
    }

    /// Convert a filesystem path back to a URI for list operations
    pub fn path_to_uri(path: &Path) -> String {
        format!("file://{}", path.display())
    }

    async fn collect_files_recursive(dir: &Path, results: &mut Vec<String>) -> Result<()> {
        let mut entries = fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read directory {}", dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            if entry.file_type().await?.is_dir() {
                Box::pin(Self::collect_files_recursive(&entry_path, results)).await?;
            } else {
                results.push(Self::path_to_uri(&entry_path));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FileSystemObjectStore {
    async fn get(&self, uri: &str) -> Result<Bytes> {
        let path = Self::uri_to_path(uri)?;

        if !path.is_file() {
            bail!("File not found: {}", path.display());
        }

        trace!("reading {}", path.display());
        let data = fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        // Convert to Bytes (cheap, just wraps in Arc)
        Ok(Bytes::from(data))
    }

    async fn list(&self, uri_prefix: &str, recursive: bool) -> Result<Vec<String>> {
        let base_path = Self::uri_to_path(uri_prefix)?;
        let mut results = Vec::new();

        if !base_path.exists() {
            return Ok(results); // Empty list for non-existent paths
        }

        if base_path.is_file() {
            // If the prefix points to a file, return just that file
            results.push(Self::path_to_uri(&base_path));
            return Ok(results);
        }

        if recursive {
            Self::collect_files_recursive(&base_path, &mut results).await?;
        } else {
            // Non-recursive: only direct children
            let mut entries = fs::read_dir(&base_path).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file() {
                    results.push(Self::path_to_uri(&entry.path()));
                }
            }
        }

        Ok(results)
    }

    async fn exists(&self, uri: &str) -> Result<bool> {
        let path = Self::uri_to_path(uri)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }
}
