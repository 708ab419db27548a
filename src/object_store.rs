// src/object_store.rs
//
// Pluggable object-store abstraction with consistent URI schemes.
// Built-in backend: file:// (FileSystemObjectStore). Remote schemes are
// recognised so they can be rejected with a clear message.

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;

/// A minimal scheme enum so we can route URIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    S3,
    Azure,
    Gcs,
    File,
    Unknown,
}

/// Best-effort scheme inference from a URI.
pub fn infer_scheme(uri: &str) -> Scheme {
    if uri.starts_with("s3://") { Scheme::S3 }
    else if uri.starts_with("az://") || uri.contains(".blob.core.windows.net/") { Scheme::Azure }
    else if uri.starts_with("gs://") || uri.starts_with("gcs://") { Scheme::Gcs }
    else if uri.starts_with("file://") { Scheme::File }
    else { Scheme::Unknown }
}

/// ObjectStore trait for pluggable storage backends.
///
/// Only the read side is needed to source a replay.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get entire object into memory.
    async fn get(&self, uri: &str) -> Result<Bytes>;

    /// List object URIs under a prefix.
    async fn list(&self, uri_prefix: &str, recursive: bool) -> Result<Vec<String>>;

    /// Check whether an object exists.
    async fn exists(&self, uri: &str) -> Result<bool>;
}

/// Convenience factory that picks a backend from a URI.
pub fn store_for_uri(uri: &str) -> Result<Box<dyn ObjectStore>> {
    match infer_scheme(uri) {
        Scheme::File => Ok(Box::new(crate::file_store::FileSystemObjectStore::new())),
        Scheme::S3 | Scheme::Azure | Scheme::Gcs => {
            bail!("No backend compiled in for {uri}. Supported schemes: file://")
        }
        Scheme::Unknown => bail!("Unable to infer backend from URI: {uri}. Supported schemes: file://"),
    }
}
