//! Filesystem document storage.
//!
//! Invoice uploads live under a base directory; job payloads carry the path
//! relative to it (`uploads/2026/03/inv-1001.pdf`). Leading slashes are
//! ignored and any path that would escape the base directory is rejected.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use invoq_core::{DocumentFetcher, Error, Result};

/// [`DocumentFetcher`] reading from a local directory.
pub struct FilesystemFetcher {
    base_path: PathBuf,
}

impl FilesystemFetcher {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Resolve a storage path against the base directory.
    pub fn full_path(&self, path: &str) -> Result<PathBuf> {
        let clean = path.trim().trim_start_matches('/');
        if clean.is_empty() {
            return Err(Error::InvalidInput("empty document path".to_string()));
        }

        let relative = Path::new(clean);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "document path escapes storage root: {}",
                        path
                    )))
                }
            }
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl DocumentFetcher for FilesystemFetcher {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;
        match fs::read(&full_path).await {
            Ok(bytes) => {
                debug!(
                    subsystem = "store",
                    component = "filesystem_fetcher",
                    storage_path = %path,
                    size = bytes.len(),
                    "Document read"
                );
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(storage_path = %path, full_path = %full_path.display(), "Document not found");
                Err(Error::InvalidInput(format!("document not found: {}", path)))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}
