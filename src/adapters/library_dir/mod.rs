// Library directory adapter - persists finished videos into a local directory

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::ports::{AuthorizationStatus, SavedAsset, StoragePort};

/// Storage collaborator backed by a directory.
///
/// The directory counts as authorized when it exists and is writable. A
/// missing directory is "not determined" until authorization is requested,
/// which creates it.
pub struct LibraryDirStorage {
    root: PathBuf,
}

impl LibraryDirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn status_now(&self) -> AuthorizationStatus {
        match std::fs::metadata(&self.root) {
            Ok(metadata) if !metadata.is_dir() => AuthorizationStatus::Restricted,
            Ok(metadata) if metadata.permissions().readonly() => AuthorizationStatus::Denied,
            Ok(_) => AuthorizationStatus::Authorized,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                AuthorizationStatus::NotDetermined
            }
            Err(_) => AuthorizationStatus::Denied,
        }
    }

    /// First free `<timestamp>[-n].<ext>` name in the library
    fn target_for(&self, file: &Path) -> PathBuf {
        let extension = file
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("mp4");
        let stem = format!("vidframes-{}", Local::now().format("%Y%m%d-%H%M%S%.3f"));

        let mut candidate = self.root.join(format!("{}.{}", stem, extension));
        let mut counter = 1;
        while candidate.exists() {
            candidate = self.root.join(format!("{}-{}.{}", stem, counter, extension));
            counter += 1;
        }
        candidate
    }
}

#[async_trait]
impl StoragePort for LibraryDirStorage {
    async fn authorization_status(&self) -> AuthorizationStatus {
        self.status_now()
    }

    async fn request_authorization(&self) -> AuthorizationStatus {
        if self.status_now() != AuthorizationStatus::NotDetermined {
            return self.status_now();
        }
        match tokio::fs::create_dir_all(&self.root).await {
            Ok(()) => {
                info!("Created library directory: {}", self.root.display());
                self.status_now()
            }
            Err(e) => {
                warn!("Cannot create library directory {}: {}", self.root.display(), e);
                AuthorizationStatus::Denied
            }
        }
    }

    async fn save_video(&self, file: &Path) -> PipelineResult<SavedAsset> {
        let target = self.target_for(file);
        tokio::fs::copy(file, &target)
            .await
            .map_err(|e| PipelineError::StorageFailed {
                message: format!(
                    "copying {} to {}: {}",
                    file.display(),
                    target.display(),
                    e
                ),
            })?;

        let identifier = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!("Saved video to library: {}", target.display());
        Ok(SavedAsset {
            identifier,
            location: target,
        })
    }
}
