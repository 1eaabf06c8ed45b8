// In-memory storage collaborator with scripted authorization

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{PipelineError, PipelineResult};
use crate::ports::{AuthorizationStatus, SavedAsset, StoragePort};

#[derive(Debug)]
struct StorageState {
    status: AuthorizationStatus,
    status_after_request: AuthorizationStatus,
    authorization_requests: usize,
    saved: Vec<PathBuf>,
    save_error: Option<String>,
}

/// Storage double that records the files it is asked to save.
#[derive(Debug)]
pub struct MockStorage {
    state: Mutex<StorageState>,
}

impl MockStorage {
    /// Storage that starts with `status` and keeps it when asked again
    pub fn new(status: AuthorizationStatus) -> Self {
        Self::with_prompt(status, status)
    }

    /// Storage that switches to `granted` once authorization is requested
    pub fn with_prompt(status: AuthorizationStatus, granted: AuthorizationStatus) -> Self {
        Self {
            state: Mutex::new(StorageState {
                status,
                status_after_request: granted,
                authorization_requests: 0,
                saved: Vec::new(),
                save_error: None,
            }),
        }
    }

    pub fn failing_saves(self, message: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.save_error = Some(message.to_string());
        }
        self
    }

    pub fn saved_files(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .map(|state| state.saved.clone())
            .unwrap_or_default()
    }

    pub fn authorization_requests(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.authorization_requests)
            .unwrap_or_default()
    }

    fn lock(&self) -> PipelineResult<std::sync::MutexGuard<'_, StorageState>> {
        self.state.lock().map_err(|_| PipelineError::StorageFailed {
            message: "storage state poisoned".to_string(),
        })
    }
}

#[async_trait]
impl StoragePort for MockStorage {
    async fn authorization_status(&self) -> AuthorizationStatus {
        self.lock()
            .map(|state| state.status)
            .unwrap_or(AuthorizationStatus::Denied)
    }

    async fn request_authorization(&self) -> AuthorizationStatus {
        match self.lock() {
            Ok(mut state) => {
                state.authorization_requests += 1;
                state.status = state.status_after_request;
                state.status
            }
            Err(_) => AuthorizationStatus::Denied,
        }
    }

    async fn save_video(&self, file: &Path) -> PipelineResult<SavedAsset> {
        let mut state = self.lock()?;
        if let Some(message) = &state.save_error {
            return Err(PipelineError::StorageFailed {
                message: message.clone(),
            });
        }
        if !file.is_file() {
            return Err(PipelineError::StorageFailed {
                message: format!("{} is not a file", file.display()),
            });
        }
        state.saved.push(file.to_path_buf());
        Ok(SavedAsset {
            identifier: format!("mock-{}", state.saved.len()),
            location: file.to_path_buf(),
        })
    }
}
