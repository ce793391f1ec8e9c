//! File-sharing (drive) service trait and in-memory implementation.

use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use regex::Regex;

use super::SideEffectError;

/// Extracts the file id from a shared-drive URL.
///
/// Only drive.google.com URLs are recognized; the id is the first long
/// `[-\w]` run, the same heuristic the sharing links themselves use.
/// Returns None for anything else so the dispatcher can skip the grant.
pub fn extract_file_id(url: &str) -> Option<String> {
    static FILE_ID: OnceLock<Option<Regex>> = OnceLock::new();

    if !url.contains("drive.google.com") {
        return None;
    }

    FILE_ID
        .get_or_init(|| Regex::new(r"[-\w]{25,}").ok())
        .as_ref()?
        .find(url)
        .map(|m| m.as_str().to_string())
}

/// Trait for file-sharing permission grants.
#[async_trait]
pub trait DriveService: Send + Sync {
    /// Grants read permission on the file to the email address. Re-granting
    /// is idempotent on the real service.
    async fn grant_read(&self, file_id: &str, email: &str) -> Result<(), SideEffectError>;
}

#[derive(Debug, Default)]
struct InMemoryDriveState {
    grants: Vec<(String, String)>,
    fail_on_grant: bool,
}

/// In-memory drive service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDriveService {
    state: Arc<RwLock<InMemoryDriveState>>,
}

impl InMemoryDriveService {
    /// Creates a new in-memory drive service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail on the next grant call.
    pub fn set_fail_on_grant(&self, fail: bool) {
        self.state.write().unwrap().fail_on_grant = fail;
    }

    /// Returns the number of grants issued.
    pub fn grant_count(&self) -> usize {
        self.state.read().unwrap().grants.len()
    }

    /// Returns true if read permission was granted on the file to the email.
    pub fn has_grant(&self, file_id: &str, email: &str) -> bool {
        self.state
            .read()
            .unwrap()
            .grants
            .iter()
            .any(|(f, e)| f == file_id && e == email)
    }
}

#[async_trait]
impl DriveService for InMemoryDriveService {
    async fn grant_read(&self, file_id: &str, email: &str) -> Result<(), SideEffectError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_grant {
            return Err(SideEffectError::Unavailable(
                "drive service down".to_string(),
            ));
        }

        state
            .grants
            .push((file_id.to_string(), email.to_string()));
        Ok(())
    }
}
