//! Directory (group membership) service trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::SideEffectError;

/// Result of a membership insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberInsert {
    /// The buyer was added to the group.
    Added,
    /// The buyer was already a member. An expected, ignorable outcome.
    AlreadyMember,
}

/// Trait for directory group-membership operations.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Inserts `email` into the group identified by `group_key` with the
    /// given role. An existing membership reports `AlreadyMember`, not an
    /// error.
    async fn insert_member(
        &self,
        group_key: &str,
        email: &str,
        role: &str,
    ) -> Result<MemberInsert, SideEffectError>;
}

#[derive(Debug, Default)]
struct InMemoryDirectoryState {
    members: HashMap<String, HashSet<String>>,
    fail_on_insert: bool,
}

/// In-memory directory service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectoryService {
    state: Arc<RwLock<InMemoryDirectoryState>>,
}

impl InMemoryDirectoryService {
    /// Creates a new in-memory directory service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail on the next insert call.
    pub fn set_fail_on_insert(&self, fail: bool) {
        self.state.write().unwrap().fail_on_insert = fail;
    }

    /// Returns true if the email is a member of the group.
    pub fn is_member(&self, group_key: &str, email: &str) -> bool {
        self.state
            .read()
            .unwrap()
            .members
            .get(group_key)
            .is_some_and(|g| g.contains(email))
    }

    /// Returns the number of members in the group.
    pub fn member_count(&self, group_key: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .members
            .get(group_key)
            .map_or(0, HashSet::len)
    }
}

#[async_trait]
impl DirectoryService for InMemoryDirectoryService {
    async fn insert_member(
        &self,
        group_key: &str,
        email: &str,
        _role: &str,
    ) -> Result<MemberInsert, SideEffectError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_insert {
            return Err(SideEffectError::Unavailable(
                "directory service down".to_string(),
            ));
        }

        let inserted = state
            .members
            .entry(group_key.to_string())
            .or_default()
            .insert(email.to_string());

        if inserted {
            Ok(MemberInsert::Added)
        } else {
            Ok(MemberInsert::AlreadyMember)
        }
    }
}
