//! Group membership bookkeeping.

use crate::error::StoreError;
use dashmap::DashMap;
use parley_protocol::{now_millis, Group, GroupId, UserId};
use std::collections::BTreeSet;
use tracing::debug;

/// Groups indexed by id. Groups are never deleted.
#[derive(Debug, Default)]
pub struct GroupStore {
    groups: DashMap<GroupId, Group>,
}

impl GroupStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a group.
    ///
    /// The creator always ends up as a member and the only admin, whether
    /// or not they are listed in `initial_members`.
    pub fn create(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        is_private: bool,
        creator_id: &str,
        initial_members: impl IntoIterator<Item = UserId>,
    ) -> Group {
        let mut members: BTreeSet<UserId> = initial_members.into_iter().collect();
        members.insert(creator_id.to_string());

        let group = Group {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description,
            created_by: creator_id.to_string(),
            created_at: now_millis(),
            members,
            admins: BTreeSet::from([creator_id.to_string()]),
            is_private,
        };

        debug!(group = %group.id, creator = %creator_id, members = group.members.len(), "Group created");
        self.groups.insert(group.id.clone(), group.clone());
        group
    }

    /// Add a member. Joining twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the group does not exist.
    pub fn join(&self, group_id: &str, user_id: &str) -> Result<Group, StoreError> {
        let mut group = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| StoreError::GroupNotFound(group_id.to_string()))?;

        if group.members.insert(user_id.to_string()) {
            debug!(group = %group_id, user = %user_id, "Member joined");
        }
        Ok(group.clone())
    }

    /// Remove a member, dropping their admin role too. Empty groups are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the group does not exist.
    pub fn leave(&self, group_id: &str, user_id: &str) -> Result<Group, StoreError> {
        let mut group = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| StoreError::GroupNotFound(group_id.to_string()))?;

        group.admins.remove(user_id);
        if group.members.remove(user_id) {
            debug!(group = %group_id, user = %user_id, "Member left");
        }
        Ok(group.clone())
    }

    /// Whether `user_id` belongs to the group. Unknown groups have no members.
    #[must_use]
    pub fn is_member(&self, group_id: &str, user_id: &str) -> bool {
        self.groups
            .get(group_id)
            .is_some_and(|group| group.is_member(user_id))
    }

    /// # Errors
    ///
    /// Returns an error if the group does not exist.
    pub fn members_of(&self, group_id: &str) -> Result<BTreeSet<UserId>, StoreError> {
        self.groups
            .get(group_id)
            .map(|group| group.members.clone())
            .ok_or_else(|| StoreError::GroupNotFound(group_id.to_string()))
    }

    #[must_use]
    pub fn get(&self, group_id: &str) -> Option<Group> {
        self.groups.get(group_id).map(|group| group.clone())
    }

    #[must_use]
    pub fn exists(&self, group_id: &str) -> bool {
        self.groups.contains_key(group_id)
    }

    /// Groups `user_id` belongs to, oldest first.
    #[must_use]
    pub fn groups_of(&self, user_id: &str) -> Vec<Group> {
        self.collect_sorted(|group| group.is_member(user_id))
    }

    /// Public groups plus the private groups `user_id` belongs to, oldest first.
    #[must_use]
    pub fn visible_to(&self, user_id: &str) -> Vec<Group> {
        self.collect_sorted(|group| !group.is_private || group.is_member(user_id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn collect_sorted(&self, keep: impl Fn(&Group) -> bool) -> Vec<Group> {
        let mut groups: Vec<Group> = self
            .groups
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        groups
    }
}
