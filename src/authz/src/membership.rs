//! Group membership adjacency
//!
//! Membership edges are owned by group management. This crate reads them
//! through [`MembershipIndex`]; [`InMemoryMembershipIndex`] additionally
//! exposes the write surface group management uses.

use crate::error::{AuthzError, Result};
use crate::types::{PrincipalId, Role};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Role assumed for membership edges whose role is not tracked
pub const DEFAULT_MEMBER_ROLE: &str = "member";

/// Membership index trait
#[async_trait]
pub trait MembershipIndex: Send + Sync {
    /// Groups of which the principal is an immediate member
    async fn direct_groups_of(&self, principal: &PrincipalId) -> Result<BTreeSet<PrincipalId>>;

    /// Immediate members of a group
    async fn direct_members_of(&self, group: &PrincipalId) -> Result<BTreeSet<PrincipalId>>;

    /// Immediate members of a group with the role each holds in it
    async fn direct_members_with_roles(
        &self,
        group: &PrincipalId,
    ) -> Result<BTreeMap<PrincipalId, Role>> {
        Ok(self
            .direct_members_of(group)
            .await?
            .into_iter()
            .map(|member| (member, DEFAULT_MEMBER_ROLE.to_string()))
            .collect())
    }
}

/// In-memory membership index
///
/// Both directions of an edge are updated under the group's entry lock.
#[derive(Clone, Default)]
pub struct InMemoryMembershipIndex {
    members_of: Arc<DashMap<PrincipalId, BTreeMap<PrincipalId, Role>>>,
    groups_of: Arc<DashMap<PrincipalId, BTreeSet<PrincipalId>>>,
}

impl InMemoryMembershipIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or re-role) `member` as an immediate member of `group`
    pub fn add_member(
        &self,
        group: &PrincipalId,
        member: &PrincipalId,
        role: impl Into<Role>,
    ) -> Result<()> {
        if !group.is_group() {
            return Err(AuthzError::InvalidArgument(format!(
                "'{}' is not a group and cannot have members",
                group
            )));
        }

        let role = role.into();
        if role.is_empty() {
            return Err(AuthzError::InvalidArgument(format!(
                "Empty membership role for '{}' in '{}'",
                member, group
            )));
        }

        debug!(group = %group, member = %member, role = %role, "Adding membership edge");

        let mut members = self.members_of.entry(group.clone()).or_default();
        members.insert(member.clone(), role);
        self.groups_of
            .entry(member.clone())
            .or_default()
            .insert(group.clone());

        Ok(())
    }

    /// Remove `member` from `group`; removing a missing edge is a no-op
    pub fn remove_member(&self, group: &PrincipalId, member: &PrincipalId) {
        debug!(group = %group, member = %member, "Removing membership edge");

        if let Some(mut members) = self.members_of.get_mut(group) {
            members.remove(member);
            if let Some(mut groups) = self.groups_of.get_mut(member) {
                groups.remove(group);
            }
        }

        self.members_of.remove_if(group, |_, members| members.is_empty());
        self.groups_of.remove_if(member, |_, groups| groups.is_empty());
    }

    /// Number of stored edges
    pub fn edge_count(&self) -> usize {
        self.members_of.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl MembershipIndex for InMemoryMembershipIndex {
    async fn direct_groups_of(&self, principal: &PrincipalId) -> Result<BTreeSet<PrincipalId>> {
        Ok(self
            .groups_of
            .get(principal)
            .map(|groups| groups.value().clone())
            .unwrap_or_default())
    }

    async fn direct_members_of(&self, group: &PrincipalId) -> Result<BTreeSet<PrincipalId>> {
        Ok(self
            .members_of
            .get(group)
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn direct_members_with_roles(
        &self,
        group: &PrincipalId,
    ) -> Result<BTreeMap<PrincipalId, Role>> {
        Ok(self
            .members_of
            .get(group)
            .map(|members| members.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str) -> PrincipalId {
        PrincipalId::group("cam", name).unwrap()
    }

    fn user(name: &str) -> PrincipalId {
        PrincipalId::user("cam", name).unwrap()
    }

    #[tokio::test]
    async fn test_edges_are_bidirectional() {
        let index = InMemoryMembershipIndex::new();
        index.add_member(&group("team"), &user("alice"), "member").unwrap();
        index.add_member(&group("team"), &group("backend"), "manager").unwrap();

        let members = index.direct_members_of(&group("team")).await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.contains(&user("alice")));

        let groups = index.direct_groups_of(&group("backend")).await.unwrap();
        assert_eq!(groups.into_iter().collect::<Vec<_>>(), vec![group("team")]);

        let roles = index.direct_members_with_roles(&group("team")).await.unwrap();
        assert_eq!(roles.get(&group("backend")).map(String::as_str), Some("manager"));
    }

    #[tokio::test]
    async fn test_remove_member() {
        let index = InMemoryMembershipIndex::new();
        index.add_member(&group("team"), &user("alice"), "member").unwrap();
        index.remove_member(&group("team"), &user("alice"));

        assert!(index.direct_groups_of(&user("alice")).await.unwrap().is_empty());
        assert!(index.direct_members_of(&group("team")).await.unwrap().is_empty());
        assert_eq!(index.edge_count(), 0);

        // No-op on a missing edge
        index.remove_member(&group("team"), &user("alice"));
    }

    #[test]
    fn test_users_cannot_have_members() {
        let index = InMemoryMembershipIndex::new();
        let result = index.add_member(&user("alice"), &user("bob"), "member");
        assert!(matches!(result, Err(AuthzError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_cycles_are_stored() {
        let index = InMemoryMembershipIndex::new();
        index.add_member(&group("a"), &group("b"), "member").unwrap();
        index.add_member(&group("b"), &group("a"), "member").unwrap();

        assert!(index.direct_groups_of(&group("a")).await.unwrap().contains(&group("b")));
        assert!(index.direct_groups_of(&group("b")).await.unwrap().contains(&group("a")));
    }
}
