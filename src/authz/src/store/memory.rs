//! In-memory role store backed by concurrent maps

use super::RoleStore;
use crate::error::Result;
use crate::types::{PrincipalId, ResourceId, Role};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// In-memory role store
///
/// Keeps two indexes, by resource and by principal. A cell write locks the
/// resource entry first and the principal entry second, so both indexes
/// change together and readers of either index never observe half a cell.
#[derive(Clone, Default)]
pub struct InMemoryRoleStore {
    by_resource: Arc<DashMap<ResourceId, BTreeMap<PrincipalId, Role>>>,
    by_principal: Arc<DashMap<PrincipalId, HashMap<ResourceId, Role>>>,
}

impl InMemoryRoleStore {
    /// Create a new in-memory role store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored cells
    pub fn cell_count(&self) -> usize {
        self.by_resource.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl RoleStore for InMemoryRoleStore {
    async fn get_direct_role(
        &self,
        resource: &ResourceId,
        principal: &PrincipalId,
    ) -> Result<Option<Role>> {
        Ok(self
            .by_resource
            .get(resource)
            .and_then(|members| members.get(principal).cloned()))
    }

    async fn set_direct_role(
        &self,
        resource: &ResourceId,
        principal: &PrincipalId,
        role: Option<&str>,
    ) -> Result<()> {
        let mut members = self.by_resource.entry(resource.clone()).or_default();

        match role {
            Some(role) => {
                members.insert(principal.clone(), role.to_string());
                self.by_principal
                    .entry(principal.clone())
                    .or_default()
                    .insert(resource.clone(), role.to_string());
            }
            None => {
                members.remove(principal);
                if let Some(mut resources) = self.by_principal.get_mut(principal) {
                    resources.remove(resource);
                }
            }
        }

        let now_empty = members.is_empty();
        drop(members);
        if now_empty {
            self.by_resource.remove_if(resource, |_, members| members.is_empty());
        }
        self.by_principal
            .remove_if(principal, |_, resources| resources.is_empty());

        Ok(())
    }

    async fn get_direct_roles_for_principal(
        &self,
        principal: &PrincipalId,
        resource_type: &str,
    ) -> Result<HashMap<ResourceId, Role>> {
        Ok(self
            .by_principal
            .get(principal)
            .map(|resources| {
                resources
                    .iter()
                    .filter(|(resource, _)| resource.resource_type() == resource_type)
                    .map(|(resource, role)| (resource.clone(), role.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_resource_members(
        &self,
        resource: &ResourceId,
    ) -> Result<BTreeMap<PrincipalId, Role>> {
        Ok(self
            .by_resource
            .get(resource)
            .map(|members| members.value().clone())
            .unwrap_or_default())
    }
}
