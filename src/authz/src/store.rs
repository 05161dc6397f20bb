//! Direct role assignment storage

use crate::error::{AuthzError, Result};
use crate::types::{PrincipalId, ResourceId, Role, RoleChanges};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

pub mod memory;

pub use memory::InMemoryRoleStore;

/// Role store trait
///
/// Persists `(resource, principal) → role` cells. Implementations only need
/// per-cell atomicity; batches are applied cell by cell on top of
/// [`RoleStore::set_direct_role`].
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Get the direct role a principal holds on a resource
    async fn get_direct_role(
        &self,
        resource: &ResourceId,
        principal: &PrincipalId,
    ) -> Result<Option<Role>>;

    /// Upsert (`Some`) or delete (`None`) a single cell
    async fn set_direct_role(
        &self,
        resource: &ResourceId,
        principal: &PrincipalId,
        role: Option<&str>,
    ) -> Result<()>;

    /// All direct roles of a principal on resources of the given type
    async fn get_direct_roles_for_principal(
        &self,
        principal: &PrincipalId,
        resource_type: &str,
    ) -> Result<HashMap<ResourceId, Role>>;

    /// All principals holding a direct role on a resource
    async fn get_resource_members(
        &self,
        resource: &ResourceId,
    ) -> Result<BTreeMap<PrincipalId, Role>>;

    /// Apply one role change batch against a resource
    ///
    /// Cells are written in identifier order. When a write fails in a batch
    /// of more than one cell, the error is a
    /// [`AuthzError::PartialBatchFailure`] naming the applied cells (possibly
    /// none), the cell in an unknown state and the cells never attempted.
    /// A single-cell batch returns the store error as is. Applied cells are
    /// not rolled back.
    async fn set_direct_roles(&self, resource: &ResourceId, changes: &RoleChanges) -> Result<()> {
        changes.validate()?;

        let mut applied: Vec<PrincipalId> = Vec::with_capacity(changes.len());

        for (idx, (principal, change)) in changes.iter().enumerate() {
            if let Err(err) = self.set_direct_role(resource, principal, change.role()).await {
                if changes.len() == 1 {
                    return Err(err);
                }

                return Err(AuthzError::PartialBatchFailure {
                    resource: resource.clone(),
                    applied,
                    unknown: vec![principal.clone()],
                    not_attempted: changes.principals().skip(idx + 1).cloned().collect(),
                    source: Box::new(err),
                });
            }

            applied.push(principal.clone());
        }

        Ok(())
    }
}
