//! Validated application of role change batches

use crate::error::{AuthzError, Result};
use crate::store::RoleStore;
use crate::types::{ResourceId, RoleChanges};
use std::sync::Arc;
use tracing::{debug, warn};

/// Applies direct role grants and revocations for one resource at a time.
///
/// Roles are resolved lazily at query time, so applying a batch only
/// mutates the role store.
#[derive(Clone)]
pub struct RoleChangeApplier {
    store: Arc<dyn RoleStore>,
}

impl RoleChangeApplier {
    /// Create an applier writing to the given store
    pub fn new(store: Arc<dyn RoleStore>) -> Self {
        Self { store }
    }

    /// Apply a batch given raw identifiers
    ///
    /// The resource id is parsed before anything else, so a missing or
    /// malformed id fails without touching storage.
    pub async fn apply_raw(&self, resource_id: &str, changes: &RoleChanges) -> Result<()> {
        if resource_id.is_empty() {
            return Err(AuthzError::InvalidArgument(
                "A resource id must be provided".to_string(),
            ));
        }
        let resource = ResourceId::parse(resource_id)?;
        self.apply(&resource, changes).await
    }

    /// Apply a batch of role changes against a resource
    pub async fn apply(&self, resource: &ResourceId, changes: &RoleChanges) -> Result<()> {
        changes.validate()?;

        let (grants, revokes) = changes.counts();
        debug!(resource = %resource, grants, revokes, "Applying role changes");

        match self.store.set_direct_roles(resource, changes).await {
            Ok(()) => Ok(()),
            Err(err @ AuthzError::PartialBatchFailure { .. }) => {
                warn!(resource = %resource, error = %err, "Role change batch partially applied");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
