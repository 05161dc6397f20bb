//! Bulk role aggregation for many principals over one resource type
//!
//! Each principal gets one breadth-first traversal. Instead of looking up a
//! single resource per visited node, the aggregator collects every direct
//! role the node holds on resources of the requested type.
//!
//! A resource can only map to one role per principal, so conflicts are
//! resolved by discovery order: the principal's own direct role wins,
//! otherwise the first ancestor reached in breadth-first order wins.
//!
//! Groups shared between principals are loaded once per call: both their
//! parent groups and their direct role maps are memoized.

use crate::error::{AuthzError, Result};
use crate::resolver::{RoleResolver, TraversalMemo};
use crate::types::{PrincipalId, ResourceId, Role};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Roles per principal, per resource
pub type PrincipalRoles = BTreeMap<PrincipalId, HashMap<ResourceId, Role>>;

/// Computes every principal's effective resource → role map for one resource type
#[derive(Clone)]
pub struct BulkRoleAggregator {
    resolver: RoleResolver,
}

/// Per-call memo of direct role maps, keyed by visited node
#[derive(Default)]
struct RoleMapMemo {
    maps: HashMap<PrincipalId, Arc<HashMap<ResourceId, Role>>>,
    lookups: usize,
}

impl BulkRoleAggregator {
    /// Create an aggregator sharing the resolver's stores and settings
    pub fn new(resolver: RoleResolver) -> Self {
        Self { resolver }
    }

    /// Resolve roles on resources of `resource_type` for every principal
    ///
    /// Duplicate principals collapse into a single entry.
    pub async fn get_roles_for_principals_and_resource_type(
        &self,
        principals: &[PrincipalId],
        resource_type: &str,
    ) -> Result<PrincipalRoles> {
        validate_resource_type(resource_type)?;
        if principals.is_empty() {
            return Err(AuthzError::InvalidArgument(
                "At least one principal id must be provided".to_string(),
            ));
        }

        self.resolver
            .bounded(self.aggregate(principals, resource_type))
            .await
    }

    /// Parse raw principal ids, then aggregate
    pub async fn get_roles_raw<S: AsRef<str>>(
        &self,
        principal_ids: &[S],
        resource_type: &str,
    ) -> Result<PrincipalRoles> {
        validate_resource_type(resource_type)?;
        let principals = principal_ids
            .iter()
            .map(|raw| PrincipalId::parse(raw.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.get_roles_for_principals_and_resource_type(&principals, resource_type)
            .await
    }

    async fn aggregate(&self, principals: &[PrincipalId], resource_type: &str) -> Result<PrincipalRoles> {
        let mut traversal_memo = TraversalMemo::new();
        let mut role_memo = RoleMapMemo::default();
        let mut result = PrincipalRoles::new();

        for principal in principals {
            if result.contains_key(principal) {
                continue;
            }

            let nodes = self
                .resolver
                .ancestors_with_memo(principal, &mut traversal_memo)
                .await?;
            self.load_role_maps(&nodes, resource_type, &mut role_memo)
                .await?;

            let mut roles: HashMap<ResourceId, Role> = HashMap::new();
            for node in &nodes {
                if let Some(direct) = role_memo.maps.get(node) {
                    for (resource, role) in direct.iter() {
                        roles
                            .entry(resource.clone())
                            .or_insert_with(|| role.clone());
                    }
                }
            }

            result.insert(principal.clone(), roles);
        }

        debug!(
            principals = result.len(),
            resource_type,
            group_lookups = traversal_memo.lookups(),
            role_lookups = role_memo.lookups,
            "Aggregated roles for principals"
        );

        Ok(result)
    }

    async fn load_role_maps(
        &self,
        nodes: &[PrincipalId],
        resource_type: &str,
        memo: &mut RoleMapMemo,
    ) -> Result<()> {
        let missing: Vec<PrincipalId> = nodes
            .iter()
            .filter(|node| !memo.maps.contains_key(*node))
            .cloned()
            .collect();

        if missing.is_empty() {
            return Ok(());
        }
        memo.lookups += missing.len();

        let store = self.resolver.store();
        let fetched: Vec<(PrincipalId, HashMap<ResourceId, Role>)> = stream::iter(missing)
            .map(|node| async move {
                let roles = store
                    .get_direct_roles_for_principal(&node, resource_type)
                    .await?;
                Ok::<_, AuthzError>((node, roles))
            })
            .buffered(self.resolver.config().max_concurrent_lookups.max(1))
            .try_collect()
            .await?;

        for (node, roles) in fetched {
            memo.maps.insert(node, Arc::new(roles));
        }

        Ok(())
    }
}

fn validate_resource_type(resource_type: &str) -> Result<()> {
    if resource_type.is_empty() {
        return Err(AuthzError::InvalidArgument(
            "A resource type must be provided".to_string(),
        ));
    }
    if resource_type.contains(':') || resource_type.chars().any(char::is_whitespace) {
        return Err(AuthzError::InvalidArgument(format!(
            "Invalid resource type '{}'",
            resource_type
        )));
    }
    Ok(())
}
