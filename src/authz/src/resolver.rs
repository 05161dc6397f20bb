//! Effective role resolution over the membership graph
//!
//! A principal's effective roles on a resource are the direct roles held
//! by the principal itself and by every group reachable from it through
//! `is-member-of` edges. Group graphs may contain cycles, so traversal is a
//! breadth-first walk guarded by a visited set:
//!
//! 1. Seed the frontier with the principal
//! 2. For every node of the current level, fetch its direct groups
//!    (concurrently, bounded by `max_concurrent_lookups`)
//! 3. Merge the results serially, enqueueing only unvisited groups
//! 4. Stop when a level discovers nothing new
//!
//! Every node is visited exactly once however many paths lead to it, so a
//! group reachable through several chains contributes its role once.
//!
//! Traversal reads a live, eventually consistent view: membership edges
//! added or removed while a traversal runs may or may not be observed.
//!
//! # Example
//!
//! ```rust
//! use rolegraph_authz::membership::InMemoryMembershipIndex;
//! use rolegraph_authz::resolver::RoleResolver;
//! use rolegraph_authz::store::{InMemoryRoleStore, RoleStore};
//! use rolegraph_authz::types::{PrincipalId, ResourceId};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryRoleStore::new());
//! let membership = Arc::new(InMemoryMembershipIndex::new());
//!
//! let team = PrincipalId::group("cam", "oae-team")?;
//! let alice = PrincipalId::user("cam", "alice")?;
//! let doc = ResourceId::new("c", "cam", "Foo.docx")?;
//!
//! membership.add_member(&team, &alice, "member")?;
//! store.set_direct_role(&doc, &team, Some("viewer")).await?;
//!
//! let resolver = RoleResolver::new(store, membership);
//! assert!(resolver.has_role(&alice, &doc, "viewer").await?);
//! # Ok(())
//! # }
//! ```

use crate::engine::metrics::MetricsCollector;
use crate::error::{AuthzError, Result};
use crate::membership::MembershipIndex;
use crate::store::RoleStore;
use crate::types::{PrincipalId, ResourceId, Role};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default bound on concurrent store lookups within one traversal level
pub const DEFAULT_MAX_CONCURRENT_LOOKUPS: usize = 32;

/// Resolver configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Upper bound for a single traversal, in milliseconds (none by default)
    pub traversal_timeout_ms: Option<u64>,

    /// Maximum store lookups in flight while expanding one level
    pub max_concurrent_lookups: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            traversal_timeout_ms: None,
            max_concurrent_lookups: DEFAULT_MAX_CONCURRENT_LOOKUPS,
        }
    }
}

impl ResolverConfig {
    /// Traversal timeout as a duration
    pub fn traversal_timeout(&self) -> Option<Duration> {
        self.traversal_timeout_ms.map(Duration::from_millis)
    }

    fn concurrency(&self) -> usize {
        self.max_concurrent_lookups.max(1)
    }
}

/// Direct-group lookups remembered across traversals of one call
///
/// Sharing a memo between traversals means a group reached from several
/// principals has its parent groups loaded once.
#[derive(Debug, Default)]
pub struct TraversalMemo {
    groups: HashMap<PrincipalId, Arc<BTreeSet<PrincipalId>>>,
    lookups: usize,
}

impl TraversalMemo {
    /// Create an empty memo
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `direct_groups_of` lookups issued through this memo
    pub fn lookups(&self) -> usize {
        self.lookups
    }

    /// Number of nodes whose direct groups are memoized
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether nothing has been memoized yet
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Resolves effective roles by walking group memberships
#[derive(Clone)]
pub struct RoleResolver {
    store: Arc<dyn RoleStore>,
    membership: Arc<dyn MembershipIndex>,
    config: ResolverConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RoleResolver {
    /// Create a resolver with default settings
    pub fn new(store: Arc<dyn RoleStore>, membership: Arc<dyn MembershipIndex>) -> Self {
        Self::with_config(store, membership, ResolverConfig::default())
    }

    /// Create a resolver with custom settings
    pub fn with_config(
        store: Arc<dyn RoleStore>,
        membership: Arc<dyn MembershipIndex>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            membership,
            config,
            metrics: None,
        }
    }

    /// Record traversal counters into the given collector
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Resolver configuration
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &Arc<dyn RoleStore> {
        &self.store
    }

    /// Every role the principal holds on the resource, directly or through
    /// transitive group membership. An empty set means "no relationship".
    pub async fn get_all_roles(
        &self,
        principal: &PrincipalId,
        resource: &ResourceId,
    ) -> Result<BTreeSet<Role>> {
        self.bounded(self.get_all_roles_unbounded(principal, resource))
            .await
    }

    /// Parse raw identifiers, then resolve
    pub async fn get_all_roles_raw(
        &self,
        principal_id: &str,
        resource_id: &str,
    ) -> Result<BTreeSet<Role>> {
        let principal = PrincipalId::parse(principal_id)?;
        let resource = ResourceId::parse(resource_id)?;
        self.get_all_roles(&principal, &resource).await
    }

    /// Whether `role` is one of the principal's effective roles (exact match)
    pub async fn has_role(
        &self,
        principal: &PrincipalId,
        resource: &ResourceId,
        role: &str,
    ) -> Result<bool> {
        Ok(self.get_all_roles(principal, resource).await?.contains(role))
    }

    /// The principal followed by every group containing it, directly or
    /// transitively, in breadth-first discovery order
    pub async fn ancestors(&self, principal: &PrincipalId) -> Result<Vec<PrincipalId>> {
        let mut memo = TraversalMemo::new();
        self.bounded(self.ancestors_with_memo(principal, &mut memo))
            .await
    }

    /// Same as [`RoleResolver::ancestors`], reusing and filling `memo`
    pub async fn ancestors_with_memo(
        &self,
        principal: &PrincipalId,
        memo: &mut TraversalMemo,
    ) -> Result<Vec<PrincipalId>> {
        let mut visited: HashSet<PrincipalId> = HashSet::new();
        let mut order: Vec<PrincipalId> = Vec::new();

        visited.insert(principal.clone());
        let mut frontier = vec![principal.clone()];

        while !frontier.is_empty() {
            let missing: Vec<PrincipalId> = frontier
                .iter()
                .filter(|node| !memo.groups.contains_key(*node))
                .cloned()
                .collect();

            if !missing.is_empty() {
                memo.lookups += missing.len();
                let membership = &self.membership;
                let fetched: Vec<(PrincipalId, BTreeSet<PrincipalId>)> = stream::iter(missing)
                    .map(|node| async move {
                        let groups = membership.direct_groups_of(&node).await?;
                        Ok::<_, AuthzError>((node, groups))
                    })
                    .buffered(self.config.concurrency())
                    .try_collect()
                    .await?;

                for (node, groups) in fetched {
                    memo.groups.insert(node, Arc::new(groups));
                }
            }

            let mut next = Vec::new();
            for node in &frontier {
                if let Some(groups) = memo.groups.get(node) {
                    for group in groups.iter() {
                        if visited.insert(group.clone()) {
                            next.push(group.clone());
                        }
                    }
                }
            }

            order.append(&mut frontier);
            frontier = next;
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_nodes_visited(order.len() as u64).await;
        }

        Ok(order)
    }

    async fn get_all_roles_unbounded(
        &self,
        principal: &PrincipalId,
        resource: &ResourceId,
    ) -> Result<BTreeSet<Role>> {
        let mut memo = TraversalMemo::new();
        let nodes = self.ancestors_with_memo(principal, &mut memo).await?;
        let visited = nodes.len();

        let store = &self.store;
        let direct: Vec<Option<Role>> = stream::iter(nodes)
            .map(|node| async move { store.get_direct_role(resource, &node).await })
            .buffered(self.config.concurrency())
            .try_collect()
            .await?;

        let roles: BTreeSet<Role> = direct.into_iter().flatten().collect();

        debug!(
            principal = %principal,
            resource = %resource,
            visited,
            roles = roles.len(),
            "Resolved effective roles"
        );

        Ok(roles)
    }

    /// Apply the configured traversal timeout, if any
    pub(crate) async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.config.traversal_timeout() {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| AuthzError::Timeout(limit))?,
            None => fut.await,
        }
    }
}
