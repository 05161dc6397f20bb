//! Role engine facade
//!
//! Composes the role store, membership index, applier, resolver, graph
//! builder and bulk aggregator behind one entry point taking raw string
//! identifiers, with logging and metrics.

pub mod metrics;

pub use metrics::{EngineMetrics, MetricsCollector};

use crate::aggregator::{BulkRoleAggregator, PrincipalRoles};
use crate::applier::RoleChangeApplier;
use crate::error::{AuthzError, Result};
use crate::graph::{MembershipGraph, MembershipGraphBuilder};
use crate::membership::MembershipIndex;
use crate::resolver::{ResolverConfig, RoleResolver};
use crate::store::RoleStore;
use crate::types::{Role, RoleChanges};

use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Environment variable holding the traversal timeout in milliseconds
pub const ENV_TRAVERSAL_TIMEOUT_MS: &str = "ROLEGRAPH_TRAVERSAL_TIMEOUT_MS";
/// Environment variable holding the per-level lookup concurrency
pub const ENV_MAX_CONCURRENT_LOOKUPS: &str = "ROLEGRAPH_MAX_CONCURRENT_LOOKUPS";
/// Environment variable toggling metrics collection
pub const ENV_ENABLE_METRICS: &str = "ROLEGRAPH_ENABLE_METRICS";

/// Role engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Traversal settings shared by the resolver, aggregator and graph builder
    pub resolver: ResolverConfig,

    /// Enable metrics collection
    pub enable_metrics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolver: ResolverConfig::default(),
            enable_metrics: true,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from `ROLEGRAPH_*` environment variables
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let traversal_timeout_ms = lookup(ENV_TRAVERSAL_TIMEOUT_MS)
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .or(defaults.resolver.traversal_timeout_ms);
        let max_concurrent_lookups = lookup(ENV_MAX_CONCURRENT_LOOKUPS)
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(defaults.resolver.max_concurrent_lookups);
        let enable_metrics = lookup(ENV_ENABLE_METRICS)
            .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.enable_metrics);

        Self {
            resolver: ResolverConfig {
                traversal_timeout_ms,
                max_concurrent_lookups,
            },
            enable_metrics,
        }
    }
}

/// Main role engine
///
/// # Architecture
///
/// ```text
/// apply_role_changes ──→ RoleChangeApplier ──→ RoleStore
///                                                  ↑
/// get_all_roles / has_role ──→ RoleResolver ───────┤
///                                   ↓              │
/// get_roles_for_principals ──→ BulkRoleAggregator ─┤
///                                   ↓              │
///                            MembershipIndex ←─────┤
///                                   ↑              │
/// build_membership_graph ──→ MembershipGraphBuilder┘
/// ```
pub struct RoleEngine {
    applier: RoleChangeApplier,
    resolver: RoleResolver,
    aggregator: BulkRoleAggregator,
    graph_builder: MembershipGraphBuilder,
    metrics: Option<Arc<MetricsCollector>>,
    config: EngineConfig,
}

impl RoleEngine {
    /// Create a new engine over the given role store and membership index
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn RoleStore>,
        membership: Arc<dyn MembershipIndex>,
    ) -> Self {
        let metrics = if config.enable_metrics {
            Some(Arc::new(MetricsCollector::new()))
        } else {
            None
        };

        let mut resolver =
            RoleResolver::with_config(store.clone(), membership.clone(), config.resolver.clone());
        if let Some(metrics) = &metrics {
            resolver = resolver.with_metrics(metrics.clone());
        }

        let applier = RoleChangeApplier::new(store.clone());
        let aggregator = BulkRoleAggregator::new(resolver.clone());
        let graph_builder =
            MembershipGraphBuilder::with_config(store, membership, config.resolver.clone());

        info!(
            traversal_timeout_ms = ?config.resolver.traversal_timeout_ms,
            max_concurrent_lookups = config.resolver.max_concurrent_lookups,
            metrics = config.enable_metrics,
            "RoleEngine initialized"
        );

        Self {
            applier,
            resolver,
            aggregator,
            graph_builder,
            metrics,
            config,
        }
    }

    /// Apply a batch of direct role changes to a resource
    #[instrument(skip(self, changes), fields(changes = changes.len()))]
    pub async fn apply_role_changes(&self, resource_id: &str, changes: &RoleChanges) -> Result<()> {
        let result = self.applier.apply_raw(resource_id, changes).await;

        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(()) => metrics.record_batch_applied().await,
                Err(AuthzError::PartialBatchFailure { .. }) => {
                    metrics.record_partial_failure().await;
                    metrics.record_error().await;
                }
                Err(_) => metrics.record_error().await,
            }
        }

        result
    }

    /// Every effective role the principal holds on the resource
    #[instrument(skip(self))]
    pub async fn get_all_roles(&self, principal_id: &str, resource_id: &str) -> Result<BTreeSet<Role>> {
        let start = Instant::now();
        let result = self.resolver.get_all_roles_raw(principal_id, resource_id).await;
        self.record_check(&result, start).await;

        if let Err(err) = &result {
            debug!(error = %err, "Role resolution failed");
        }
        result
    }

    /// Whether the principal effectively holds `role` on the resource
    #[instrument(skip(self))]
    pub async fn has_role(&self, principal_id: &str, resource_id: &str, role: &str) -> Result<bool> {
        let start = Instant::now();
        let result = self
            .resolver
            .get_all_roles_raw(principal_id, resource_id)
            .await
            .map(|roles| roles.contains(role));
        self.record_check(&result, start).await;
        result
    }

    /// Effective roles on every resource of `resource_type`, per principal
    #[instrument(skip(self, principal_ids), fields(principals = principal_ids.len()))]
    pub async fn get_roles_for_principals_and_resource_type<S: AsRef<str>>(
        &self,
        principal_ids: &[S],
        resource_type: &str,
    ) -> Result<PrincipalRoles> {
        let start = Instant::now();
        let result = self.aggregator.get_roles_raw(principal_ids, resource_type).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_bulk_request().await;
            metrics.record_latency(start.elapsed()).await;
            if result.is_err() {
                metrics.record_error().await;
            }
        }

        if let Err(err) = &result {
            warn!(error = %err, resource_type, "Bulk role aggregation failed");
        }
        result
    }

    /// Load the membership graph around the given resources
    #[instrument(skip(self, resource_ids), fields(resources = resource_ids.len()))]
    pub async fn build_membership_graph<S: AsRef<str>>(
        &self,
        resource_ids: &[S],
    ) -> Result<MembershipGraph> {
        let result = self
            .resolver
            .bounded(self.graph_builder.build_graph_raw(resource_ids))
            .await;

        if let (Some(metrics), Err(_)) = (&self.metrics, &result) {
            metrics.record_error().await;
        }
        result
    }

    /// Current metrics snapshot, when metrics are enabled
    pub async fn metrics(&self) -> Option<EngineMetrics> {
        match &self.metrics {
            Some(metrics) => Some(metrics.get_metrics().await),
            None => None,
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The underlying resolver, for typed-identifier callers
    pub fn resolver(&self) -> &RoleResolver {
        &self.resolver
    }

    async fn record_check<T>(&self, result: &Result<T>, start: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_role_check().await;
            metrics.record_latency(start.elapsed()).await;
            if result.is_err() {
                metrics.record_error().await;
            }
        }
    }
}
