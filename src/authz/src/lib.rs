//! # Rolegraph Authorization Engine
//!
//! Role resolution over a principal/group membership graph.
//!
//! ## Features
//!
//! - **Direct role storage** keyed by (resource, principal), with batched
//!   grant/revoke application
//! - **Transitive resolution** through nested, possibly cyclic, groups
//! - **Bulk aggregation** of every principal's roles on one resource type
//! - **Membership graphs** for deletion and cleanup workflows
//! - **Async-first design** using Tokio, with bounded concurrent fan-out
//!
//! ## Example
//!
//! ```rust
//! use rolegraph_authz::{EngineConfig, InMemoryMembershipIndex, InMemoryRoleStore, RoleEngine};
//! use rolegraph_authz::{PrincipalId, RoleChanges};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryRoleStore::new());
//!     let membership = Arc::new(InMemoryMembershipIndex::new());
//!     let engine = RoleEngine::new(EngineConfig::default(), store, membership.clone());
//!
//!     let team = PrincipalId::group("cam", "oae-team")?;
//!     membership.add_member(&team, &PrincipalId::user("cam", "alice")?, "member")?;
//!
//!     engine
//!         .apply_role_changes("c:cam:Foo.docx", &RoleChanges::new().grant(team, "viewer"))
//!         .await?;
//!
//!     if engine.has_role("u:cam:alice", "c:cam:Foo.docx", "viewer").await? {
//!         println!("alice can view Foo.docx");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod applier;
pub mod engine;
pub mod error;
pub mod graph;
pub mod membership;
pub mod resolver;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use aggregator::{BulkRoleAggregator, PrincipalRoles};
pub use applier::RoleChangeApplier;
pub use engine::{EngineConfig, EngineMetrics, MetricsCollector, RoleEngine};
pub use error::{AuthzError, Result};
pub use graph::{MembershipGraph, MembershipGraphBuilder, Traversal};
pub use membership::{InMemoryMembershipIndex, MembershipIndex};
pub use resolver::{ResolverConfig, RoleResolver, TraversalMemo};
pub use store::{InMemoryRoleStore, RoleStore};
pub use types::{Identifier, IdentifierError, PrincipalId, ResourceId, Role, RoleChange, RoleChanges};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
