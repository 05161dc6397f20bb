//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use rolegraph_authz::error::{AuthzError, Result};
use rolegraph_authz::membership::MembershipIndex;
use rolegraph_authz::store::{InMemoryRoleStore, RoleStore};
use rolegraph_authz::types::{PrincipalId, ResourceId, Role};
use rolegraph_authz::{EngineConfig, InMemoryMembershipIndex, RoleEngine};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn user(tenant: &str, name: &str) -> PrincipalId {
    PrincipalId::user(tenant, name).unwrap()
}

pub fn group(tenant: &str, name: &str) -> PrincipalId {
    PrincipalId::group(tenant, name).unwrap()
}

pub fn content(tenant: &str, name: &str) -> ResourceId {
    ResourceId::new("c", tenant, name).unwrap()
}

/// Engine over in-memory stores, with handles to both stores
pub struct Fixture {
    pub engine: RoleEngine,
    pub store: Arc<InMemoryRoleStore>,
    pub membership: Arc<InMemoryMembershipIndex>,
}

pub fn fixture() -> Fixture {
    fixture_with_config(EngineConfig::default())
}

pub fn fixture_with_config(config: EngineConfig) -> Fixture {
    init_tracing();
    let store = Arc::new(InMemoryRoleStore::new());
    let membership = Arc::new(InMemoryMembershipIndex::new());
    let engine = RoleEngine::new(config, store.clone(), membership.clone());
    Fixture {
        engine,
        store,
        membership,
    }
}

/// Role store that fails writes for chosen principals, and all reads on demand
#[derive(Default)]
pub struct FlakyRoleStore {
    inner: InMemoryRoleStore,
    failing_writes: HashSet<PrincipalId>,
    reads_down: AtomicBool,
    writes: AtomicUsize,
}

impl FlakyRoleStore {
    pub fn failing_for(principals: impl IntoIterator<Item = PrincipalId>) -> Self {
        Self {
            failing_writes: principals.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn set_reads_down(&self, down: bool) {
        self.reads_down.store(down, Ordering::SeqCst);
    }

    /// Number of attempted single-cell writes
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryRoleStore {
        &self.inner
    }

    fn check_reads(&self) -> Result<()> {
        if self.reads_down.load(Ordering::SeqCst) {
            return Err(AuthzError::StorageUnavailable("role store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RoleStore for FlakyRoleStore {
    async fn get_direct_role(
        &self,
        resource: &ResourceId,
        principal: &PrincipalId,
    ) -> Result<Option<Role>> {
        self.check_reads()?;
        self.inner.get_direct_role(resource, principal).await
    }

    async fn set_direct_role(
        &self,
        resource: &ResourceId,
        principal: &PrincipalId,
        role: Option<&str>,
    ) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.failing_writes.contains(principal) {
            return Err(AuthzError::StorageUnavailable(format!(
                "write for {} rejected",
                principal
            )));
        }
        self.inner.set_direct_role(resource, principal, role).await
    }

    async fn get_direct_roles_for_principal(
        &self,
        principal: &PrincipalId,
        resource_type: &str,
    ) -> Result<HashMap<ResourceId, Role>> {
        self.check_reads()?;
        self.inner
            .get_direct_roles_for_principal(principal, resource_type)
            .await
    }

    async fn get_resource_members(
        &self,
        resource: &ResourceId,
    ) -> Result<BTreeMap<PrincipalId, Role>> {
        self.check_reads()?;
        self.inner.get_resource_members(resource).await
    }
}

/// Membership index wrapper counting lookups and optionally delaying them
pub struct CountingMembership {
    inner: Arc<InMemoryMembershipIndex>,
    group_lookups: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingMembership {
    pub fn new(inner: Arc<InMemoryMembershipIndex>) -> Self {
        Self {
            inner,
            group_lookups: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_delay(inner: Arc<InMemoryMembershipIndex>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(inner)
        }
    }

    pub fn group_lookups(&self) -> usize {
        self.group_lookups.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MembershipIndex for CountingMembership {
    async fn direct_groups_of(&self, principal: &PrincipalId) -> Result<BTreeSet<PrincipalId>> {
        self.group_lookups.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.inner.direct_groups_of(principal).await
    }

    async fn direct_members_of(&self, group: &PrincipalId) -> Result<BTreeSet<PrincipalId>> {
        self.pause().await;
        self.inner.direct_members_of(group).await
    }

    async fn direct_members_with_roles(
        &self,
        group: &PrincipalId,
    ) -> Result<BTreeMap<PrincipalId, Role>> {
        self.pause().await;
        self.inner.direct_members_with_roles(group).await
    }
}
