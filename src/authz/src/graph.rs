//! Membership graph construction and cycle-safe traversal
//!
//! Deletion and restoration workflows need every principal affected by a
//! group-level change. [`MembershipGraphBuilder`] loads the membership
//! edges around a set of resources into an arena graph once, and
//! [`MembershipGraph`] answers "all members of" and "all groups containing"
//! queries over it without further I/O.
//!
//! Edges point from member to container (`member --is-member-of--> group`).
//! Members of a group come from the [`MembershipIndex`]; members of any
//! other resource are the principals holding a direct role on it.
//!
//! Loading runs in two closures from the seed resources:
//! - downward: members, members of member groups, and so on
//! - upward: groups containing a seed principal, their groups, and so on
//!
//! Nodes found in one direction are not expanded in the other, so a
//! member's unrelated memberships are never pulled in.

use crate::error::{AuthzError, Result};
use crate::membership::MembershipIndex;
use crate::resolver::ResolverConfig;
use crate::store::RoleStore;
use crate::types::{Identifier, PrincipalId, ResourceId, Role};
use futures::stream::{self, StreamExt, TryStreamExt};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed, Visitable};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

type Arena = DiGraph<Identifier, Option<Role>>;
type VisitMap = <Arena as Visitable>::Map;

/// Direction of a traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Towards containing groups
    Out,
    /// Towards members
    In,
}

/// Arena graph over membership edges
#[derive(Debug, Clone, Default)]
pub struct MembershipGraph {
    graph: Arena,
    index: HashMap<Identifier, NodeIndex>,
}

impl MembershipGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, id: &Identifier) -> NodeIndex {
        if let Some(idx) = self.index.get(id) {
            return *idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.index.insert(id.clone(), idx);
        idx
    }

    /// Record that `member` belongs to `container`
    ///
    /// A known role replaces an unknown one; an unknown role never erases
    /// a known one.
    pub fn add_edge(&mut self, member: &Identifier, container: &Identifier, role: Option<Role>) {
        let from = self.node(member);
        let to = self.node(container);

        match self.graph.find_edge(from, to) {
            Some(edge) => {
                if role.is_some() {
                    self.graph[edge] = role;
                }
            }
            None => {
                self.graph.add_edge(from, to, role);
            }
        }
    }

    /// Whether the node is part of the graph
    pub fn contains(&self, id: &Identifier) -> bool {
        self.index.contains_key(id)
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of membership edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Role `member` holds in `container`, if the edge exists and its role is known
    pub fn role_of(&self, container: &Identifier, member: &Identifier) -> Option<&str> {
        let from = *self.index.get(member)?;
        let to = *self.index.get(container)?;
        let edge = self.graph.find_edge(from, to)?;
        self.graph[edge].as_deref()
    }

    /// Every direct and indirect member of `node`
    ///
    /// The sequence is lazy, finite and deduplicated, never yields `node`
    /// itself, and follows breadth-first discovery order. Calling again
    /// restarts from scratch.
    pub fn traverse_in(&self, node: &Identifier) -> Traversal<'_> {
        Traversal::new(self, node, Direction::In)
    }

    /// Every group containing `node`, directly or transitively
    pub fn traverse_out(&self, node: &Identifier) -> Traversal<'_> {
        Traversal::new(self, node, Direction::Out)
    }

    /// Principals among the direct and indirect members of `node`
    pub fn principals_in(&self, node: &Identifier) -> Vec<PrincipalId> {
        self.traverse_in(node)
            .filter_map(|id| id.as_principal().cloned())
            .collect()
    }
}

/// Lazy breadth-first walk over a [`MembershipGraph`]
pub struct Traversal<'g> {
    graph: &'g MembershipGraph,
    walk: Option<(Bfs<NodeIndex, VisitMap>, NodeIndex)>,
    direction: Direction,
}

impl<'g> Traversal<'g> {
    fn new(graph: &'g MembershipGraph, node: &Identifier, direction: Direction) -> Self {
        let walk = graph
            .index
            .get(node)
            .map(|start| (Bfs::new(&graph.graph, *start), *start));

        Self {
            graph,
            walk,
            direction,
        }
    }
}

impl<'g> Iterator for Traversal<'g> {
    type Item = &'g Identifier;

    fn next(&mut self) -> Option<Self::Item> {
        let graph: &'g MembershipGraph = self.graph;
        let (bfs, start) = self.walk.as_mut()?;

        loop {
            let next = match self.direction {
                Direction::Out => bfs.next(&graph.graph),
                Direction::In => bfs.next(Reversed(&graph.graph)),
            }?;

            // Bfs yields the start node first
            if next != *start {
                return Some(&graph.graph[next]);
            }
        }
    }
}

/// Builds [`MembershipGraph`]s from the role store and membership index
#[derive(Clone)]
pub struct MembershipGraphBuilder {
    store: Arc<dyn RoleStore>,
    membership: Arc<dyn MembershipIndex>,
    config: ResolverConfig,
}

impl MembershipGraphBuilder {
    /// Create a builder with default settings
    pub fn new(store: Arc<dyn RoleStore>, membership: Arc<dyn MembershipIndex>) -> Self {
        Self::with_config(store, membership, ResolverConfig::default())
    }

    /// Create a builder sharing the resolver's concurrency settings
    pub fn with_config(
        store: Arc<dyn RoleStore>,
        membership: Arc<dyn MembershipIndex>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            membership,
            config,
        }
    }

    /// Load the membership edges around the given resources
    pub async fn build_graph(&self, resources: &[ResourceId]) -> Result<MembershipGraph> {
        if resources.is_empty() {
            return Err(AuthzError::InvalidArgument(
                "At least one resource id must be provided".to_string(),
            ));
        }

        let seeds: Vec<Identifier> = resources
            .iter()
            .cloned()
            .map(Identifier::from)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut graph = MembershipGraph::new();
        for seed in &seeds {
            graph.node(seed);
        }

        self.load_members(&mut graph, seeds.clone()).await?;

        let principals: Vec<PrincipalId> = seeds
            .iter()
            .filter_map(|seed| seed.as_principal().cloned())
            .collect();
        self.load_groups(&mut graph, principals).await?;

        debug!(
            seeds = seeds.len(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Built membership graph"
        );

        Ok(graph)
    }

    /// Parse raw resource ids, then build
    pub async fn build_graph_raw<S: AsRef<str>>(&self, resource_ids: &[S]) -> Result<MembershipGraph> {
        let resources = resource_ids
            .iter()
            .map(|raw| ResourceId::parse(raw.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.build_graph(&resources).await
    }

    async fn load_members(&self, graph: &mut MembershipGraph, seeds: Vec<Identifier>) -> Result<()> {
        let mut expanded: HashSet<Identifier> = seeds.iter().cloned().collect();
        let mut frontier = seeds;

        while !frontier.is_empty() {
            let fetched: Vec<(Identifier, BTreeMap<PrincipalId, Role>)> = stream::iter(frontier)
                .map(|node| async move {
                    let members = self.members_of(&node).await?;
                    Ok::<_, AuthzError>((node, members))
                })
                .buffered(self.config.max_concurrent_lookups.max(1))
                .try_collect()
                .await?;

            let mut next = Vec::new();
            for (container, members) in fetched {
                for (member, role) in members {
                    let member = Identifier::Principal(member);
                    graph.add_edge(&member, &container, Some(role));
                    if member.is_group() && expanded.insert(member.clone()) {
                        next.push(member);
                    }
                }
            }
            frontier = next;
        }

        Ok(())
    }

    async fn load_groups(&self, graph: &mut MembershipGraph, seeds: Vec<PrincipalId>) -> Result<()> {
        let mut expanded: HashSet<PrincipalId> = seeds.iter().cloned().collect();
        let mut frontier = seeds;

        while !frontier.is_empty() {
            let membership = &self.membership;
            let fetched: Vec<(PrincipalId, BTreeSet<PrincipalId>)> = stream::iter(frontier)
                .map(|node| async move {
                    let groups = membership.direct_groups_of(&node).await?;
                    Ok::<_, AuthzError>((node, groups))
                })
                .buffered(self.config.max_concurrent_lookups.max(1))
                .try_collect()
                .await?;

            let mut next = Vec::new();
            for (member, groups) in fetched {
                let member_node = Identifier::Principal(member);
                for group in groups {
                    graph.add_edge(&member_node, &Identifier::Principal(group.clone()), None);
                    if expanded.insert(group.clone()) {
                        next.push(group);
                    }
                }
            }
            frontier = next;
        }

        Ok(())
    }

    async fn members_of(&self, node: &Identifier) -> Result<BTreeMap<PrincipalId, Role>> {
        match node {
            Identifier::Principal(group) if group.is_group() => {
                self.membership.direct_members_with_roles(group).await
            }
            Identifier::Principal(_) => Ok(BTreeMap::new()),
            Identifier::Resource(resource) => self.store.get_resource_members(resource).await,
        }
    }
}
