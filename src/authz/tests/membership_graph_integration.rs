//! Integration tests for membership graphs used by group deletion and
//! restoration workflows

mod common;

use common::{fixture, group, user};
use rolegraph_authz::{AuthzError, Identifier, RoleChanges};
use std::collections::HashSet;

fn id(raw: &str) -> Identifier {
    Identifier::parse(raw).unwrap()
}

#[tokio::test]
async fn test_group_deletion_reaches_every_downstream_user() {
    // team ⊃ {alice, backend}; backend ⊃ {bob, infra}; infra ⊃ {carol}
    let f = fixture();
    let team = group("oae", "team");
    let backend = group("oae", "backend");
    let infra = group("oae", "infra");
    f.membership.add_member(&team, &user("oae", "alice"), "manager").unwrap();
    f.membership.add_member(&team, &backend, "member").unwrap();
    f.membership.add_member(&backend, &user("oae", "bob"), "member").unwrap();
    f.membership.add_member(&backend, &infra, "member").unwrap();
    f.membership.add_member(&infra, &user("oae", "carol"), "member").unwrap();

    let graph = f.engine.build_membership_graph(&["g:oae:team"]).await.unwrap();

    let affected: HashSet<String> = graph
        .principals_in(&id("g:oae:team"))
        .into_iter()
        .filter(|principal| !principal.is_group())
        .map(|principal| principal.to_string())
        .collect();
    let expected: HashSet<String> = ["u:oae:alice", "u:oae:bob", "u:oae:carol"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(affected, expected);

    assert_eq!(
        graph.role_of(&id("g:oae:team"), &id("u:oae:alice")),
        Some("manager")
    );
}

#[tokio::test]
async fn test_traverse_out_from_user_seed() {
    let f = fixture();
    let u = user("oae", "u");
    let g1 = group("oae", "g1");
    let g2 = group("oae", "g2");
    f.membership.add_member(&g1, &u, "member").unwrap();
    f.membership.add_member(&g2, &g1, "member").unwrap();

    let graph = f.engine.build_membership_graph(&["u:oae:u"]).await.unwrap();
    let containers: Vec<&Identifier> = graph.traverse_out(&id("u:oae:u")).collect();
    assert_eq!(containers, vec![&id("g:oae:g1"), &id("g:oae:g2")]);
}

#[tokio::test]
async fn test_content_members_come_from_role_store() {
    let f = fixture();
    let team = group("oae", "team");
    f.membership.add_member(&team, &user("oae", "bob"), "member").unwrap();

    let changes = RoleChanges::new()
        .grant(user("oae", "alice"), "manager")
        .grant(team, "viewer");
    f.engine.apply_role_changes("c:oae:doc", &changes).await.unwrap();

    let graph = f.engine.build_membership_graph(&["c:oae:doc"]).await.unwrap();
    let members: HashSet<&Identifier> = graph.traverse_in(&id("c:oae:doc")).collect();

    assert_eq!(members.len(), 3);
    assert!(members.contains(&id("u:oae:bob")));
    assert_eq!(graph.role_of(&id("c:oae:doc"), &id("g:oae:team")), Some("viewer"));
}

#[tokio::test]
async fn test_cyclic_graph_is_finite_and_restartable() {
    let f = fixture();
    let a = group("oae", "a");
    let b = group("oae", "b");
    let c = group("oae", "c");
    f.membership.add_member(&a, &b, "member").unwrap();
    f.membership.add_member(&b, &c, "member").unwrap();
    f.membership.add_member(&c, &a, "member").unwrap();
    f.membership.add_member(&c, &user("oae", "u"), "member").unwrap();

    let graph = f.engine.build_membership_graph(&["g:oae:a"]).await.unwrap();

    let first: Vec<&Identifier> = graph.traverse_in(&id("g:oae:a")).collect();
    let second: Vec<&Identifier> = graph.traverse_in(&id("g:oae:a")).collect();
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
    assert!(!first.contains(&&id("g:oae:a")));

    let unique: HashSet<&&Identifier> = first.iter().collect();
    assert_eq!(unique.len(), first.len());
}

#[tokio::test]
async fn test_unknown_node_yields_nothing() {
    let f = fixture();
    let graph = f.engine.build_membership_graph(&["g:oae:empty"]).await.unwrap();
    assert_eq!(graph.traverse_in(&id("g:oae:other")).count(), 0);
    assert_eq!(graph.traverse_out(&id("g:oae:empty")).count(), 0);
    assert!(graph.contains(&id("g:oae:empty")));
}

#[tokio::test]
async fn test_validation() {
    let f = fixture();
    let none: [&str; 0] = [];
    assert!(matches!(
        f.engine.build_membership_graph(&none).await,
        Err(AuthzError::InvalidArgument(_))
    ));
    assert!(matches!(
        f.engine.build_membership_graph(&["not an id"]).await,
        Err(AuthzError::InvalidArgument(_))
    ));
}
