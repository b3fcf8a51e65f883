//! Integration tests for mirrors and faceted navigation seen through a
//! session, including canonical identity and stale virtual handles.

mod common;

use facetgate_domain::canonical::NodeHandle;
use facetgate_domain::model::schema::{P_VIRTUAL_ID, RESULTSET};
use facetgate_domain::model::{PrincipalContext, ROLE_READONLY};
use facetgate_domain::projection::virtual_id;
use facetgate_domain::{DomainError, PhysicalIdentity};
use facetgate_engine::{Session, SessionNode};
use facetgate_storage::ContentStore;

use common::{
    add_document, add_facet_search, add_handle, add_mirror, add_ternary_documents, add_visible_domain,
    content_store, last_segment, open, Grantee, TERNARY_DOCUMENT_COUNT,
};

fn alice() -> PrincipalContext {
    PrincipalContext::new("alice")
}

fn names(session: &Session, node: &SessionNode) -> Vec<String> {
    session
        .children(node)
        .unwrap()
        .iter()
        .map(|child| last_segment(child.path()).to_string())
        .collect()
}

fn node(session: &Session, path: &str) -> SessionNode {
    session
        .get_node(path)
        .unwrap()
        .unwrap_or_else(|| panic!("{path} should be readable"))
}

// ========== Section 1: Mirrors ==========

#[test]
fn test_mirror_exposes_readable_variants_with_stable_names() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    add_handle(&store, &["draft", "published", "hidden"]);
    add_mirror(&store, "/", "m", "/content", &[]);
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();

    let handle = node(&session, "/m/h");
    assert!(handle.is_virtual());
    let first = names(&session, &handle);
    assert_eq!(first, vec!["doc", "doc[2]"]);
    assert!(session.get_node("/m/h/doc[3]").unwrap().is_none());

    session.refresh(false).unwrap();
    let handle = node(&session, "/m/h");
    assert_eq!(names(&session, &handle), first);
    assert_eq!(
        node(&session, "/m/h/doc[2]").string_property("state").as_deref(),
        Some("published")
    );
}

#[test]
fn test_mirror_root_reports_count_and_virtual_id() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    add_handle(&store, &["draft"]);
    add_mirror(&store, "/", "m", "/content", &[]);
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();

    let root = node(&session, "/m");
    assert!(root.is_virtual());
    assert_eq!(root.count(), Some(1));
    assert_eq!(
        root.string_property(P_VIRTUAL_ID),
        Some(virtual_id("/m"))
    );
}

#[test]
fn test_mirror_is_listed_among_physical_children() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    add_handle(&store, &["draft"]);
    store.add_node("/", "site", "nt:unstructured").unwrap();
    add_mirror(&store, "/site", "m", "/content", &[]);
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();

    let site = node(&session, "/site");
    let children = session.children(&site).unwrap();
    assert_eq!(children.len(), 1);
    assert!(children[0].is_virtual());
    assert_eq!(names(&session, &children[0]), vec!["h"]);
}

#[test]
fn test_mirrors_share_canonical_identity() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    let handle = add_handle(&store, &["draft"]);
    add_mirror(&store, "/", "a", "/content", &[]);
    add_mirror(&store, "/", "b", "/content", &[]);
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();

    let via_a = node(&session, "/a/h");
    let via_b = node(&session, "/b/h");
    assert_ne!(
        via_a.string_property(P_VIRTUAL_ID),
        via_b.string_property(P_VIRTUAL_ID)
    );

    let physical = PhysicalIdentity::new(store.get_node_by_path(&handle).unwrap().id);
    let a = session
        .canonical_of(&NodeHandle::Virtual("/a/h".to_string()))
        .unwrap();
    let b = session
        .canonical_of(&NodeHandle::Virtual("/b/h".to_string()))
        .unwrap();
    assert_eq!(a, Some(physical.clone()));
    assert_eq!(b, Some(physical.clone()));
    assert_eq!(via_a.identity(), physical);

    let direct = session
        .canonical_of(&NodeHandle::Physical(physical.node_id().clone()))
        .unwrap();
    assert_eq!(direct, Some(physical));
}

#[test]
fn test_canonical_of_unreadable_handle_is_none() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    add_handle(&store, &["draft", "hidden"]);
    add_mirror(&store, "/", "m", "/content", &[]);
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();

    let hidden = store.get_node_by_path("/content/h/doc[2]").unwrap();
    assert_eq!(
        session
            .canonical_of(&NodeHandle::Physical(hidden.id))
            .unwrap(),
        None
    );
    assert_eq!(
        session
            .canonical_of(&NodeHandle::Virtual("/m/h/doc[2]".to_string()))
            .unwrap(),
        None
    );
}

#[test]
fn test_constraints_keep_variants_without_the_facet() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    add_handle(&store, &["draft", "published"]);
    add_document(&store, "/content/h", "doc", &[]);
    add_mirror(
        &store,
        "/",
        "select",
        "/content",
        &[("state", "published", "select")],
    );
    add_mirror(
        &store,
        "/",
        "single",
        "/content",
        &[("state", "published", "single")],
    );
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();

    // Only a variant carrying a different value is filtered out
    for mirror in ["/select", "/single"] {
        let handle = node(&session, &format!("{mirror}/h"));
        assert_eq!(names(&session, &handle), vec!["doc", "doc[2]"], "{mirror}");
        assert_eq!(
            node(&session, &format!("{mirror}/h/doc"))
                .string_property("state")
                .as_deref(),
            Some("published")
        );
        assert_eq!(
            node(&session, &format!("{mirror}/h/doc[2]")).string_property("state"),
            None
        );
    }
}

#[test]
fn test_single_mode_exposes_one_variant() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    add_handle(&store, &["draft", "published"]);
    add_mirror(
        &store,
        "/",
        "m",
        "/content",
        &[("state", "published", "single")],
    );
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();

    let handle = node(&session, "/m/h");
    assert_eq!(names(&session, &handle), vec!["doc"]);

    let doc = node(&session, "/m/h/doc");
    assert_eq!(doc.string_property("state").as_deref(), Some("published"));
    let choice = session.variant_of(&doc).unwrap();
    assert_eq!(choice.position, 1);
    assert_eq!(
        choice.variant,
        store.get_node_by_path("/content/h/doc[2]").unwrap().id
    );
    assert!(session.variant_of(&node(&session, "/content/h")).is_none());
}

#[test]
fn test_privileges_on_virtual_node_follow_canonical_node() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    add_handle(&store, &["draft"]);
    add_mirror(&store, "/", "m", "/content", &[]);
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();

    let virtual_roles = session.privileges("/m/h/doc").unwrap();
    let physical_roles = session.privileges("/content/h/doc").unwrap();
    assert_eq!(virtual_roles, physical_roles);
    assert!(virtual_roles.can_read());
    assert!(!virtual_roles.can_write());

    let err = session.privileges("/m/h/missing").unwrap_err();
    assert!(matches!(err, DomainError::NotFound { .. }));
}

// ========== Section 2: Faceted navigation ==========

#[test]
fn test_facet_groups_count_their_documents() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    let rows = add_ternary_documents(&store);
    add_facet_search(&store, "/", "nav", "/docs", &["x", "y", "z"]);
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();

    let root = node(&session, "/nav");
    assert_eq!(root.count(), Some(TERNARY_DOCUMENT_COUNT as i64));

    let level = names(&session, &root);
    assert_eq!(level[0], RESULTSET);
    for value in ["x0", "x1", "x2"] {
        assert!(level.contains(&value.to_string()), "missing group {value}");
        let checked = rows.iter().filter(|row| row[0] == value).count() as i64;

        let group = node(&session, &format!("/nav/{value}"));
        assert_eq!(group.count(), Some(checked), "group {value}");

        let resultset = node(&session, &format!("/nav/{value}/{RESULTSET}"));
        assert_eq!(resultset.count(), Some(checked));
        assert_eq!(session.children(&resultset).unwrap().len() as i64, checked);
    }
}

#[test]
fn test_nested_facet_group_counts() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    let rows = add_ternary_documents(&store);
    add_facet_search(&store, "/", "nav", "/docs", &["x", "y", "z"]);
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();

    let group = node(&session, "/nav/x1/y2/z0");
    let checked = rows
        .iter()
        .filter(|row| row[0] == "x1" && row[1] == "y2" && row[2] == "z0")
        .count() as i64;
    assert_eq!(group.count(), Some(checked));
    assert_eq!(names(&session, &group), vec![RESULTSET]);
}

#[test]
fn test_unreadable_documents_are_not_counted() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    let rows = add_ternary_documents(&store);
    store.set_string("/docs/doc0", "authtest", "hidden").unwrap();
    add_facet_search(&store, "/", "nav", "/docs", &["x", "y", "z"]);
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();

    assert_eq!(
        node(&session, "/nav").count(),
        Some(TERNARY_DOCUMENT_COUNT as i64 - 1)
    );
    let checked = rows.iter().filter(|row| row[0] == "x0").count() as i64 - 1;
    assert_eq!(node(&session, "/nav/x0").count(), Some(checked));

    let resultset = node(&session, &format!("/nav/x0/{RESULTSET}"));
    let results = names(&session, &resultset);
    assert_eq!(results.len() as i64, checked);
    assert!(!results.contains(&"doc0".to_string()));
}

#[test]
fn test_counts_follow_committed_changes() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    add_ternary_documents(&store);
    add_facet_search(&store, "/", "nav", "/docs", &["x"]);
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();
    let before = node(&session, "/nav/x0").count().unwrap();

    store.set_string("/docs/doc0", "authtest", "hidden").unwrap();
    store.save().unwrap();

    assert_eq!(node(&session, "/nav/x0").count(), Some(before - 1));
}

// ========== Section 3: Stale virtual handles ==========

#[test]
fn test_stale_virtual_handle_needs_refresh() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    add_handle(&store, &["draft", "published"]);
    add_mirror(&store, "/", "m", "/content", &[]);
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();
    let handle = node(&session, "/m/h");

    store.set_string("/content/h/doc", "title", "changed").unwrap();
    store.save().unwrap();

    let err = session.children(&handle).unwrap_err();
    assert_eq!(
        err,
        DomainError::NeedsRefresh {
            path: "/m/h".to_string()
        }
    );
    assert!(matches!(
        session.property(&handle, "jcr:primaryType"),
        Err(DomainError::NeedsRefresh { .. })
    ));

    // Fresh lookups by path are unaffected
    assert_eq!(names(&session, &node(&session, "/m/h")), vec!["doc", "doc[2]"]);
}

#[test]
fn test_refresh_keeping_changes_revalidates_handles() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    add_handle(&store, &["draft", "published"]);
    add_mirror(&store, "/", "m", "/content", &[]);
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();
    let handle = node(&session, "/m/h");

    store.set_string("/content/h/doc[2]", "authtest", "hidden").unwrap();
    store.save().unwrap();
    session.refresh(true).unwrap();

    assert_eq!(names(&session, &handle), vec!["doc"]);
}

#[test]
fn test_refresh_discarding_changes_keeps_handles_stale() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    add_handle(&store, &["draft"]);
    add_mirror(&store, "/", "m", "/content", &[]);
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();
    let handle = node(&session, "/m/h");

    store.set_string("/content/h/doc", "title", "changed").unwrap();
    store.save().unwrap();
    session.refresh(false).unwrap();

    assert!(matches!(
        session.children(&handle),
        Err(DomainError::NeedsRefresh { .. })
    ));
}

#[test]
fn test_physical_handles_never_go_stale() {
    let store = content_store();
    add_visible_domain(&store, ROLE_READONLY, Grantee::User("alice"));
    let handle_path = add_handle(&store, &["draft"]);
    let repository = open(&store);
    let session = repository.login(alice()).unwrap();
    let handle = node(&session, &handle_path);

    store.set_string("/content/h/doc", "title", "changed").unwrap();
    store.save().unwrap();

    assert_eq!(names(&session, &handle), vec!["doc"]);
    let title = session
        .property(&node(&session, "/content/h/doc"), "title")
        .unwrap()
        .unwrap();
    assert_eq!(title[0].to_facet_string(), "changed");
}
