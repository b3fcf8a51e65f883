//! Shared test utilities for facetgate engine tests.
//!
//! Builds content trees in a [`MemoryContentStore`] including the persisted
//! rule configuration, and opens repositories over them.

// Allow dead_code because helpers are used across different test files,
// but Clippy analyzes each test file independently and can't see cross-file usage.
#![allow(dead_code)]

use std::sync::Arc;

use facetgate_domain::model::schema::{
    CONFIGURATION_ROOT, DOMAINS_FOLDER, NT_AUTH_ROLE, NT_DOMAIN, NT_DOMAIN_FOLDER,
    NT_DOMAIN_RULE, NT_FACETSEARCH, NT_FACETSELECT, NT_FACET_RULE, P_DOCBASE, P_EQUALS, P_FACET,
    P_FACETS, P_GROUPS, P_MODES, P_ROLE, P_TYPE, P_USERS, P_VALUE, P_VALUES,
};
use facetgate_engine::logging::test_subscriber;
use facetgate_engine::{EngineConfig, Repository};
use facetgate_storage::path::parent_path;
use facetgate_storage::{
    ContentStore, MemoryContentStore, MemorySearchIndex, SearchIndex, DOCUMENT_TYPE,
};
use tracing_subscriber::fmt::MakeWriter;

// =============================================================================
// Test Constants
// =============================================================================

/// Path of the standard domain folder.
pub const DOMAINS: &str = "/hippo:configuration/hippo:domains";

/// Number of synthetic documents in faceted navigation tests.
pub const TERNARY_DOCUMENT_COUNT: usize = 20;

// =============================================================================
// Content
// =============================================================================

/// A store holding the configuration root, an empty domain folder and
/// `/content`.
pub fn content_store() -> Arc<MemoryContentStore> {
    let store = MemoryContentStore::new_shared();
    store
        .add_node("/", "hippo:configuration", "hipposys:configuration")
        .unwrap();
    store
        .add_node(CONFIGURATION_ROOT, DOMAINS_FOLDER, NT_DOMAIN_FOLDER)
        .unwrap();
    store.add_node("/", "content", "nt:unstructured").unwrap();
    store
}

fn joined(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Adds a `hippo:document` carrying the given string properties.
pub fn add_document(
    store: &MemoryContentStore,
    parent: &str,
    name: &str,
    properties: &[(&str, &str)],
) -> String {
    store.add_node(parent, name, DOCUMENT_TYPE).unwrap();
    let siblings = store
        .children(&store.get_node_by_path(parent).unwrap().id)
        .unwrap()
        .into_iter()
        .filter(|child| child.name == name)
        .count();
    let path = if siblings > 1 {
        format!("{}[{siblings}]", joined(parent, name))
    } else {
        joined(parent, name)
    };
    for (property, value) in properties {
        store.set_string(&path, property, value).unwrap();
    }
    path
}

/// Adds a mirror of `docbase` with optional `(facet, value, mode)` constraints.
pub fn add_mirror(
    store: &MemoryContentStore,
    parent: &str,
    name: &str,
    docbase: &str,
    constraints: &[(&str, &str, &str)],
) -> String {
    store.add_node(parent, name, NT_FACETSELECT).unwrap();
    let path = joined(parent, name);
    store.set_string(&path, P_DOCBASE, docbase).unwrap();
    if !constraints.is_empty() {
        let facets: Vec<&str> = constraints.iter().map(|c| c.0).collect();
        let values: Vec<&str> = constraints.iter().map(|c| c.1).collect();
        let modes: Vec<&str> = constraints.iter().map(|c| c.2).collect();
        store.set_strings(&path, P_FACETS, &facets).unwrap();
        store.set_strings(&path, P_VALUES, &values).unwrap();
        store.set_strings(&path, P_MODES, &modes).unwrap();
    }
    path
}

/// Adds a faceted navigation over `docbase` grouping by `facets`.
pub fn add_facet_search(
    store: &MemoryContentStore,
    parent: &str,
    name: &str,
    docbase: &str,
    facets: &[&str],
) -> String {
    store.add_node(parent, name, NT_FACETSEARCH).unwrap();
    let path = joined(parent, name);
    store.set_string(&path, P_DOCBASE, docbase).unwrap();
    store.set_strings(&path, P_FACETS, facets).unwrap();
    path
}

/// `/content/h`: a handle with `doc` variants in the given states. A
/// variant in state `hidden` also carries `authtest=hidden`.
pub fn add_handle(store: &MemoryContentStore, states: &[&str]) -> String {
    store.add_node("/content", "h", "hippo:handle").unwrap();
    for state in states {
        let path = add_document(store, "/content/h", "doc", &[("state", state)]);
        if *state == "hidden" {
            store.set_string(&path, "authtest", "hidden").unwrap();
        }
    }
    "/content/h".to_string()
}

/// 20 documents below `/docs` with three ternary facets `x`, `y`, `z`.
/// Returns the facet values of each document in storage order.
pub fn add_ternary_documents(store: &MemoryContentStore) -> Vec<[String; 3]> {
    store.add_node("/", "docs", "nt:unstructured").unwrap();
    (0..TERNARY_DOCUMENT_COUNT)
        .map(|i| {
            let row = [
                format!("x{}", i % 3),
                format!("y{}", (i / 3) % 3),
                format!("z{}", (i / 9) % 3),
            ];
            add_document(
                store,
                "/docs",
                &format!("doc{i}"),
                &[("x", &row[0]), ("y", &row[1]), ("z", &row[2])],
            );
            row
        })
        .collect()
}

// =============================================================================
// Rule configuration
// =============================================================================

/// A facet rule as persisted below a domain rule.
#[derive(Debug, Clone, Copy)]
pub struct Rule<'a> {
    pub facet: &'a str,
    pub value: &'a str,
    pub rule_type: &'a str,
    pub equals: bool,
}

impl<'a> Rule<'a> {
    pub fn equals(facet: &'a str, value: &'a str) -> Self {
        Self {
            facet,
            value,
            rule_type: "String",
            equals: true,
        }
    }

    pub fn not_equals(facet: &'a str, value: &'a str) -> Self {
        Self {
            equals: false,
            ..Self::equals(facet, value)
        }
    }

    pub fn reference(facet: &'a str, target: &'a str, equals: bool) -> Self {
        Self {
            facet,
            value: target,
            rule_type: "Reference",
            equals,
        }
    }
}

/// Who an auth role applies to.
#[derive(Debug, Clone, Copy)]
pub enum Grantee<'a> {
    User(&'a str),
    Group(&'a str),
}

/// Adds a domain with a single domain rule and a single auth role.
pub fn add_domain(
    store: &MemoryContentStore,
    folder: &str,
    name: &str,
    rules: &[Rule<'_>],
    role: &str,
    grantee: Grantee<'_>,
) -> String {
    store.add_node(folder, name, NT_DOMAIN).unwrap();
    let domain = joined(folder, name);

    store.add_node(&domain, "rule", NT_DOMAIN_RULE).unwrap();
    let rule_path = joined(&domain, "rule");
    for (i, rule) in rules.iter().enumerate() {
        let name = format!("facet{i}");
        store.add_node(&rule_path, &name, NT_FACET_RULE).unwrap();
        let path = joined(&rule_path, &name);
        store.set_string(&path, P_FACET, rule.facet).unwrap();
        store.set_string(&path, P_VALUE, rule.value).unwrap();
        store.set_string(&path, P_TYPE, rule.rule_type).unwrap();
        store.set_bool(&path, P_EQUALS, rule.equals).unwrap();
    }

    store.add_node(&domain, "grant", NT_AUTH_ROLE).unwrap();
    let auth = joined(&domain, "grant");
    store.set_string(&auth, P_ROLE, role).unwrap();
    match grantee {
        Grantee::User(user) => store.set_strings(&auth, P_USERS, &[user]).unwrap(),
        Grantee::Group(group) => store.set_strings(&auth, P_GROUPS, &[group]).unwrap(),
    }
    domain
}

/// Grants `role` to `grantee` on every node without `authtest=hidden`.
pub fn add_visible_domain(store: &MemoryContentStore, role: &str, grantee: Grantee<'_>) {
    add_domain(
        store,
        DOMAINS,
        "visible",
        &[Rule::not_equals("authtest", "hidden")],
        role,
        grantee,
    );
}

// =============================================================================
// Repository
// =============================================================================

/// Commits the store and opens a repository with default configuration.
pub fn open(store: &Arc<MemoryContentStore>) -> Repository {
    try_open(store).unwrap()
}

pub fn try_open(
    store: &Arc<MemoryContentStore>,
) -> facetgate_domain::DomainResult<Repository> {
    store.save().unwrap();
    let index: Arc<dyn SearchIndex> = Arc::new(MemorySearchIndex::new(store.clone()));
    let shared: Arc<dyn ContentStore> = store.clone();
    Repository::open(shared, index, EngineConfig::default())
}

/// Name of the last path segment, `name[n]` included.
pub fn last_segment(path: &str) -> &str {
    match parent_path(path) {
        Some("/") => &path[1..],
        Some(parent) => &path[parent.len() + 1..],
        None => path,
    }
}

// =============================================================================
// Logs
// =============================================================================

/// In-memory sink for JSON log lines emitted on the current thread.
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<parking_lot::Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Installs a thread-scoped subscriber writing into the capture.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(test_subscriber(self.clone(), tracing::Level::DEBUG))
    }

    /// Parsed events whose message equals `message`.
    pub fn events(&self, message: &str) -> Vec<serde_json::Value> {
        String::from_utf8_lossy(&self.buffer.lock())
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter(|event| event["fields"]["message"] == message)
            .collect()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
