//! Benchmarks for session reads, search and faceted navigation.
//!
//! Run with: cargo bench -p facetgate-engine

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use facetgate_domain::model::schema::{
    CONFIGURATION_ROOT, DOMAINS_FOLDER, NT_AUTH_ROLE, NT_DOMAIN, NT_DOMAIN_FOLDER,
    NT_DOMAIN_RULE, NT_FACETSEARCH, NT_FACET_RULE, P_DOCBASE, P_EQUALS, P_FACET, P_FACETS,
    P_GROUPS, P_ROLE, P_TYPE, P_VALUE,
};
use facetgate_domain::model::{PrincipalContext, ROLE_READONLY};
use facetgate_domain::Page;
use facetgate_engine::{EngineConfig, Repository};
use facetgate_storage::{
    ContentStore, Field, Filter, MemoryContentStore, MemorySearchIndex, SearchIndex,
    SearchQuery, DOCUMENT_TYPE,
};

const DOCUMENTS: usize = 500;

/// Editors read everything that is not hidden; every tenth document is.
fn repository() -> Repository {
    let store = MemoryContentStore::new_shared();
    store
        .add_node("/", "hippo:configuration", "hipposys:configuration")
        .unwrap();
    store
        .add_node(CONFIGURATION_ROOT, DOMAINS_FOLDER, NT_DOMAIN_FOLDER)
        .unwrap();
    let domains = format!("{CONFIGURATION_ROOT}/{DOMAINS_FOLDER}");
    store.add_node(&domains, "visible", NT_DOMAIN).unwrap();
    store
        .add_node(&format!("{domains}/visible"), "rule", NT_DOMAIN_RULE)
        .unwrap();
    let rule = format!("{domains}/visible/rule/facet0");
    store
        .add_node(&format!("{domains}/visible/rule"), "facet0", NT_FACET_RULE)
        .unwrap();
    store.set_string(&rule, P_FACET, "state").unwrap();
    store.set_string(&rule, P_VALUE, "hidden").unwrap();
    store.set_string(&rule, P_TYPE, "String").unwrap();
    store.set_bool(&rule, P_EQUALS, false).unwrap();
    store
        .add_node(&format!("{domains}/visible"), "grant", NT_AUTH_ROLE)
        .unwrap();
    let grant = format!("{domains}/visible/grant");
    store.set_string(&grant, P_ROLE, ROLE_READONLY).unwrap();
    store.set_strings(&grant, P_GROUPS, &["editors"]).unwrap();

    store.add_node("/", "docs", "nt:unstructured").unwrap();
    for i in 0..DOCUMENTS {
        let name = format!("doc{i}");
        let path = format!("/docs/{name}");
        store.add_node("/docs", &name, DOCUMENT_TYPE).unwrap();
        let state = if i % 10 == 0 { "hidden" } else { "published" };
        store.set_string(&path, "state", state).unwrap();
        store
            .set_string(&path, "category", &format!("c{}", i % 7))
            .unwrap();
    }
    store.add_node("/", "nav", NT_FACETSEARCH).unwrap();
    store.set_string("/nav", P_DOCBASE, "/docs").unwrap();
    store
        .set_strings("/nav", P_FACETS, &["category", "state"])
        .unwrap();
    store.save().unwrap();

    let index: Arc<dyn SearchIndex> = Arc::new(MemorySearchIndex::new(store.clone()));
    let shared: Arc<dyn ContentStore> = store;
    Repository::open(shared, index, EngineConfig::default()).unwrap()
}

fn session_benchmark(c: &mut Criterion) {
    let repository = repository();
    let principal = PrincipalContext::new("bob").with_group("editors");
    let session = repository.login(principal.clone()).unwrap();

    // Warm the decision cache
    session.get_node("/docs/doc42").unwrap();
    c.bench_function("get_node_cached", |b| {
        b.iter(|| black_box(session.get_node(black_box("/docs/doc42")).unwrap()))
    });

    let query = SearchQuery::new(Filter::term(Field::NodeType, DOCUMENT_TYPE))
        .with_order_by("category");
    c.bench_function(&format!("search_{DOCUMENTS}_documents"), |b| {
        b.iter(|| black_box(session.search(&query, Page::new(0, 20)).unwrap()))
    });

    c.bench_function("facet_group_cold", |b| {
        b.iter(|| {
            let session = repository.login(principal.clone()).unwrap();
            black_box(session.get_node("/nav/c3/published").unwrap())
        })
    });
}

criterion_group!(benches, session_benchmark);
criterion_main!(benches);
