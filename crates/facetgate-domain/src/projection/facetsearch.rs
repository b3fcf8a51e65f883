//! Faceted navigation (facetsearch): candidate collection and grouping.

use std::collections::{BTreeMap, HashSet};

use facetgate_storage::{
    ContentStore, Field, Filter, IndexedDocument, Node, NodeId, SearchQuery, StorageError,
    DOCUMENT_TYPE,
};
use tracing::{debug, trace};

use super::ProjectionContext;
use crate::canonical::{representative, VariantChoice};
use crate::error::DomainResult;
use crate::model::schema::{P_DOCBASE, P_FACETS, P_NAMESPACED};
use crate::model::Facet;

/// The persisted definition of a facetsearch node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetSearchDefinition {
    pub docbase: Option<String>,
    pub facets: Vec<String>,
    pub namespaced: bool,
}

impl FacetSearchDefinition {
    pub fn from_node(node: &Node) -> Self {
        Self {
            docbase: node
                .string_property(P_DOCBASE)
                .filter(|docbase| !docbase.is_empty()),
            facets: node.string_values(P_FACETS),
            namespaced: node.bool_property(P_NAMESPACED).unwrap_or(false),
        }
    }

    /// Facet field at grouping level `level`.
    pub fn field(&self, level: usize) -> Option<Field> {
        self.facets.get(level).map(|facet| Facet::parse(facet).field())
    }
}

/// A document the principal may see in a faceted search.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub node: Node,
    pub document: IndexedDocument,
    /// Set when the document is one of several variants of a handle.
    pub variant: Option<VariantChoice>,
}

/// Collects the authorized documents below `docbase` in index order.
///
/// The index prunes with the refined authorization filter; each hit is then
/// verified with the resolver so counts and result sets come from the same
/// decisions. Variants of one handle collapse to the first authorized one
/// in storage order.
pub fn collect_candidates(ctx: &ProjectionContext<'_>, docbase: &Node) -> DomainResult<Vec<Candidate>> {
    let query = SearchQuery::new(Filter::and([
        Filter::term(Field::NodeType, DOCUMENT_TYPE),
        Filter::term(Field::Path, docbase.id.as_str()),
        Filter::not(Filter::term(Field::Id, docbase.id.as_str())),
    ]));
    let authorization = ctx.authorizer.filter(true);
    let hits = ctx.index.search(&query, &authorization.to_filter())?;

    let mut verified = Vec::with_capacity(hits.len());
    for id in hits {
        let node = match ctx.store.get_node(&id) {
            Ok(node) => node,
            Err(StorageError::NodeNotFound { .. }) => {
                debug!(%id, "search hit vanished");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if ctx.authorizer.decide_refined(&node).can_read() {
            verified.push(node);
        } else {
            trace!(node = %node.path, "candidate rejected by refined decision");
        }
    }

    let accepted: HashSet<NodeId> = verified.iter().map(|node| node.id.clone()).collect();
    let mut seen_handles: HashSet<NodeId> = HashSet::new();
    let mut candidates = Vec::with_capacity(verified.len());
    for node in verified {
        let Some(parent) = handle_of(ctx.store, &node)? else {
            candidates.push(candidate(node, None));
            continue;
        };
        if !seen_handles.insert(parent.id.clone()) {
            continue;
        }
        let variants = ctx.store.children(&parent.id)?;
        if let Some((chosen, choice)) =
            representative(&parent, &variants, |variant| Ok(accepted.contains(&variant.id)))?
        {
            candidates.push(candidate(chosen.clone(), Some(choice)));
        }
    }
    Ok(candidates)
}

fn candidate(node: Node, variant: Option<VariantChoice>) -> Candidate {
    Candidate {
        document: IndexedDocument::from_node(&node),
        node,
        variant,
    }
}

fn handle_of(store: &dyn ContentStore, node: &Node) -> DomainResult<Option<Node>> {
    let Some(parent_id) = &node.parent else {
        return Ok(None);
    };
    match store.get_node(parent_id) {
        Ok(parent) if parent.is_handle() => Ok(Some(parent)),
        Ok(_) => Ok(None),
        Err(StorageError::NodeNotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Candidates matching every selected value, one per grouping level.
pub fn matching<'a>(
    definition: &'a FacetSearchDefinition,
    candidates: &'a [Candidate],
    selection: &'a [String],
) -> impl Iterator<Item = &'a Candidate> + 'a {
    candidates.iter().filter(move |candidate| {
        selection.iter().enumerate().all(|(level, value)| {
            definition
                .field(level)
                .is_some_and(|field| candidate.document.contains(&field, value))
        })
    })
}

/// Distinct values of the next facet among the matching candidates, with
/// the number of candidates carrying each. A multi-valued candidate counts
/// in every group it carries.
pub fn groups(
    definition: &FacetSearchDefinition,
    candidates: &[Candidate],
    selection: &[String],
) -> BTreeMap<String, usize> {
    let mut groups = BTreeMap::new();
    let Some(field) = definition.field(selection.len()) else {
        return groups;
    };
    for candidate in matching(definition, candidates, selection) {
        let mut values = candidate.document.values(&field);
        values.sort_unstable();
        values.dedup();
        for value in values {
            *groups.entry(value.to_string()).or_insert(0) += 1;
        }
    }
    groups
}
