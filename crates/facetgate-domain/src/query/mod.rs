//! Authorization query builder.
//!
//! Compiles the same rule set the [`PermissionResolver`](crate::resolver::PermissionResolver)
//! evaluates into an index-native [`Filter`]: a disjunction over the domains
//! granting read to the principal, of disjunctions over their domain rules,
//! of conjunctions over facet rules. Expanders become OR-branches at compile
//! time. The superuser compiles to [`AuthorizationFilter::MatchAll`].

use facetgate_storage::{Filter, NodeId, SearchIndex, SearchQuery};
use tracing::{debug, instrument};

use crate::error::DomainResult;
use crate::model::{expand, PrincipalContext, RoleSet};
use crate::resolver::{
    applicable_roles, CompiledDomain, CompiledFacetRule, CompiledRules, ReferenceTarget, RuleValue,
};

/// A compiled authorization constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationFilter {
    /// No filtering applied.
    MatchAll,
    Filter(Filter),
}

impl AuthorizationFilter {
    pub fn is_match_all(&self) -> bool {
        matches!(self, AuthorizationFilter::MatchAll)
    }

    /// The filter to hand to the index.
    pub fn to_filter(&self) -> Filter {
        match self {
            AuthorizationFilter::MatchAll => Filter::All,
            AuthorizationFilter::Filter(filter) => filter.clone(),
        }
    }
}

/// Builds authorization filters from compiled rules.
pub struct AuthorizationQueryBuilder<'a> {
    rules: &'a CompiledRules,
}

impl<'a> AuthorizationQueryBuilder<'a> {
    pub fn new(rules: &'a CompiledRules) -> Self {
        Self { rules }
    }

    /// Filter equivalent to "the resolver grants read".
    pub fn compile(&self, principal: &PrincipalContext) -> AuthorizationFilter {
        self.build(principal, false)
    }

    /// Filter equivalent to "the refined resolver grants read".
    pub fn compile_refined(&self, principal: &PrincipalContext) -> AuthorizationFilter {
        self.build(principal, true)
    }

    fn build(&self, principal: &PrincipalContext, refined: bool) -> AuthorizationFilter {
        if principal.superuser {
            return AuthorizationFilter::MatchAll;
        }
        let filter = Filter::or(
            self.rules
                .domains()
                .iter()
                .filter(|domain| self.grants_read(domain, principal))
                .map(|domain| compile_domain(domain, principal, refined)),
        );
        debug!(principal = %principal.user_id, refined, %filter, "compiled authorization filter");
        AuthorizationFilter::Filter(filter)
    }

    fn grants_read(&self, domain: &CompiledDomain, principal: &PrincipalContext) -> bool {
        let mut roles = RoleSet::empty();
        for role in applicable_roles(domain, principal) {
            self.rules.roles().grant(role, &mut roles);
        }
        roles.can_read()
    }
}

fn compile_domain(domain: &CompiledDomain, principal: &PrincipalContext, refined: bool) -> Filter {
    Filter::or(domain.rules.iter().map(|rule| {
        Filter::and(
            rule.facet_rules
                .iter()
                .filter(|facet_rule| refined || !facet_rule.filter)
                .map(|facet_rule| compile_facet_rule(facet_rule, principal)),
        )
    }))
}

fn compile_facet_rule(rule: &CompiledFacetRule, principal: &PrincipalContext) -> Filter {
    let positive = match &rule.value {
        RuleValue::Literal(value) => Filter::term(rule.field.clone(), value.clone()),
        RuleValue::Wildcard => Filter::Exists(rule.field.clone()),
        RuleValue::Expander(expander) => Filter::or(
            expand(*expander, principal).map(|value| Filter::term(rule.field.clone(), value)),
        ),
        RuleValue::Reference(ReferenceTarget::Resolved(id)) => {
            Filter::term(rule.field.clone(), id.as_str())
        }
        RuleValue::Reference(ReferenceTarget::Missing) => Filter::None,
    };
    if rule.equals {
        positive
    } else {
        Filter::not(positive)
    }
}

/// Paging window applied to authorized hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Page {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }
}

/// Result of an authorized search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    /// Hits within the page.
    pub nodes: Vec<NodeId>,
    /// Number of hits within the page.
    pub size: usize,
    /// Number of authorized hits ignoring the page, `-1` when the query has
    /// no deterministic order.
    pub total_size: i64,
    /// False when the principal is unfiltered.
    pub authorization_applied: bool,
}

/// Runs `query` with `authorization` AND'ed to it and pages the hits.
#[instrument(skip(index, query, authorization), fields(query = %query.filter))]
pub fn execute(
    index: &dyn SearchIndex,
    query: &SearchQuery,
    authorization: &AuthorizationFilter,
    page: Page,
) -> DomainResult<SearchResult> {
    let hits = index.search(query, &authorization.to_filter())?;
    let total_size = if query.is_ordered() {
        hits.len() as i64
    } else {
        -1
    };
    let nodes: Vec<NodeId> = hits
        .into_iter()
        .skip(page.offset)
        .take(page.limit.unwrap_or(usize::MAX))
        .collect();
    Ok(SearchResult {
        size: nodes.len(),
        nodes,
        total_size,
        authorization_applied: !authorization.is_match_all(),
    })
}
