//! Per-node permission evaluation.

use std::sync::Arc;

use tracing::trace;

use super::compiled::{CompiledDomain, CompiledFacetRule, CompiledRules, RuleValue};
use super::types::{FacetValueSet, ReferenceTarget};
use crate::model::{expand, PrincipalContext, RoleSet};

/// Evaluates compiled rules against the facet values of one node.
///
/// Domains are OR'd: the result is the union of the roles granted by every
/// domain with at least one matching domain rule. Within a domain rule all
/// facet rules are AND'ed with short-circuit.
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    rules: Arc<CompiledRules>,
}

impl PermissionResolver {
    pub fn new(rules: Arc<CompiledRules>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &Arc<CompiledRules> {
        &self.rules
    }

    /// Roles granted to `principal` on the node. Refinement rules
    /// (`filter=true`) are ignored.
    pub fn resolve(&self, facets: &FacetValueSet, principal: &PrincipalContext) -> RoleSet {
        self.evaluate(facets, principal, false)
    }

    /// Like [`resolve`](Self::resolve) but also requires refinement rules to
    /// match. Used for faceted search candidates.
    pub fn resolve_refined(
        &self,
        facets: &FacetValueSet,
        principal: &PrincipalContext,
    ) -> RoleSet {
        self.evaluate(facets, principal, true)
    }

    fn evaluate(
        &self,
        facets: &FacetValueSet,
        principal: &PrincipalContext,
        refined: bool,
    ) -> RoleSet {
        if principal.superuser {
            return RoleSet::all(self.rules.roles());
        }

        let mut granted = RoleSet::empty();
        for domain in self.rules.domains() {
            let applicable: Vec<&str> = applicable_roles(domain, principal).collect();
            if applicable.is_empty() {
                continue;
            }
            if domain_matches(domain, facets, principal, refined) {
                trace!(domain = %domain.name, node = facets.id(), "domain matches");
                for role in applicable {
                    self.rules.roles().grant(role, &mut granted);
                }
            }
        }
        granted
    }
}

/// Roles the domain's auth roles grant to `principal`.
pub(crate) fn applicable_roles<'a>(
    domain: &'a CompiledDomain,
    principal: &'a PrincipalContext,
) -> impl Iterator<Item = &'a str> + 'a {
    domain
        .auth_roles
        .iter()
        .filter(move |auth_role| auth_role.applies_to(principal))
        .map(|auth_role| auth_role.role.as_str())
}

fn domain_matches(
    domain: &CompiledDomain,
    facets: &FacetValueSet,
    principal: &PrincipalContext,
    refined: bool,
) -> bool {
    domain.rules.iter().any(|rule| {
        rule.facet_rules
            .iter()
            .filter(|facet_rule| refined || !facet_rule.filter)
            .all(|facet_rule| facet_rule_matches(facet_rule, facets, principal))
    })
}

/// Evaluates one facet rule, honoring its `equals` polarity.
pub fn facet_rule_matches(
    rule: &CompiledFacetRule,
    facets: &FacetValueSet,
    principal: &PrincipalContext,
) -> bool {
    let found = match &rule.value {
        RuleValue::Literal(value) => facets.contains(&rule.field, value),
        RuleValue::Wildcard => facets.has(&rule.field),
        RuleValue::Expander(expander) => {
            expand(*expander, principal).any(|value| facets.contains(&rule.field, value))
        }
        RuleValue::Reference(ReferenceTarget::Resolved(id)) => {
            facets.contains(&rule.field, id.as_str())
        }
        // A missing target never matches: false for equals, true otherwise.
        RuleValue::Reference(ReferenceTarget::Missing) => false,
    };
    found == rule.equals
}
