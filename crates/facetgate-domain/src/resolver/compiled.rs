//! Compiled rule set: a [`RuleSnapshot`] with every reference rule value
//! resolved to a node identity.
//!
//! Compilation happens once per rule version. The compiled rules remember
//! which paths and identifiers they resolved, so a later creation or
//! removal of a referenced node can be recognized as a rule change.

use std::collections::BTreeSet;

use facetgate_storage::path::{is_same_or_descendant, parent_path};
use facetgate_storage::{ChangeEvent, ContentStore, Field, Generation, NodeId};
use tracing::debug;

use super::traits::ReferenceLookup;
use super::types::ReferenceTarget;
use crate::model::schema::{CONFIGURATION_ROOT, NT_FEDERATED_DOMAIN_FOLDER};
use crate::model::{AuthRole, Expander, FacetRule, FacetValue, RoleDefinitions, RuleSnapshot};

/// What a compiled facet rule compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleValue {
    Literal(String),
    /// The field has any value.
    Wildcard,
    Expander(Expander),
    Reference(ReferenceTarget),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledFacetRule {
    pub name: String,
    pub field: Field,
    pub value: RuleValue,
    pub equals: bool,
    pub filter: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledDomainRule {
    pub name: String,
    pub facet_rules: Vec<CompiledFacetRule>,
}

impl CompiledDomainRule {
    /// Rules taking part in the read decision.
    pub fn gating_rules(&self) -> impl Iterator<Item = &CompiledFacetRule> {
        self.facet_rules.iter().filter(|r| !r.filter)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledDomain {
    pub name: String,
    pub location: String,
    pub rules: Vec<CompiledDomainRule>,
    pub auth_roles: Vec<AuthRole>,
}

/// A rule snapshot ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    version: u64,
    generation: Generation,
    config_root: String,
    domains: Vec<CompiledDomain>,
    roles: RoleDefinitions,
    referenced_paths: BTreeSet<String>,
    referenced_ids: BTreeSet<NodeId>,
    source_paths: Vec<String>,
}

impl CompiledRules {
    /// Compiles a snapshot, resolving reference values through `lookup`.
    pub fn compile<L>(snapshot: &RuleSnapshot, version: u64, lookup: &L) -> Self
    where
        L: ReferenceLookup + ?Sized,
    {
        let mut referenced_paths = BTreeSet::new();
        let mut referenced_ids = BTreeSet::new();

        let domains = snapshot
            .domains
            .iter()
            .map(|domain| CompiledDomain {
                name: domain.name.clone(),
                location: domain.location.clone(),
                rules: domain
                    .rules
                    .iter()
                    .map(|rule| CompiledDomainRule {
                        name: rule.name.clone(),
                        facet_rules: rule
                            .facet_rules
                            .iter()
                            .map(|facet_rule| {
                                compile_facet_rule(
                                    facet_rule,
                                    lookup,
                                    &mut referenced_paths,
                                    &mut referenced_ids,
                                )
                            })
                            .collect(),
                    })
                    .collect(),
                auth_roles: domain.auth_roles.clone(),
            })
            .collect();

        Self {
            version,
            generation: snapshot.generation,
            config_root: CONFIGURATION_ROOT.to_string(),
            domains,
            roles: snapshot.roles.clone(),
            referenced_paths,
            referenced_ids,
            source_paths: vec![CONFIGURATION_ROOT.to_string()],
        }
    }

    /// Records where the rules were loaded from.
    pub fn with_sources(mut self, config_root: impl Into<String>, source_paths: Vec<String>) -> Self {
        self.config_root = config_root.into();
        self.source_paths = source_paths;
        self
    }

    /// An empty rule set: nothing is granted to anyone but the superuser.
    pub fn empty() -> Self {
        Self::compile(
            &RuleSnapshot::new(Generation::ZERO, Vec::new(), RoleDefinitions::builtin()),
            0,
            &NoReferences,
        )
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn domains(&self) -> &[CompiledDomain] {
        &self.domains
    }

    pub fn roles(&self) -> &RoleDefinitions {
        &self.roles
    }

    pub fn referenced_paths(&self) -> impl Iterator<Item = &str> {
        self.referenced_paths.iter().map(String::as_str)
    }

    pub fn source_paths(&self) -> &[String] {
        &self.source_paths
    }

    /// True when `event` may change the rule configuration or the identity
    /// of a referenced node.
    ///
    /// New federated folders are detected by looking up the type of nodes
    /// added or moved to a valid anchor location.
    pub fn is_affected_by(&self, event: &ChangeEvent, store: &dyn ContentStore) -> bool {
        if self.source_paths.iter().any(|source| event.affects(source)) {
            return true;
        }
        if self.referenced_ids.contains(event.id()) {
            return true;
        }
        if self
            .referenced_paths
            .iter()
            .any(|referenced| touches_reference(event, referenced))
        {
            return true;
        }
        let anchored = match event {
            ChangeEvent::NodeAdded { path, .. } => Some(path),
            ChangeEvent::NodeMoved { to, .. } => Some(to),
            _ => None,
        };
        anchored.is_some_and(|path| {
            self.is_anchor(path)
                && store
                    .get_node(event.id())
                    .is_ok_and(|node| node.primary_type == NT_FEDERATED_DOMAIN_FOLDER)
        })
    }

    fn is_anchor(&self, path: &str) -> bool {
        matches!(parent_path(path), Some(parent) if parent == "/" || parent == self.config_root)
    }
}

/// A referenced path is touched when a node appears at it, or when it or
/// one of its ancestors is removed or moved away.
///
/// Sibling indices are ignored: removing `/a/f` renumbers `/a/f[2]`, so any
/// change to a same-name sibling along the way counts.
fn touches_reference(event: &ChangeEvent, referenced: &str) -> bool {
    let referenced = without_sibling_indices(referenced);
    let touches = |path: &str| is_same_or_descendant(&referenced, &without_sibling_indices(path));
    match event {
        ChangeEvent::NodeAdded { path, .. } | ChangeEvent::NodeRemoved { path, .. } => {
            touches(path)
        }
        ChangeEvent::NodeMoved { from, to, .. } => touches(from) || touches(to),
        ChangeEvent::PropertyChanged { .. } => false,
    }
}

fn without_sibling_indices(path: &str) -> String {
    path.split('/')
        .map(|segment| segment.split_once('[').map_or(segment, |(name, _)| name))
        .collect::<Vec<_>>()
        .join("/")
}

fn compile_facet_rule<L>(
    rule: &FacetRule,
    lookup: &L,
    referenced_paths: &mut BTreeSet<String>,
    referenced_ids: &mut BTreeSet<NodeId>,
) -> CompiledFacetRule
where
    L: ReferenceLookup + ?Sized,
{
    let value = match (&rule.value, rule.is_reference()) {
        (FacetValue::Wildcard, _) => RuleValue::Wildcard,
        (FacetValue::Expander(expander), _) => RuleValue::Expander(*expander),
        (FacetValue::Literal(literal), false) => RuleValue::Literal(literal.clone()),
        (FacetValue::Literal(reference), true) => {
            if reference.starts_with('/') {
                referenced_paths.insert(reference.clone());
            }
            match lookup.lookup(reference) {
                Some(target) => {
                    referenced_paths.insert(target.path);
                    referenced_ids.insert(target.id.clone());
                    RuleValue::Reference(ReferenceTarget::Resolved(target.id))
                }
                None => {
                    debug!(rule = %rule.name, %reference, "reference target does not exist");
                    if !reference.starts_with('/') {
                        // Watch for a node re-created under the same identifier
                        referenced_ids.insert(NodeId::new(reference.as_str()));
                    }
                    RuleValue::Reference(ReferenceTarget::Missing)
                }
            }
        }
    };
    CompiledFacetRule {
        name: rule.name.clone(),
        field: rule.facet.field(),
        value,
        equals: rule.equals,
        filter: rule.filter,
    }
}

struct NoReferences;

impl ReferenceLookup for NoReferences {
    fn lookup(&self, _reference: &str) -> Option<super::traits::ResolvedReference> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Domain, DomainRule};
    use crate::resolver::tests::mocks::MockLookup;

    fn snapshot(rules: Vec<FacetRule>) -> RuleSnapshot {
        RuleSnapshot::new(
            Generation::new(1),
            vec![Domain::new("d").with_rule(DomainRule::new("r", rules))],
            RoleDefinitions::builtin(),
        )
    }

    #[test]
    fn test_reference_values_are_resolved_once() {
        let lookup = MockLookup::new().with_node("/a/b/c", "abc");
        let compiled = CompiledRules::compile(
            &snapshot(vec![
                FacetRule::reference("jcr:path", "/a/b/c", true),
                FacetRule::reference("jcr:path", "/x", false),
            ]),
            7,
            &lookup,
        );

        let rules = &compiled.domains()[0].rules[0].facet_rules;
        assert_eq!(
            rules[0].value,
            RuleValue::Reference(ReferenceTarget::Resolved(NodeId::new("abc")))
        );
        assert_eq!(rules[1].value, RuleValue::Reference(ReferenceTarget::Missing));
        assert_eq!(compiled.version(), 7);
        let paths: Vec<&str> = compiled.referenced_paths().collect();
        assert_eq!(paths, vec!["/a/b/c", "/x"]);
    }

    #[test]
    fn test_literal_and_expander_values() {
        let compiled = CompiledRules::compile(
            &snapshot(vec![
                FacetRule::equals("authtest", "canread"),
                FacetRule::equals("owner", "__user__"),
                FacetRule::not_equals("state", "*"),
            ]),
            1,
            &MockLookup::new(),
        );
        let rules = &compiled.domains()[0].rules[0].facet_rules;
        assert_eq!(rules[0].value, RuleValue::Literal("canread".into()));
        assert_eq!(rules[1].value, RuleValue::Expander(Expander::User));
        assert_eq!(rules[2].value, RuleValue::Wildcard);
        assert!(!rules[2].equals);
    }

    #[test]
    fn test_missing_reference_creation_is_a_rule_change() {
        let compiled = CompiledRules::compile(
            &snapshot(vec![FacetRule::reference("jcr:path", "/a/b/c", true)]),
            1,
            &MockLookup::new(),
        );
        let added = ChangeEvent::NodeAdded {
            id: NodeId::new("new"),
            path: "/a/b/c".to_string(),
        };
        let removed_parent = ChangeEvent::NodeRemoved {
            id: NodeId::new("p"),
            path: "/a".to_string(),
        };
        let unrelated = ChangeEvent::NodeAdded {
            id: NodeId::new("other"),
            path: "/a/b/d".to_string(),
        };
        assert!(touches_reference(&added, "/a/b/c"));
        assert!(touches_reference(&removed_parent, "/a/b/c"));
        assert!(!touches_reference(&unrelated, "/a/b/c"));
        assert_eq!(compiled.referenced_paths().count(), 1);
    }

    #[test]
    fn test_missing_identifier_reference_is_watched() {
        let compiled = CompiledRules::compile(
            &snapshot(vec![FacetRule::reference("jcr:path", "fixed-id", true)]),
            1,
            &MockLookup::new(),
        );
        assert_eq!(
            compiled.domains()[0].rules[0].facet_rules[0].value,
            RuleValue::Reference(ReferenceTarget::Missing)
        );
        assert!(compiled.referenced_ids.contains(&NodeId::new("fixed-id")));
        assert_eq!(compiled.referenced_paths().count(), 0);
    }

    #[test]
    fn test_sibling_renumbering_touches_indexed_reference() {
        let removed_first = ChangeEvent::NodeRemoved {
            id: NodeId::new("f1"),
            path: "/a/f".to_string(),
        };
        let removed_other = ChangeEvent::NodeRemoved {
            id: NodeId::new("g"),
            path: "/a/g".to_string(),
        };
        assert!(touches_reference(&removed_first, "/a/f[2]"));
        assert!(touches_reference(&removed_first, "/a/f[2]/child"));
        assert!(!touches_reference(&removed_other, "/a/f[2]"));
        assert_eq!(without_sibling_indices("/a[3]/f[2]/x"), "/a/f/x");
        assert_eq!(without_sibling_indices("/"), "/");
    }

    #[test]
    fn test_empty_rules_have_no_domains() {
        let rules = CompiledRules::empty();
        assert!(rules.domains().is_empty());
        assert_eq!(rules.version(), 0);
    }
}
