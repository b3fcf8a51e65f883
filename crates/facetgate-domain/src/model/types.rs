//! Core type definitions for the rule model.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use facetgate_storage::{Field, Generation};
use serde::{Deserialize, Serialize};

use super::expander::Expander;

/// A privilege a role can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Privilege {
    Read,
    Write,
    Admin,
}

impl Privilege {
    /// Parses `read`/`jcr:read`, `write`/`jcr:write`, `admin`/`jcr:all`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "read" | "jcr:read" => Some(Privilege::Read),
            "write" | "jcr:write" => Some(Privilege::Write),
            "admin" | "jcr:all" | "hippo:admin" => Some(Privilege::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Privilege::Read => "read",
            Privilege::Write => "write",
            Privilege::Admin => "admin",
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built-in role names.
pub const ROLE_READONLY: &str = "readonly";
pub const ROLE_READWRITE: &str = "readwrite";
pub const ROLE_ADMIN: &str = "admin";

/// A named role: its own privileges plus the roles it includes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub name: String,
    pub privileges: BTreeSet<Privilege>,
    pub includes: BTreeSet<String>,
}

impl RoleDefinition {
    pub fn new(name: impl Into<String>, privileges: impl IntoIterator<Item = Privilege>) -> Self {
        Self {
            name: name.into(),
            privileges: privileges.into_iter().collect(),
            includes: BTreeSet::new(),
        }
    }

    pub fn including(mut self, role: impl Into<String>) -> Self {
        self.includes.insert(role.into());
        self
    }
}

/// All role definitions of a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinitions {
    roles: BTreeMap<String, RoleDefinition>,
}

impl Default for RoleDefinitions {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RoleDefinitions {
    pub fn empty() -> Self {
        Self {
            roles: BTreeMap::new(),
        }
    }

    /// `readonly`, `readwrite` and `admin`, each including the previous one.
    pub fn builtin() -> Self {
        let mut defs = Self::empty();
        defs.insert(RoleDefinition::new(ROLE_READONLY, [Privilege::Read]));
        defs.insert(
            RoleDefinition::new(ROLE_READWRITE, [Privilege::Read, Privilege::Write])
                .including(ROLE_READONLY),
        );
        defs.insert(
            RoleDefinition::new(
                ROLE_ADMIN,
                [Privilege::Read, Privilege::Write, Privilege::Admin],
            )
            .including(ROLE_READWRITE),
        );
        defs
    }

    pub fn insert(&mut self, definition: RoleDefinition) {
        self.roles.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&RoleDefinition> {
        self.roles.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Adds `role` and everything it transitively includes to `into`.
    /// Unknown roles are granted by name only, without privileges.
    pub fn grant(&self, role: &str, into: &mut RoleSet) {
        let mut pending = vec![role.to_string()];
        while let Some(name) = pending.pop() {
            if !into.roles.insert(name.clone()) {
                continue;
            }
            if let Some(definition) = self.roles.get(&name) {
                into.privileges.extend(definition.privileges.iter().copied());
                pending.extend(
                    definition
                        .includes
                        .iter()
                        .filter(|r| !into.roles.contains(*r))
                        .cloned(),
                );
            }
        }
    }
}

/// The roles granted to a principal on a node, closure applied, together
/// with the union of their privileges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSet {
    roles: BTreeSet<String>,
    privileges: BTreeSet<Privilege>,
}

impl RoleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every defined role and every privilege.
    pub fn all(definitions: &RoleDefinitions) -> Self {
        let mut set = Self::empty();
        for name in definitions.names() {
            definitions.grant(name, &mut set);
        }
        set.privileges
            .extend([Privilege::Read, Privilege::Write, Privilege::Admin]);
        set
    }

    pub fn contains(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_privilege(&self, privilege: Privilege) -> bool {
        self.privileges.contains(&privilege)
    }

    pub fn can_read(&self) -> bool {
        self.has_privilege(Privilege::Read)
    }

    pub fn can_write(&self) -> bool {
        self.has_privilege(Privilege::Write)
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.privileges.is_empty()
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }

    pub fn privileges(&self) -> impl Iterator<Item = Privilege> + '_ {
        self.privileges.iter().copied()
    }

    pub fn add_privilege(&mut self, privilege: Privilege) {
        self.privileges.insert(privilege);
    }

    pub fn union(&mut self, other: &RoleSet) {
        self.roles.extend(other.roles.iter().cloned());
        self.privileges.extend(other.privileges.iter().copied());
    }
}

/// The facet a rule inspects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facet {
    /// `nodename`
    NodeName,
    /// `nodetype` or `jcr:primaryType`: primary type or any mixin.
    NodeType,
    /// `jcr:uuid`: the node identifier.
    Identifier,
    /// `jcr:path`: the node itself or any of its ancestors.
    Path,
    Property(String),
}

impl Facet {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "nodename" => Facet::NodeName,
            "nodetype" | "jcr:primaryType" => Facet::NodeType,
            "jcr:uuid" => Facet::Identifier,
            "jcr:path" => Facet::Path,
            other => Facet::Property(other.to_string()),
        }
    }

    /// The index field carrying this facet.
    pub fn field(&self) -> Field {
        match self {
            Facet::NodeName => Field::Name,
            Facet::NodeType => Field::NodeType,
            Facet::Identifier => Field::Id,
            Facet::Path => Field::Path,
            Facet::Property(name) => Field::Property(name.clone()),
        }
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facet::NodeName => f.write_str("nodename"),
            Facet::NodeType => f.write_str("nodetype"),
            Facet::Identifier => f.write_str("jcr:uuid"),
            Facet::Path => f.write_str("jcr:path"),
            Facet::Property(name) => f.write_str(name),
        }
    }
}

/// A rule value: a literal, the `*` wildcard, or a per-principal expander.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FacetValue {
    Literal(String),
    Wildcard,
    Expander(Expander),
}

impl FacetValue {
    pub fn parse(raw: &str) -> Self {
        if raw == "*" {
            return FacetValue::Wildcard;
        }
        match Expander::from_token(raw) {
            Some(expander) => FacetValue::Expander(expander),
            None => FacetValue::Literal(raw.to_string()),
        }
    }
}

impl fmt::Display for FacetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacetValue::Literal(value) => f.write_str(value),
            FacetValue::Wildcard => f.write_str("*"),
            FacetValue::Expander(expander) => f.write_str(expander.token()),
        }
    }
}

/// How a facet rule value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacetRuleType {
    String,
    Name,
    Boolean,
    Long,
    /// The value is a path or identifier resolved to a node identity.
    Reference,
}

impl FacetRuleType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "string" => Some(FacetRuleType::String),
            "name" => Some(FacetRuleType::Name),
            "boolean" => Some(FacetRuleType::Boolean),
            "long" => Some(FacetRuleType::Long),
            "reference" => Some(FacetRuleType::Reference),
            _ => None,
        }
    }
}

/// A single facet comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetRule {
    pub name: String,
    pub facet: Facet,
    pub value: FacetValue,
    pub rule_type: FacetRuleType,
    pub equals: bool,
    /// Only refines faceted search candidates; ignored for the read decision.
    pub filter: bool,
}

impl FacetRule {
    pub fn new(facet: &str, value: &str, rule_type: FacetRuleType, equals: bool) -> Self {
        Self {
            name: format!("{facet}-{}", if equals { "eq" } else { "ne" }),
            facet: Facet::parse(facet),
            value: FacetValue::parse(value),
            rule_type,
            equals,
            filter: false,
        }
    }

    pub fn equals(facet: &str, value: &str) -> Self {
        Self::new(facet, value, FacetRuleType::String, true)
    }

    pub fn not_equals(facet: &str, value: &str) -> Self {
        Self::new(facet, value, FacetRuleType::String, false)
    }

    pub fn reference(facet: &str, target: &str, equals: bool) -> Self {
        Self::new(facet, target, FacetRuleType::Reference, equals)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn as_filter(mut self) -> Self {
        self.filter = true;
        self
    }

    pub fn is_reference(&self) -> bool {
        self.rule_type == FacetRuleType::Reference
    }
}

/// A named conjunction of facet rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRule {
    pub name: String,
    pub facet_rules: Vec<FacetRule>,
}

impl DomainRule {
    pub fn new(name: impl Into<String>, facet_rules: Vec<FacetRule>) -> Self {
        Self {
            name: name.into(),
            facet_rules,
        }
    }
}

/// Users meaning "every authenticated principal".
pub const EVERYONE: &str = "*";

/// Grants `role` to a set of users and groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRole {
    pub name: String,
    pub users: BTreeSet<String>,
    pub groups: BTreeSet<String>,
    pub role: String,
}

impl AuthRole {
    pub fn new(role: impl Into<String>) -> Self {
        let role = role.into();
        Self {
            name: role.clone(),
            users: BTreeSet::new(),
            groups: BTreeSet::new(),
            role,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.users.insert(user.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    /// True when the principal is one of the users or member of one of the groups.
    pub fn applies_to(&self, principal: &PrincipalContext) -> bool {
        self.users.contains(EVERYONE)
            || self.users.contains(&principal.user_id)
            || self.groups.iter().any(|g| principal.group_ids.contains(g))
    }
}

/// A named set of domain rules (OR'd) with the auth roles they grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    /// Path of the configuration node the domain was loaded from.
    pub location: String,
    pub rules: Vec<DomainRule>,
    pub auth_roles: Vec<AuthRole>,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            location: format!("/{name}"),
            name,
            rules: Vec::new(),
            auth_roles: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: DomainRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_auth_role(mut self, auth_role: AuthRole) -> Self {
        self.auth_roles.push(auth_role);
        self
    }

    pub fn facet_rules(&self) -> impl Iterator<Item = &FacetRule> {
        self.rules.iter().flat_map(|r| r.facet_rules.iter())
    }
}

/// The identity of the principal a session acts for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalContext {
    pub user_id: String,
    pub group_ids: BTreeSet<String>,
    pub role_ids: BTreeSet<String>,
    /// The repository's built-in superuser bypasses all rules.
    pub superuser: bool,
}

impl PrincipalContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            group_ids: BTreeSet::new(),
            role_ids: BTreeSet::new(),
            superuser: false,
        }
    }

    pub fn superuser(user_id: impl Into<String>) -> Self {
        Self {
            superuser: true,
            ..Self::new(user_id)
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group_ids.insert(group.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role_ids.insert(role.into());
        self
    }
}

/// A versioned snapshot of the whole rule configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    /// Content generation the snapshot was read at.
    pub generation: Generation,
    pub domains: Vec<Domain>,
    pub roles: RoleDefinitions,
}

impl RuleSnapshot {
    pub fn new(generation: Generation, domains: Vec<Domain>, roles: RoleDefinitions) -> Self {
        Self {
            generation,
            domains,
            roles,
        }
    }

    /// Serializes the snapshot for export or diagnostics.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
