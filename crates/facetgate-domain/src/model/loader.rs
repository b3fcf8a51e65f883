//! Loads the rule configuration from the content tree.
//!
//! Domains are read from the domain folder below the configuration root and
//! from federated domain folders. A federated folder is honoured only when it
//! sits directly below the root node or directly below the configuration
//! root; anywhere else it is skipped and reported as a [`LoadDiagnostic`].

use facetgate_storage::path::parent_path;
use facetgate_storage::{
    ContentStore, Field, Filter, Node, SearchIndex, SearchQuery, StorageError,
};
use tracing::{debug, instrument, warn};

use super::schema::*;
use super::types::{
    AuthRole, Domain, DomainRule, FacetRule, FacetRuleType, FacetValue, Facet, Privilege,
    RoleDefinition, RoleDefinitions, RuleSnapshot,
};
use crate::error::{DomainError, DomainResult};
use crate::validation::RuleValidator;

/// A non-fatal problem found while loading rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadDiagnostic {
    pub path: String,
    pub message: String,
}

/// The result of a successful load.
#[derive(Debug, Clone)]
pub struct LoadedRules {
    pub snapshot: RuleSnapshot,
    pub diagnostics: Vec<LoadDiagnostic>,
    /// Roots whose content defines the rules: the configuration root and
    /// every honoured federated folder.
    pub source_paths: Vec<String>,
}

/// Reads domains, domain rules, facet rules, auth roles and role definitions.
pub struct RuleLoader<'a> {
    store: &'a dyn ContentStore,
    index: &'a dyn SearchIndex,
    config_root: String,
}

impl<'a> RuleLoader<'a> {
    pub fn new(store: &'a dyn ContentStore, index: &'a dyn SearchIndex) -> Self {
        Self {
            store,
            index,
            config_root: CONFIGURATION_ROOT.to_string(),
        }
    }

    pub fn with_config_root(mut self, config_root: impl Into<String>) -> Self {
        self.config_root = config_root.into();
        self
    }

    /// Loads and validates the whole configuration.
    ///
    /// Malformed rules and validation failures are fatal: authorization is
    /// never silently disabled.
    #[instrument(skip(self), fields(config_root = %self.config_root))]
    pub fn load(&self) -> DomainResult<LoadedRules> {
        let generation = self.store.generation();
        let mut diagnostics = Vec::new();
        let mut source_paths = vec![self.config_root.clone()];

        let roles = self.load_roles()?;

        let mut domains = Vec::new();
        let domains_path = format!("{}/{}", self.config_root, DOMAINS_FOLDER);
        if let Some(folder) = self.optional_node(&domains_path)? {
            self.load_folder(&folder, &mut domains)?;
        } else {
            debug!(path = %domains_path, "no domain folder configured");
        }

        for folder in self.federated_folders()? {
            if !self.is_valid_anchor(&folder.path) {
                warn!(path = %folder.path, "skipping federated domain folder at unsupported location");
                diagnostics.push(LoadDiagnostic {
                    path: folder.path.clone(),
                    message: "federated domain folders must be anchored directly below the root or the configuration root".to_string(),
                });
                continue;
            }
            // Folders below the configuration root are already covered.
            if parent_path(&folder.path) != Some(self.config_root.as_str()) {
                source_paths.push(folder.path.clone());
            }
            self.load_folder(&folder, &mut domains)?;
        }

        let snapshot = RuleSnapshot::new(generation, domains, roles);
        if let Err(errors) = RuleValidator::new(&snapshot.roles).validate(&snapshot.domains) {
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(DomainError::Configuration {
                location: self.config_root.clone(),
                message,
            });
        }

        debug!(
            %generation,
            domains = snapshot.domains.len(),
            roles = snapshot.roles.len(),
            skipped = diagnostics.len(),
            "rules loaded"
        );
        Ok(LoadedRules {
            snapshot,
            diagnostics,
            source_paths,
        })
    }

    fn is_valid_anchor(&self, path: &str) -> bool {
        matches!(parent_path(path), Some(parent) if parent == "/" || parent == self.config_root)
    }

    fn optional_node(&self, path: &str) -> DomainResult<Option<Node>> {
        match self.store.get_node_by_path(path) {
            Ok(node) => Ok(Some(node)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn children(&self, node: &Node) -> DomainResult<Vec<Node>> {
        match self.store.children(&node.id) {
            Ok(children) => Ok(children),
            // Removed between listing and reading: treat as empty.
            Err(e) if e.is_not_found() => {
                debug!(path = %node.path, "node vanished while loading rules");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn federated_folders(&self) -> DomainResult<Vec<Node>> {
        let query = SearchQuery::new(Filter::term(Field::NodeType, NT_FEDERATED_DOMAIN_FOLDER));
        let mut folders = Vec::new();
        for id in self.index.search(&query, &Filter::All)? {
            match self.store.get_node(&id) {
                Ok(node) => folders.push(node),
                Err(StorageError::NodeNotFound { .. }) => {
                    debug!(%id, "federated folder vanished while loading rules")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(folders)
    }

    fn load_roles(&self) -> DomainResult<RoleDefinitions> {
        let mut roles = RoleDefinitions::builtin();
        let roles_path = format!("{}/{}", self.config_root, ROLES_FOLDER);
        let Some(folder) = self.optional_node(&roles_path)? else {
            return Ok(roles);
        };
        for node in self.children(&folder)? {
            if node.primary_type != NT_ROLE {
                continue;
            }
            let mut privileges = Vec::new();
            for raw in node.string_values(P_PRIVILEGES) {
                let privilege = Privilege::parse(&raw).ok_or_else(|| DomainError::InvalidRule {
                    location: node.path.clone(),
                    message: format!("unknown privilege '{raw}'"),
                })?;
                privileges.push(privilege);
            }
            let mut definition = RoleDefinition::new(node.name.clone(), privileges);
            for included in node.string_values(P_ROLES) {
                definition = definition.including(included);
            }
            roles.insert(definition);
        }
        Ok(roles)
    }

    fn load_folder(&self, folder: &Node, domains: &mut Vec<Domain>) -> DomainResult<()> {
        for node in self.children(folder)? {
            if node.primary_type == NT_DOMAIN {
                domains.push(self.load_domain(&node)?);
            }
        }
        Ok(())
    }

    fn load_domain(&self, node: &Node) -> DomainResult<Domain> {
        let mut domain = Domain::new(node.name.clone());
        domain.location = node.path.clone();
        for child in self.children(node)? {
            match child.primary_type.as_str() {
                NT_DOMAIN_RULE => {
                    let mut facet_rules = Vec::new();
                    for rule in self.children(&child)? {
                        if rule.primary_type == NT_FACET_RULE {
                            facet_rules.push(parse_facet_rule(&rule)?);
                        }
                    }
                    domain
                        .rules
                        .push(DomainRule::new(child.name.clone(), facet_rules));
                }
                NT_AUTH_ROLE => domain.auth_roles.push(parse_auth_role(&child)?),
                _ => {}
            }
        }
        Ok(domain)
    }
}

fn required(node: &Node, property: &str) -> DomainResult<String> {
    node.string_property(property)
        .ok_or_else(|| DomainError::InvalidRule {
            location: node.path.clone(),
            message: format!("missing property {property}"),
        })
}

fn parse_facet_rule(node: &Node) -> DomainResult<FacetRule> {
    let facet = required(node, P_FACET)?;
    let value = required(node, P_VALUE)?;
    let rule_type = match node.string_property(P_TYPE) {
        None => FacetRuleType::String,
        Some(raw) => FacetRuleType::parse(&raw).ok_or_else(|| DomainError::InvalidRule {
            location: node.path.clone(),
            message: format!("unknown facet rule type '{raw}'"),
        })?,
    };
    if facet.is_empty() {
        return Err(DomainError::InvalidRule {
            location: node.path.clone(),
            message: "empty facet".to_string(),
        });
    }
    Ok(FacetRule {
        name: node.name.clone(),
        facet: Facet::parse(&facet),
        value: FacetValue::parse(&value),
        rule_type,
        equals: node.bool_property(P_EQUALS).unwrap_or(true),
        filter: node.bool_property(P_FILTER).unwrap_or(false),
    })
}

fn parse_auth_role(node: &Node) -> DomainResult<AuthRole> {
    let mut auth_role = AuthRole::new(required(node, P_ROLE)?);
    auth_role.name = node.name.clone();
    auth_role.users.extend(node.string_values(P_USERS));
    auth_role.groups.extend(node.string_values(P_GROUPS));
    Ok(auth_role)
}
