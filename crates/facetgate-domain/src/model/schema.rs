//! Node types and property names of the persisted rule and projection schema.

/// Default configuration root.
pub const CONFIGURATION_ROOT: &str = "/hippo:configuration";
/// Name of the domain folder below the configuration root.
pub const DOMAINS_FOLDER: &str = "hippo:domains";
/// Name of the role folder below the configuration root.
pub const ROLES_FOLDER: &str = "hippo:roles";

pub const NT_DOMAIN_FOLDER: &str = "hipposys:domainfolder";
pub const NT_FEDERATED_DOMAIN_FOLDER: &str = "hipposys:federateddomainfolder";
pub const NT_DOMAIN: &str = "hipposys:domain";
pub const NT_DOMAIN_RULE: &str = "hipposys:domainrule";
pub const NT_FACET_RULE: &str = "hipposys:facetrule";
pub const NT_AUTH_ROLE: &str = "hipposys:authrole";
pub const NT_ROLE: &str = "hipposys:role";

pub const P_FACET: &str = "hipposys:facet";
pub const P_VALUE: &str = "hipposys:value";
pub const P_TYPE: &str = "hipposys:type";
pub const P_EQUALS: &str = "hipposys:equals";
pub const P_FILTER: &str = "hipposys:filter";
pub const P_ROLE: &str = "hipposys:role";
pub const P_USERS: &str = "hipposys:users";
pub const P_GROUPS: &str = "hipposys:groups";
pub const P_PRIVILEGES: &str = "hipposys:privileges";
pub const P_ROLES: &str = "hipposys:roles";

/// Mirror node type.
pub const NT_FACETSELECT: &str = "hippo:facetselect";
/// Faceted navigation node type.
pub const NT_FACETSEARCH: &str = "hippo:facetsearch";
/// Pseudo node type of virtual facet value groups.
pub const NT_FACETGROUP: &str = "hippo:facetsubsearch";
/// Pseudo node type of result set nodes.
pub const NT_FACETRESULT: &str = "hippo:facetresult";

pub const P_DOCBASE: &str = "hippo:docbase";
pub const P_FACETS: &str = "hippo:facets";
pub const P_VALUES: &str = "hippo:values";
pub const P_MODES: &str = "hippo:modes";
pub const P_NAMESPACED: &str = "hippo:namespaced";

/// Reserved: stable identifier of a virtual node.
pub const P_VIRTUAL_ID: &str = "hippo:virtualid";
/// Reserved: number of materialized results below a virtual node.
pub const P_COUNT: &str = "hippo:count";
/// Name of the result set child of a facet group.
pub const RESULTSET: &str = "hippo:resultset";
