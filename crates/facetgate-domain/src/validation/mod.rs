//! Rule configuration validation.
//!
//! Validates that a rule snapshot can safely gate access:
//! - Domains are anchored by at least one positive rule
//! - Auth roles reference defined roles
//! - Expanders are not used where a node reference is expected

use crate::model::{Domain, FacetValue, RoleDefinitions, RuleSnapshot};

/// Validation error types
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Every facet rule of the domain is an `equals=false` reference rule,
    /// so the domain matches nearly everything.
    UnanchoredDomain { domain: String },
    /// An auth role grants a role that is not defined
    UndefinedRole {
        domain: String,
        auth_role: String,
        role: String,
    },
    /// A reference rule uses an expander or wildcard-free empty value
    InvalidReferenceValue {
        domain: String,
        rule: String,
        value: String,
    },
    /// A role definition includes a role that is not defined
    UndefinedIncludedRole { role: String, included: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::UnanchoredDomain { domain } => write!(
                f,
                "domain '{}' only has equals=false reference rules and cannot gate access",
                domain
            ),
            ValidationError::UndefinedRole {
                domain,
                auth_role,
                role,
            } => write!(
                f,
                "undefined role '{}' granted by {}/{}",
                role, domain, auth_role
            ),
            ValidationError::InvalidReferenceValue {
                domain,
                rule,
                value,
            } => write!(
                f,
                "reference rule {}/{} has invalid value '{}'",
                domain, rule, value
            ),
            ValidationError::UndefinedIncludedRole { role, included } => {
                write!(f, "role '{}' includes undefined role '{}'", role, included)
            }
        }
    }
}

/// Result type for validation
pub type ValidationResult<T> = Result<T, Vec<ValidationError>>;

/// Validator for rule snapshots
pub struct RuleValidator<'a> {
    roles: &'a RoleDefinitions,
}

impl<'a> RuleValidator<'a> {
    /// Create a new validator against the given role definitions
    pub fn new(roles: &'a RoleDefinitions) -> Self {
        Self { roles }
    }

    /// Validate role definitions and every domain, returning all errors found
    pub fn validate(&self, domains: &[Domain]) -> ValidationResult<()> {
        let mut errors = Vec::new();

        for name in self.roles.names() {
            let Some(definition) = self.roles.get(name) else {
                continue;
            };
            for included in &definition.includes {
                if self.roles.get(included).is_none() {
                    errors.push(ValidationError::UndefinedIncludedRole {
                        role: name.to_string(),
                        included: included.clone(),
                    });
                }
            }
        }

        for domain in domains {
            self.validate_domain(domain, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_domain(&self, domain: &Domain, errors: &mut Vec<ValidationError>) {
        if is_unanchored(domain) {
            errors.push(ValidationError::UnanchoredDomain {
                domain: domain.name.clone(),
            });
        }

        for rule in domain.facet_rules().filter(|r| r.is_reference()) {
            let invalid = match &rule.value {
                FacetValue::Expander(_) => true,
                FacetValue::Literal(value) => value.trim().is_empty(),
                FacetValue::Wildcard => false,
            };
            if invalid {
                errors.push(ValidationError::InvalidReferenceValue {
                    domain: domain.name.clone(),
                    rule: rule.name.clone(),
                    value: rule.value.to_string(),
                });
            }
        }

        for auth_role in &domain.auth_roles {
            if self.roles.get(&auth_role.role).is_none() {
                errors.push(ValidationError::UndefinedRole {
                    domain: domain.name.clone(),
                    auth_role: auth_role.name.clone(),
                    role: auth_role.role.clone(),
                });
            }
        }
    }
}

/// A domain is unanchored when it has facet rules and every one of them is a
/// negated reference rule.
fn is_unanchored(domain: &Domain) -> bool {
    let mut rules = domain.facet_rules().peekable();
    rules.peek().is_some() && rules.all(|r| r.is_reference() && !r.equals)
}

/// Convenience function to validate a snapshot
pub fn validate(snapshot: &RuleSnapshot) -> ValidationResult<()> {
    RuleValidator::new(&snapshot.roles).validate(&snapshot.domains)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthRole, DomainRule, FacetRule, ROLE_READONLY};
    use facetgate_storage::Generation;

    fn snapshot(domains: Vec<Domain>) -> RuleSnapshot {
        RuleSnapshot::new(Generation::ZERO, domains, RoleDefinitions::builtin())
    }

    #[test]
    fn test_validator_accepts_valid_domain() {
        let domain = Domain::new("content")
            .with_rule(DomainRule::new(
                "readable",
                vec![
                    FacetRule::equals("authtest", "canread"),
                    FacetRule::reference("jcr:path", "/content/hidden", false),
                ],
            ))
            .with_auth_role(AuthRole::new(ROLE_READONLY).with_group("everybody"));
        assert!(validate(&snapshot(vec![domain])).is_ok());
    }

    #[test]
    fn test_validator_rejects_only_negated_references() {
        let domain = Domain::new("exclude-only")
            .with_rule(DomainRule::new(
                "r1",
                vec![FacetRule::reference("jcr:path", "/a", false)],
            ))
            .with_rule(DomainRule::new(
                "r2",
                vec![FacetRule::reference("jcr:uuid", "/b", false)],
            ))
            .with_auth_role(AuthRole::new(ROLE_READONLY).with_user("alice"));

        let errors = validate(&snapshot(vec![domain])).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::UnanchoredDomain {
                domain: "exclude-only".to_string()
            }]
        );
        assert!(errors[0].to_string().contains("cannot gate access"));
    }

    #[test]
    fn test_domain_without_rules_is_not_unanchored() {
        let domain = Domain::new("empty").with_auth_role(AuthRole::new(ROLE_READONLY));
        assert!(validate(&snapshot(vec![domain])).is_ok());
    }

    #[test]
    fn test_validator_rejects_undefined_role() {
        let domain = Domain::new("content").with_auth_role(AuthRole::new("superpowers"));
        let errors = validate(&snapshot(vec![domain])).unwrap_err();
        assert!(matches!(
            &errors[0],
            ValidationError::UndefinedRole { role, .. } if role == "superpowers"
        ));
    }

    #[test]
    fn test_validator_rejects_expander_reference() {
        let domain = Domain::new("content").with_rule(DomainRule::new(
            "r",
            vec![
                FacetRule::equals("owner", "__user__"),
                FacetRule::reference("jcr:path", "__user__", true),
            ],
        ));
        let errors = validate(&snapshot(vec![domain])).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            ValidationError::InvalidReferenceValue { .. }
        ));
    }

    #[test]
    fn test_validator_rejects_undefined_included_role() {
        let mut roles = RoleDefinitions::builtin();
        roles.insert(
            crate::model::RoleDefinition::new("editor", [crate::model::Privilege::Write])
                .including("reviewer"),
        );
        let errors = RuleValidator::new(&roles).validate(&[]).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::UndefinedIncludedRole {
                role: "editor".to_string(),
                included: "reviewer".to_string()
            }]
        );
    }
}
