//! Per-principal rule value expanders.

use serde::{Deserialize, Serialize};

use super::types::PrincipalContext;

/// A placeholder resolved against the active principal at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expander {
    /// `__user__`: the user id.
    User,
    /// `__group__`: every group the principal belongs to.
    Group,
    /// `__role__`: every role the principal holds.
    Role,
}

impl Expander {
    pub const USER_TOKEN: &'static str = "__user__";
    pub const GROUP_TOKEN: &'static str = "__group__";
    pub const ROLE_TOKEN: &'static str = "__role__";

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            Self::USER_TOKEN => Some(Expander::User),
            Self::GROUP_TOKEN => Some(Expander::Group),
            Self::ROLE_TOKEN => Some(Expander::Role),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Expander::User => Self::USER_TOKEN,
            Expander::Group => Self::GROUP_TOKEN,
            Expander::Role => Self::ROLE_TOKEN,
        }
    }
}

/// Expands `expander` into the concrete values it stands for.
pub fn expand<'a>(
    expander: Expander,
    principal: &'a PrincipalContext,
) -> Box<dyn Iterator<Item = &'a str> + 'a> {
    match expander {
        Expander::User => Box::new(std::iter::once(principal.user_id.as_str())),
        Expander::Group => Box::new(principal.group_ids.iter().map(String::as_str)),
        Expander::Role => Box::new(principal.role_ids.iter().map(String::as_str)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_groups_and_roles() {
        let principal = PrincipalContext::new("alice")
            .with_group("editors")
            .with_group("authors")
            .with_role("reviewer");

        let user: Vec<&str> = expand(Expander::User, &principal).collect();
        assert_eq!(user, vec!["alice"]);
        let groups: Vec<&str> = expand(Expander::Group, &principal).collect();
        assert_eq!(groups, vec!["authors", "editors"]);
        let roles: Vec<&str> = expand(Expander::Role, &principal).collect();
        assert_eq!(roles, vec!["reviewer"]);
    }

    #[test]
    fn test_principal_without_groups_expands_to_nothing() {
        let principal = PrincipalContext::new("bob");
        assert_eq!(expand(Expander::Group, &principal).count(), 0);
    }

    #[test]
    fn test_token_round_trip() {
        for e in [Expander::User, Expander::Group, Expander::Role] {
            assert_eq!(Expander::from_token(e.token()), Some(e));
        }
        assert_eq!(Expander::from_token("__nobody__"), None);
    }
}
