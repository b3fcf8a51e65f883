//! Index-native boolean filter primitives.
//!
//! A [`Filter`] is evaluated against an [`IndexedDocument`], the flattened
//! field view the index keeps for every node. The authorization engine
//! compiles its rule set into these primitives so the same decision can be
//! applied inside a query.

use std::collections::BTreeMap;
use std::fmt;

use crate::traits::{Node, PropertyValue};

/// An indexed field of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    /// The node identifier.
    Id,
    /// The node name.
    Name,
    /// Primary type and mixin types.
    NodeType,
    /// Identifiers of the node itself and all of its ancestors.
    Path,
    /// A property, references rendered as target identifiers.
    Property(String),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Id => f.write_str("@id"),
            Field::Name => f.write_str("@name"),
            Field::NodeType => f.write_str("@type"),
            Field::Path => f.write_str("@path"),
            Field::Property(name) => f.write_str(name),
        }
    }
}

/// A boolean predicate over indexed documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    All,
    None,
    /// The field has at least one value.
    Exists(Field),
    /// The field has `value` among its values.
    Term { field: Field, value: String },
    Not(Box<Filter>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn term(field: Field, value: impl Into<String>) -> Self {
        Filter::Term {
            field,
            value: value.into(),
        }
    }

    /// Conjunction with constant folding.
    pub fn and(children: impl IntoIterator<Item = Filter>) -> Self {
        let mut kept = Vec::new();
        for child in children {
            match child {
                Filter::None => return Filter::None,
                Filter::All => {}
                Filter::And(inner) => kept.extend(inner),
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => Filter::All,
            1 => kept.remove(0),
            _ => Filter::And(kept),
        }
    }

    /// Disjunction with constant folding.
    pub fn or(children: impl IntoIterator<Item = Filter>) -> Self {
        let mut kept = Vec::new();
        for child in children {
            match child {
                Filter::All => return Filter::All,
                Filter::None => {}
                Filter::Or(inner) => kept.extend(inner),
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => Filter::None,
            1 => kept.remove(0),
            _ => Filter::Or(kept),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Filter) -> Self {
        match inner {
            Filter::All => Filter::None,
            Filter::None => Filter::All,
            Filter::Not(inner) => *inner,
            other => Filter::Not(Box::new(other)),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Filter::All)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Filter::None)
    }

    /// Evaluates the filter against a document.
    pub fn matches(&self, doc: &IndexedDocument) -> bool {
        match self {
            Filter::All => true,
            Filter::None => false,
            Filter::Exists(field) => doc.has(field),
            Filter::Term { field, value } => doc.contains(field, value),
            Filter::Not(inner) => !inner.matches(doc),
            Filter::And(children) => children.iter().all(|c| c.matches(doc)),
            Filter::Or(children) => children.iter().any(|c| c.matches(doc)),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, op: &str, children: &[Filter]) -> fmt::Result {
            f.write_str("(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " {op} ")?;
                }
                write!(f, "{child}")?;
            }
            f.write_str(")")
        }
        match self {
            Filter::All => f.write_str("*:*"),
            Filter::None => f.write_str("-*:*"),
            Filter::Exists(field) => write!(f, "{field}:*"),
            Filter::Term { field, value } => write!(f, "{field}:\"{value}\""),
            Filter::Not(inner) => write!(f, "NOT {inner}"),
            Filter::And(children) => join(f, "AND", children),
            Filter::Or(children) => join(f, "OR", children),
        }
    }
}

/// Flattened, string-valued view of a node as the index stores it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedDocument {
    pub id: String,
    pub name: String,
    pub node_types: Vec<String>,
    /// Self and ancestor identifiers.
    pub path_ids: Vec<String>,
    pub properties: BTreeMap<String, Vec<String>>,
}

impl IndexedDocument {
    pub fn from_node(node: &Node) -> Self {
        let mut node_types = Vec::with_capacity(1 + node.mixin_types.len());
        node_types.push(node.primary_type.clone());
        node_types.extend(node.mixin_types.iter().cloned());

        let mut path_ids: Vec<String> = node.ancestors.iter().map(|a| a.to_string()).collect();
        path_ids.push(node.id.to_string());

        let properties = node
            .properties
            .iter()
            .map(|(name, values)| {
                (
                    name.clone(),
                    values.iter().map(PropertyValue::to_facet_string).collect(),
                )
            })
            .collect();

        Self {
            id: node.id.to_string(),
            name: node.name.clone(),
            node_types,
            path_ids,
            properties,
        }
    }

    /// All values of a field.
    pub fn values(&self, field: &Field) -> Vec<&str> {
        match field {
            Field::Id => vec![self.id.as_str()],
            Field::Name => vec![self.name.as_str()],
            Field::NodeType => self.node_types.iter().map(String::as_str).collect(),
            Field::Path => self.path_ids.iter().map(String::as_str).collect(),
            Field::Property(name) => self
                .properties
                .get(name)
                .map(|v| v.iter().map(String::as_str).collect())
                .unwrap_or_default(),
        }
    }

    pub fn has(&self, field: &Field) -> bool {
        match field {
            Field::Property(name) => self.properties.get(name).is_some_and(|v| !v.is_empty()),
            _ => true,
        }
    }

    pub fn contains(&self, field: &Field, value: &str) -> bool {
        self.values(field).contains(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> IndexedDocument {
        let mut properties = BTreeMap::new();
        properties.insert("authtest".to_string(), vec!["canread".to_string()]);
        IndexedDocument {
            id: "n1".to_string(),
            name: "doc".to_string(),
            node_types: vec!["hippo:document".to_string()],
            path_ids: vec!["root".to_string(), "n1".to_string()],
            properties,
        }
    }

    #[test]
    fn test_constant_folding() {
        let t = Filter::term(Field::Name, "doc");
        assert_eq!(Filter::and([Filter::All, t.clone()]), t);
        assert_eq!(Filter::and([Filter::None, t.clone()]), Filter::None);
        assert_eq!(Filter::or([Filter::None, t.clone()]), t);
        assert_eq!(Filter::or([Filter::All, t.clone()]), Filter::All);
        assert_eq!(Filter::and(Vec::new()), Filter::All);
        assert_eq!(Filter::or(Vec::new()), Filter::None);
        assert_eq!(Filter::not(Filter::not(t.clone())), t);
    }

    #[test]
    fn test_term_and_exists_match() {
        let d = doc();
        assert!(Filter::term(Field::Property("authtest".into()), "canread").matches(&d));
        assert!(!Filter::term(Field::Property("authtest".into()), "canwrite").matches(&d));
        assert!(Filter::Exists(Field::Property("authtest".into())).matches(&d));
        assert!(!Filter::Exists(Field::Property("missing".into())).matches(&d));
        assert!(Filter::term(Field::Path, "root").matches(&d));
        assert!(Filter::term(Field::NodeType, "hippo:document").matches(&d));
    }

    #[test]
    fn test_display_is_readable() {
        let f = Filter::and([
            Filter::term(Field::Name, "doc"),
            Filter::not(Filter::Exists(Field::Property("x".into()))),
        ]);
        assert_eq!(f.to_string(), "(@name:\"doc\" AND NOT x:*)");
    }
}
