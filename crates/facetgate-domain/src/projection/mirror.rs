//! Mirror (facetselect) definitions and facet constraints.

use std::fmt;

use facetgate_storage::{Field, IndexedDocument, Node};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::schema::{P_DOCBASE, P_FACETS, P_MODES, P_VALUES};
use crate::model::Facet;

/// How a mirror constraint selects among candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectMode {
    /// Keep candidates that lack the facet or match the value.
    Select,
    /// Of the candidates carrying the facet, keep the first matching one.
    Single,
    /// Like `Single`, falling back to the first candidate carrying the facet.
    PreferSingle,
    /// Matching candidates first, nothing excluded.
    Prefer,
    /// Same ordering as `Prefer`.
    Stick,
    /// Drops an inherited constraint on the same facet.
    Clear,
}

impl SelectMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "select" => Some(SelectMode::Select),
            "single" => Some(SelectMode::Single),
            "prefer-single" => Some(SelectMode::PreferSingle),
            "prefer" => Some(SelectMode::Prefer),
            "stick" => Some(SelectMode::Stick),
            "clear" => Some(SelectMode::Clear),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectMode::Select => "select",
            SelectMode::Single => "single",
            SelectMode::PreferSingle => "prefer-single",
            SelectMode::Prefer => "prefer",
            SelectMode::Stick => "stick",
            SelectMode::Clear => "clear",
        }
    }
}

impl fmt::Display for SelectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(facet, value, mode)` triple of a mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub facet: String,
    /// `*` matches any value.
    pub value: String,
    pub mode: SelectMode,
}

impl Constraint {
    pub fn new(facet: impl Into<String>, value: impl Into<String>, mode: SelectMode) -> Self {
        Self {
            facet: facet.into(),
            value: value.into(),
            mode,
        }
    }

    fn field(&self) -> Field {
        Facet::parse(&self.facet).field()
    }

    fn carries(&self, document: &IndexedDocument) -> bool {
        document.has(&self.field()) && !document.values(&self.field()).is_empty()
    }

    fn matches(&self, document: &IndexedDocument) -> bool {
        let field = self.field();
        if self.value == "*" {
            return self.carries(document);
        }
        document.contains(&field, &self.value)
    }
}

/// The persisted definition of a mirror node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorDefinition {
    pub docbase: Option<String>,
    pub constraints: Vec<Constraint>,
}

impl MirrorDefinition {
    /// Reads the definition from a facetselect node. Triples are taken up
    /// to the shortest of `facets`/`values`; a missing mode means `select`.
    pub fn from_node(node: &Node) -> Self {
        let facets = node.string_values(P_FACETS);
        let values = node.string_values(P_VALUES);
        let modes = node.string_values(P_MODES);

        let constraints = facets
            .into_iter()
            .zip(values)
            .enumerate()
            .map(|(i, (facet, value))| {
                let mode = match modes.get(i) {
                    None => SelectMode::Select,
                    Some(raw) => SelectMode::parse(raw).unwrap_or_else(|| {
                        warn!(node = %node.path, mode = %raw, "unknown mirror mode, using select");
                        SelectMode::Select
                    }),
                };
                Constraint::new(facet, value, mode)
            })
            .collect();

        Self {
            docbase: node
                .string_property(P_DOCBASE)
                .filter(|docbase| !docbase.is_empty()),
            constraints,
        }
    }
}

/// Constraints a nested mirror's descendants see: the inherited ones with
/// `clear`ed facets removed, followed by the mirror's own.
pub fn inherit(inherited: &[Constraint], own: &[Constraint]) -> Vec<Constraint> {
    let mut merged: Vec<Constraint> = inherited.to_vec();
    for constraint in own {
        if constraint.mode == SelectMode::Clear {
            merged.retain(|c| c.facet != constraint.facet);
        } else {
            merged.push(constraint.clone());
        }
    }
    merged
}

/// Applies constraints in order to candidates in storage order.
pub fn apply_constraints<T, F>(candidates: Vec<T>, constraints: &[Constraint], document: F) -> Vec<T>
where
    F: Fn(&T) -> IndexedDocument,
{
    let mut current = candidates;
    for constraint in constraints {
        current = apply(current, constraint, &document);
    }
    current
}

fn apply<T, F>(candidates: Vec<T>, constraint: &Constraint, document: &F) -> Vec<T>
where
    F: Fn(&T) -> IndexedDocument,
{
    let views: Vec<(bool, bool)> = candidates
        .iter()
        .map(|c| {
            let doc = document(c);
            (constraint.carries(&doc), constraint.matches(&doc))
        })
        .collect();

    match constraint.mode {
        SelectMode::Clear => candidates,
        SelectMode::Select => candidates
            .into_iter()
            .zip(views)
            .filter(|(_, (carries, matches))| !carries || *matches)
            .map(|(c, _)| c)
            .collect(),
        SelectMode::Single | SelectMode::PreferSingle => {
            let keep = views
                .iter()
                .position(|(carries, matches)| *carries && *matches)
                .or_else(|| {
                    (constraint.mode == SelectMode::PreferSingle)
                        .then(|| views.iter().position(|(carries, _)| *carries))
                        .flatten()
                });
            candidates
                .into_iter()
                .zip(views)
                .enumerate()
                .filter(|(i, (_, (carries, _)))| !carries || Some(*i) == keep)
                .map(|(_, (c, _))| c)
                .collect()
        }
        SelectMode::Prefer | SelectMode::Stick => {
            let (preferred, rest): (Vec<_>, Vec<_>) = candidates
                .into_iter()
                .zip(views)
                .partition(|(_, (carries, matches))| *carries && *matches);
            preferred
                .into_iter()
                .chain(rest)
                .map(|(c, _)| c)
                .collect()
        }
    }
}
