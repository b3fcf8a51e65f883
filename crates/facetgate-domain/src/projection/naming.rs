//! Names and identifiers of virtual nodes.

use std::collections::HashMap;

use facetgate_storage::path::{child_path, Segment};
use uuid::Uuid;

/// Hands out same-name-sibling indices over an ordered candidate sequence.
///
/// The first candidate with a name is `name`, the next `name[2]` and so on,
/// so the result depends only on the order of the candidates.
#[derive(Debug, Default)]
pub struct SiblingNamer {
    seen: HashMap<String, u32>,
}

impl SiblingNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Segment for the next sibling called `name`.
    pub fn next(&mut self, name: &str) -> Segment {
        let count = self.seen.entry(name.to_string()).or_insert(0);
        *count += 1;
        Segment::new(name, *count)
    }

    /// Path of the next sibling called `name` below `parent`.
    pub fn next_path(&mut self, parent: &str, name: &str) -> (Segment, String) {
        let segment = self.next(name);
        let path = child_path(parent, &segment);
        (segment, path)
    }
}

/// Escapes characters a facet value cannot carry into a path segment.
pub fn encode_name(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => encoded.push_str("%25"),
            '/' => encoded.push_str("%2F"),
            '[' => encoded.push_str("%5B"),
            ']' => encoded.push_str("%5D"),
            _ => encoded.push(c),
        }
    }
    if encoded.is_empty() {
        encoded.push_str("%20");
    }
    encoded
}

/// Name of the grouping node for `value` of `facet`.
pub fn group_name(facet: &str, value: &str, namespaced: bool) -> String {
    if namespaced {
        encode_name(&format!("{facet}:{value}"))
    } else {
        encode_name(value)
    }
}

/// Stable identifier of a virtual node, derived from its virtual path.
pub fn virtual_id(virtual_path: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, virtual_path.as_bytes()).to_string()
}
