//! Absolute path handling with same-name-sibling indices.
//!
//! A path segment is `name` or `name[n]` where `n > 1` selects the n-th
//! sibling carrying that name. `name[1]` is accepted on input and
//! normalized to `name`.

use std::fmt;

use crate::error::{StorageError, StorageResult};

/// A single path segment: a name and its 1-based same-name-sibling index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    pub name: String,
    pub index: u32,
}

impl Segment {
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index: index.max(1),
        }
    }

    /// Parses `name` or `name[n]`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Err("empty path segment".to_string());
        }
        match raw.find('[') {
            None => Ok(Self::new(raw, 1)),
            Some(open) => {
                let close = raw
                    .strip_suffix(']')
                    .ok_or_else(|| format!("unterminated index in '{raw}'"))?;
                let name = &raw[..open];
                if name.is_empty() {
                    return Err(format!("missing name in '{raw}'"));
                }
                let index: u32 = close[open + 1..]
                    .parse()
                    .map_err(|_| format!("invalid index in '{raw}'"))?;
                if index == 0 {
                    return Err(format!("index must be positive in '{raw}'"));
                }
                Ok(Self::new(name, index))
            }
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index > 1 {
            write!(f, "{}[{}]", self.name, self.index)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Splits an absolute path into its segments. The root path yields none.
pub fn parse_path(path: &str) -> StorageResult<Vec<Segment>> {
    if !path.starts_with('/') {
        return Err(StorageError::InvalidPath {
            path: path.to_string(),
            message: "path must be absolute".to_string(),
        });
    }
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            Segment::parse(s).map_err(|message| StorageError::InvalidPath {
                path: path.to_string(),
                message,
            })
        })
        .collect()
}

/// Appends a segment to a parent path.
pub fn child_path(parent: &str, segment: &Segment) -> String {
    if parent == "/" {
        format!("/{segment}")
    } else {
        format!("{parent}/{segment}")
    }
}

/// Returns the parent of an absolute path, `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(pos) => Some(&path[..pos]),
        None => None,
    }
}

/// True when `path` equals `ancestor` or lies below it.
pub fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return path.starts_with('/');
    }
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

/// Number of segments in a path; the root has depth 0.
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}
