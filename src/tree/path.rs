//! Path parsing and formatting.
//!
//! Paths use the `elem1/elem2[key=value]/elem3` syntax. A list-indexed
//! element carries one or more `[key=value]` suffixes selecting a member of
//! a JSON array by its key fields.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Error produced while parsing a path string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathParseError {
    #[error("empty element name in path '{0}'")]
    EmptyElement(String),

    #[error("malformed key selector '{0}'")]
    MalformedKey(String),

    #[error("path origins are not supported: '{0}'")]
    OriginNotSupported(String),
}

/// One named element of a path, optionally carrying key selectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathElem {
    pub name: String,
    pub keys: BTreeMap<String, String>,
}

impl PathElem {
    /// Element with no key selectors.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            keys: BTreeMap::new(),
        }
    }
}

/// A structured path into the config tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Path {
    pub elems: Vec<PathElem>,
    /// Target identifier naming the tree this path addresses.
    pub target: Option<String>,
}

impl Path {
    /// The root path (no elements).
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a slash-delimited path with bracketed key=value suffixes.
    ///
    /// An empty string or `/` parses to the root path. The deprecated
    /// `origin:` prefix form is rejected as unsupported.
    pub fn parse(s: &str) -> Result<Self, PathParseError> {
        let trimmed = s.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let mut elems = Vec::new();
        for raw in split_elements(trimmed) {
            if raw.is_empty() {
                return Err(PathParseError::EmptyElement(s.to_string()));
            }
            elems.push(parse_elem(&raw, s)?);
        }
        Ok(Self {
            elems,
            target: None,
        })
    }

    /// True if this path has no elements.
    pub fn is_root(&self) -> bool {
        self.elems.is_empty()
    }

    /// A new path with `other`'s elements appended.
    pub fn join(&self, other: &Path) -> Path {
        let mut elems = self.elems.clone();
        elems.extend(other.elems.iter().cloned());
        Path {
            elems,
            target: self.target.clone().or_else(|| other.target.clone()),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.elems.is_empty() {
            return write!(f, "/");
        }
        for elem in &self.elems {
            write!(f, "/{}", elem.name)?;
            for (k, v) in &elem.keys {
                write!(f, "[{}={}]", k, v)?;
            }
        }
        Ok(())
    }
}

/// Split on `/` outside of bracket pairs.
fn split_elements(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in s.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            '/' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn parse_elem(raw: &str, full: &str) -> Result<PathElem, PathParseError> {
    let (name, rest) = match raw.find('[') {
        Some(idx) => (&raw[..idx], &raw[idx..]),
        None => (raw, ""),
    };
    if name.is_empty() {
        return Err(PathParseError::EmptyElement(full.to_string()));
    }
    if name.contains(':') {
        return Err(PathParseError::OriginNotSupported(full.to_string()));
    }

    let mut keys = BTreeMap::new();
    let mut remaining = rest;
    while !remaining.is_empty() {
        if !remaining.starts_with('[') {
            return Err(PathParseError::MalformedKey(raw.to_string()));
        }
        let close = remaining
            .find(']')
            .ok_or_else(|| PathParseError::MalformedKey(raw.to_string()))?;
        let pair = &remaining[1..close];
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| PathParseError::MalformedKey(raw.to_string()))?;
        if k.is_empty() {
            return Err(PathParseError::MalformedKey(raw.to_string()));
        }
        keys.insert(k.to_string(), v.to_string());
        remaining = &remaining[close + 1..];
    }

    Ok(PathElem {
        name: name.to_string(),
        keys,
    })
}
