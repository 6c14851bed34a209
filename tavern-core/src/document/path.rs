//! Dot-separated document addresses.
//!
//! A [`Path`] is a domain followed by one or more segments. Numeric segments
//! index arrays; against an object they are looked up as string keys, because
//! item and technique ids are frequently numeric.

use super::Domain;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path must start with one of 元数据/角色/社交/世界/系统, got '{0}'")]
    UnknownDomain(String),

    #[error("path '{0}' contains an empty segment")]
    EmptySegment(String),
}

/// A single step in a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        match raw.parse::<usize>() {
            Ok(i) if raw.chars().all(|c| c.is_ascii_digit()) => Segment::Index(i),
            _ => Segment::Key(raw.to_string()),
        }
    }

    /// The segment as an object key.
    pub fn as_key(&self) -> String {
        match self {
            Segment::Key(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
        }
    }

    /// The segment as an array index, if it is numeric.
    pub fn index(&self) -> Option<usize> {
        match self {
            Segment::Index(i) => Some(*i),
            Segment::Key(k) => k.parse().ok(),
        }
    }

    fn matches(&self, pattern: &str) -> bool {
        pattern == "*" || self.as_key() == pattern
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => f.write_str(k),
            Segment::Index(i) => write!(f, "{i}"),
        }
    }
}

/// An address inside a [`super::Document`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    domain: Domain,
    segments: Vec<Segment>,
}

impl Path {
    /// Parse `"角色.背包.物品"`; `a[0]` is accepted as `a.0`.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let normalized = raw.trim().replace('[', ".").replace(']', "");
        if normalized.is_empty() {
            return Err(PathError::Empty);
        }

        let mut parts = normalized.split('.');
        let head = parts.next().unwrap_or_default();
        let domain =
            Domain::from_key(head).ok_or_else(|| PathError::UnknownDomain(head.to_string()))?;

        let mut segments = Vec::new();
        for part in parts {
            if part.is_empty() {
                return Err(PathError::EmptySegment(raw.to_string()));
            }
            segments.push(Segment::parse(part));
        }

        Ok(Self { domain, segments })
    }

    pub fn new(domain: Domain, segments: Vec<Segment>) -> Self {
        Self { domain, segments }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the path names a whole domain and nothing below it.
    pub fn is_domain_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn child(&self, key: impl Into<String>) -> Path {
        let mut segments = self.segments.clone();
        segments.push(Segment::parse(&key.into()));
        Path {
            domain: self.domain,
            segments,
        }
    }

    pub fn parent(&self) -> Option<Path> {
        let (_, rest) = self.segments.split_last()?;
        Some(Path {
            domain: self.domain,
            segments: rest.to_vec(),
        })
    }

    /// A sibling path: same parent, different final segment.
    pub fn sibling(&self, key: &str) -> Option<Path> {
        self.parent().map(|p| p.child(key))
    }

    pub fn last_key(&self) -> Option<String> {
        self.segments.last().map(Segment::as_key)
    }

    /// Match against a dotted pattern where `*` stands for exactly one segment.
    pub fn matches(&self, pattern: &str) -> bool {
        let mut parts = pattern.split('.');
        if parts.next() != Some(self.domain.key()) {
            return false;
        }
        let parts: Vec<&str> = parts.collect();
        parts.len() == self.segments.len()
            && self.segments.iter().zip(parts).all(|(s, p)| s.matches(p))
    }

    /// Whether this path is `pattern` or lies underneath it.
    pub fn is_within(&self, pattern: &str) -> bool {
        let mut parts = pattern.split('.');
        if parts.next() != Some(self.domain.key()) {
            return false;
        }
        let parts: Vec<&str> = parts.collect();
        parts.len() <= self.segments.len()
            && self.segments.iter().zip(parts).all(|(s, p)| s.matches(p))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.domain.key())?;
        for seg in &self.segments {
            write!(f, ".{seg}")?;
        }
        Ok(())
    }
}

/// Why a path could not be walked for writing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavError {
    #[error("path has no segments below the domain")]
    Empty,

    #[error("'{segment}' is not a container (found {found})")]
    NotContainer { segment: String, found: &'static str },

    #[error("index {index} is out of bounds for an array of length {len}")]
    OutOfBounds { index: usize, len: usize },

    #[error("'{0}' is not a valid array index")]
    BadIndex(String),
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn child<'a>(value: &'a Value, seg: &Segment) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(&seg.as_key()),
        Value::Array(items) => items.get(seg.index()?),
        _ => None,
    }
}

fn child_mut<'a>(value: &'a mut Value, seg: &Segment) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(&seg.as_key()),
        Value::Array(items) => items.get_mut(seg.index()?),
        _ => None,
    }
}

pub fn lookup<'a>(root: &'a Map<String, Value>, segments: &[Segment]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let mut current = root.get(&first.as_key())?;
    for seg in rest {
        current = child(current, seg)?;
    }
    Some(current)
}

pub fn lookup_mut<'a>(
    root: &'a mut Map<String, Value>,
    segments: &[Segment],
) -> Option<&'a mut Value> {
    let (first, rest) = segments.split_first()?;
    let mut current = root.get_mut(&first.as_key())?;
    for seg in rest {
        current = child_mut(current, seg)?;
    }
    Some(current)
}

/// Walk to the slot named by `segments`, creating missing intermediate objects.
///
/// A missing final slot is created as `null`. Appending one past the end of an
/// array is allowed; anything further is out of bounds.
pub fn ensure_slot<'a>(
    root: &'a mut Map<String, Value>,
    segments: &[Segment],
) -> Result<&'a mut Value, NavError> {
    let (first, rest) = segments.split_first().ok_or(NavError::Empty)?;
    let mut current = root.entry(first.as_key()).or_insert(Value::Null);
    let mut previous = first;

    for seg in rest {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(seg.as_key()).or_insert(Value::Null),
            Value::Array(items) => {
                let index = seg.index().ok_or_else(|| NavError::BadIndex(seg.as_key()))?;
                let len = items.len();
                if index == len {
                    items.push(Value::Null);
                }
                items
                    .get_mut(index)
                    .ok_or(NavError::OutOfBounds { index, len })?
            }
            other => {
                return Err(NavError::NotContainer {
                    segment: previous.as_key(),
                    found: type_name(other),
                })
            }
        };
        previous = seg;
    }

    Ok(current)
}

/// Remove and return the value at `segments`.
pub fn remove(root: &mut Map<String, Value>, segments: &[Segment]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    if parents.is_empty() {
        return root.remove(&last.as_key());
    }
    match lookup_mut(root, parents)? {
        Value::Object(map) => map.remove(&last.as_key()),
        Value::Array(items) => {
            let index = last.index()?;
            (index < items.len()).then(|| items.remove(index))
        }
        _ => None,
    }
}
