#![forbid(unsafe_code)]

//! JSON-pointer paths.
//!
//! A [`Path`] addresses a value relative to its root. It renders as an
//! RFC 6901 pointer (`/stats/health`, root is the empty string) and is the
//! `path` field of every [`Operation`](crate::Operation).
//!
//! A [`ReadPath`] pairs a path with the graph node it starts from: the root
//! value of a tree, or a boxed computation (whose only path is the root).
//!
//! # Size segment
//!
//! Shape-changing operations (array push/splice, object key add/remove) also
//! report the size path of the container (`Path::size`) as affected. Readers
//! of a container's length or key set record that path, so element-level
//! writes leave them alone while insertions and removals reach them.
//!
//! The size marker is a flag on [`Path`], not a segment, so no object key
//! (`"#size"` included) can collide with it. It renders as a `#size` suffix
//! (`/list#size`) and never appears in an [`Operation`](crate::Operation).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::id::Uid;

/// A path from a root value to one of its descendants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Path {
    segments: Vec<String>,
    /// Addresses the size of the container at `segments`.
    size: bool,
}

impl Path {
    /// The empty path, addressing the root itself.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from raw (unescaped) segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
            size: false,
        }
    }

    /// Parse an RFC 6901 pointer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the pointer is non-empty and does not
    /// start with `/`, or contains an escape other than `~0` / `~1`.
    pub fn parse(pointer: &str) -> Result<Self> {
        if pointer.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = pointer.strip_prefix('/') else {
            return Err(Error::invalid_path(pointer, "must start with '/'"));
        };
        rest.split('/')
            .map(|raw| unescape(raw).ok_or_else(|| Error::invalid_path(pointer, "bad '~' escape")))
            .collect::<Result<Vec<_>>>()
            .map(|segments| Self {
                segments,
                size: false,
            })
    }

    /// Raw segments, unescaped.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty() && !self.size
    }

    /// Whether this is the size path of a container.
    #[must_use]
    pub fn is_size(&self) -> bool {
        self.size
    }

    /// Number of segments, counting the size marker as one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len() + usize::from(self.size)
    }

    /// Same as [`is_root`](Self::is_root).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.is_root()
    }

    /// A new path with one more segment. The size marker, if any, is
    /// dropped.
    #[must_use]
    pub fn join(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self {
            segments,
            size: false,
        }
    }

    /// A new path addressing an array element.
    #[must_use]
    pub fn join_index(&self, index: usize) -> Self {
        self.join(index.to_string())
    }

    /// The virtual size path of the container at this path.
    #[must_use]
    pub fn size(&self) -> Self {
        Self {
            segments: self.segments.clone(),
            size: true,
        }
    }

    /// Concatenate two paths. The result is a size path if `tail` is.
    #[must_use]
    pub fn concat(&self, tail: &Path) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(tail.segments.iter().cloned());
        Self {
            segments,
            size: tail.size,
        }
    }

    /// The parent path, or `None` for the root. The parent of a size path
    /// is its container.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.size {
            return Some(Self::from_segments(self.segments.iter().cloned()));
        }
        let (_, init) = self.segments.split_last()?;
        Some(Self::from_segments(init.iter().cloned()))
    }

    /// The last segment, or `None` for the root and for size paths.
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        if self.size {
            return None;
        }
        self.segments.last().map(String::as_str)
    }

    /// Whether `prefix` is a (non-strict) prefix of this path. A size path
    /// is only a prefix of itself.
    #[must_use]
    pub fn starts_with(&self, prefix: &Path) -> bool {
        if prefix.size {
            return self.size && self.segments == prefix.segments;
        }
        self.segments.starts_with(&prefix.segments)
    }

    /// Whether either path is a prefix of the other.
    ///
    /// A write at one path can change what a read at a related path saw.
    #[must_use]
    pub fn is_related(&self, other: &Path) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

fn unescape(raw: &str) -> Option<String> {
    if !raw.contains('~') {
        return Some(raw.to_owned());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            f.write_str("/")?;
            f.write_str(&segment.replace('~', "~0").replace('/', "~1"))?;
        }
        if self.size {
            f.write_str("#size")?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A path read by an observer, anchored at a graph node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadPath {
    /// Root value or boxed computation the path starts from.
    pub source: Uid,
    /// Path below `source`.
    pub path: Path,
}

impl ReadPath {
    /// Create a read path.
    #[must_use]
    pub fn new(source: Uid, path: Path) -> Self {
        Self { source, path }
    }

    /// Whether a write to `path` under `source` may change this read.
    #[must_use]
    pub fn is_affected_by(&self, source: Uid, path: &Path) -> bool {
        self.source == source && self.path.is_related(path)
    }
}

impl fmt::Display for ReadPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.source, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let path = Path::parse("/stats/health").unwrap();
        assert_eq!(path.segments(), ["stats", "health"]);
        assert_eq!(path.to_string(), "/stats/health");
    }

    #[test]
    fn empty_pointer_is_root() {
        assert!(Path::parse("").unwrap().is_root());
        assert_eq!(Path::root().to_string(), "");
    }

    #[test]
    fn slash_alone_is_empty_key() {
        let path = Path::parse("/").unwrap();
        assert_eq!(path.segments(), [""]);
    }

    #[test]
    fn escapes_are_decoded_and_encoded() {
        let path = Path::parse("/a~1b/c~0d").unwrap();
        assert_eq!(path.segments(), ["a/b", "c~d"]);
        assert_eq!(path.to_string(), "/a~1b/c~0d");
    }

    #[test]
    fn rejects_relative_pointer_and_bad_escape() {
        assert!(matches!(Path::parse("a/b"), Err(Error::InvalidPath { .. })));
        assert!(matches!(Path::parse("/a~2"), Err(Error::InvalidPath { .. })));
        assert!(matches!(Path::parse("/a~"), Err(Error::InvalidPath { .. })));
    }

    #[test]
    fn prefix_relations() {
        let a = Path::parse("/a").unwrap();
        let ab = Path::parse("/a/b").unwrap();
        let ac = Path::parse("/a/c").unwrap();
        assert!(ab.starts_with(&a));
        assert!(!a.starts_with(&ab));
        assert!(a.is_related(&ab));
        assert!(ab.is_related(&a));
        assert!(!ab.is_related(&ac));
        assert!(Path::root().is_related(&ac));
    }

    #[test]
    fn size_path_is_not_related_to_elements() {
        let list = Path::parse("/list").unwrap();
        assert!(!list.size().is_related(&list.join_index(3)));
        assert!(list.size().is_related(&list));
        assert!(list.size().is_related(&Path::root()));
        assert!(!list.size().is_related(&Path::root().size()));
        assert!(!list.size().is_related(&list.join_index(0).size()));
        assert_eq!(list.size().to_string(), "/list#size");
        assert_eq!(list.size().parent(), Some(list.clone()));
        assert_eq!(list.size().last(), None);
    }

    #[test]
    fn size_path_does_not_collide_with_hash_size_key() {
        let list = Path::parse("/list").unwrap();
        let key = Path::parse("/list/#size").unwrap();
        assert_eq!(key.segments(), ["list", "#size"]);
        assert!(!key.is_size());
        assert_ne!(key, list.size());
        assert!(!key.is_related(&list.size()));
        assert!(!list.size().is_related(&key));
        let rebased = list.concat(&Path::root().size());
        assert_eq!(rebased, list.size());
    }

    #[test]
    fn parent_and_last() {
        let path = Path::parse("/a/b").unwrap();
        assert_eq!(path.parent(), Some(Path::parse("/a").unwrap()));
        assert_eq!(path.last(), Some("b"));
        assert_eq!(Path::root().parent(), None);
    }

    #[test]
    fn serde_uses_pointer_strings() {
        let path = Path::parse("/a/0").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"/a/0\"");
        let back: Path = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_str::<Path>("\"nope\"").is_err());
    }

    #[test]
    fn read_path_affected_only_under_same_source() {
        let read = ReadPath::new(Uid::new(1), Path::parse("/a/b").unwrap());
        assert!(read.is_affected_by(Uid::new(1), &Path::parse("/a").unwrap()));
        assert!(!read.is_affected_by(Uid::new(2), &Path::parse("/a").unwrap()));
        assert!(!read.is_affected_by(Uid::new(1), &Path::parse("/a/c").unwrap()));
        assert_eq!(read.to_string(), "#1/a/b");
    }
}
