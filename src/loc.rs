//! Source locations and qualified names shared across the IR.

use std::cmp::Ordering;
use std::fmt;

/// A single point in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Point {
    pub line: u32,
    pub col: u32,
}

impl Point {
    pub fn new(line: u32, col: u32) -> Self {
        Point { line, col }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// `(filename, start, end)`, totally ordered by filename then points.
///
/// Every IR node carries one, except nodes synthesised during desugaring,
/// which may carry [`SourceLocation::UNKNOWN`] (see the open question on
/// synthesised-node locations in the design notes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SourceLocation {
    pub filename: String,
    pub start: Point,
    pub end: Point,
}

impl SourceLocation {
    pub fn new(filename: impl Into<String>, start: Point, end: Point) -> Self {
        SourceLocation {
            filename: filename.into(),
            start,
            end,
        }
    }

    /// A location with no useful filename, used by synthesised nodes.
    pub fn unknown() -> Self {
        SourceLocation {
            filename: String::new(),
            start: Point::new(0, 0),
            end: Point::new(0, 0),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.filename.is_empty()
    }
}

impl PartialOrd for SourceLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SourceLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.filename
            .cmp(&other.filename)
            .then(self.start.cmp(&other.start))
            .then(self.end.cmp(&other.end))
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start.line == self.end.line {
            write!(
                f,
                "{} at line {} column {}",
                self.filename, self.start.line, self.start.col
            )
        } else {
            write!(
                f,
                "{} at lines {}-{}",
                self.filename, self.start.line, self.end.line
            )
        }
    }
}

/// An ordered, non-empty sequence of name segments, e.g. `problem.graph.edge`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct QualifiedName {
    segments: Vec<String>,
}

impl QualifiedName {
    pub fn new(segment: impl Into<String>) -> Self {
        QualifiedName {
            segments: vec![segment.into()],
        }
    }

    /// Builds from a non-empty slice of segments.
    ///
    /// # Panics
    /// Panics if `segments` is empty; every qualified name must have at
    /// least one segment.
    pub fn from_segments(segments: Vec<String>) -> Self {
        assert!(!segments.is_empty(), "qualified name must not be empty");
        QualifiedName { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Appends a segment, returning a fresh name (instance-name prefixing
    /// during component instantiation, for example).
    pub fn appended(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        QualifiedName { segments }
    }

    /// Prepends a segment, returning a fresh name.
    pub fn prefixed(&self, segment: impl Into<String>) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.push(segment.into());
        segments.extend(self.segments.iter().cloned());
        QualifiedName { segments }
    }

    pub fn last(&self) -> &str {
        self.segments.last().expect("non-empty by construction")
    }

    pub fn to_dotted(&self) -> String {
        self.segments.join(".")
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_dotted())
    }
}

impl PartialOrd for QualifiedName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QualifiedName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments.cmp(&other.segments)
    }
}

impl From<&str> for QualifiedName {
    fn from(s: &str) -> Self {
        if s.contains('.') {
            QualifiedName::from_segments(s.split('.').map(str::to_string).collect())
        } else {
            QualifiedName::new(s)
        }
    }
}
