//! Diagnostic accumulation and the host-level error type, kept deliberately
//! distinct: almost every problem a pass detects is a [`Diagnostic`] pushed
//! into the [`ErrorReport`] rather than a `Result::Err` — the pipeline
//! degrades gracefully and keeps going. A `Result<_, PipelineError>` is
//! reserved for failures that mean the pipeline itself cannot continue (an
//! invariant a later pass assumed was already violated by an earlier one).
//!
//! `PipelineError` follows the grouped `thiserror` variants with named
//! fields style used elsewhere in this crate's error types.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use crate::loc::SourceLocation;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum Severity {
    /// Ordered before `Warning` so errors sort first at equal location.
    Error,
    Warning,
}

/// Which stage of error handling design a diagnostic belongs to.
/// Structured here (unlike the original, string-only diagnostics) so call
/// sites and tests can match on category without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum DiagnosticKind {
    /// Missing relation/type/component references, arity mismatches,
    /// redefinitions.
    Structural,
    /// Ungrounded variables, illegal underscores, type mismatches,
    /// out-of-range constants, invalid plans, cyclic inheritance, invalid
    /// override.
    Semantic,
    /// Negation/aggregation crossing a non-singleton SCC.
    Stratification,
    /// Component instantiation depth exceeded.
    Limits,
}

/// One message with an optional source location.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DiagnosticMessage {
    pub text: String,
    pub location: Option<SourceLocation>,
}

impl DiagnosticMessage {
    pub fn new(text: impl Into<String>) -> Self {
        DiagnosticMessage {
            text: text.into(),
            location: None,
        }
    }

    pub fn at(text: impl Into<String>, location: SourceLocation) -> Self {
        DiagnosticMessage {
            text: text.into(),
            location: Some(location),
        }
    }
}

impl fmt::Display for DiagnosticMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)?;
        if let Some(loc) = &self.location {
            write!(f, " in file {} at line {}", loc.filename, loc.start.line)?;
        }
        Ok(())
    }
}

/// A single diagnostic: severity, kind, a primary message, and zero or
/// more additional messages.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub primary: DiagnosticMessage,
    pub additional: Vec<DiagnosticMessage>,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, primary: DiagnosticMessage) -> Self {
        Diagnostic {
            severity: Severity::Error,
            kind,
            primary,
            additional: Vec::new(),
        }
    }

    pub fn warning(kind: DiagnosticKind, primary: DiagnosticMessage) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            kind,
            primary,
            additional: Vec::new(),
        }
    }

    pub fn with_additional(mut self, message: DiagnosticMessage) -> Self {
        self.additional.push(message);
        self
    }

    pub fn with_additional_all(mut self, messages: Vec<DiagnosticMessage>) -> Self {
        self.additional.extend(messages);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "Error",
            Severity::Warning => "Warning",
        };
        write!(f, "{prefix}: {}", self.primary)?;
        for extra in &self.additional {
            write!(f, "\n{extra}")?;
        }
        Ok(())
    }
}

/// Ordering: has-location first, then by location, then error before
/// warning, then message text. Matches the original `Diagnostic::operator<`.
impl PartialOrd for Diagnostic {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Diagnostic {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.primary.location, &other.primary.location) {
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (Some(a), Some(b)) => {
                let loc_cmp = a.cmp(b);
                if loc_cmp != Ordering::Equal {
                    return loc_cmp;
                }
            }
            (None, None) => {}
        }
        self.severity
            .cmp(&other.severity)
            .then_with(|| self.primary.text.cmp(&other.primary.text))
    }
}

/// A sorted, deduplicated set of diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ErrorReport {
    diagnostics: BTreeSet<Diagnostic>,
}

impl ErrorReport {
    pub fn new() -> Self {
        ErrorReport::default()
    }

    /// Adds a duplicate is a no-op: `BTreeSet` insertion already dedupes by
    /// `Ord`/`Eq`, matching the original `std::set<Diagnostic>` behaviour.
    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.insert(diagnostic);
    }

    pub fn error(&mut self, kind: DiagnosticKind, primary: DiagnosticMessage) {
        self.add(Diagnostic::error(kind, primary));
    }

    pub fn warning(&mut self, kind: DiagnosticKind, primary: DiagnosticMessage) {
        self.add(Diagnostic::warning(kind, primary));
    }

    pub fn num_errors(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn num_warnings(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    pub fn num_issues(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn has_errors(&self) -> bool {
        self.num_errors() > 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    /// Exit code of the host program: 0 on success with no errors,
    /// non-zero otherwise.
    pub fn exit_code(&self) -> i32 {
        i32::from(self.has_errors())
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diagnostic in &self.diagnostics {
            writeln!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

/// Host-level failures distinct from accumulated diagnostics: a pass
/// invariant was violated, the pipeline was driven out of order, or an
/// internal lookup failed. None of these should ever surface from
/// well-formed input; they indicate a bug in this crate or its caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("analysis cache miss for key {key} that a prior pass should have populated")]
    CacheMiss { key: String },

    #[error("pipeline invariant violated: {message}")]
    InvariantViolated { message: String },

    #[error("component instantiation depth limit ({limit}) exceeded while instantiating {instance}")]
    InstantiationDepthExceeded { instance: String, limit: usize },

    #[error("pass '{pass}' requires a non-empty program and received none")]
    EmptyProgram { pass: &'static str },
}
