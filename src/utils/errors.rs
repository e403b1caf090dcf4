//! Error types for the interchange framework.
//!
//! This module defines all error types used throughout the crate,
//! organized by the phase that produces them.

use crate::analysis::DependenceEdge;
use crate::transform::legality::StructuralIssue;
use crate::utils::location::{SourceMap, Span};
use std::fmt;
use thiserror::Error;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Error during lexing/tokenization
    #[error("Lexer error: {0}")]
    Lexer(#[from] LexerError),

    /// Error during parsing
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// A requested interchange could not be performed
    #[error("Interchange error: {0}")]
    Interchange(#[from] InterchangeError),

    /// Error while interpreting IR
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),
}

impl Error {
    /// Source span the error points at, if it came from the frontend.
    pub fn span(&self) -> Option<Span> {
        match self {
            Error::Lexer(e) => Some(e.span),
            Error::Parse(e) => Some(e.span),
            Error::Interchange(_) | Error::Exec(_) => None,
        }
    }

    /// Render as an error diagnostic. With a source map, the offending line
    /// is echoed as a note.
    pub fn to_diagnostic(&self, source: Option<&SourceMap>) -> Diagnostic {
        let message = match self {
            Error::Lexer(e) => e.message.clone(),
            Error::Parse(e) => match &e.found {
                Some(found) => format!("{} (found: {})", e.message, found),
                None => e.message.clone(),
            },
            Error::Interchange(e) => e.to_string(),
            Error::Exec(e) => e.to_string(),
        };
        let mut diagnostic = Diagnostic::error(message);
        if let Some(span) = self.span() {
            diagnostic = diagnostic.with_span(span);
            if let Some(line) = source.and_then(|map| map.line(span.start.line)) {
                diagnostic = diagnostic.with_note(format!("{:>4} | {}", span.start.line, line));
            }
        }
        diagnostic
    }
}

/// Error during lexical analysis.
#[derive(Error, Debug, Clone)]
pub struct LexerError {
    /// The error message
    pub message: String,
    /// Location in source
    pub span: Span,
    /// The kind of lexer error
    pub kind: LexerErrorKind,
}

impl fmt::Display for LexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexerErrorKind {
    /// Unexpected character
    UnexpectedChar,
    /// Integer literal does not fit in 64 bits
    InvalidNumber,
}

/// Error during parsing.
#[derive(Error, Debug, Clone)]
pub struct ParseError {
    /// The error message
    pub message: String,
    /// Location in source
    pub span: Span,
    /// The kind of parse error
    pub kind: ParseErrorKind,
    /// What was found
    pub found: Option<String>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)?;
        if let Some(ref found) = self.found {
            write!(f, " (found: {})", found)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Expected a specific token
    ExpectedToken,
    /// Expected an expression
    ExpectedExpression,
    /// Expected a statement
    ExpectedStatement,
    /// Expected an identifier
    ExpectedIdentifier,
    /// Bound or subscript is not affine in induction variables and symbols
    NonAffine,
    /// Name used before it was declared
    UndefinedName,
    /// Name declared twice in the same scope
    DuplicateDefinition,
    /// Loop step is zero or negative
    InvalidStep,
    /// Unknown annotation
    UnknownAnnotation,
}

/// Why an adjacent pair of loops was not interchanged.
///
/// All variants are local to one candidate: the pass driver reports them
/// and moves on to the next nest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterchangeError {
    /// Imperfect nesting, cross-referencing bounds, ordered loops or
    /// opaque side effects.
    #[error("unsupported loop structure: {0}")]
    StructuralUnsupported(StructuralIssue),

    /// A dependence would be reversed by the swap.
    #[error("illegal interchange: dependence {0} would be reversed")]
    IllegalInterchange(DependenceEdge),

    /// Fewer than two loops are present.
    #[error("no interchange candidate: nest has {depth} loop(s)")]
    NoCandidate { depth: usize },
}

impl InterchangeError {
    /// Short name of the error class, used in reports.
    pub fn class(&self) -> &'static str {
        match self {
            InterchangeError::StructuralUnsupported(_) => "StructuralUnsupported",
            InterchangeError::IllegalInterchange(_) => "IllegalInterchange",
            InterchangeError::NoCandidate { .. } => "NoCandidate",
        }
    }
}

/// Error during interpretation of a function.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("symbol '{0}' has no value")]
    UnboundSymbol(String),

    #[error("array '{0}' is not declared")]
    UnknownArray(String),

    #[error("array '{array}' has {expected} dimension(s) but was indexed with {found}")]
    RankMismatch { array: String, expected: usize, found: usize },

    #[error("index {index:?} is out of bounds for array '{array}' with extents {extents:?}")]
    OutOfBounds { array: String, index: Vec<i64>, extents: Vec<i64> },

    #[error("array '{array}' has negative extent {extent}")]
    NegativeExtent { array: String, extent: i64 },

    #[error("division by zero")]
    DivisionByZero,

    #[error("loop over '{iv}' has non-positive step {step}")]
    NonPositiveStep { iv: String, step: i64 },
}

/// A diagnostic message with severity level.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level
    pub severity: DiagnosticSeverity,
    /// Message
    pub message: String,
    /// Primary span
    pub span: Option<Span>,
    /// Additional notes
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    /// Error - the requested operation failed
    Error,
    /// Warning - a candidate was skipped
    Warning,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Error, message)
    }

    /// Create a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::with_severity(DiagnosticSeverity::Warning, message)
    }

    fn with_severity(severity: DiagnosticSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    /// Add a span to the diagnostic.
    pub fn with_span(mut self, span: Span) -> Self {
        if !span.is_dummy() {
            self.span = Some(span);
        }
        self
    }

    /// Add a note to the diagnostic.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            DiagnosticSeverity::Error => "error",
            DiagnosticSeverity::Warning => "warning",
        };
        write!(f, "{}: {}", level, self.message)?;
        if let Some(span) = self.span {
            write!(f, " at {}", span)?;
        }
        for note in &self.notes {
            write!(f, "\n  = note: {}", note)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::location::SourceLocation;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError {
            message: "Expected ';'".to_string(),
            span: Span::new(SourceLocation::new(1, 5, 4), SourceLocation::new(1, 6, 5)),
            kind: ParseErrorKind::ExpectedToken,
            found: Some("'}'".to_string()),
        };
        let s = err.to_string();
        assert!(s.contains("Expected ';'"));
        assert!(s.contains("1:5-6"));
        assert!(s.contains("found: '}'"));
    }

    #[test]
    fn test_interchange_error_class() {
        let err = InterchangeError::NoCandidate { depth: 1 };
        assert_eq!(err.class(), "NoCandidate");
        assert!(err.to_string().contains("1 loop"));

        let top: Error = err.into();
        assert!(matches!(top, Error::Interchange(_)));
    }

    #[test]
    fn test_error_diagnostic_echoes_source_line() {
        let map = SourceMap::new("func f(A[N]) {\n    A[0] = $;\n}".to_string());
        let err: Error = LexerError {
            message: "Unexpected character: '$'".to_string(),
            span: Span::new(SourceLocation::new(2, 12, 26), SourceLocation::new(2, 13, 27)),
            kind: LexerErrorKind::UnexpectedChar,
        }
        .into();
        let diagnostic = err.to_diagnostic(Some(&map));
        assert_eq!(diagnostic.severity, DiagnosticSeverity::Error);
        assert_eq!(
            diagnostic.to_string(),
            "error: Unexpected character: '$' at 2:12-13\n  = note:    2 |     A[0] = $;"
        );

        let exec: Error = ExecError::DivisionByZero.into();
        assert_eq!(exec.span(), None);
        assert_eq!(exec.to_diagnostic(Some(&map)).to_string(), "error: division by zero");
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::warning("skipped loop 'i'").with_note("body is not a single loop");
        let s = diag.to_string();
        assert!(s.starts_with("warning: skipped loop 'i'"));
        assert!(s.contains("= note: body is not a single loop"));
        assert!(diag.span.is_none());
    }
}
