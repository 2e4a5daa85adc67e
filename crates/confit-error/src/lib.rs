//! Error types for the confit configuration engine.
//!
//! Two error channels exist side by side:
//!
//! - [`ConfitError`] is the immediate failure type. Instance-contract
//!   violations (illegal value on `update`, access to an unknown property)
//!   surface as a `ConfitError` at the call site.
//! - [`ErrorLog`] is the accumulating sink used by descriptor builds,
//!   document parsing and item validation. Those operations report every
//!   problem they find and fail once, at the end, with a single aggregated
//!   `ConfitError` listing all of them.

use std::fmt;

use thiserror::Error;

/// Primary error type for confit operations.
///
/// Structured variants for the common cases; aggregated variants
/// ([`ConfitError::BuildFailed`], [`ConfitError::ParseFailed`]) carry the
/// rendered contents of an [`ErrorLog`].
#[derive(Error, Debug)]
pub enum ConfitError {
    // === Schema Build Errors ===
    /// A build session finished with collected defects; nothing was published.
    #[error("schema build failed with {count} problem(s)\n{details}")]
    BuildFailed {
        /// Number of error records collected in the session.
        count: usize,
        /// Rendered error records, one per line.
        details: String,
    },

    /// No schema definition is registered under the given identifier.
    #[error("unknown schema: '{id}'")]
    UnknownSchema { id: String },

    /// A schema definition was registered twice under one identifier.
    #[error("schema '{id}' is already defined")]
    DuplicateSchema { id: String },

    // === Document Structure Errors ===
    /// A parse finished with collected recoverable defects.
    #[error("document parse failed with {count} problem(s)\n{details}")]
    ParseFailed {
        /// Number of error records collected during the parse.
        count: usize,
        /// Rendered error records, one per line.
        details: String,
    },

    /// A parse hit a defect it cannot skip past (a complex-coded subtree
    /// failed after an unknown number of tokens were consumed, or the
    /// markup itself is unreadable).
    #[error("parse aborted at {line}:{col}: {detail}")]
    ParseAborted {
        /// 1-based line of the failure.
        line: u32,
        /// 1-based column of the failure.
        col: u32,
        /// What went wrong.
        detail: String,
    },

    // === Instance Contract Violations ===
    /// The property name does not exist on the item's descriptor.
    #[error("no such property '{name}' on schema '{schema}'")]
    UnknownProperty { schema: String, name: String },

    /// The value handed to `update` does not fit the property.
    #[error("illegal value for property '{property}' of schema '{schema}': {detail}")]
    IllegalValue {
        schema: String,
        property: String,
        detail: String,
    },

    /// Null was assigned to a property that does not allow it.
    #[error("property '{property}' of schema '{schema}' is not nullable")]
    NullNotAllowed { schema: String, property: String },

    /// A derived or container-alias property was the target of `update`
    /// or `reset`.
    #[error("property '{property}' of schema '{schema}' is {kind} and cannot be assigned")]
    NotSettable {
        schema: String,
        property: String,
        /// Property kind name ("derived" or "ref").
        kind: String,
    },

    /// A mandatory property was read before it was explicitly set.
    #[error("mandatory property '{property}' of schema '{schema}' has not been set")]
    MandatoryUnset { schema: String, property: String },

    /// An abstract schema was the target of instantiation.
    #[error("cannot instantiate abstract schema '{id}'")]
    AbstractInstantiation { id: String },

    /// Value kind does not match what the property stores.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    // === Codec Errors ===
    /// A value codec rejected its input.
    #[error("codec '{codec}': {detail}")]
    Codec { codec: String, detail: String },

    // === I/O and Internal ===
    /// Stream I/O error while reading a document source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Formatter error while writing a document.
    #[error("write error: {0}")]
    Fmt(#[from] std::fmt::Error),

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// The four failure classes of the engine, in spec order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Detected at descriptor build time; collected, publish-nothing.
    SchemaBuild,
    /// Recoverable document defect; the subtree is skipped.
    DocumentStructure,
    /// Unrecoverable parse failure; the whole parse aborts.
    ParseAbort,
    /// Immediate local failure at the call site.
    InstanceContract,
    /// Stream or formatter failure.
    Io,
    /// Engine bug.
    Internal,
}

impl ConfitError {
    /// Classify this error per the engine's failure taxonomy.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::BuildFailed { .. } | Self::UnknownSchema { .. } | Self::DuplicateSchema { .. } => {
                ErrorClass::SchemaBuild
            }
            Self::ParseFailed { .. } | Self::Codec { .. } => ErrorClass::DocumentStructure,
            Self::ParseAborted { .. } => ErrorClass::ParseAbort,
            Self::UnknownProperty { .. }
            | Self::IllegalValue { .. }
            | Self::NullNotAllowed { .. }
            | Self::NotSettable { .. }
            | Self::MandatoryUnset { .. }
            | Self::AbstractInstantiation { .. }
            | Self::TypeMismatch { .. } => ErrorClass::InstanceContract,
            Self::Io(_) | Self::Fmt(_) => ErrorClass::Io,
            Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Whether this error aggregates an [`ErrorLog`].
    pub const fn is_aggregate(&self) -> bool {
        matches!(self, Self::BuildFailed { .. } | Self::ParseFailed { .. })
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::BuildFailed { .. } => {
                Some("Fix the listed schema defects; a failed build publishes nothing")
            }
            Self::MandatoryUnset { .. } => {
                Some("Assign the property explicitly before reading it")
            }
            Self::AbstractInstantiation { .. } => {
                Some("Instantiate a concrete sub-schema, or drop the abstract marker")
            }
            Self::NullNotAllowed { .. } => {
                Some("Mark the property nullable or assign a non-null value")
            }
            _ => None,
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an unknown-property error.
    pub fn unknown_property(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownProperty {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Create an illegal-value error.
    pub fn illegal_value(
        schema: impl Into<String>,
        property: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::IllegalValue {
            schema: schema.into(),
            property: property.into(),
            detail: detail.into(),
        }
    }

    /// Create a codec error.
    pub fn codec(codec: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Codec {
            codec: codec.into(),
            detail: detail.into(),
        }
    }
}

/// Result type alias using `ConfitError`.
pub type Result<T> = std::result::Result<T, ConfitError>;

// ---------------------------------------------------------------------------
// ErrorLog — accumulating error/info sink
// ---------------------------------------------------------------------------

/// Severity of one [`LogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Severity {
    /// A defect. Any error record makes the owning operation fail.
    Error,
    /// Informational; never fails an operation.
    Info,
}

/// One accumulated record: message, optional cause, optional location.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LogRecord {
    /// Error or info.
    pub severity: Severity,
    /// Human-readable description of the problem.
    pub message: String,
    /// Underlying cause, already rendered.
    pub cause: Option<String>,
    /// 1-based source line, for document errors.
    pub line: Option<u32>,
    /// 1-based source column, for document errors.
    pub col: Option<u32>,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let (Some(line), Some(col)) = (self.line, self.col) {
            write!(f, "{line}:{col}: ")?;
        }
        f.write_str(&self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {cause})")?;
        }
        Ok(())
    }
}

/// Accumulating sink for build, parse and validation problems.
///
/// Operations that use a log report every defect they find and decide at
/// the end whether the collected errors abort the operation. The log never
/// aborts anything by itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLog {
    records: Vec<LogRecord>,
}

impl ErrorLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error.
    pub fn error(&mut self, message: impl Into<String>) {
        self.records.push(LogRecord {
            severity: Severity::Error,
            message: message.into(),
            cause: None,
            line: None,
            col: None,
        });
    }

    /// Record an error with a source location.
    pub fn error_at(&mut self, line: u32, col: u32, message: impl Into<String>) {
        self.records.push(LogRecord {
            severity: Severity::Error,
            message: message.into(),
            cause: None,
            line: Some(line),
            col: Some(col),
        });
    }

    /// Record an error with an underlying cause.
    pub fn error_with_cause(&mut self, message: impl Into<String>, cause: &dyn fmt::Display) {
        self.records.push(LogRecord {
            severity: Severity::Error,
            message: message.into(),
            cause: Some(cause.to_string()),
            line: None,
            col: None,
        });
    }

    /// Record an informational message.
    pub fn info(&mut self, message: impl Into<String>) {
        self.records.push(LogRecord {
            severity: Severity::Info,
            message: message.into(),
            cause: None,
            line: None,
            col: None,
        });
    }

    /// Append every record from `other`.
    pub fn merge(&mut self, other: Self) {
        self.records.extend(other.records);
    }

    /// All records in insertion order.
    #[must_use]
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Number of error-severity records.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.severity == Severity::Error)
            .count()
    }

    /// Whether any error-severity record was collected.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.records.iter().any(|r| r.severity == Severity::Error)
    }

    /// Render all error records as an indented list, one per line.
    #[must_use]
    pub fn render_errors(&self) -> String {
        let mut out = String::new();
        for (i, record) in self
            .records
            .iter()
            .filter(|r| r.severity == Severity::Error)
            .enumerate()
        {
            if i > 0 {
                out.push('\n');
            }
            out.push_str("  - ");
            out.push_str(&record.to_string());
        }
        out
    }

    /// Convert into the aggregated build failure, or `Ok(())` when clean.
    pub fn into_build_result(self) -> Result<()> {
        if self.has_errors() {
            Err(ConfitError::BuildFailed {
                count: self.error_count(),
                details: self.render_errors(),
            })
        } else {
            Ok(())
        }
    }

    /// Convert into the aggregated parse failure, or `Ok(())` when clean.
    pub fn into_parse_result(self) -> Result<()> {
        if self.has_errors() {
            Err(ConfitError::ParseFailed {
                count: self.error_count(),
                details: self.render_errors(),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfitError::unknown_property("pair", "middle");
        assert_eq!(err.to_string(), "no such property 'middle' on schema 'pair'");
    }

    #[test]
    fn test_error_display_illegal_value() {
        let err = ConfitError::illegal_value("pair", "left", "expected int, got string");
        assert_eq!(
            err.to_string(),
            "illegal value for property 'left' of schema 'pair': expected int, got string"
        );
    }

    #[test]
    fn test_error_class_mapping() {
        assert_eq!(
            ConfitError::unknown_property("a", "b").class(),
            ErrorClass::InstanceContract
        );
        assert_eq!(
            ConfitError::UnknownSchema { id: "x".into() }.class(),
            ErrorClass::SchemaBuild
        );
        assert_eq!(
            ConfitError::ParseAborted {
                line: 1,
                col: 2,
                detail: String::new()
            }
            .class(),
            ErrorClass::ParseAbort
        );
        assert_eq!(
            ConfitError::internal("bug").class(),
            ErrorClass::Internal
        );
    }

    #[test]
    fn test_is_aggregate() {
        let log_err = ConfitError::BuildFailed {
            count: 2,
            details: String::new(),
        };
        assert!(log_err.is_aggregate());
        assert!(!ConfitError::internal("x").is_aggregate());
    }

    #[test]
    fn test_log_accumulates_and_renders() {
        let mut log = ErrorLog::new();
        log.error("property 'a' conflicts");
        log.info("using declared order");
        log.error_at(3, 7, "unknown tag <extra>");
        assert!(log.has_errors());
        assert_eq!(log.error_count(), 2);
        assert_eq!(log.records().len(), 3);

        let rendered = log.render_errors();
        assert!(rendered.contains("property 'a' conflicts"));
        assert!(rendered.contains("3:7: unknown tag <extra>"));
        assert!(!rendered.contains("using declared order"));
    }

    #[test]
    fn test_log_into_build_result() {
        let mut log = ErrorLog::new();
        log.info("all quiet");
        assert!(log.clone().into_build_result().is_ok());

        log.error("kind conflict");
        let err = log.into_build_result().expect_err("errors must aggregate");
        assert!(matches!(err, ConfitError::BuildFailed { count: 1, .. }));
        assert!(err.to_string().contains("kind conflict"));
    }

    #[test]
    fn test_log_merge_keeps_order() {
        let mut a = ErrorLog::new();
        a.error("first");
        let mut b = ErrorLog::new();
        b.error("second");
        a.merge(b);
        assert_eq!(a.records()[0].message, "first");
        assert_eq!(a.records()[1].message, "second");
    }

    #[test]
    fn test_record_display_with_cause() {
        let mut log = ErrorLog::new();
        log.error_with_cause("default text rejected", &"not an int");
        let rec = &log.records()[0];
        assert_eq!(
            rec.to_string(),
            "default text rejected (caused by: not an int)"
        );
    }

    #[test]
    fn test_suggestions() {
        let err = ConfitError::MandatoryUnset {
            schema: "pair".into(),
            property: "left".into(),
        };
        assert!(err.suggestion().is_some());
        assert!(ConfitError::internal("x").suggestion().is_none());
    }

    #[test]
    fn test_records_serialize_to_json() {
        let mut log = ErrorLog::new();
        log.error_at(3, 7, "unknown tag <extra>");
        let json = serde_json::to_value(log.records()).expect("serialize");
        assert_eq!(json[0]["severity"], "Error");
        assert_eq!(json[0]["message"], "unknown tag <extra>");
        assert_eq!(json[0]["line"], 3);
        assert_eq!(json[0]["col"], 7);
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "stream gone");
        let err: ConfitError = io_err.into();
        assert!(matches!(err, ConfitError::Io(_)));
        assert_eq!(err.class(), ErrorClass::Io);
    }
}
