//! Error types for the flattening engine.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`QueryError`] - query compilation and evaluation errors
//! - [`ConfigError`] - mapping configuration load errors (always located)
//! - [`InputError`] - input document read/decode/parse errors
//! - [`ExtractionError`] - per-document extraction failures
//! - [`Defect`] - internal invariant violations, never recovered
//! - [`OutputError`] - output sink failures
//! - [`PipelineError`] - top-level run errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Query Errors
// =============================================================================

/// Errors raised while compiling or evaluating a query expression.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    /// The expression text is not valid.
    #[error("Syntax error in \"{expression}\": {message}")]
    Syntax { expression: String, message: String },

    /// A namespace prefix was used that has not been declared.
    #[error("Undeclared namespace prefix '{0}'")]
    UnknownPrefix(String),

    /// A function name that the evaluator does not know.
    #[error("Unknown function '{0}()'")]
    UnknownFunction(String),

    /// A runtime fault while evaluating against a document.
    #[error("Evaluation of \"{expression}\" failed: {message}")]
    Evaluation { expression: String, message: String },
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while loading a mapping configuration.
///
/// Loading aborts on the first error; no partial configuration is returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A problem tied to a position in the configuration document.
    #[error("Error parsing {source_name}({line}:{column}) {message}")]
    Invalid {
        source_name: String,
        line: u32,
        column: u32,
        message: String,
    },

    /// The configuration document is not well-formed XML.
    #[error("Malformed configuration {source_name}: {message}")]
    Syntax { source_name: String, message: String },

    /// Failed to read the configuration file.
    #[error("Failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two top-level outputs with the same name across configuration files.
    #[error("Duplicate output name '{0}' across configuration files")]
    DuplicateOutput(String),

    /// Internal invariant violated while building the mapping tree.
    #[error(transparent)]
    Defect(#[from] Defect),
}

// =============================================================================
// Input Errors
// =============================================================================

/// Errors while reading an input document.
#[derive(Debug, Error)]
pub enum InputError {
    /// Failed to read the file.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document bytes could not be decoded.
    #[error("Failed to decode {document}: {message}")]
    Encoding { document: String, message: String },

    /// The document is not well-formed XML.
    #[error("Malformed XML in {document}: {message}")]
    Xml { document: String, message: String },
}

// =============================================================================
// Extraction Errors
// =============================================================================

/// Errors while evaluating the mapping tree against one document.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// A mapping's query failed at runtime.
    #[error("Mapping '{mapping}' failed: {source}")]
    Query {
        mapping: String,
        #[source]
        source: QueryError,
    },

    /// Internal invariant violated during evaluation.
    #[error(transparent)]
    Defect(#[from] Defect),
}

// =============================================================================
// Defects
// =============================================================================

/// An internal invariant violation.
///
/// Raised for states that correct configurations never reach (an unresolved
/// `Default` behaviour at flattening time, a lookup for a group that was
/// never registered, a dangling mapping id). Never retried.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Internal defect: {0}")]
pub struct Defect(pub String);

impl Defect {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

// =============================================================================
// Output Errors
// =============================================================================

/// Errors from an output sink.
#[derive(Debug, Error)]
pub enum OutputError {
    /// Failed to create, write or flush an output file.
    #[error("Unable to write output {output} ({path}): {source}")]
    Io {
        output: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV encoding failure (e.g. a row of unexpected width).
    #[error("CSV error in output {output}: {source}")]
    Csv {
        output: String,
        #[source]
        source: csv::Error,
    },

    /// Rows were sent to an output that the manager does not know.
    #[error("Unknown output '{0}'")]
    UnknownOutput(String),

    /// Two outputs resolve to the same file.
    #[error("Outputs '{first}' and '{second}' would both write {path}")]
    PathClash {
        first: String,
        second: String,
        path: PathBuf,
    },

    /// Internal invariant violated while flattening rows.
    #[error(transparent)]
    Defect(#[from] Defect),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level run errors returned by [`crate::pipeline::convert_files`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Input document error.
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    /// Extraction error, tagged with the document it happened in.
    #[error("Extraction error in {document}: {source}")]
    Extraction {
        document: String,
        #[source]
        source: ExtractionError,
    },

    /// Output error.
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    /// An input filter query failed.
    #[error("Input filter failed on {document}: {source}")]
    Filter {
        document: String,
        #[source]
        source: QueryError,
    },

    /// Internal invariant violated.
    #[error(transparent)]
    Defect(#[from] Defect),
}

impl PipelineError {
    /// Whether the error concerns a single input document, so a run may
    /// continue with the next one.
    pub fn is_document_local(&self) -> bool {
        matches!(
            self,
            PipelineError::Input(_)
                | PipelineError::Extraction {
                    source: ExtractionError::Query { .. },
                    ..
                }
                | PipelineError::Filter { .. }
        )
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for input documents.
pub type InputResult<T> = Result<T, InputError>;

/// Result type for extraction.
pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// Result type for output sinks.
pub type OutputResult<T> = Result<T, OutputError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        // Defect -> OutputError -> PipelineError
        let defect = Defect::new("group 7 not registered");
        let output_err: OutputError = defect.into();
        let pipeline_err: PipelineError = output_err.into();
        assert!(pipeline_err.to_string().contains("group 7"));

        // QueryError -> ExtractionError keeps the mapping name
        let err = ExtractionError::Query {
            mapping: "id".into(),
            source: QueryError::UnknownFunction("frobnicate".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("'id'"));
        assert!(msg.contains("frobnicate"));
    }

    #[test]
    fn test_document_local_errors() {
        let extraction = PipelineError::Extraction {
            document: "a.xml".into(),
            source: ExtractionError::Query {
                mapping: "id".into(),
                source: QueryError::UnknownFunction("f".into()),
            },
        };
        assert!(extraction.is_document_local());

        // A defect is never skipped, even when raised during extraction
        let defect = PipelineError::Extraction {
            document: "a.xml".into(),
            source: Defect::new("bad").into(),
        };
        assert!(!defect.is_document_local());
        assert!(!PipelineError::Output(OutputError::UnknownOutput("x".into())).is_document_local());
    }

    #[test]
    fn test_config_error_carries_location() {
        let err = ConfigError::Invalid {
            source_name: "orders.xml".into(),
            line: 12,
            column: 5,
            message: "Invalid behaviour \"eager\"".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("orders.xml(12:5)"));
        assert!(msg.contains("eager"));
    }
}
