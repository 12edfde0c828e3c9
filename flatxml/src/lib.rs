//! # flatxml - mapping-driven XML to CSV flattening
//!
//! flatxml reads a declarative mapping configuration (XPath expressions
//! grouped into named lists) and flattens repeating XML documents into one
//! CSV file per list.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  XML Input  │────▶│   Context   │────▶│   Records   │────▶│  CSV Files  │
//! │ (auto-enc)  │     │ (per doc)   │     │ (zip/inline)│     │ (per list)  │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use flatxml::{convert_files, load_files, ConvertOptions};
//!
//! let mut config = load_files(&["mapping.xml"])?;
//! let summary = convert_files(&mut config, &["input/"], &ConvertOptions::default())?;
//! println!("{} documents", summary.documents_read);
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`mapping`] - Mapping model (arena tree, behaviours, name formats, filters)
//! - [`config`] - Mapping configuration loader
//! - [`query`] - XPath 1.0 queries over `sxd-xpath`
//! - [`input`] - Input document decoding and parsing
//! - [`extract`] - Context tree, group synchronization, flattening, cardinality
//! - [`output`] - CSV writers and output manager
//! - [`pipeline`] - Run orchestration

// Core modules
pub mod error;
pub mod mapping;
pub mod query;

// Loading
pub mod config;
pub mod input;

// Extraction
pub mod extract;

// Output
pub mod output;
pub mod pipeline;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, Defect, ExtractionError, InputError, OutputError, PipelineError, PipelineResult, QueryError,
};

// =============================================================================
// Re-exports - Mapping model
// =============================================================================

pub use mapping::{
    InputFilter, MappingCommon, MappingConfiguration, MappingContainer, MappingId, MappingNode, MappingTree,
    MultiValueBehaviour, NameFormat, PivotMapping, ValueMapping, ValueSource,
};

// =============================================================================
// Re-exports - Configuration
// =============================================================================

pub use config::{load_file, load_files, load_str};

// =============================================================================
// Re-exports - Query
// =============================================================================

pub use query::{document_element, NamespaceMap, Node, Query};

// =============================================================================
// Re-exports - Input
// =============================================================================

pub use input::{decode_content, detect_encoding, InputDocument};

// =============================================================================
// Re-exports - Extraction
// =============================================================================

pub use extract::{
    column_names, evaluate_output, evaluate_outputs, CardinalityResolver, ContainerContext, EvaluationOptions, ExtractionContext,
    GroupState, OutputStrategy, Record, RecordIterator, SlotPolicy, ValueContext,
};

// =============================================================================
// Re-exports - Output & Pipeline
// =============================================================================

pub use output::{output_file_name, DeferredCsvWriter, DirectCsvWriter, OutputManager, OutputSummary, OutputWriter};

pub use pipeline::{
    convert_files, describe_outputs, expand_inputs, extract_document, ConvertOptions, OutputDescription,
    OutputPreview, RunSummary,
};
