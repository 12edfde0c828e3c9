//! Run orchestration: feeds input documents through the mapping
//! configuration into the outputs.
//!
//! # Example
//!
//! ```rust,ignore
//! use flatxml::{config, pipeline::{convert_files, ConvertOptions}};
//! use std::path::PathBuf;
//!
//! let mut config = config::load_file("mapping.xml")?;
//! let options = ConvertOptions {
//!     output_dir: PathBuf::from("out"),
//!     ..ConvertOptions::default()
//! };
//! let summary = convert_files(&mut config, &[PathBuf::from("data/")], &options)?;
//! println!("{} documents read", summary.documents_read);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{InputError, OutputError, PipelineError, PipelineResult};
use crate::extract::{
    column_names, evaluate_outputs, CardinalityResolver, ContainerContext, EvaluationOptions, OutputStrategy,
    Record, RecordIterator, SlotPolicy,
};
use crate::input::InputDocument;
use crate::mapping::{MappingConfiguration, MappingId};
use crate::output::{output_file_name, OutputManager, OutputSummary};
use crate::query::document_element;

/// Options for a conversion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// Directory receiving one CSV file per output.
    pub output_dir: PathBuf,

    /// Append to existing output files instead of replacing them.
    pub append: bool,

    /// Strip leading and trailing whitespace from extracted values.
    pub trim_whitespace: bool,

    /// Skip documents that fail to read, parse or evaluate.
    pub continue_on_error: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            append: false,
            trim_whitespace: false,
            continue_on_error: false,
        }
    }
}

impl ConvertOptions {
    fn evaluation(&self) -> EvaluationOptions {
        EvaluationOptions {
            trim_whitespace: self.trim_whitespace,
        }
    }
}

/// Result of a conversion run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Documents evaluated and written
    pub documents_read: usize,

    /// Documents excluded by input filters
    pub documents_filtered: usize,

    /// Documents skipped after an error
    pub documents_failed: usize,

    pub outputs: Vec<OutputSummary>,
}

/// Static description of one output, as reported by `check`.
#[derive(Debug, Clone, Serialize)]
pub struct OutputDescription {
    pub name: String,
    pub file: String,
    #[serde(flatten)]
    pub strategy: OutputStrategy,
}

/// Rows of one output for a single document.
#[derive(Debug, Clone, Serialize)]
pub struct OutputPreview {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

/// Expand directories to the `*.xml` files they contain, sorted by name.
/// Other paths are kept as given.
pub fn expand_inputs<P: AsRef<Path>>(inputs: &[P]) -> PipelineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let input = input.as_ref();
        if !input.is_dir() {
            files.push(input.to_path_buf());
            continue;
        }
        let entries = fs::read_dir(input).map_err(|source| InputError::Io {
            path: input.to_path_buf(),
            source,
        })?;
        let mut found = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| InputError::Io {
                    path: input.to_path_buf(),
                    source,
                })?
                .path();
            let is_xml = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("xml"))
                .unwrap_or(false);
            if path.is_file() && is_xml {
                found.push(path);
            }
        }
        found.sort();
        debug!(dir = %input.display(), files = found.len(), "Expanded input directory");
        files.extend(found);
    }
    Ok(files)
}

/// Describe every output of a configuration without reading documents.
pub fn describe_outputs(config: &MappingConfiguration) -> Vec<OutputDescription> {
    let resolver = CardinalityResolver::new(&config.tree);
    config
        .outputs()
        .iter()
        .map(|root| {
            let name = config.tree[*root].name();
            OutputDescription {
                name: name.to_string(),
                file: output_file_name(name),
                strategy: resolver.resolve(*root),
            }
        })
        .collect()
}

/// Convert every input document into the configured outputs.
///
/// Observed counts are reset once at the start. With `continue_on_error`,
/// documents that fail to read, parse or evaluate are logged and skipped;
/// any other error aborts the run after releasing the outputs.
pub fn convert_files<P: AsRef<Path>>(
    config: &mut MappingConfiguration,
    inputs: &[P],
    options: &ConvertOptions,
) -> PipelineResult<RunSummary> {
    let started_at = Utc::now();
    config.tree.reset_observed_counts();

    let files = expand_inputs(inputs)?;
    info!(files = files.len(), outputs = config.outputs().len(), "Starting conversion");

    let mut manager = OutputManager::create(config, &options.output_dir, options.append)?;
    let mut documents_read = 0;
    let mut documents_filtered = 0;
    let mut documents_failed = 0;

    for path in &files {
        if !config.include_file(path) {
            debug!(document = %path.display(), "Excluded by file name filter");
            documents_filtered += 1;
            continue;
        }
        match convert_document(config, &mut manager, path, options) {
            Ok(true) => documents_read += 1,
            Ok(false) => documents_filtered += 1,
            Err(e) if options.continue_on_error && e.is_document_local() => {
                warn!(document = %path.display(), error = %e, "Skipping document");
                documents_failed += 1;
            }
            Err(e) => {
                manager.abort();
                return Err(e);
            }
        }
    }

    let outputs = manager.close(&config.tree)?;
    let summary = RunSummary {
        started_at,
        finished_at: Utc::now(),
        documents_read,
        documents_filtered,
        documents_failed,
        outputs,
    };
    info!(
        read = summary.documents_read,
        filtered = summary.documents_filtered,
        failed = summary.documents_failed,
        "Conversion finished"
    );
    Ok(summary)
}

/// Evaluate one document for every output, then hand the contexts to the
/// writers. Returns `false` when an XPath filter excluded the document.
fn convert_document(
    config: &mut MappingConfiguration,
    manager: &mut OutputManager,
    path: &Path,
    options: &ConvertOptions,
) -> PipelineResult<bool> {
    let contexts = match evaluate_document(config, path, None, &options.evaluation())? {
        Some(contexts) => contexts,
        None => return Ok(false),
    };
    for (root, context) in contexts {
        manager.write_document(&config.tree, root, context)?;
    }
    Ok(true)
}

/// Read, filter and evaluate one document. Nothing is written until every
/// selected output evaluated successfully.
fn evaluate_document(
    config: &mut MappingConfiguration,
    path: &Path,
    only: Option<MappingId>,
    options: &EvaluationOptions,
) -> PipelineResult<Option<Vec<(MappingId, ContainerContext)>>> {
    let document = InputDocument::read(path)?;
    let package = document.parse()?;
    let parsed = package.as_document();
    let element = document_element(&parsed).ok_or_else(|| InputError::Xml {
        document: document.name.clone(),
        message: "no document element".to_string(),
    })?;

    let included = config
        .include_document(element)
        .map_err(|source| PipelineError::Filter {
            document: document.name.clone(),
            source,
        })?;
    if !included {
        debug!(document = %document.name, "Excluded by XPath filter");
        return Ok(None);
    }

    let roots: Vec<MappingId> = match only {
        Some(root) => vec![root],
        None => config.outputs().to_vec(),
    };
    let contexts = evaluate_outputs(&mut config.tree, &roots, element, options).map_err(|source| {
        PipelineError::Extraction {
            document: document.name.clone(),
            source,
        }
    })?;
    debug!(document = %document.name, encoding = %document.encoding, "Evaluated document");
    Ok(Some(roots.into_iter().zip(contexts).collect()))
}

/// Flatten a single document without writing files. Widths follow what
/// this document holds. `output` restricts the preview to one output.
pub fn extract_document(
    config: &mut MappingConfiguration,
    path: &Path,
    output: Option<&str>,
    options: &EvaluationOptions,
) -> PipelineResult<Vec<OutputPreview>> {
    config.tree.reset_observed_counts();
    let only = match output {
        Some(name) => Some(
            config
                .tree
                .root_named(name)
                .ok_or_else(|| OutputError::UnknownOutput(name.to_string()))?,
        ),
        None => None,
    };

    let Some(contexts) = evaluate_document(config, path, only, options)? else {
        return Ok(Vec::new());
    };

    let tree = &config.tree;
    let mut previews = Vec::with_capacity(contexts.len());
    for (root, mut context) in contexts {
        let rows = RecordIterator::new(tree, &mut context, SlotPolicy::Observed)?
            .collect::<Result<Vec<_>, _>>()?;
        previews.push(OutputPreview {
            name: tree[root].name().to_string(),
            columns: column_names(tree, root, SlotPolicy::Observed),
            rows,
        });
    }
    Ok(previews)
}
