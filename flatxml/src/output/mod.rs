//! Output sinks.
//!
//! Every top-level container is one output stream written to its own CSV
//! file. The [`OutputManager`] opens one writer per stream, choosing a
//! [`DirectCsvWriter`] when the stream has a fixed column count and a
//! [`DeferredCsvWriter`] otherwise.
//!
//! Writers are scoped resources: `close` flushes and may fail, `abort`
//! releases on error paths and never fails. Any output error aborts every
//! other writer of the run.

pub mod deferred;
pub mod direct;

pub use deferred::DeferredCsvWriter;
pub use direct::DirectCsvWriter;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::error::{OutputError, OutputResult};
use crate::extract::{CardinalityResolver, ContainerContext, OutputStrategy, Record};
use crate::mapping::{MappingConfiguration, MappingId, MappingTree};

/// Characters outside the portable POSIX file name set.
static UNPORTABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("Invalid file name regex"));

/// File name for an output stream: unportable characters become `_`.
pub fn output_file_name(name: &str) -> String {
    format!("{}.csv", UNPORTABLE.replace_all(name, "_"))
}

/// A sink for the rows of one output stream.
pub trait OutputWriter {
    fn name(&self) -> &str;

    fn path(&self) -> &Path;

    /// Rows written to the file so far.
    fn rows_written(&self) -> usize;

    /// Accept one evaluated document.
    fn write_document(&mut self, tree: &MappingTree, context: ContainerContext) -> OutputResult<()>;

    /// Flush everything and release the file. Returns the total row count.
    fn close(self: Box<Self>, tree: &MappingTree) -> OutputResult<usize>;

    /// Release the file on an error path. Failures are logged, never raised.
    fn abort(self: Box<Self>);
}

/// Outcome of one output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputSummary {
    pub name: String,
    pub path: PathBuf,
    pub strategy: String,
    pub rows: usize,
}

// =============================================================================
// CSV helpers
// =============================================================================

pub(crate) fn io_error<'a>(output: &'a str, path: &'a Path) -> impl Fn(std::io::Error) -> OutputError + 'a {
    move |source| OutputError::Io {
        output: output.to_string(),
        path: path.to_path_buf(),
        source,
    }
}

/// Open the CSV file of an output. With `append`, an existing file is kept
/// and the returned flag tells whether it already has content (and so a
/// header).
pub(crate) fn open_csv(output: &str, path: &Path, append: bool) -> OutputResult<(csv::Writer<File>, bool)> {
    let has_content = append && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(io_error(output, path))?;
    let writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(file);
    Ok((writer, has_content))
}

pub(crate) fn write_fields<'r, I>(writer: &mut csv::Writer<File>, output: &str, fields: I) -> OutputResult<()>
where
    I: IntoIterator<Item = &'r str>,
{
    writer
        .write_record(fields)
        .map_err(|source| OutputError::Csv {
            output: output.to_string(),
            source,
        })
}

pub(crate) fn write_row(writer: &mut csv::Writer<File>, output: &str, record: &Record) -> OutputResult<()> {
    write_fields(writer, output, record.iter().map(|f| f.as_deref().unwrap_or("")))
}

// =============================================================================
// Output Manager
// =============================================================================

struct OpenOutput {
    root: MappingId,
    strategy: &'static str,
    writer: Box<dyn OutputWriter>,
}

/// Owns the writers of one run.
pub struct OutputManager {
    outputs: Vec<OpenOutput>,
}

impl OutputManager {
    /// Open one writer per top-level container of `config` under
    /// `output_dir`, creating the directory if needed.
    pub fn create(config: &MappingConfiguration, output_dir: &Path, append: bool) -> OutputResult<Self> {
        fs::create_dir_all(output_dir).map_err(io_error("*", output_dir))?;

        let resolver = CardinalityResolver::new(&config.tree);
        let mut manager = Self { outputs: Vec::new() };
        for root in config.outputs() {
            let name = config.tree[*root].name();
            let path = output_dir.join(output_file_name(name));
            if let Some(clash) = manager.outputs.iter().find(|o| o.writer.path() == path) {
                return Err(OutputError::PathClash {
                    first: clash.writer.name().to_string(),
                    second: name.to_string(),
                    path,
                });
            }

            let strategy = resolver.resolve(*root);
            let label = strategy.label();
            let writer: Box<dyn OutputWriter> = match strategy {
                OutputStrategy::Fixed { columns } => {
                    Box::new(DirectCsvWriter::create(name, &path, &columns, append)?)
                }
                OutputStrategy::Variable => {
                    Box::new(DeferredCsvWriter::create(name, &path, *root, append)?)
                }
            };
            debug!(output = %name, path = %path.display(), strategy = label, "Opened output");
            manager.outputs.push(OpenOutput {
                root: *root,
                strategy: label,
                writer,
            });
        }
        info!(count = manager.outputs.len(), dir = %output_dir.display(), "Outputs ready");
        Ok(manager)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Hand one evaluated document to the writer of `root`. On failure all
    /// writers are aborted.
    pub fn write_document(
        &mut self,
        tree: &MappingTree,
        root: MappingId,
        context: ContainerContext,
    ) -> OutputResult<()> {
        let result = match self.outputs.iter_mut().find(|o| o.root == root) {
            Some(output) => output.writer.write_document(tree, context),
            None => Err(OutputError::UnknownOutput(tree[root].name().to_string())),
        };
        if result.is_err() {
            self.abort_all();
        }
        result
    }

    /// Close every writer. The first failure aborts the writers not yet
    /// closed and is returned.
    pub fn close(mut self, tree: &MappingTree) -> OutputResult<Vec<OutputSummary>> {
        let mut summaries = Vec::with_capacity(self.outputs.len());
        let mut outputs = std::mem::take(&mut self.outputs).into_iter();
        while let Some(output) = outputs.next() {
            let name = output.writer.name().to_string();
            let path = output.writer.path().to_path_buf();
            match output.writer.close(tree) {
                Ok(rows) => summaries.push(OutputSummary {
                    name,
                    path,
                    strategy: output.strategy.to_string(),
                    rows,
                }),
                Err(e) => {
                    for rest in outputs {
                        rest.writer.abort();
                    }
                    return Err(e);
                }
            }
        }
        Ok(summaries)
    }

    /// Release every writer without raising.
    pub fn abort(mut self) {
        self.abort_all();
    }

    fn abort_all(&mut self) {
        for output in self.outputs.drain(..) {
            warn!(output = %output.writer.name(), "Aborting output");
            output.writer.abort();
        }
    }
}

impl Drop for OutputManager {
    fn drop(&mut self) {
        if !self.outputs.is_empty() {
            error!(count = self.outputs.len(), "Output manager dropped without close");
            self.abort_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_str;
    use crate::extract::{evaluate_output, EvaluationOptions};
    use crate::query::with_document;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Writer that logs what the manager asks of it and fails on demand.
    struct ScriptedWriter {
        name: String,
        path: PathBuf,
        log: Log,
        fail_write: bool,
        fail_close: bool,
    }

    impl ScriptedWriter {
        fn boxed(name: &str, log: &Log, fail_write: bool, fail_close: bool) -> Box<dyn OutputWriter> {
            Box::new(Self {
                name: name.to_string(),
                path: PathBuf::from(format!("{}.csv", name)),
                log: Rc::clone(log),
                fail_write,
                fail_close,
            })
        }

        fn failure(&self) -> OutputError {
            OutputError::Io {
                output: self.name.clone(),
                path: self.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            }
        }
    }

    impl OutputWriter for ScriptedWriter {
        fn name(&self) -> &str {
            &self.name
        }

        fn path(&self) -> &Path {
            &self.path
        }

        fn rows_written(&self) -> usize {
            0
        }

        fn write_document(&mut self, _tree: &MappingTree, _context: ContainerContext) -> OutputResult<()> {
            self.log.borrow_mut().push(format!("write:{}", self.name));
            if self.fail_write {
                return Err(self.failure());
            }
            Ok(())
        }

        fn close(self: Box<Self>, _tree: &MappingTree) -> OutputResult<usize> {
            self.log.borrow_mut().push(format!("close:{}", self.name));
            if self.fail_close {
                return Err(self.failure());
            }
            Ok(0)
        }

        fn abort(self: Box<Self>) {
            self.log.borrow_mut().push(format!("abort:{}", self.name));
        }
    }

    fn three_outputs() -> MappingConfiguration {
        load_str(
            r#"<MappingConfiguration>
  <MappingList name="a"><Mapping name="x" xPath="x"/></MappingList>
  <MappingList name="b"><Mapping name="x" xPath="x"/></MappingList>
  <MappingList name="c"><Mapping name="x" xPath="x"/></MappingList>
</MappingConfiguration>"#,
            "c.xml",
        )
        .unwrap()
    }

    fn scripted(config: &MappingConfiguration, writers: Vec<Box<dyn OutputWriter>>) -> OutputManager {
        OutputManager {
            outputs: config
                .outputs()
                .iter()
                .zip(writers)
                .map(|(root, writer)| OpenOutput {
                    root: *root,
                    strategy: "fixed",
                    writer,
                })
                .collect(),
        }
    }

    fn config() -> MappingConfiguration {
        load_str(
            r#"<MappingConfiguration>
  <MappingList name="order lines" mappingRoot="item">
    <Mapping name="sku" xPath="@sku"/>
  </MappingList>
  <MappingList name="tags">
    <Mapping name="tag" xPath="tag" behaviour="greedy"/>
  </MappingList>
</MappingConfiguration>"#,
            "c.xml",
        )
        .unwrap()
    }

    fn feed(manager: &mut OutputManager, config: &mut MappingConfiguration, xml: &str) {
        for root in config.outputs().to_vec() {
            let context = with_document(xml, |node| {
                evaluate_output(&mut config.tree, root, node, &EvaluationOptions::default())
            })
            .unwrap();
            manager.write_document(&config.tree, root, context).unwrap();
        }
    }

    #[test]
    fn test_output_file_name_is_portable() {
        assert_eq!(output_file_name("order lines"), "order_lines.csv");
        assert_eq!(output_file_name("a/b:c"), "a_b_c.csv");
        assert_eq!(output_file_name("v1.2-x_y"), "v1.2-x_y.csv");
    }

    #[test]
    fn test_manager_picks_writer_per_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        let mut manager = OutputManager::create(&config, dir.path(), false).unwrap();
        assert_eq!(manager.len(), 2);

        feed(&mut manager, &mut config, r#"<r><item sku="A"/><tag>x</tag></r>"#);
        feed(&mut manager, &mut config, r#"<r><item sku="B"/><tag>y</tag><tag>z</tag></r>"#);
        let summaries = manager.close(&config.tree).unwrap();

        assert_eq!(summaries[0].strategy, "fixed");
        assert_eq!(summaries[0].rows, 2);
        assert_eq!(summaries[1].strategy, "variable");
        assert_eq!(summaries[1].rows, 2);

        let lines = fs::read_to_string(dir.path().join("order_lines.csv")).unwrap();
        assert_eq!(lines, "sku\nA\nB\n");
        let tags = fs::read_to_string(dir.path().join("tags.csv")).unwrap();
        assert_eq!(tags, "tag,tag\nx,\ny,z\n");
    }

    #[test]
    fn test_unwritable_directory_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = OutputManager::create(&config(), &file.path().join("sub"), false).err().unwrap();
        assert!(matches!(err, OutputError::Io { .. }));
    }

    #[test]
    fn test_clashing_file_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_str(
            r#"<MappingConfiguration>
  <MappingList name="a b"><Mapping name="x" xPath="x"/></MappingList>
  <MappingList name="a_b"><Mapping name="y" xPath="y"/></MappingList>
</MappingConfiguration>"#,
            "c.xml",
        )
        .unwrap();
        let err = OutputManager::create(&config, dir.path(), false).err().unwrap();
        assert!(matches!(err, OutputError::PathClash { .. }));
    }

    #[test]
    fn test_drop_without_close_releases_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = config();
        {
            let _manager = OutputManager::create(&config, dir.path(), false).unwrap();
        }
        // Fixed outputs already carry their header
        let lines = fs::read_to_string(dir.path().join("order_lines.csv")).unwrap();
        assert_eq!(lines, "sku\n");
    }

    #[test]
    fn test_failed_write_aborts_every_output() {
        let config = three_outputs();
        let roots = config.outputs().to_vec();
        let log = Log::default();
        let mut manager = scripted(
            &config,
            vec![
                ScriptedWriter::boxed("a", &log, false, false),
                ScriptedWriter::boxed("b", &log, true, false),
                ScriptedWriter::boxed("c", &log, false, false),
            ],
        );

        manager
            .write_document(&config.tree, roots[0], ContainerContext::new(roots[0], 0))
            .unwrap();
        let err = manager
            .write_document(&config.tree, roots[1], ContainerContext::new(roots[1], 0))
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert!(manager.is_empty());
        drop(manager);

        // Nothing is closed, and dropping the manager does not abort twice
        assert_eq!(
            *log.borrow(),
            vec!["write:a", "write:b", "abort:a", "abort:b", "abort:c"]
        );
    }

    #[test]
    fn test_failed_close_aborts_remaining_outputs() {
        let config = three_outputs();
        let log = Log::default();
        let manager = scripted(
            &config,
            vec![
                ScriptedWriter::boxed("a", &log, false, false),
                ScriptedWriter::boxed("b", &log, false, true),
                ScriptedWriter::boxed("c", &log, false, false),
            ],
        );

        assert!(manager.close(&config.tree).is_err());
        assert_eq!(*log.borrow(), vec!["close:a", "close:b", "abort:c"]);
    }

    #[test]
    fn test_sibling_failure_discards_buffered_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        let roots = config.outputs().to_vec();
        let log = Log::default();

        // A real deferred writer for "tags" next to a failing one
        let tags = DeferredCsvWriter::create("tags", &dir.path().join("tags.csv"), roots[1], false).unwrap();
        let mut manager = OutputManager {
            outputs: vec![
                OpenOutput {
                    root: roots[0],
                    strategy: "fixed",
                    writer: ScriptedWriter::boxed("order lines", &log, true, false),
                },
                OpenOutput {
                    root: roots[1],
                    strategy: "variable",
                    writer: Box::new(tags),
                },
            ],
        };

        let context = with_document("<r><tag>x</tag></r>", |node| {
            evaluate_output(&mut config.tree, roots[1], node, &EvaluationOptions::default())
        })
        .unwrap();
        manager.write_document(&config.tree, roots[1], context).unwrap();
        assert!(manager
            .write_document(&config.tree, roots[0], ContainerContext::new(roots[0], 0))
            .is_err());

        assert_eq!(*log.borrow(), vec!["write:order lines", "abort:order lines"]);
        // The buffered document never reached the file
        assert_eq!(fs::read_to_string(dir.path().join("tags.csv")).unwrap(), "");
    }
}
