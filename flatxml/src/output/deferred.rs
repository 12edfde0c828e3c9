//! Buffering writer for outputs whose width depends on the documents.
//!
//! Evaluated contexts are kept until the run ends. Only then are the
//! observed maxima final, so every row can be padded to the same width and
//! the header derived from the same walk.

use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::error::{Defect, OutputResult};
use crate::extract::{column_names, ContainerContext, RecordIterator, SlotPolicy};
use crate::mapping::{MappingId, MappingTree};
use crate::output::{io_error, open_csv, write_fields, write_row, OutputWriter};

pub struct DeferredCsvWriter {
    name: String,
    path: PathBuf,
    root: MappingId,
    writer: csv::Writer<File>,
    has_content: bool,
    pending: Vec<ContainerContext>,
    rows: usize,
}

impl DeferredCsvWriter {
    /// Open `path` now; nothing is written before close.
    pub fn create(name: &str, path: &Path, root: MappingId, append: bool) -> OutputResult<Self> {
        let (writer, has_content) = open_csv(name, path, append)?;
        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            root,
            writer,
            has_content,
            pending: Vec::new(),
            rows: 0,
        })
    }

    pub fn pending_documents(&self) -> usize {
        self.pending.len()
    }
}

impl OutputWriter for DeferredCsvWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn rows_written(&self) -> usize {
        self.rows
    }

    fn write_document(&mut self, _tree: &MappingTree, context: ContainerContext) -> OutputResult<()> {
        if context.mapping() != self.root {
            return Err(Defect::new(format!(
                "output \"{}\" received a context for mapping {:?}",
                self.name,
                context.mapping()
            ))
            .into());
        }
        self.pending.push(context);
        Ok(())
    }

    fn close(mut self: Box<Self>, tree: &MappingTree) -> OutputResult<usize> {
        let columns = column_names(tree, self.root, SlotPolicy::Observed);
        if !self.has_content && !columns.is_empty() {
            write_fields(&mut self.writer, &self.name, columns.iter().map(String::as_str))?;
        }

        let pending = std::mem::take(&mut self.pending);
        debug!(output = %self.name, documents = pending.len(), columns = columns.len(), "Writing deferred output");
        for mut context in pending {
            for record in RecordIterator::new(tree, &mut context, SlotPolicy::Observed)? {
                write_row(&mut self.writer, &self.name, &record?)?;
                self.rows += 1;
            }
        }
        self.writer.flush().map_err(io_error(&self.name, &self.path))?;
        Ok(self.rows)
    }

    fn abort(mut self: Box<Self>) {
        if !self.pending.is_empty() {
            error!(output = %self.name, documents = self.pending.len(), "Discarding buffered documents");
        }
        if let Err(e) = self.writer.flush() {
            error!(output = %self.name, path = %self.path.display(), error = %e, "Failed to flush aborted output");
        }
    }
}
