//! Streaming writer for outputs with a fixed column count.

use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{error, trace};

use crate::error::OutputResult;
use crate::extract::{ContainerContext, RecordIterator, SlotPolicy};
use crate::mapping::MappingTree;
use crate::output::{io_error, open_csv, write_fields, write_row, OutputWriter};

/// Writes the header when opened and every row as soon as its document
/// has been evaluated.
pub struct DirectCsvWriter {
    name: String,
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl DirectCsvWriter {
    /// Open `path` and write `columns` as the header. When appending to a
    /// file that already has content, the header is skipped.
    pub fn create(name: &str, path: &Path, columns: &[String], append: bool) -> OutputResult<Self> {
        let (mut writer, has_content) = open_csv(name, path, append)?;
        if !has_content && !columns.is_empty() {
            write_fields(&mut writer, name, columns.iter().map(String::as_str))?;
        }
        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }
}

impl OutputWriter for DirectCsvWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn rows_written(&self) -> usize {
        self.rows
    }

    fn write_document(&mut self, tree: &MappingTree, mut context: ContainerContext) -> OutputResult<()> {
        let before = self.rows;
        for record in RecordIterator::new(tree, &mut context, SlotPolicy::Fixed)? {
            write_row(&mut self.writer, &self.name, &record?)?;
            self.rows += 1;
        }
        trace!(output = %self.name, rows = self.rows - before, "Wrote document rows");
        Ok(())
    }

    fn close(mut self: Box<Self>, _tree: &MappingTree) -> OutputResult<usize> {
        self.writer.flush().map_err(io_error(&self.name, &self.path))?;
        Ok(self.rows)
    }

    fn abort(mut self: Box<Self>) {
        if let Err(e) = self.writer.flush() {
            error!(output = %self.name, path = %self.path.display(), error = %e, "Failed to flush aborted output");
        }
    }
}
