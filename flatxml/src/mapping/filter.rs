//! Input filters deciding which documents are processed.
//!
//! File-name predicates are checked before a document is read; XPath
//! predicates are checked against the parsed document. Each check treats the
//! predicates of the other kind as passing.

use regex::Regex;
use std::path::Path;

use crate::error::QueryResult;
use crate::query::{Node, Query};

#[derive(Debug, Clone)]
pub enum FilterPredicate {
    /// Whole-string regular expression match against the file name (when
    /// `match_local_only`) or the full path.
    FileName { regex: Regex, match_local_only: bool },
    /// Boolean value of a query evaluated against the document element.
    XPath(Query),
}

/// A predicate plus nested filters that must also pass.
#[derive(Debug, Clone)]
pub struct InputFilter {
    pub predicate: FilterPredicate,
    pub nested: Vec<InputFilter>,
}

impl InputFilter {
    pub fn new(predicate: FilterPredicate) -> Self {
        Self {
            predicate,
            nested: Vec::new(),
        }
    }

    /// Build a file-name predicate; `pattern` must match the whole name.
    pub fn file_name(pattern: &str, match_local_only: bool) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(Self::new(FilterPredicate::FileName {
            regex,
            match_local_only,
        }))
    }

    pub fn accepts_file(&self, path: &Path) -> bool {
        let own = match &self.predicate {
            FilterPredicate::FileName {
                regex,
                match_local_only,
            } => {
                let subject = if *match_local_only {
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                } else {
                    path.to_string_lossy().into_owned()
                };
                regex.is_match(&subject)
            }
            FilterPredicate::XPath(_) => true,
        };
        own && self.nested.iter().all(|f| f.accepts_file(path))
    }

    pub fn accepts_document(&self, document_element: Node<'_>) -> QueryResult<bool> {
        let own = match &self.predicate {
            FilterPredicate::FileName { .. } => true,
            FilterPredicate::XPath(query) => query.matches(document_element)?,
        };
        if !own {
            return Ok(false);
        }
        for nested in &self.nested {
            if !nested.accepts_document(document_element)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
