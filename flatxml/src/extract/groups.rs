//! Group synchronization state.
//!
//! One state exists per row scope. It holds an entry per distinct group of the
//! Lazy mappings in that scope, ordered by group number, plus an optional
//! inline entry that guarantees the scope yields at least one row. Every row
//! advances all entries together, so groups merge zip-to-longest: the scope
//! yields as many rows as its largest entry, and shorter groups resolve to
//! "no value" once they run out.

use crate::error::Defect;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    /// `None` for the inline entry.
    pub group: Option<u32>,
    pub index: usize,
    /// Number of rows this entry has content for.
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupState {
    /// Sorted by group, the inline entry first.
    entries: Vec<GroupEntry>,
}

impl GroupState {
    /// A state with no entries; it never has a row.
    pub fn new() -> Self {
        Self::default()
    }

    /// A state whose inline entry yields exactly one row.
    pub fn with_inline_row() -> Self {
        Self {
            entries: vec![GroupEntry {
                group: None,
                index: 0,
                size: 1,
            }],
        }
    }

    /// Register `size` rows for `group`. Registering a group again keeps the
    /// larger size.
    pub fn register(&mut self, group: u32, size: usize) {
        match self.entries.binary_search_by(|e| e.group.cmp(&Some(group))) {
            Ok(pos) => {
                let entry = &mut self.entries[pos];
                entry.size = entry.size.max(size);
            }
            Err(pos) => self.entries.insert(
                pos,
                GroupEntry {
                    group: Some(group),
                    index: 0,
                    size,
                },
            ),
        }
    }

    /// Current row index for `group`.
    pub fn current_index(&self, group: u32) -> Result<usize, Defect> {
        self.entries
            .iter()
            .find(|e| e.group == Some(group))
            .map(|e| e.index)
            .ok_or_else(|| Defect::new(format!("group {} has no synchronization entry", group)))
    }

    /// True while any entry has content left.
    pub fn has_next(&self) -> bool {
        self.entries.iter().any(|e| e.index < e.size)
    }

    /// Advance every entry, exhausted or not.
    pub fn increment(&mut self) {
        for entry in &mut self.entries {
            entry.index += 1;
        }
    }

    /// Total rows this state yields from the start.
    pub fn row_count(&self) -> usize {
        self.entries.iter().map(|e| e.size).max().unwrap_or(0)
    }

    pub fn groups(&self) -> Vec<u32> {
        self.entries.iter().filter_map(|e| e.group).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_to_longest() {
        let mut state = GroupState::new();
        state.register(2, 3);
        state.register(1, 1);

        let mut rows = 0;
        while state.has_next() {
            rows += 1;
            state.increment();
        }
        // max(3, 1), not 3 * 1
        assert_eq!(rows, 3);
        assert_eq!(state.current_index(1).unwrap(), 3);
    }

    #[test]
    fn test_entries_are_ordered_and_merged() {
        let mut state = GroupState::with_inline_row();
        state.register(5, 2);
        state.register(1, 4);
        state.register(5, 1);
        assert_eq!(state.groups(), vec![1, 5]);
        assert_eq!(state.row_count(), 4);
    }

    #[test]
    fn test_inline_row_guarantees_one_row() {
        let mut state = GroupState::with_inline_row();
        state.register(3, 0);
        assert!(state.has_next());
        state.increment();
        assert!(!state.has_next());
        assert!(!GroupState::new().has_next());
    }

    #[test]
    fn test_unknown_group_is_a_defect() {
        let state = GroupState::with_inline_row();
        assert!(state.current_index(9).is_err());
    }
}
