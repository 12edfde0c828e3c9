//! Mapping model: the static description of what to extract.
//!
//! The tree is an arena. Every node lives in [`MappingTree`] and is addressed
//! by a [`MappingId`]; parent links are plain ids, so the tree has a single
//! owner and no reference cycles.
//!
//! The model is immutable after loading with one exception: each node's
//! `highest_found` counter, which accumulates the largest value (or instance)
//! count seen across all documents of a run, and the leaf mappings that pivot
//! mappings synthesize as they discover new keys. Both are reset together by
//! [`MappingTree::reset_observed_counts`] at the start of a run.

pub mod behaviour;
pub mod filter;
pub mod name_format;

pub use behaviour::MultiValueBehaviour;
pub use filter::{FilterPredicate, InputFilter};
pub use name_format::NameFormat;

use std::ops::{Index, IndexMut};
use std::path::Path;

use crate::error::{ConfigError, Defect, QueryResult};
use crate::query::{NamespaceMap, Node, Query};

// =============================================================================
// Node types
// =============================================================================

/// Index of a node in its [`MappingTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MappingId(usize);

impl MappingId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Settings shared by every mapping variant.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingCommon {
    pub name: String,
    pub group: u32,
    pub behaviour: MultiValueBehaviour,
    pub name_format: NameFormat,
    /// Shortfalls below this count are padded with empty fields.
    pub min_values: usize,
    /// Matches beyond this count are discarded. 0 means unbounded.
    pub max_values: usize,
    /// Largest count seen in any document of the current run.
    pub highest_found: usize,
    pub parent: Option<MappingId>,
}

impl MappingCommon {
    pub fn new(name: impl Into<String>, group: u32) -> Self {
        Self {
            name: name.into(),
            group,
            behaviour: MultiValueBehaviour::Default,
            name_format: NameFormat::NoCounts,
            min_values: 0,
            max_values: 0,
            highest_found: 0,
            parent: None,
        }
    }

    pub fn with_behaviour(mut self, behaviour: MultiValueBehaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn with_name_format(mut self, name_format: NameFormat) -> Self {
        self.name_format = name_format;
        self
    }

    /// Set the value-count bounds. A positive maximum below the minimum is
    /// rejected.
    pub fn with_bounds(mut self, min_values: usize, max_values: usize) -> Result<Self, String> {
        if max_values > 0 && min_values > max_values {
            return Err(format!(
                "Minimum value count {} exceeds maximum {} for mapping \"{}\"",
                min_values, max_values, self.name
            ));
        }
        self.min_values = min_values;
        self.max_values = max_values;
        Ok(self)
    }

    /// Number of output slots one evaluation of this mapping must produce:
    /// `max(min, highest)`, clamped to `max` when bounded.
    pub fn field_count_for_single_record(&self) -> usize {
        let count = self.min_values.max(self.highest_found);
        if self.max_values > 0 {
            count.min(self.max_values)
        } else {
            count
        }
    }

    /// Count after applying the bounds to `found` matches: truncated to a
    /// positive maximum, padded up to the minimum.
    pub fn bounded_count(&self, found: usize) -> usize {
        let kept = if self.max_values > 0 {
            found.min(self.max_values)
        } else {
            found
        };
        kept.max(self.min_values)
    }

    /// Fold one evaluation's match count into the run-wide maximum.
    pub fn record_found(&mut self, found: usize) {
        self.highest_found = self.highest_found.max(found);
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_values == 0
    }
}

/// Where a value mapping takes its values from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    Query(Query),
    /// A leaf synthesized by a pivot mapping for one key. Its values are
    /// supplied by the pivot, never queried.
    PivotKey(String),
}

/// A leaf mapping producing one field per value.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueMapping {
    pub common: MappingCommon,
    pub source: ValueSource,
}

/// An ordered list of child mappings, evaluated once per matched root node.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingContainer {
    pub common: MappingCommon,
    /// Selects the instance nodes. Absent means the inherited node is the
    /// single instance.
    pub root: Option<Query>,
    pub children: Vec<MappingId>,
}

/// A mapping whose columns come from the keys found in key/value pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotMapping {
    pub common: MappingCommon,
    pub root: Option<Query>,
    pub kv_pair_root: Query,
    pub key: Query,
    pub value: Query,
    /// Synthesized leaves, one per distinct key in first-seen order.
    pub children: Vec<MappingId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MappingNode {
    Value(ValueMapping),
    Container(MappingContainer),
    Pivot(PivotMapping),
}

impl MappingNode {
    pub fn common(&self) -> &MappingCommon {
        match self {
            MappingNode::Value(v) => &v.common,
            MappingNode::Container(c) => &c.common,
            MappingNode::Pivot(p) => &p.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut MappingCommon {
        match self {
            MappingNode::Value(v) => &mut v.common,
            MappingNode::Container(c) => &mut c.common,
            MappingNode::Pivot(p) => &mut p.common,
        }
    }

    pub fn name(&self) -> &str {
        &self.common().name
    }

    pub fn children(&self) -> &[MappingId] {
        match self {
            MappingNode::Value(_) => &[],
            MappingNode::Container(c) => &c.children,
            MappingNode::Pivot(p) => &p.children,
        }
    }

    /// The instance-selecting query of a container or pivot.
    pub fn root_query(&self) -> Option<&Query> {
        match self {
            MappingNode::Value(_) => None,
            MappingNode::Container(c) => c.root.as_ref(),
            MappingNode::Pivot(p) => p.root.as_ref(),
        }
    }

    fn children_mut(&mut self) -> Option<&mut Vec<MappingId>> {
        match self {
            MappingNode::Value(_) => None,
            MappingNode::Container(c) => Some(&mut c.children),
            MappingNode::Pivot(p) => Some(&mut p.children),
        }
    }
}

// =============================================================================
// Mapping Tree
// =============================================================================

/// Arena owning every mapping node of a configuration.
#[derive(Debug, Clone, Default)]
pub struct MappingTree {
    nodes: Vec<MappingNode>,
    roots: Vec<MappingId>,
    /// Nodes at or beyond this index were synthesized during evaluation.
    static_len: usize,
}

impl Index<MappingId> for MappingTree {
    type Output = MappingNode;

    fn index(&self, id: MappingId) -> &MappingNode {
        &self.nodes[id.0]
    }
}

impl IndexMut<MappingId> for MappingTree {
    fn index_mut(&mut self, id: MappingId) -> &mut MappingNode {
        &mut self.nodes[id.0]
    }
}

impl MappingTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top-level containers, one per output stream, in configuration order.
    pub fn roots(&self) -> &[MappingId] {
        &self.roots
    }

    pub fn root_named(&self, name: &str) -> Option<MappingId> {
        self.roots.iter().copied().find(|id| self[*id].name() == name)
    }

    pub fn get(&self, id: MappingId) -> Option<&MappingNode> {
        self.nodes.get(id.0)
    }

    pub fn parent(&self, id: MappingId) -> Option<MappingId> {
        self[id].common().parent
    }

    pub fn children(&self, id: MappingId) -> &[MappingId] {
        self[id].children()
    }

    pub fn child_named(&self, parent: MappingId, name: &str) -> Option<MappingId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|id| self[*id].name() == name)
    }

    fn ensure_unsealed(&self) -> Result<(), Defect> {
        if self.nodes.len() != self.static_len {
            return Err(Defect::new(
                "mapping tree cannot be extended after pivot columns were synthesized",
            ));
        }
        Ok(())
    }

    /// Add a top-level container.
    pub fn add_root(&mut self, mut container: MappingContainer) -> Result<MappingId, Defect> {
        self.ensure_unsealed()?;
        container.common.parent = None;
        let id = MappingId(self.nodes.len());
        self.nodes.push(MappingNode::Container(container));
        self.roots.push(id);
        self.static_len = self.nodes.len();
        Ok(id)
    }

    /// Append `node` to the children of `parent`.
    pub fn add_child(&mut self, parent: MappingId, mut node: MappingNode) -> Result<MappingId, Defect> {
        self.ensure_unsealed()?;
        let id = self.push_child(parent, &mut node)?;
        self.nodes.push(node);
        self.static_len = self.nodes.len();
        Ok(id)
    }

    fn push_child(&mut self, parent: MappingId, node: &mut MappingNode) -> Result<MappingId, Defect> {
        let id = MappingId(self.nodes.len());
        let children = self
            .nodes
            .get_mut(parent.0)
            .and_then(MappingNode::children_mut)
            .ok_or_else(|| Defect::new(format!("mapping {:?} cannot have children", parent)))?;
        children.push(id);
        node.common_mut().parent = Some(parent);
        Ok(id)
    }

    /// Move every node of `other` into this tree, keeping its roots in order.
    pub fn absorb(&mut self, other: MappingTree) -> Result<Vec<MappingId>, Defect> {
        self.ensure_unsealed()?;
        other.ensure_unsealed()?;
        let offset = self.nodes.len();
        let shift = |id: MappingId| MappingId(id.0 + offset);

        for mut node in other.nodes {
            let common = node.common_mut();
            common.parent = common.parent.map(shift);
            if let Some(children) = node.children_mut() {
                for child in children.iter_mut() {
                    *child = shift(*child);
                }
            }
            self.nodes.push(node);
        }
        let roots: Vec<MappingId> = other.roots.into_iter().map(shift).collect();
        self.roots.extend(roots.iter().copied());
        self.static_len = self.nodes.len();
        Ok(roots)
    }

    /// `id` followed by all its descendants, depth first.
    pub fn descendants(&self, id: MappingId) -> Vec<MappingId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    /// Replace every `Default` behaviour with the nearest ancestor's
    /// behaviour, falling back to `config_default` and finally `Lazy`.
    pub fn resolve_effective_behaviour(&mut self, config_default: MultiValueBehaviour) {
        let fallback = if config_default.is_default() {
            MultiValueBehaviour::Lazy
        } else {
            config_default
        };
        let roots = self.roots.clone();
        for root in roots {
            for id in self.descendants(root) {
                if !self[id].common().behaviour.is_default() {
                    continue;
                }
                let inherited = self
                    .parent(id)
                    .map(|p| self[p].common().behaviour)
                    .filter(|b| !b.is_default())
                    .unwrap_or(fallback);
                self[id].common_mut().behaviour = inherited;
            }
        }
    }

    /// Whether any node still carries `Default`.
    pub fn has_unresolved_behaviour(&self) -> bool {
        self.nodes.iter().any(|n| n.common().behaviour.is_default())
    }

    /// True when `id` or one of its ancestors is Greedy; such mappings are
    /// emitted inline and never take part in group synchronization.
    pub fn is_inline(&self, id: MappingId) -> bool {
        let mut current = Some(id);
        while let Some(c) = current {
            if self[c].common().behaviour == MultiValueBehaviour::Greedy {
                return true;
            }
            current = self.parent(c);
        }
        false
    }

    /// Reset every `highest_found` counter and drop synthesized pivot
    /// columns. Called once at the start of a run, never between documents.
    pub fn reset_observed_counts(&mut self) {
        self.nodes.truncate(self.static_len);
        for node in &mut self.nodes {
            node.common_mut().highest_found = 0;
            if let MappingNode::Pivot(pivot) = node {
                pivot.children.clear();
            }
        }
    }

    /// Find the synthesized leaf of `pivot` for `key`, creating it on first
    /// sight.
    pub fn pivot_leaf(&mut self, pivot: MappingId, key: &str) -> Result<MappingId, Defect> {
        let template = match &self[pivot] {
            MappingNode::Pivot(p) => p.common.clone(),
            _ => return Err(Defect::new(format!("mapping {:?} is not a pivot", pivot))),
        };
        if let Some(existing) = self.child_named(pivot, key) {
            return Ok(existing);
        }

        // At least one slot per key, so every instance has the column
        let mut common = MappingCommon::new(key, template.group)
            .with_behaviour(MultiValueBehaviour::Lazy)
            .with_name_format(template.name_format);
        common.min_values = 1;
        let mut node = MappingNode::Value(ValueMapping {
            common,
            source: ValueSource::PivotKey(key.to_string()),
        });
        let id = self.push_child(pivot, &mut node)?;
        self.nodes.push(node);
        Ok(id)
    }
}

// =============================================================================
// Mapping Configuration
// =============================================================================

/// A loaded configuration: the mapping tree plus document-level settings.
#[derive(Debug, Clone, Default)]
pub struct MappingConfiguration {
    pub tree: MappingTree,
    pub namespaces: NamespaceMap,
    pub default_behaviour: MultiValueBehaviour,
    pub default_name_format: NameFormat,
    pub filters: Vec<InputFilter>,
}

impl MappingConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outputs(&self) -> &[MappingId] {
        self.tree.roots()
    }

    pub fn resolve_effective_behaviour(&mut self) {
        self.tree.resolve_effective_behaviour(self.default_behaviour);
    }

    /// File-name filters only; a document passes when every filter passes.
    pub fn include_file(&self, path: &Path) -> bool {
        self.filters.iter().all(|f| f.accepts_file(path))
    }

    /// XPath filters only, against the document element.
    pub fn include_document(&self, document_element: Node<'_>) -> QueryResult<bool> {
        for filter in &self.filters {
            if !filter.accepts_document(document_element)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Merge another configuration's outputs and filters into this one.
    /// Top-level output names must stay unique.
    pub fn merge(&mut self, other: MappingConfiguration) -> Result<(), ConfigError> {
        for root in other.tree.roots() {
            let name = other.tree[*root].name();
            if self.tree.root_named(name).is_some() {
                return Err(ConfigError::DuplicateOutput(name.to_string()));
            }
        }
        self.tree.absorb(other.tree)?;
        self.filters.extend(other.filters);
        for (prefix, uri) in other.namespaces {
            self.namespaces.entry(prefix).or_insert(uri);
        }
        Ok(())
    }
}
