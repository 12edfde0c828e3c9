//! Extraction context tree: the per-document counterpart of the mapping tree.
//!
//! A context is created for one mapping node and filled by one evaluation
//! pass. Value contexts hold the matched strings; container contexts hold one
//! list of child contexts per matched instance node. Contexts refer to their
//! mapping by id only.
//!
//! Evaluation leaves the run-wide observed counts alone. They are folded in
//! with `record_observed` once every output of a document evaluated, so a
//! skipped document never widens the columns.

use std::collections::BTreeMap;
use tracing::{trace, warn};

use crate::error::{Defect, ExtractionError, ExtractionResult, QueryError};
use crate::mapping::{MappingId, MappingNode, MappingTree, ValueSource};
use crate::query::{Node, Query};

/// Evaluation settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationOptions {
    /// Strip leading and trailing whitespace from every value.
    pub trim_whitespace: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionContext {
    Value(ValueContext),
    Container(ContainerContext),
}

impl ExtractionContext {
    /// Create the context matching the variant of `mapping`.
    pub fn create(tree: &MappingTree, mapping: MappingId, index: usize) -> Result<Self, Defect> {
        match tree.get(mapping) {
            Some(MappingNode::Value(_)) => Ok(ExtractionContext::Value(ValueContext::new(mapping, index))),
            Some(MappingNode::Container(_)) | Some(MappingNode::Pivot(_)) => Ok(
                ExtractionContext::Container(ContainerContext::new(mapping, index)),
            ),
            None => Err(Defect::new(format!("no mapping with id {:?}", mapping))),
        }
    }

    pub fn mapping(&self) -> MappingId {
        match self {
            ExtractionContext::Value(v) => v.mapping,
            ExtractionContext::Container(c) => c.mapping,
        }
    }

    pub fn evaluate(
        &mut self,
        tree: &mut MappingTree,
        node: Node<'_>,
        options: &EvaluationOptions,
    ) -> ExtractionResult<()> {
        match self {
            ExtractionContext::Value(v) => v.evaluate(tree, node, options),
            ExtractionContext::Container(c) => c.evaluate(tree, node, options),
        }
    }

    /// Fold this context's counts into the mapping tree's observed maxima.
    pub fn record_observed(&self, tree: &mut MappingTree) {
        match self {
            ExtractionContext::Value(v) => v.record_observed(tree),
            ExtractionContext::Container(c) => c.record_observed(tree),
        }
    }

    pub fn as_value(&self) -> Option<&ValueContext> {
        match self {
            ExtractionContext::Value(v) => Some(v),
            ExtractionContext::Container(_) => None,
        }
    }

    pub fn as_container(&self) -> Option<&ContainerContext> {
        match self {
            ExtractionContext::Container(c) => Some(c),
            ExtractionContext::Value(_) => None,
        }
    }
}

fn query_error(tree: &MappingTree, mapping: MappingId) -> impl Fn(QueryError) -> ExtractionError + '_ {
    move |source| ExtractionError::Query {
        mapping: tree[mapping].name().to_string(),
        source,
    }
}

fn clean(value: String, options: &EvaluationOptions) -> String {
    if options.trim_whitespace {
        value.trim().to_string()
    } else {
        value
    }
}

// =============================================================================
// Value Context
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ValueContext {
    mapping: MappingId,
    index: usize,
    values: Vec<String>,
}

impl ValueContext {
    pub fn new(mapping: MappingId, index: usize) -> Self {
        Self {
            mapping,
            index,
            values: Vec::new(),
        }
    }

    /// A context pre-filled with values supplied by a pivot mapping.
    pub fn with_values(mapping: MappingId, index: usize, values: Vec<String>) -> Self {
        Self {
            mapping,
            index,
            values,
        }
    }

    pub fn mapping(&self) -> MappingId {
        self.mapping
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn reset_for_new_doc(&mut self) {
        self.values.clear();
    }

    /// Run the mapping's query from `node`, storing one value per match.
    pub fn evaluate(
        &mut self,
        tree: &mut MappingTree,
        node: Node<'_>,
        options: &EvaluationOptions,
    ) -> ExtractionResult<()> {
        self.reset_for_new_doc();
        let values = match &tree[self.mapping] {
            MappingNode::Value(v) => match &v.source {
                ValueSource::Query(query) => query
                    .evaluate_strings(node)
                    .map_err(query_error(tree, self.mapping))?,
                ValueSource::PivotKey(key) => {
                    return Err(Defect::new(format!(
                        "pivot column \"{}\" cannot be evaluated on its own",
                        key
                    ))
                    .into())
                }
            },
            _ => {
                return Err(
                    Defect::new(format!("mapping {:?} is not a value mapping", self.mapping)).into(),
                )
            }
        };

        self.values = values.into_iter().map(|v| clean(v, options)).collect();
        trace!(mapping = %tree[self.mapping].name(), found = self.values.len(), "Evaluated value mapping");
        Ok(())
    }

    pub fn record_observed(&self, tree: &mut MappingTree) {
        tree[self.mapping].common_mut().record_found(self.values.len());
    }
}

// =============================================================================
// Container Context
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerContext {
    mapping: MappingId,
    index: usize,
    /// Outer: matched instances. Inner: that instance's child contexts.
    instances: Vec<Vec<ExtractionContext>>,
    evaluated: bool,
    flattened: bool,
}

impl ContainerContext {
    pub fn new(mapping: MappingId, index: usize) -> Self {
        Self {
            mapping,
            index,
            instances: Vec::new(),
            evaluated: false,
            flattened: false,
        }
    }

    pub fn mapping(&self) -> MappingId {
        self.mapping
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn instances(&self) -> &[Vec<ExtractionContext>] {
        &self.instances
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    pub fn is_flattened(&self) -> bool {
        self.flattened
    }

    pub(crate) fn mark_flattened(&mut self) {
        self.flattened = true;
    }

    /// Clear instances and flags. Observed maxima on the mapping are kept.
    pub fn reset_for_new_doc(&mut self) {
        self.instances.clear();
        self.evaluated = false;
        self.flattened = false;
    }

    /// Evaluate the container against `node`: select its instances with the
    /// root query (or take `node` itself when there is none) and evaluate a
    /// fresh set of child contexts for each.
    pub fn evaluate(
        &mut self,
        tree: &mut MappingTree,
        node: Node<'_>,
        options: &EvaluationOptions,
    ) -> ExtractionResult<()> {
        self.reset_for_new_doc();

        let roots = match tree[self.mapping].root_query() {
            Some(query) => select_instances(tree, self.mapping, query, node)?,
            None => vec![node],
        };

        // `None` for a pivot, whose children are synthesized per key
        let children = match &tree[self.mapping] {
            MappingNode::Container(container) => Some(container.children.clone()),
            MappingNode::Pivot(_) => None,
            MappingNode::Value(_) => {
                return Err(Defect::new(format!(
                    "mapping {:?} is not a container",
                    self.mapping
                ))
                .into())
            }
        };

        match children {
            Some(children) => {
                for root in &roots {
                    let mut contexts = Vec::with_capacity(children.len());
                    for (i, child) in children.iter().enumerate() {
                        let mut context = ExtractionContext::create(tree, *child, i)?;
                        context.evaluate(tree, *root, options)?;
                        contexts.push(context);
                    }
                    self.instances.push(contexts);
                }
            }
            None => self.evaluate_pivot(tree, &roots, options)?,
        }

        self.evaluated = true;
        trace!(
            mapping = %tree[self.mapping].name(),
            instances = self.instances.len(),
            "Evaluated container"
        );
        Ok(())
    }

    /// Collect key/value pairs per instance, synthesize a leaf per new key,
    /// then give every instance one value context per known key.
    fn evaluate_pivot(
        &mut self,
        tree: &mut MappingTree,
        roots: &[Node<'_>],
        options: &EvaluationOptions,
    ) -> ExtractionResult<()> {
        let pairs_per_root = {
            let MappingNode::Pivot(pivot) = &tree[self.mapping] else {
                return Err(Defect::new("pivot evaluation on a non-pivot mapping").into());
            };
            let on_error = query_error(tree, self.mapping);
            let mut all = Vec::with_capacity(roots.len());
            for root in roots {
                let mut pairs: Vec<(String, Vec<String>)> = Vec::new();
                for kv in select_instances(tree, self.mapping, &pivot.kv_pair_root, *root)? {
                    let key = pivot.key.evaluate_string(kv).map_err(&on_error)?;
                    let Some(key) = key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()) else {
                        warn!(pivot = %pivot.common.name, "Skipping key/value pair without a key");
                        continue;
                    };
                    let values = pivot.value.evaluate_strings(kv).map_err(&on_error)?;
                    pairs.push((key, values));
                }
                all.push(pairs);
            }
            all
        };

        let mut grouped: Vec<BTreeMap<MappingId, Vec<String>>> = Vec::with_capacity(roots.len());
        for pairs in pairs_per_root {
            let mut by_leaf: BTreeMap<MappingId, Vec<String>> = BTreeMap::new();
            for (key, values) in pairs {
                let leaf = tree.pivot_leaf(self.mapping, &key)?;
                by_leaf
                    .entry(leaf)
                    .or_default()
                    .extend(values.into_iter().map(|v| clean(v, options)));
            }
            grouped.push(by_leaf);
        }

        let leaves = tree.children(self.mapping).to_vec();
        for mut by_leaf in grouped {
            let mut contexts = Vec::with_capacity(leaves.len());
            for (i, leaf) in leaves.iter().enumerate() {
                let values = by_leaf.remove(leaf).unwrap_or_default();
                contexts.push(ExtractionContext::Value(ValueContext::with_values(
                    *leaf, i, values,
                )));
            }
            self.instances.push(contexts);
        }
        Ok(())
    }

    /// Record the instance count (rooted containers only) and recurse.
    pub fn record_observed(&self, tree: &mut MappingTree) {
        if tree[self.mapping].root_query().is_some() {
            tree[self.mapping]
                .common_mut()
                .record_found(self.instances.len());
        }
        for context in self.instances.iter().flatten() {
            context.record_observed(tree);
        }
    }
}

/// Run a root query, keeping element (and other tree) nodes. Attribute,
/// namespace and atomic results cannot act as instance roots and are skipped.
fn select_instances<'d>(
    tree: &MappingTree,
    mapping: MappingId,
    query: &Query,
    node: Node<'d>,
) -> ExtractionResult<Vec<Node<'d>>> {
    let matched = query.select(node).map_err(query_error(tree, mapping))?;
    let mut nodes = Vec::with_capacity(matched.len());
    for n in matched {
        match n {
            Node::Attribute(_) | Node::Namespace(_) => warn!(
                mapping = %tree[mapping].name(),
                query = %query,
                "Root query matched an attribute, skipping it"
            ),
            _ => nodes.push(n),
        }
    }
    Ok(nodes)
}
