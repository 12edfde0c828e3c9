//! Record flattening: turns one evaluated context tree into rows.
//!
//! Rows are produced scope by scope. The document is one scope; every
//! instance of a Lazy container with a root query opens a nested scope for
//! its children. A scope owns a [`GroupState`] with one entry per Lazy
//! group reachable in it, so sibling groups merge zip-to-longest. A nested
//! container appears in its enclosing scope as a single entry whose size is
//! the number of rows all its instances produce together, and is tracked by
//! a cursor that moves through its instances as rows are consumed.
//!
//! Inline mappings (Greedy, or anything below a Greedy container) never
//! touch group state: every row built while their scope is current carries
//! all their kept matches, padded according to the [`SlotPolicy`].

use tracing::trace;

use crate::error::Defect;
use crate::extract::cardinality::{kept_count, width, SlotPolicy};
use crate::extract::context::{ContainerContext, ExtractionContext};
use crate::extract::groups::GroupState;
use crate::mapping::{MappingId, MappingNode, MappingTree, MultiValueBehaviour};

/// One output row. `None` renders as an empty field.
pub type Record = Vec<Option<String>>;

fn pad(out: &mut Record, count: usize) {
    out.extend(std::iter::repeat(None).take(count));
}

fn rooted(tree: &MappingTree, id: MappingId) -> bool {
    tree[id].root_query().is_some()
}

/// Instances a container contributes after bounds. Containers without a
/// root query always have exactly one.
fn instance_count(tree: &MappingTree, id: MappingId, context: &ContainerContext) -> usize {
    if rooted(tree, id) {
        tree[id].common().bounded_count(context.instance_count())
    } else {
        1
    }
}

fn container_child<'c>(
    context: Option<&'c ExtractionContext>,
    id: MappingId,
) -> Result<&'c ContainerContext, Defect> {
    match context {
        Some(ExtractionContext::Container(c)) if c.mapping() == id => Ok(c),
        _ => Err(Defect::new(format!(
            "container mapping {:?} has no matching context",
            id
        ))),
    }
}

/// Children of the single instance of a container without a root query.
fn transparent_children(context: &ContainerContext) -> &[ExtractionContext] {
    context.instances().first().map(Vec::as_slice).unwrap_or(&[])
}

/// Register the Lazy content of `parent`'s children in `state`. When
/// `cursors` is given, a cursor is opened for every nested row-producing
/// container; otherwise only sizes are computed.
fn register_scope<'c>(
    tree: &MappingTree,
    parent: MappingId,
    children: &'c [ExtractionContext],
    state: &mut GroupState,
    mut cursors: Option<&mut Vec<Cursor<'c>>>,
) -> Result<(), Defect> {
    for (i, child) in tree.children(parent).iter().copied().enumerate() {
        if tree.is_inline(child) {
            continue;
        }
        let common = tree[child].common();
        let context = children.get(i);
        match &tree[child] {
            MappingNode::Value(_) => {
                let found = match context {
                    Some(ExtractionContext::Value(v)) if v.mapping() == child => v.values().len(),
                    // Pivot columns discovered after this instance was evaluated
                    None => 0,
                    Some(_) => {
                        return Err(Defect::new(format!(
                            "value mapping {:?} has no matching context",
                            child
                        )))
                    }
                };
                state.register(common.group, common.bounded_count(found));
            }
            MappingNode::Container(_) | MappingNode::Pivot(_) => {
                let container = container_child(context, child)?;
                if rooted(tree, child) {
                    let span = row_span(tree, child, container)?;
                    state.register(common.group, span);
                    if let Some(cursors) = cursors.as_deref_mut() {
                        cursors.push(Cursor::begin(tree, child, container)?);
                    }
                } else {
                    register_scope(
                        tree,
                        child,
                        transparent_children(container),
                        state,
                        cursors.as_deref_mut(),
                    )?;
                }
            }
        }
    }
    Ok(())
}

/// Rows the instance scope over `children` yields.
fn scope_rows(tree: &MappingTree, id: MappingId, children: &[ExtractionContext]) -> Result<usize, Defect> {
    let mut state = GroupState::with_inline_row();
    register_scope(tree, id, children, &mut state, None)?;
    Ok(state.row_count())
}

/// Rows all instances of a row-producing container yield together. Padded
/// instances take one row each.
fn row_span(tree: &MappingTree, id: MappingId, context: &ContainerContext) -> Result<usize, Defect> {
    let mut span = 0;
    for i in 0..instance_count(tree, id, context) {
        span += match context.instances().get(i) {
            Some(children) => scope_rows(tree, id, children)?,
            None => 1,
        };
    }
    Ok(span)
}

// =============================================================================
// Cursor
// =============================================================================

/// Position of a row-producing container within its enclosing scope.
#[derive(Debug)]
struct Cursor<'c> {
    mapping: MappingId,
    context: &'c ContainerContext,
    instance: usize,
    instance_count: usize,
    state: GroupState,
    nested: Vec<Cursor<'c>>,
}

impl<'c> Cursor<'c> {
    fn begin(tree: &MappingTree, mapping: MappingId, context: &'c ContainerContext) -> Result<Self, Defect> {
        let mut cursor = Self {
            mapping,
            context,
            instance: 0,
            instance_count: instance_count(tree, mapping, context),
            state: GroupState::new(),
            nested: Vec::new(),
        };
        cursor.open_instance(tree, 0)?;
        Ok(cursor)
    }

    fn open_instance(&mut self, tree: &MappingTree, instance: usize) -> Result<(), Defect> {
        self.instance = instance;
        self.nested.clear();
        self.state = GroupState::with_inline_row();
        let context = self.context;
        if instance < self.instance_count {
            if let Some(children) = context.instances().get(instance) {
                register_scope(tree, self.mapping, children, &mut self.state, Some(&mut self.nested))?;
            }
        }
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.instance >= self.instance_count
    }

    /// Instance added to reach the minimum; it has no content.
    fn is_padding(&self) -> bool {
        self.instance >= self.context.instance_count()
    }

    fn advance(&mut self, tree: &MappingTree) -> Result<(), Defect> {
        if self.is_exhausted() {
            return Ok(());
        }
        self.state.increment();
        for nested in &mut self.nested {
            nested.advance(tree)?;
        }
        if !self.state.has_next() {
            self.open_instance(tree, self.instance + 1)?;
        }
        Ok(())
    }

    fn walk(&self, tree: &MappingTree, policy: SlotPolicy, out: &mut Record) -> Result<(), Defect> {
        if self.is_exhausted() || self.is_padding() {
            pad(out, width(tree, self.mapping, policy));
            return Ok(());
        }
        let children = &self.context.instances()[self.instance];
        walk_scope(tree, policy, self.mapping, children, &self.state, &self.nested, out)
    }
}

fn walk_scope(
    tree: &MappingTree,
    policy: SlotPolicy,
    parent: MappingId,
    children: &[ExtractionContext],
    state: &GroupState,
    nested: &[Cursor<'_>],
    out: &mut Record,
) -> Result<(), Defect> {
    for (i, child) in tree.children(parent).iter().copied().enumerate() {
        let node = &tree[child];
        let common = node.common();
        if common.behaviour.is_default() {
            return Err(Defect::new(format!(
                "mapping \"{}\" reached flattening with unresolved behaviour",
                common.name
            )));
        }
        let context = children.get(i);
        if tree.is_inline(child) {
            emit_inline(tree, policy, child, context, out)?;
            continue;
        }

        match node {
            MappingNode::Value(_) => {
                let value = match context.and_then(ExtractionContext::as_value) {
                    Some(v) => {
                        let index = state.current_index(common.group)?;
                        let values = v.values();
                        if index < kept_count(common, values.len()) {
                            values.get(index).cloned()
                        } else {
                            None
                        }
                    }
                    None => None,
                };
                out.push(value);
            }
            MappingNode::Container(_) | MappingNode::Pivot(_) if rooted(tree, child) => {
                let cursor = nested
                    .iter()
                    .find(|c| c.mapping == child)
                    .ok_or_else(|| Defect::new(format!("no cursor for container \"{}\"", common.name)))?;
                cursor.walk(tree, policy, out)?;
            }
            MappingNode::Container(_) | MappingNode::Pivot(_) => {
                let container = container_child(context, child)?;
                walk_scope(
                    tree,
                    policy,
                    child,
                    transparent_children(container),
                    state,
                    nested,
                    out,
                )?;
            }
        }
    }
    Ok(())
}

/// Emit an inline mapping: every kept match, then empty slots up to the
/// policy's count.
fn emit_inline(
    tree: &MappingTree,
    policy: SlotPolicy,
    id: MappingId,
    context: Option<&ExtractionContext>,
    out: &mut Record,
) -> Result<(), Defect> {
    let node = &tree[id];
    let common = node.common();
    match node {
        MappingNode::Value(_) => {
            let values = context
                .and_then(ExtractionContext::as_value)
                .map(|v| v.values())
                .unwrap_or(&[]);
            let kept = kept_count(common, values.len());
            out.extend(values[..kept].iter().cloned().map(Some));
            pad(out, policy.inline_slots(common).saturating_sub(kept));
        }
        MappingNode::Container(_) | MappingNode::Pivot(_) => {
            let instances = context
                .and_then(ExtractionContext::as_container)
                .map(|c| c.instances())
                .unwrap_or(&[]);
            emit_inline_container(tree, policy, id, instances, out)?;
        }
    }
    Ok(())
}

fn emit_inline_container(
    tree: &MappingTree,
    policy: SlotPolicy,
    id: MappingId,
    instances: &[Vec<ExtractionContext>],
    out: &mut Record,
) -> Result<(), Defect> {
    let node = &tree[id];
    let (kept, slots) = if rooted(tree, id) {
        let kept = kept_count(node.common(), instances.len());
        (kept, kept.max(policy.inline_slots(node.common())))
    } else {
        (instances.len().min(1), 1)
    };
    for j in 0..slots {
        for (k, child) in node.children().iter().copied().enumerate() {
            if j < kept {
                emit_inline(tree, policy, child, instances[j].get(k), out)?;
            } else {
                pad(out, width(tree, child, policy));
            }
        }
    }
    Ok(())
}

// =============================================================================
// Record Iterator
// =============================================================================

#[derive(Debug)]
enum Mode<'c> {
    /// Lazy top-level container: one row per synchronized step.
    Rows(Cursor<'c>),
    /// Greedy top-level container: everything on a single row.
    Single { pending: bool },
    Done,
}

/// Forward-only producer of the rows of one evaluated document.
///
/// Building the iterator marks the context as flattened; flattening the
/// same evaluation twice is a defect. After an error the iterator is
/// finished.
#[derive(Debug)]
pub struct RecordIterator<'c> {
    tree: &'c MappingTree,
    context: &'c ContainerContext,
    policy: SlotPolicy,
    mode: Mode<'c>,
}

impl<'c> RecordIterator<'c> {
    pub fn new(
        tree: &'c MappingTree,
        context: &'c mut ContainerContext,
        policy: SlotPolicy,
    ) -> Result<Self, Defect> {
        if !context.is_evaluated() {
            return Err(Defect::new("context must be evaluated before it is flattened"));
        }
        if context.is_flattened() {
            return Err(Defect::new(
                "context was already flattened; evaluate the document again",
            ));
        }
        if tree.has_unresolved_behaviour() {
            return Err(Defect::new(
                "mapping behaviour must be resolved before flattening",
            ));
        }
        context.mark_flattened();
        let context: &'c ContainerContext = context;
        Self::over(tree, context, policy)
    }

    fn over(
        tree: &'c MappingTree,
        context: &'c ContainerContext,
        policy: SlotPolicy,
    ) -> Result<Self, Defect> {
        let root = context.mapping();
        let mode = match tree[root].common().behaviour {
            MultiValueBehaviour::Lazy => Mode::Rows(Cursor::begin(tree, root, context)?),
            MultiValueBehaviour::Greedy => Mode::Single {
                pending: instance_count(tree, root, context) > 0,
            },
            MultiValueBehaviour::Default => {
                return Err(Defect::new(format!(
                    "output \"{}\" has unresolved behaviour",
                    tree[root].name()
                )))
            }
        };
        trace!(output = %tree[root].name(), ?policy, "Flattening document");
        Ok(Self {
            tree,
            context,
            policy,
            mode,
        })
    }

    pub fn has_next(&self) -> bool {
        match &self.mode {
            Mode::Rows(cursor) => !cursor.is_exhausted(),
            Mode::Single { pending } => *pending,
            Mode::Done => false,
        }
    }

    fn next_record(&mut self) -> Result<Option<Record>, Defect> {
        let mut record = Record::new();
        match &mut self.mode {
            Mode::Rows(cursor) => {
                if cursor.is_exhausted() {
                    return Ok(None);
                }
                cursor.walk(self.tree, self.policy, &mut record)?;
                cursor.advance(self.tree)?;
            }
            Mode::Single { pending } => {
                if !*pending {
                    return Ok(None);
                }
                *pending = false;
                emit_inline_container(
                    self.tree,
                    self.policy,
                    self.context.mapping(),
                    self.context.instances(),
                    &mut record,
                )?;
            }
            Mode::Done => return Ok(None),
        }
        Ok(Some(record))
    }
}

impl Iterator for RecordIterator<'_> {
    type Item = Result<Record, Defect>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.mode = Mode::Done;
                None
            }
            Err(e) => {
                self.mode = Mode::Done;
                Some(Err(e))
            }
        }
    }
}
