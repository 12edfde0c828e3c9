//! Column layout: slot policies, row widths, column names and the
//! fixed/variable cardinality decision for an output.

use serde::Serialize;

use crate::mapping::{MappingCommon, MappingId, MappingNode, MappingTree};

/// How many slots an inline mapping occupies on a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotPolicy {
    /// Pad to the minimum only; the row grows with the matches found.
    #[default]
    Natural,
    /// Pad bounded mappings to their maximum. Used when the output has a
    /// fixed column count.
    Fixed,
    /// Pad to [`MappingCommon::field_count_for_single_record`]. Used once
    /// every document of the run has been evaluated.
    Observed,
}

impl SlotPolicy {
    /// Minimum slot count for one inline mapping; more matches than this
    /// may still be emitted under `Natural`.
    pub fn inline_slots(self, common: &MappingCommon) -> usize {
        match self {
            SlotPolicy::Natural => common.min_values,
            SlotPolicy::Fixed if common.max_values > 0 => common.max_values,
            SlotPolicy::Fixed => common.min_values,
            SlotPolicy::Observed => common.field_count_for_single_record(),
        }
    }
}

/// Matches kept after truncating `found` to a positive maximum.
pub(crate) fn kept_count(common: &MappingCommon, found: usize) -> usize {
    if common.max_values > 0 {
        found.min(common.max_values)
    } else {
        found
    }
}

/// Number of fields `id` contributes to one row when none of its inline
/// mappings exceeds its slots.
pub fn width(tree: &MappingTree, id: MappingId, policy: SlotPolicy) -> usize {
    let node = &tree[id];
    let common = node.common();
    let inline = tree.is_inline(id);
    match node {
        MappingNode::Value(_) if inline => policy.inline_slots(common),
        MappingNode::Value(_) => 1,
        MappingNode::Container(_) | MappingNode::Pivot(_) => {
            let per_instance: usize = node
                .children()
                .iter()
                .map(|child| width(tree, *child, policy))
                .sum();
            if inline && node.root_query().is_some() {
                policy.inline_slots(common) * per_instance
            } else {
                per_instance
            }
        }
    }
}

/// Header for the output rooted at `root`, one name per field in the
/// order the flattening walk emits them.
pub fn column_names(tree: &MappingTree, root: MappingId, policy: SlotPolicy) -> Vec<String> {
    let mut out = Vec::with_capacity(width(tree, root, policy));
    for child in tree.children(root) {
        push_columns(tree, *child, policy, (tree[root].name(), 0), &mut out);
    }
    out
}

fn push_columns(
    tree: &MappingTree,
    id: MappingId,
    policy: SlotPolicy,
    parent: (&str, usize),
    out: &mut Vec<String>,
) {
    let node = &tree[id];
    let common = node.common();
    let inline = tree.is_inline(id);
    let (parent_name, parent_index) = parent;
    match node {
        MappingNode::Value(_) => {
            let slots = if inline { policy.inline_slots(common) } else { 1 };
            for j in 0..slots {
                out.push(common.name_format.format(&common.name, j + 1, parent_name, parent_index + 1));
            }
        }
        MappingNode::Container(_) | MappingNode::Pivot(_) => {
            let instances = if inline && node.root_query().is_some() {
                policy.inline_slots(common)
            } else {
                1
            };
            for j in 0..instances {
                for child in node.children() {
                    push_columns(tree, *child, policy, (&common.name, j), out);
                }
            }
        }
    }
}

/// Whether every document yields rows of one statically known width: no
/// pivot anywhere below `id`, and no inline mapping without a maximum.
pub fn has_fixed_cardinality(tree: &MappingTree, id: MappingId) -> bool {
    tree.descendants(id).into_iter().all(|d| {
        let node = &tree[d];
        match node {
            MappingNode::Pivot(_) => false,
            MappingNode::Value(_) => !tree.is_inline(d) || !node.common().is_unbounded(),
            MappingNode::Container(c) => {
                !tree.is_inline(d) || c.root.is_none() || !c.common.is_unbounded()
            }
        }
    })
}

/// How an output must be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum OutputStrategy {
    /// Header known up front; rows can be streamed.
    Fixed { columns: Vec<String> },
    /// Width depends on the documents; buffer until the run ends.
    Variable,
}

impl OutputStrategy {
    pub fn is_fixed(&self) -> bool {
        matches!(self, OutputStrategy::Fixed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            OutputStrategy::Fixed { .. } => "fixed",
            OutputStrategy::Variable => "variable",
        }
    }
}

/// Decides the output strategy of each top-level container.
#[derive(Debug, Clone, Copy)]
pub struct CardinalityResolver<'t> {
    tree: &'t MappingTree,
}

impl<'t> CardinalityResolver<'t> {
    pub fn new(tree: &'t MappingTree) -> Self {
        Self { tree }
    }

    pub fn has_fixed_cardinality(&self, id: MappingId) -> bool {
        has_fixed_cardinality(self.tree, id)
    }

    /// Column count of a fixed output, `None` when variable.
    pub fn fixed_width(&self, root: MappingId) -> Option<usize> {
        self.has_fixed_cardinality(root)
            .then(|| width(self.tree, root, SlotPolicy::Fixed))
    }

    pub fn resolve(&self, root: MappingId) -> OutputStrategy {
        if self.has_fixed_cardinality(root) {
            OutputStrategy::Fixed {
                columns: column_names(self.tree, root, SlotPolicy::Fixed),
            }
        } else {
            OutputStrategy::Variable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_str;

    fn config(body: &str) -> crate::mapping::MappingConfiguration {
        load_str(
            &format!("<MappingConfiguration>{}</MappingConfiguration>", body),
            "c.xml",
        )
        .unwrap()
    }

    #[test]
    fn test_inline_slots_per_policy() {
        let mut common = MappingCommon::new("v", 0).with_bounds(1, 4).unwrap();
        common.record_found(2);
        assert_eq!(SlotPolicy::Natural.inline_slots(&common), 1);
        assert_eq!(SlotPolicy::Fixed.inline_slots(&common), 4);
        assert_eq!(SlotPolicy::Observed.inline_slots(&common), 2);

        let unbounded = MappingCommon::new("u", 0).with_bounds(2, 0).unwrap();
        assert_eq!(SlotPolicy::Fixed.inline_slots(&unbounded), 2);
    }

    #[test]
    fn test_lazy_only_tree_is_fixed() {
        let config = config(
            r#"<MappingList name="orders" mappingRoot="order">
                 <Mapping name="id" xPath="@id"/>
                 <MappingList name="items" mappingRoot="item">
                   <Mapping name="sku" xPath="@sku"/>
                 </MappingList>
               </MappingList>"#,
        );
        let root = config.outputs()[0];
        let resolver = CardinalityResolver::new(&config.tree);
        assert_eq!(resolver.fixed_width(root), Some(2));
        assert_eq!(
            resolver.resolve(root),
            OutputStrategy::Fixed {
                columns: vec!["id".to_string(), "sku".to_string()]
            }
        );
    }

    #[test]
    fn test_unbounded_greedy_is_variable() {
        let config = config(
            r#"<MappingList name="o"><Mapping name="tag" xPath="tag" behaviour="greedy"/></MappingList>"#,
        );
        let root = config.outputs()[0];
        assert!(!has_fixed_cardinality(&config.tree, root));
        assert_eq!(CardinalityResolver::new(&config.tree).resolve(root), OutputStrategy::Variable);
    }

    #[test]
    fn test_bounded_greedy_is_fixed_at_maximum() {
        let config = config(
            r#"<MappingList name="o">
                 <Mapping name="tag" xPath="tag" behaviour="greedy" maxValues="3" nameFormat="WithCount"/>
                 <Mapping name="id" xPath="@id" nameFormat="WithCount"/>
               </MappingList>"#,
        );
        let root = config.outputs()[0];
        assert!(has_fixed_cardinality(&config.tree, root));
        assert_eq!(
            column_names(&config.tree, root, SlotPolicy::Fixed),
            vec!["tag_1", "tag_2", "tag_3", "id_1"]
        );
    }

    #[test]
    fn test_greedy_container_columns_repeat_per_instance() {
        let config = config(
            r#"<MappingList name="o">
                 <MappingList name="line" mappingRoot="line" behaviour="greedy" maxValues="2">
                   <Mapping name="sku" xPath="@sku" nameFormat="WithCountAndParentCount"/>
                   <Mapping name="qty" xPath="@qty" maxValues="1" nameFormat="WithCountAndParentCount"/>
                 </MappingList>
               </MappingList>"#,
        );
        let root = config.outputs()[0];
        let line = config.tree.child_named(root, "line").unwrap();
        // An unbounded leaf below a greedy container makes the output variable
        assert!(!has_fixed_cardinality(&config.tree, root));
        assert_eq!(width(&config.tree, line, SlotPolicy::Natural), 0);

        let mut config = config.clone();
        let sku = config.tree.child_named(line, "sku").unwrap();
        config.tree[sku].common_mut().max_values = 1;
        assert!(has_fixed_cardinality(&config.tree, root));
        assert_eq!(width(&config.tree, line, SlotPolicy::Fixed), 4);
        assert_eq!(
            column_names(&config.tree, root, SlotPolicy::Fixed),
            vec!["line_1_sku_1", "line_1_qty_1", "line_2_sku_1", "line_2_qty_1"]
        );
    }

    #[test]
    fn test_pivot_is_variable() {
        let config = config(
            r#"<MappingList name="o"><PivotMapping name="kv" kvPairRoot="p" keyXPath="@k" valueXPath="@v"/></MappingList>"#,
        );
        assert!(!has_fixed_cardinality(&config.tree, config.outputs()[0]));
    }
}
