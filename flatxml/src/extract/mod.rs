//! Extraction and flattening.
//!
//! - [`context`] - per-document context tree filled by query evaluation
//! - [`groups`] - group synchronization state
//! - [`records`] - row production from an evaluated context tree
//! - [`cardinality`] - widths, column names and output strategy

pub mod cardinality;
pub mod context;
pub mod groups;
pub mod records;

pub use cardinality::{column_names, has_fixed_cardinality, width, CardinalityResolver, OutputStrategy, SlotPolicy};
pub use context::{ContainerContext, EvaluationOptions, ExtractionContext, ValueContext};
pub use groups::GroupState;
pub use records::{Record, RecordIterator};

use crate::error::{Defect, ExtractionResult};
use crate::mapping::{MappingId, MappingTree};
use crate::query::Node;

/// Evaluate the output `root` against a document element and record its
/// observed counts.
pub fn evaluate_output(
    tree: &mut MappingTree,
    root: MappingId,
    document_element: Node<'_>,
    options: &EvaluationOptions,
) -> ExtractionResult<ContainerContext> {
    evaluate_outputs(tree, &[root], document_element, options)?
        .pop()
        .ok_or_else(|| Defect::new(format!("no context evaluated for output {:?}", root)).into())
}

/// Evaluate several outputs against one document element. Observed counts
/// are recorded only when all of them succeed.
pub fn evaluate_outputs(
    tree: &mut MappingTree,
    roots: &[MappingId],
    document_element: Node<'_>,
    options: &EvaluationOptions,
) -> ExtractionResult<Vec<ContainerContext>> {
    let mut contexts = Vec::with_capacity(roots.len());
    for root in roots {
        let mut context = ContainerContext::new(*root, 0);
        context.evaluate(tree, document_element, options)?;
        contexts.push(context);
    }
    for context in &contexts {
        context.record_observed(tree);
    }
    Ok(contexts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_str;
    use crate::query::with_document;

    #[test]
    fn test_failed_output_records_nothing() {
        let mut config = load_str(
            r#"<MappingConfiguration>
  <MappingList name="orders" mappingRoot="order">
    <Mapping name="id" xPath="@id"/>
  </MappingList>
  <MappingList name="broken">
    <Mapping name="bad" xPath="count('x')"/>
  </MappingList>
</MappingConfiguration>"#,
            "c.xml",
        )
        .unwrap();
        let roots = config.outputs().to_vec();
        let id = config.tree.child_named(roots[0], "id").unwrap();

        let result = with_document(r#"<r><order id="1"/><order id="2"/></r>"#, |node| {
            evaluate_outputs(&mut config.tree, &roots, node, &EvaluationOptions::default())
        });
        assert!(result.is_err());
        assert_eq!(config.tree[roots[0]].common().highest_found, 0);
        assert_eq!(config.tree[id].common().highest_found, 0);

        let contexts = with_document(r#"<r><order id="1"/><order id="2"/></r>"#, |node| {
            evaluate_outputs(&mut config.tree, &roots[..1], node, &EvaluationOptions::default())
        })
        .unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(config.tree[roots[0]].common().highest_found, 2);
        assert_eq!(config.tree[id].common().highest_found, 1);
    }
}
