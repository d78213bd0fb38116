//! [`Change`] and [`SourceChange`]: the deltas that flow through the
//! operator graph and into a [`Source`](https://docs.rs/rill-dataflow),
//! respectively.

use crate::node::Node;
use crate::row::Row;

/// A delta emitted by an operator, observed by its downstream consumer.
#[derive(Debug, Clone)]
pub enum Change {
    /// A row entered the operator's output.
    Add { node: Node },
    /// A row left the operator's output.
    Remove { node: Node },
    /// A non-relationship row mutation. `old_node` and `node` MUST agree
    /// on any columns used as parent- or child-keys of any enclosing
    /// join — a planner that would violate this must split the edit into
    /// a `Remove` followed by an `Add` instead. Operators receiving an
    /// `Edit` assert this rather than re-deriving it.
    Edit { node: Node, old_node: Node },
    /// A descendant row under `node.relationships[relationship_name]`
    /// changed. `node` carries only the parent row (not a refreshed
    /// relationship), matching the fact that nothing about the parent
    /// itself changed.
    Child {
        node: Node,
        relationship_name: Box<str>,
        child: Box<Change>,
    },
}

impl Change {
    pub fn add(node: Node) -> Self {
        Change::Add { node }
    }
    pub fn remove(node: Node) -> Self {
        Change::Remove { node }
    }
    pub fn edit(old_node: Node, node: Node) -> Self {
        Change::Edit { node, old_node }
    }
    pub fn child(node: Node, relationship_name: impl Into<Box<str>>, change: Change) -> Self {
        Change::Child {
            node,
            relationship_name: relationship_name.into(),
            child: Box::new(change),
        }
    }

    /// The row this change is fundamentally "about": the new row for
    /// add/edit/child, the removed row for remove.
    pub fn primary_row(&self) -> &Row {
        match self {
            Change::Add { node } | Change::Child { node, .. } => &node.row,
            Change::Remove { node } => &node.row,
            Change::Edit { node, .. } => &node.row,
        }
    }
}

/// The input variant accepted by a [`Source`](https://docs.rs/rill-dataflow)'s
/// `push`. `Set` is an idempotent upsert, resolved against the primary-key
/// index at push time into an `Add` (key absent) or `Edit` (key present).
#[derive(Debug, Clone)]
pub enum SourceChange {
    Add(Row),
    Remove(Row),
    Edit { old_row: Row, row: Row },
    Set(Row),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn primary_row_picks_the_new_row_for_add_edit_child() {
        let row = Row::from_pairs([("a", Value::from(1_i64))]);
        let node = Node::leaf(row.clone());
        assert_eq!(Change::add(node.clone()).primary_row(), &row);
        assert_eq!(
            Change::edit(node.clone(), node.clone()).primary_row(),
            &row
        );
    }

    #[test]
    fn primary_row_picks_the_removed_row_for_remove() {
        let row = Row::from_pairs([("a", Value::from(1_i64))]);
        let node = Node::leaf(row.clone());
        assert_eq!(Change::remove(node).primary_row(), &row);
    }
}
