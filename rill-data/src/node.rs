//! [`Node`]: a row together with its lazily-evaluated relationships, as
//! produced by an operator's `fetch`.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::row::Row;

/// One element of a pull-mode fetch stream. The `Yield` variant is a pure
/// scheduler hint (see spec.md §5, "Suspension points"): a downstream
/// consumer treats it as a no-op and keeps pulling. It never changes which
/// `Node`s are observed, only when control is handed back to the caller.
pub enum StreamItem {
    Row(Node),
    Yield,
}

/// A restartable stream of fetch results. Every call to a
/// [`ChildRelationship`] produces a fresh one of these, seeded by whatever
/// constraint is current at call time — nothing here is memoized across
/// calls.
pub type NodeStream = Box<dyn Iterator<Item = StreamItem>>;

/// A lazily-evaluated, restartable sequence of child `Node`s reachable
/// under one relationship name. Calling it is not free — it typically
/// re-fetches the child operator with a constraint derived from the
/// parent row, per spec.md §3 ("consumers must not assume evaluating a
/// relationship is free").
#[derive(Clone)]
pub struct ChildRelationship(Rc<dyn Fn() -> NodeStream>);

impl ChildRelationship {
    pub fn new(f: impl Fn() -> NodeStream + 'static) -> Self {
        ChildRelationship(Rc::new(f))
    }

    /// An always-empty relationship, used by the Join operator when a
    /// parent's join-key columns contain a null (nulls never join).
    pub fn empty() -> Self {
        ChildRelationship::new(|| Box::new(std::iter::empty()))
    }

    pub fn call(&self) -> NodeStream {
        (self.0)()
    }
}

impl std::fmt::Debug for ChildRelationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChildRelationship(..)")
    }
}

/// A row together with its relationships. Exists only for the duration of
/// a change's propagation or a fetch's generator; a `Node`'s relationships
/// must be consumed or explicitly drained so child operators can release
/// any in-flight state they were holding for it.
#[derive(Debug, Clone)]
pub struct Node {
    pub row: Row,
    pub relationships: IndexMap<Box<str>, ChildRelationship>,
}

impl Node {
    pub fn leaf(row: Row) -> Self {
        Node {
            row,
            relationships: IndexMap::new(),
        }
    }

    pub fn with_relationship(mut self, name: impl Into<Box<str>>, rel: ChildRelationship) -> Self {
        self.relationships.insert(name.into(), rel);
        self
    }

    /// Collects every child `Node` reachable under `name`, draining the
    /// relationship's stream and discarding `Yield` sentinels. Convenience
    /// for tests and for consumers (like ArrayView) that must fully
    /// materialize a relationship rather than stream it.
    pub fn children(&self, name: &str) -> Vec<Node> {
        match self.relationships.get(name) {
            None => Vec::new(),
            Some(rel) => rel
                .call()
                .filter_map(|item| match item {
                    StreamItem::Row(n) => Some(n),
                    StreamItem::Yield => None,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn empty_relationship_yields_no_children() {
        let n = Node::leaf(Row::from_pairs([("a", Value::from(1_i64))]))
            .with_relationship("kids", ChildRelationship::empty());
        assert!(n.children("kids").is_empty());
    }

    #[test]
    fn children_drains_and_skips_yield_sentinels() {
        let rel = ChildRelationship::new(|| {
            Box::new(
                vec![
                    StreamItem::Yield,
                    StreamItem::Row(Node::leaf(Row::from_pairs([("a", Value::from(1_i64))]))),
                    StreamItem::Yield,
                    StreamItem::Row(Node::leaf(Row::from_pairs([("a", Value::from(2_i64))]))),
                ]
                .into_iter(),
            )
        });
        let n = Node::leaf(Row::from_pairs([("p", Value::from(0_i64))]))
            .with_relationship("kids", rel);
        assert_eq!(n.children("kids").len(), 2);
    }

    #[test]
    fn relationship_is_restartable() {
        let rel = ChildRelationship::new(|| {
            Box::new(std::iter::once(StreamItem::Row(Node::leaf(Row::from_pairs([(
                "a",
                Value::from(1_i64),
            )])))))
        });
        assert_eq!(rel.call().count(), 1);
        assert_eq!(rel.call().count(), 1);
    }
}
