//! The Filter operator (spec.md §4.2.1): a stateless predicate over an
//! upstream `Input`.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use rill_data::{Change, Node, NodeStream, Row, SourceSchema};

use crate::framework::{FetchRequest, Input, Output};

/// A row predicate, shared (via `Rc`) between a `Filter` operator and any
/// `Source` connection using the same condition as a connection-local
/// push-down.
pub type Predicate = Rc<dyn Fn(&Row) -> bool>;

/// Applies `predicate`'s state-transition rule to `change`, the way
/// spec.md §4.2.1 describes: false→false is dropped, false→true becomes
/// an add, true→false becomes a remove, true→true of an edit stays an
/// edit. `Child` changes pass through unconditionally — filters do not
/// inspect descendants.
pub fn transform(change: &Change, predicate: &Predicate) -> Option<Change> {
    match change {
        Change::Add { node } => predicate(&node.row).then(|| change.clone()),
        Change::Remove { node } => predicate(&node.row).then(|| change.clone()),
        Change::Edit { node, old_node } => {
            let (was, is) = (predicate(&old_node.row), predicate(&node.row));
            match (was, is) {
                (false, false) => None,
                (false, true) => Some(Change::add(node.clone())),
                (true, false) => Some(Change::remove(old_node.clone())),
                (true, true) => Some(change.clone()),
            }
        }
        Change::Child { .. } => Some(change.clone()),
    }
}

/// The Filter operator itself: wraps an upstream `Input`, exposing only
/// the rows matching `predicate`.
pub struct FilterOperator {
    upstream: Rc<dyn Input>,
    predicate: Predicate,
    output: RefCell<Option<Rc<dyn Output>>>,
}

impl FilterOperator {
    pub fn new(upstream: Rc<dyn Input>, predicate: Predicate) -> Rc<Self> {
        Rc::new(FilterOperator {
            upstream,
            predicate,
            output: RefCell::new(None),
        })
    }

    /// Called by whatever drives pushes from `upstream` into this
    /// operator.
    pub fn push(&self, change: Change) {
        if let Some(out) = self.output.borrow().as_ref() {
            if let Some(transformed) = transform(&change, &self.predicate) {
                out.push(transformed);
            }
        }
    }
}

impl Output for FilterOperator {
    fn push(&self, change: Change) {
        FilterOperator::push(self, change)
    }

    fn done_pushing(&self) {
        if let Some(out) = self.output.borrow().as_ref() {
            out.done_pushing();
        }
    }
}

impl Input for FilterOperator {
    fn fetch(&self, request: &FetchRequest) -> NodeStream {
        let predicate = self.predicate.clone();
        Box::new(
            self.upstream
                .fetch(request)
                .filter(move |item| match item {
                    rill_data::StreamItem::Row(node) => predicate(&node.row),
                    rill_data::StreamItem::Yield => true,
                }),
        )
    }

    fn cleanup(&self, request: &FetchRequest) -> NodeStream {
        self.upstream.cleanup(request)
    }

    fn set_output(&self, output: Rc<dyn Output>) {
        *self.output.borrow_mut() = Some(output);
    }

    fn destroy(&self) {
        self.upstream.destroy();
    }

    fn schema(&self) -> Arc<SourceSchema> {
        self.upstream.schema()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_data::Value;

    fn node(a: i64) -> Node {
        Node::leaf(Row::from_pairs([("a", Value::from(a))]))
    }

    fn is_even(row: &Row) -> bool {
        match row.get("a") {
            Some(Value::Integer(i)) => {
                let n: i64 = i.try_into().unwrap();
                n % 2 == 0
            }
            _ => false,
        }
    }

    #[test]
    fn edit_false_to_true_becomes_add() {
        let predicate: Predicate = Rc::new(is_even);
        let change = Change::edit(node(1), node(2));
        assert!(matches!(
            transform(&change, &predicate),
            Some(Change::Add { .. })
        ));
    }

    #[test]
    fn edit_true_to_false_becomes_remove() {
        let predicate: Predicate = Rc::new(is_even);
        let change = Change::edit(node(2), node(1));
        assert!(matches!(
            transform(&change, &predicate),
            Some(Change::Remove { .. })
        ));
    }

    #[test]
    fn edit_false_to_false_is_dropped() {
        let predicate: Predicate = Rc::new(is_even);
        let change = Change::edit(node(1), node(3));
        assert!(transform(&change, &predicate).is_none());
    }

    #[test]
    fn child_changes_pass_through_unconditionally() {
        let predicate: Predicate = Rc::new(|_: &Row| false);
        let change = Change::child(node(1), "kids", Change::add(node(5)));
        assert!(transform(&change, &predicate).is_some());
    }
}
