//! Union: Fan-out / Fan-in (spec.md §4.2.5).
//!
//! Fan-out and Fan-in are separate types rather than one `UnionOperator`,
//! since a real query graph typically has several `Filter`/`Exists`
//! branches sitting between them — `FanOut::push` forwards to whatever
//! `Output`s were registered as branches (usually the root of each
//! branch's operator chain), and those branches eventually push into a
//! shared `FanIn` at the point the branches reconverge.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use rill_data::{Change, NodeStream, PrimaryKey, Row, SourceSchema, StreamItem};
use smallvec::SmallVec;

use crate::framework::{FetchRequest, Input, Output};

/// Delivers a single upstream push to every registered branch.
pub struct FanOut {
    upstream: Rc<dyn Input>,
    branches: RefCell<Vec<Rc<dyn Output>>>,
}

impl FanOut {
    pub fn new(upstream: Rc<dyn Input>) -> Rc<Self> {
        Rc::new(FanOut {
            upstream,
            branches: RefCell::new(Vec::new()),
        })
    }

    pub fn add_branch(&self, output: Rc<dyn Output>) {
        self.branches.borrow_mut().push(output);
    }
}

impl Output for FanOut {
    fn push(&self, change: Change) {
        for branch in self.branches.borrow().iter() {
            branch.push(change.clone());
        }
    }

    /// Propagated to every branch so a `FanIn` downstream of any of them
    /// knows the top-level push transaction is complete and can flush its
    /// deduplicated buffer.
    fn done_pushing(&self) {
        for branch in self.branches.borrow().iter() {
            branch.done_pushing();
        }
    }
}

impl Input for FanOut {
    fn fetch(&self, request: &FetchRequest) -> NodeStream {
        self.upstream.fetch(request)
    }

    fn cleanup(&self, request: &FetchRequest) -> NodeStream {
        self.upstream.cleanup(request)
    }

    fn set_output(&self, _output: Rc<dyn Output>) {
        // FanOut has many outputs (its branches), registered via
        // `add_branch` rather than the single-output `Input` contract.
    }

    fn destroy(&self) {
        self.upstream.destroy();
    }

    fn schema(&self) -> Arc<SourceSchema> {
        self.upstream.schema()
    }
}

/// Deduplicates pushes from N upstream branches by primary key, deferring
/// emission until [`FanOut::done_pushing`] (relayed through the branches)
/// signals the current push transaction has finished.
pub struct FanIn {
    primary_key: PrimaryKey,
    pending: RefCell<IndexMap<SmallVec<[rill_data::Value; 4]>, Change>>,
    output: RefCell<Option<Rc<dyn Output>>>,
}

impl FanIn {
    pub fn new(primary_key: PrimaryKey) -> Rc<Self> {
        Rc::new(FanIn {
            primary_key,
            pending: RefCell::new(IndexMap::new()),
            output: RefCell::new(None),
        })
    }

    fn key_for(&self, row: &Row) -> SmallVec<[rill_data::Value; 4]> {
        row.key_values(&self.primary_key)
    }

    pub fn set_output(&self, output: Rc<dyn Output>) {
        *self.output.borrow_mut() = Some(output);
    }
}

impl Output for FanIn {
    fn push(&self, change: Change) {
        let key = self.key_for(change.primary_row());
        // Last write for a given row within one push transaction wins;
        // earlier branches' changes for the same row are superseded.
        self.pending.borrow_mut().insert(key, change);
    }

    fn done_pushing(&self) {
        let pending: Vec<Change> = self.pending.borrow_mut().drain(..).map(|(_, c)| c).collect();
        if let Some(out) = self.output.borrow().as_ref() {
            for change in pending {
                out.push(change);
            }
            out.done_pushing();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_data::{Node, Value};

    struct Recorder(RefCell<Vec<Change>>);
    impl Output for Recorder {
        fn push(&self, change: Change) {
            self.0.borrow_mut().push(change);
        }
    }

    fn node(id: i64) -> Node {
        Node::leaf(Row::from_pairs([("id", Value::from(id))]))
    }

    #[test]
    fn fan_out_delivers_to_every_branch() {
        struct CountingBranch(RefCell<usize>);
        impl Output for CountingBranch {
            fn push(&self, _change: Change) {
                *self.0.borrow_mut() += 1;
            }
        }
        let upstream: Rc<dyn Input> = {
            struct Empty;
            impl Input for Empty {
                fn fetch(&self, _r: &FetchRequest) -> NodeStream {
                    Box::new(std::iter::empty())
                }
                fn set_output(&self, _o: Rc<dyn Output>) {}
                fn destroy(&self) {}
                fn schema(&self) -> Arc<SourceSchema> {
                    unimplemented!()
                }
            }
            Rc::new(Empty)
        };
        let fan_out = FanOut::new(upstream);
        let a = Rc::new(CountingBranch(RefCell::new(0)));
        let b = Rc::new(CountingBranch(RefCell::new(0)));
        fan_out.add_branch(a.clone());
        fan_out.add_branch(b.clone());

        fan_out.push(Change::add(node(1)));
        assert_eq!(*a.0.borrow(), 1);
        assert_eq!(*b.0.borrow(), 1);
    }

    #[test]
    fn fan_in_dedups_by_primary_key_and_defers_until_done() {
        let pk: PrimaryKey = Arc::from(vec![Box::from("id")]);
        let fan_in = FanIn::new(pk);
        let recorder = Rc::new(Recorder(RefCell::new(Vec::new())));
        fan_in.set_output(recorder.clone());

        fan_in.push(Change::add(node(1)));
        fan_in.push(Change::add(node(1))); // same row via a second branch
        fan_in.push(Change::add(node(2)));
        assert!(recorder.0.borrow().is_empty(), "emission must wait for done_pushing");

        fan_in.done_pushing();
        assert_eq!(recorder.0.borrow().len(), 2);
    }
}
