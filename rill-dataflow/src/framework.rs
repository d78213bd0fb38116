//! The operator framework: the `Input`/`Output` contract every kernel
//! operator implements, the pull-mode request shape, and the per-operator
//! `Storage` scratch space.
//!
//! Every operator is both an [`Input`] (pullable by its downstream) and,
//! internally, a consumer of some upstream `Input` that it `push`es
//! changes to its own [`Output`] in response to. There is no separate
//! "Operator" trait: an operator struct typically implements `Input`
//! itself and holds an `Rc<dyn Input>` for its upstream plus an
//! `Rc<RefCell<Option<Rc<dyn Output>>>>` for its downstream, mirroring how
//! ReadySet's `dataflow::ops` nodes hold a handle to their ancestor and
//! forward results to whichever domain wired them up.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use rill_data::{Node, NodeStream, Row, SourceSchema, StreamItem, Value};

/// How far through the requested sort to begin a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBasis {
    /// Begin at the given row (inclusive).
    At,
    /// Begin strictly after the given row.
    After,
}

#[derive(Debug, Clone)]
pub struct StartCursor {
    pub row: Row,
    pub basis: StartBasis,
}

/// A pull-mode request against an [`Input`].
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    /// Every named column must equal the given value for a row to be
    /// included.
    pub constraint: Option<IndexMap<Box<str>, Value>>,
    pub start: Option<StartCursor>,
    pub reverse: bool,
}

impl FetchRequest {
    pub fn new() -> Self {
        FetchRequest::default()
    }

    pub fn with_constraint(mut self, constraint: IndexMap<Box<str>, Value>) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn with_start(mut self, row: Row, basis: StartBasis) -> Self {
        self.start = Some(StartCursor { row, basis });
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn matches_constraint(&self, row: &Row) -> bool {
        match &self.constraint {
            None => true,
            Some(c) => c.iter().all(|(col, val)| row.get(col) == Some(val)),
        }
    }
}

/// The pull side of an operator: produce the current rows on demand, in
/// the operator's own sort, and accept destruction/output-wiring calls.
pub trait Input {
    /// Produce the current matching rows, as a restartable stream.
    fn fetch(&self, request: &FetchRequest) -> NodeStream;

    /// Like `fetch`, but tells the operator that its downstream is
    /// releasing any cache keyed off this fetch's constraint — operators
    /// with per-subtree state (Take, Exists, Join) use this to drop
    /// storage rather than leak it.
    fn cleanup(&self, request: &FetchRequest) -> NodeStream {
        self.fetch(request)
    }

    /// Wire this operator's downstream. Operators hold at most one
    /// `Output`; wiring a second replaces the first.
    fn set_output(&self, output: Rc<dyn Output>);

    /// Release this operator's hold on any upstream connections or
    /// indices. Idempotent.
    fn destroy(&self);

    fn schema(&self) -> Arc<SourceSchema>;
}

/// The push side of an operator: receive a `Change` from upstream.
pub trait Output {
    fn push(&self, change: rill_data::Change);

    /// Signals that the current top-level push transaction has finished
    /// delivering changes to this output. Most operators have nothing to
    /// do and simply forward the signal to their own output; `FanIn` is
    /// the one that actually acts on it, flushing its deduplicated
    /// buffer (spec.md §4.2.5). Default is a no-op so adding this method
    /// doesn't require touching every `Output` impl.
    fn done_pushing(&self) {}
}

/// Wraps a `Vec<Row>` into a [`NodeStream`], inserting an occasional
/// `Yield` sentinel so long fetches behave like the generator-based
/// streams described in spec.md §5 without actually needing an async
/// runtime: suspension here is purely informational, consumers that don't
/// care can filter `Yield` out (as [`rill_data::Node::children`] does).
pub fn node_stream(rows: Vec<Row>, build: impl Fn(Row) -> Node + 'static) -> NodeStream {
    const YIELD_EVERY: usize = 64;
    Box::new(rows.into_iter().enumerate().flat_map(move |(i, row)| {
        let node = StreamItem::Row(build(row));
        if i != 0 && i % YIELD_EVERY == 0 {
            vec![StreamItem::Yield, node].into_iter()
        } else {
            vec![node].into_iter()
        }
    }))
}

/// Caller-supplied key/value scratch space for an operator's internal
/// per-subtree state (Take's `{size, bound}`, Exists's cached relationship
/// size, Join's fetch-time cache). Keeping this outside the operator
/// struct itself — rather than as private fields — is what lets tests
/// construct a fresh `Storage`, snapshot it, or hand the same store to
/// several operator instances under test.
#[derive(Default)]
pub struct Storage {
    entries: RefCell<HashMap<String, Box<dyn Any>>>,
}

impl Storage {
    pub fn new() -> Self {
        Storage::default()
    }

    /// Removes and returns the entry at `key`, downcast to `T`, or `T`'s
    /// default if absent (or of the wrong type, which should not happen
    /// in practice since a key is only ever used by one operator).
    pub fn take<T: Any + Default>(&self, key: &str) -> T {
        self.entries
            .borrow_mut()
            .remove(key)
            .and_then(|b| b.downcast::<T>().ok())
            .map(|b| *b)
            .unwrap_or_default()
    }

    pub fn put<T: Any>(&self, key: &str, value: T) {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), Box::new(value));
    }

    pub fn remove(&self, key: &str) {
        self.entries.borrow_mut().remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_round_trips_typed_state() {
        let storage = Storage::new();
        assert_eq!(storage.take::<usize>("count"), 0);
        storage.put("count", 5_usize);
        assert!(storage.contains("count"));
        assert_eq!(storage.take::<usize>("count"), 5);
        // take removes the entry
        assert!(!storage.contains("count"));
    }

    #[test]
    fn fetch_request_constraint_matches_exact_values() {
        let mut c = IndexMap::new();
        c.insert(Box::from("a"), Value::from(1_i64));
        let req = FetchRequest::new().with_constraint(c);
        let row = Row::from_pairs([("a", Value::from(1_i64))]);
        assert!(req.matches_constraint(&row));
        let row2 = Row::from_pairs([("a", Value::from(2_i64))]);
        assert!(!req.matches_constraint(&row2));
    }
}
