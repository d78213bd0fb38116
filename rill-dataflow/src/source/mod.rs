//! [`Source`]: an in-memory, multi-indexed, primary-keyed relation that
//! serves sorted, constrained, filtered streams of rows and propagates
//! changes to its connections under the overlay protocol.

mod index;

use std::cell::RefCell;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use rill_data::{Change, Node, NodeStream, Ordering, Row, SourceChange, SourceSchema};
use rill_errors::{RillError, RillResult};

use crate::framework::{node_stream, FetchRequest, Input, Output, StartBasis};
use crate::ops::filter::Predicate;
use index::Index;

/// One subscriber to a [`Source`], created by [`Source::connect`].
struct ConnectionState {
    ordering: Ordering,
    filter: Option<Predicate>,
    split_edit_keys: Option<Vec<Box<str>>>,
    output: RefCell<Option<Rc<dyn Output>>>,
    destroyed: bool,
}

/// Which overlay is in effect, tagged with the connection index it was
/// raised for. A fetch from connection `i` sees the overlay iff `i` is
/// less than or equal to the tagged index — see spec.md §4.1, "Overlay
/// rules".
#[derive(Clone)]
struct Overlay {
    connection_index: usize,
    change: Change,
}

struct SourceInner {
    schema: Arc<SourceSchema>,
    indices: HashMap<Ordering, Index>,
    primary_key_ordering: Ordering,
    connections: Vec<Option<ConnectionState>>,
    overlay: Option<Overlay>,
    split_edit_overlay: Option<Overlay>,
}

/// An in-memory, multi-indexed, primary-keyed relation. Cheap to clone (an
/// `Rc` to the shared inner state) — clones alias the same underlying
/// rows, unlike [`Source::fork`], which snapshots.
#[derive(Clone)]
pub struct Source {
    inner: Rc<RefCell<SourceInner>>,
}

impl Source {
    pub fn new(schema: Arc<SourceSchema>) -> Self {
        let pk_ordering = Ordering::primary_key(&schema.primary_key);
        let mut indices = HashMap::new();
        let mut pk_index = Index::new(pk_ordering.clone());
        pk_index.incref(); // the primary-key index is never evicted
        indices.insert(pk_ordering.clone(), pk_index);
        Source {
            inner: Rc::new(RefCell::new(SourceInner {
                schema,
                indices,
                primary_key_ordering: pk_ordering,
                connections: Vec::new(),
                overlay: None,
                split_edit_overlay: None,
            })),
        }
    }

    pub fn schema(&self) -> Arc<SourceSchema> {
        self.inner.borrow().schema.clone()
    }

    /// Creates (or reuses) an index for `sort`, registers a new
    /// connection, and returns a handle the connection's owner can
    /// `fetch`/`cleanup`/`destroy` through.
    pub fn connect(
        &self,
        sort: Ordering,
        filter: Option<Predicate>,
        split_edit_keys: Option<Vec<Box<str>>>,
    ) -> SourceHandle {
        let mut inner = self.inner.borrow_mut();
        let index = inner
            .indices
            .entry(sort.clone())
            .or_insert_with(|| {
                let pk_ordering = inner.primary_key_ordering.clone();
                let seed_rows = inner.indices[&pk_ordering].rows().to_vec();
                Index::seeded_from(sort.clone(), seed_rows)
            });
        index.incref();
        let connection_index = inner.connections.len();
        inner.connections.push(Some(ConnectionState {
            ordering: sort,
            filter,
            split_edit_keys,
            output: RefCell::new(None),
            destroyed: false,
        }));
        SourceHandle {
            source: self.clone(),
            connection_index,
        }
    }

    /// Applies `change` atomically: notifies every live connection (in
    /// insertion order, honoring the overlay protocol), then commits the
    /// change into every index.
    pub fn push(&self, change: SourceChange) -> RillResult<()> {
        let resolved = self.resolve(change)?;
        let conn_count = self.inner.borrow().connections.len();
        for idx in 0..conn_count {
            self.notify_connection(idx, &resolved);
        }
        self.commit(&resolved);
        Ok(())
    }

    /// Resolves a `SourceChange` into the concrete `(old_row, new_row)`
    /// pair it represents, validating existence/non-existence
    /// preconditions. `Set` is resolved here against the primary-key
    /// index, per spec.md §4.1 step 1.
    fn resolve(&self, change: SourceChange) -> RillResult<ResolvedChange> {
        let inner = self.inner.borrow();
        let pk_ordering = inner.primary_key_ordering.clone();
        let pk_index = &inner.indices[&pk_ordering];
        let pk = inner.schema.primary_key.clone();
        match change {
            SourceChange::Add(row) => {
                if pk_index.contains(&row, &pk) {
                    return Err(RillError::invariant(
                        "Source::push",
                        format!("duplicate add for existing primary key in table {}", inner.schema.table),
                    ));
                }
                Ok(ResolvedChange::Add(row))
            }
            SourceChange::Remove(row) => {
                if !pk_index.contains(&row, &pk) {
                    return Err(RillError::invariant(
                        "Source::push",
                        format!("remove of missing row in table {}", inner.schema.table),
                    ));
                }
                Ok(ResolvedChange::Remove(row))
            }
            SourceChange::Edit { old_row, row } => {
                if !pk_index.contains(&old_row, &pk) {
                    return Err(RillError::invariant(
                        "Source::push",
                        format!("edit of missing row in table {}", inner.schema.table),
                    ));
                }
                Ok(ResolvedChange::Edit { old_row, row })
            }
            SourceChange::Set(row) => {
                if pk_index.contains(&row, &pk) {
                    // Resolve against the existing row so downstream sees
                    // a proper old/new pair rather than row/row.
                    let old_row = pk_index
                        .rows()
                        .iter()
                        .find(|r| r.key_values(&pk) == row.key_values(&pk))
                        .cloned()
                        .expect("contains() just confirmed presence");
                    Ok(ResolvedChange::Edit { old_row, row })
                } else {
                    Ok(ResolvedChange::Add(row))
                }
            }
        }
    }

    fn notify_connection(&self, idx: usize, change: &ResolvedChange) {
        let (output, split_keys) = {
            let inner = self.inner.borrow();
            match &inner.connections[idx] {
                Some(c) if !c.destroyed => {
                    (c.output.borrow().clone(), c.split_edit_keys.clone())
                }
                _ => return,
            }
        };
        let Some(output) = output else { return };

        match change {
            ResolvedChange::Add(row) => {
                self.raise_overlay(idx, Change::add(Node::leaf(row.clone())));
                self.deliver(idx, &output, Change::add(Node::leaf(row.clone())));
                self.clear_overlay(idx);
            }
            ResolvedChange::Remove(row) => {
                self.raise_overlay(idx, Change::remove(Node::leaf(row.clone())));
                self.deliver(idx, &output, Change::remove(Node::leaf(row.clone())));
                self.clear_overlay(idx);
            }
            ResolvedChange::Edit { old_row, row } => {
                let splits = split_keys
                    .as_deref()
                    .map(|cols| !old_row.agrees_on(row, cols))
                    .unwrap_or(false);
                if splits {
                    self.raise_split_overlay(idx, Change::remove(Node::leaf(old_row.clone())));
                    self.deliver(idx, &output, Change::remove(Node::leaf(old_row.clone())));
                    self.clear_split_overlay(idx);

                    self.raise_overlay(idx, Change::add(Node::leaf(row.clone())));
                    self.deliver(idx, &output, Change::add(Node::leaf(row.clone())));
                    self.clear_overlay(idx);
                } else {
                    let edit = Change::edit(Node::leaf(old_row.clone()), Node::leaf(row.clone()));
                    self.raise_overlay(idx, edit.clone());
                    self.deliver(idx, &output, edit);
                    self.clear_overlay(idx);
                }
            }
        }
        // This connection has seen every change this push transaction
        // produces (a Source push is always a single row-level delta, so
        // there is exactly one "batch" per `notify_connection` call);
        // signal completion so a `FanIn` anywhere downstream of this
        // connection can flush its deduplicated buffer (spec.md §4.2.5).
        output.done_pushing();
    }

    fn deliver(&self, idx: usize, output: &Rc<dyn Output>, change: Change) {
        let filter = {
            let inner = self.inner.borrow();
            inner.connections[idx].as_ref().and_then(|c| c.filter.clone())
        };
        let to_send = match &filter {
            Some(f) => crate::ops::filter::transform(&change, f),
            None => Some(change),
        };
        if let Some(change) = to_send {
            output.push(change);
        }
    }

    fn raise_overlay(&self, connection_index: usize, change: Change) {
        self.inner.borrow_mut().overlay = Some(Overlay {
            connection_index,
            change,
        });
    }
    fn clear_overlay(&self, _idx: usize) {
        self.inner.borrow_mut().overlay = None;
    }
    fn raise_split_overlay(&self, connection_index: usize, change: Change) {
        self.inner.borrow_mut().split_edit_overlay = Some(Overlay {
            connection_index,
            change,
        });
    }
    fn clear_split_overlay(&self, _idx: usize) {
        self.inner.borrow_mut().split_edit_overlay = None;
    }

    fn commit(&self, change: &ResolvedChange) {
        let mut inner = self.inner.borrow_mut();
        let pk = inner.schema.primary_key.clone();
        match change {
            ResolvedChange::Add(row) => {
                for index in inner.indices.values_mut() {
                    index.insert(row.clone());
                }
            }
            ResolvedChange::Remove(row) => {
                for index in inner.indices.values_mut() {
                    index.remove(row, &pk);
                }
            }
            ResolvedChange::Edit { old_row, row } => {
                for index in inner.indices.values_mut() {
                    index.remove(old_row, &pk);
                    index.insert(row.clone());
                }
            }
        }
    }

    /// An independent `Source` sharing no mutable state, seeded with a
    /// clone of the current primary-key-ordered rows. Secondary indices
    /// and connections are not carried over — the fork starts as fresh as
    /// a brand new `Source` over the same rows (see SPEC_FULL.md §4.1).
    pub fn fork(&self) -> Source {
        let inner = self.inner.borrow();
        let pk_ordering = inner.primary_key_ordering.clone();
        let rows = inner.indices[&pk_ordering].rows().to_vec();
        let forked = Source::new(inner.schema.clone());
        for row in rows {
            forked
                .push(SourceChange::Add(row))
                .expect("seeding a fresh fork can't violate PK uniqueness");
        }
        forked
    }

    fn fetch_rows(&self, connection_index: usize, request: &FetchRequest) -> Vec<Row> {
        let inner = self.inner.borrow();
        let conn = inner.connections[connection_index]
            .as_ref()
            .expect("fetch on a destroyed connection");
        let index = &inner.indices[&conn.ordering];
        let mut rows: Vec<Row> = index.rows().to_vec();

        // spec.md §4.1 "Overlay rules": a connection at index `i` sees the
        // main overlay iff `i <= outputIndex` (connections already
        // notified, at a lower index, must not see the change again). The
        // split-edit overlay is narrower still — "only the target
        // connection sees a split" — so it requires exact equality, not
        // `<=`.
        let main_overlay_visible = |overlay: &Option<Overlay>| {
            overlay
                .as_ref()
                .filter(|o| connection_index <= o.connection_index)
                .cloned()
        };
        let split_overlay_visible = |overlay: &Option<Overlay>| {
            overlay
                .as_ref()
                .filter(|o| connection_index == o.connection_index)
                .cloned()
        };

        if let Some(overlay) = split_overlay_visible(&inner.split_edit_overlay) {
            splice_overlay(&mut rows, &overlay.change, index.comparator(), request);
        }
        if let Some(overlay) = main_overlay_visible(&inner.overlay) {
            splice_overlay(&mut rows, &overlay.change, index.comparator(), request);
        }

        if let Some(start) = &request.start {
            let comparator = index.comparator();
            rows.retain(|r| {
                let ord = comparator.compare(r, &start.row);
                match (request.reverse, start.basis) {
                    (false, StartBasis::At) => ord != CmpOrdering::Less,
                    (false, StartBasis::After) => ord == CmpOrdering::Greater,
                    (true, StartBasis::At) => ord != CmpOrdering::Greater,
                    (true, StartBasis::After) => ord == CmpOrdering::Less,
                }
            });
        }

        if request.reverse {
            rows.reverse();
        }

        rows.retain(|r| request.matches_constraint(r));
        if let Some(filter) = &conn.filter {
            rows.retain(|r| filter(r));
        }
        rows
    }
}

enum ResolvedChange {
    Add(Row),
    Remove(Row),
    Edit { old_row: Row, row: Row },
}

/// Splices `overlay_change`'s row into (or out of) `rows`, but only after
/// confirming it would actually appear in this fetch — i.e. it passes the
/// constraint and filter predicate the same way a committed row would.
/// This is the rule from spec.md §4.1: "restrict it to rows that match
/// the fetch's startAt, constraint, and filter predicate before
/// splicing."
fn splice_overlay(
    rows: &mut Vec<Row>,
    change: &Change,
    comparator: &rill_data::Comparator,
    request: &FetchRequest,
) {
    let eligible = |row: &Row| request.matches_constraint(row);
    match change {
        Change::Add { node } => {
            if eligible(&node.row) {
                let pos = rows.partition_point(|r| comparator.compare(r, &node.row) == CmpOrdering::Less);
                rows.insert(pos, node.row.clone());
            }
        }
        Change::Remove { node } => {
            if let Some(pos) = rows.iter().position(|r| r == &node.row) {
                rows.remove(pos);
            }
        }
        Change::Edit { node, old_node } => {
            if let Some(pos) = rows.iter().position(|r| r == &old_node.row) {
                rows.remove(pos);
            }
            if eligible(&node.row) {
                let pos = rows.partition_point(|r| comparator.compare(r, &node.row) == CmpOrdering::Less);
                rows.insert(pos, node.row.clone());
            }
        }
        Change::Child { .. } => {}
    }
}

/// The handle returned by [`Source::connect`].
pub struct SourceHandle {
    source: Source,
    connection_index: usize,
}

impl SourceHandle {
    /// Whether every filter this connection was given is fully applied at
    /// the Source, so a downstream `Filter` operator over the identical
    /// predicate can be elided. Always true: `Source` always fully
    /// applies the predicate it was given.
    pub fn filter_fully_applied(&self) -> bool {
        true
    }
}

impl Input for SourceHandle {
    fn fetch(&self, request: &FetchRequest) -> NodeStream {
        let rows = self.source.fetch_rows(self.connection_index, request);
        node_stream(rows, Node::leaf)
    }

    fn set_output(&self, output: Rc<dyn Output>) {
        let inner = self.source.inner.borrow();
        if let Some(conn) = inner.connections[self.connection_index].as_ref() {
            *conn.output.borrow_mut() = Some(output);
        }
    }

    fn destroy(&self) {
        let mut inner = self.source.inner.borrow_mut();
        let pk_ordering = inner.primary_key_ordering.clone();
        if let Some(conn) = inner.connections[self.connection_index].take() {
            if let Some(index) = inner.indices.get_mut(&conn.ordering) {
                if index.decref() == 0 && conn.ordering != pk_ordering {
                    inner.indices.remove(&conn.ordering);
                }
            }
        }
    }

    fn schema(&self) -> Arc<SourceSchema> {
        self.source.schema()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::filter::Predicate;
    use indexmap::IndexMap;
    use rill_data::{ColumnType, Direction, StreamItem, Value};
    use std::sync::Arc as StdArc;

    fn schema() -> Arc<SourceSchema> {
        let pk: rill_data::PrimaryKey = StdArc::from(vec![Box::from("a")]);
        let mut columns = IndexMap::new();
        columns.insert(Box::from("a"), ColumnType::Integer);
        columns.insert(Box::from("b"), ColumnType::String);
        let sort = Ordering::primary_key(&pk);
        Arc::new(SourceSchema::new("t", columns, pk, sort))
    }

    fn collect(stream: NodeStream) -> Vec<Row> {
        stream
            .filter_map(|item| match item {
                StreamItem::Row(n) => Some(n.row),
                StreamItem::Yield => None,
            })
            .collect()
    }

    fn value_a(row: &Row) -> i64 {
        match row.get("a") {
            Some(Value::Integer(i)) => i.try_into().unwrap(),
            _ => unreachable!(),
        }
    }

    /// Scenario 1 from spec.md §8: filter over a single source.
    #[test]
    fn scenario_filter_over_single_source() {
        let schema = schema();
        let source = Source::new(schema.clone());
        source.push(SourceChange::Add(Row::from_pairs([
            ("a", Value::from(3_i64)),
            ("b", Value::from("foo")),
        ]))).unwrap();
        source.push(SourceChange::Add(Row::from_pairs([
            ("a", Value::from(2_i64)),
            ("b", Value::from("bar")),
        ]))).unwrap();
        source.push(SourceChange::Add(Row::from_pairs([
            ("a", Value::from(1_i64)),
            ("b", Value::from("foo")),
        ]))).unwrap();

        let pk: rill_data::PrimaryKey = schema.primary_key.clone();
        let sort = Ordering::new(vec![("a".into(), Direction::Asc)], &pk).unwrap();
        let predicate: Predicate = Rc::new(|r: &Row| r.get("b") == Some(&Value::from("foo")));
        let handle = source.connect(sort, Some(predicate), None);

        let rows = collect(handle.fetch(&FetchRequest::new()));
        assert_eq!(rows.iter().map(value_a).collect::<Vec<_>>(), vec![1, 3]);

        struct Recorder(RefCell<Vec<Change>>);
        impl Output for Recorder {
            fn push(&self, change: Change) {
                self.0.borrow_mut().push(change);
            }
        }
        let recorder = Rc::new(Recorder(RefCell::new(Vec::new())));
        handle.set_output(recorder.clone());

        source.push(SourceChange::Add(Row::from_pairs([
            ("a", Value::from(5_i64)),
            ("b", Value::from("foo")),
        ]))).unwrap();
        assert_eq!(recorder.0.borrow().len(), 1);
        assert!(matches!(recorder.0.borrow()[0], Change::Add { .. }));
        recorder.0.borrow_mut().clear();

        source.push(SourceChange::Add(Row::from_pairs([
            ("a", Value::from(4_i64)),
            ("b", Value::from("bar")),
        ]))).unwrap();
        assert!(recorder.0.borrow().is_empty());

        source.push(SourceChange::Remove(Row::from_pairs([
            ("a", Value::from(3_i64)),
            ("b", Value::from("foo")),
        ]))).unwrap();
        assert_eq!(recorder.0.borrow().len(), 1);
        assert!(matches!(recorder.0.borrow()[0], Change::Remove { .. }));
    }

    #[test]
    fn duplicate_add_is_an_invariant_violation() {
        let source = Source::new(schema());
        source
            .push(SourceChange::Add(Row::from_pairs([
                ("a", Value::from(1_i64)),
                ("b", Value::from("x")),
            ])))
            .unwrap();
        let err = source.push(SourceChange::Add(Row::from_pairs([
            ("a", Value::from(1_i64)),
            ("b", Value::from("y")),
        ])));
        assert!(err.is_err());
    }

    #[test]
    fn remove_of_missing_row_is_an_invariant_violation() {
        let source = Source::new(schema());
        let err = source.push(SourceChange::Remove(Row::from_pairs([
            ("a", Value::from(1_i64)),
            ("b", Value::from("x")),
        ])));
        assert!(err.is_err());
    }

    #[test]
    fn set_resolves_to_add_or_edit() {
        let source = Source::new(schema());
        source
            .push(SourceChange::Set(Row::from_pairs([
                ("a", Value::from(1_i64)),
                ("b", Value::from("x")),
            ])))
            .unwrap();
        let pk = schema().primary_key;
        let sort = Ordering::primary_key(&pk);
        let handle = source.connect(sort, None, None);
        assert_eq!(collect(handle.fetch(&FetchRequest::new())).len(), 1);

        source
            .push(SourceChange::Set(Row::from_pairs([
                ("a", Value::from(1_i64)),
                ("b", Value::from("y")),
            ])))
            .unwrap();
        let rows = collect(handle.fetch(&FetchRequest::new()));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("b"), Some(&Value::from("y")));
    }

    #[test]
    fn destroy_releases_secondary_index_when_refcount_hits_zero() {
        let schema = schema();
        let source = Source::new(schema.clone());
        let pk = schema.primary_key.clone();
        let sort = Ordering::new(vec![("b".into(), Direction::Asc), ("a".into(), Direction::Asc)], &pk).unwrap();
        let handle = source.connect(sort.clone(), None, None);
        assert!(source.inner.borrow().indices.contains_key(&sort));
        handle.destroy();
        assert!(!source.inner.borrow().indices.contains_key(&sort));
    }

    #[test]
    fn fork_is_independent_of_the_original() {
        let schema = schema();
        let source = Source::new(schema.clone());
        source
            .push(SourceChange::Add(Row::from_pairs([
                ("a", Value::from(1_i64)),
                ("b", Value::from("x")),
            ])))
            .unwrap();
        let forked = source.fork();
        source
            .push(SourceChange::Add(Row::from_pairs([
                ("a", Value::from(2_i64)),
                ("b", Value::from("y")),
            ])))
            .unwrap();

        let pk = schema.primary_key.clone();
        let sort = Ordering::primary_key(&pk);
        let forked_handle = forked.connect(sort, None, None);
        assert_eq!(collect(forked_handle.fetch(&FetchRequest::new())).len(), 1);
    }
}
