//! The Exists / Not-Exists operator (spec.md §4.2.4): filters parent rows
//! by whether a named relationship is non-empty, maintaining a per-parent
//! relationship-size cache so a push on the relationship can flip a
//! parent's inclusion without re-fetching it in full.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use rill_data::{Change, Node, NodeStream, PrimaryKey, SourceSchema, StreamItem};

use crate::framework::{FetchRequest, Input, Output, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistsMode {
    Exists,
    NotExists,
}

fn included(count: usize, mode: ExistsMode) -> bool {
    match mode {
        ExistsMode::Exists => count > 0,
        ExistsMode::NotExists => count == 0,
    }
}

pub struct ExistsOperator {
    upstream: Rc<dyn Input>,
    relationship_name: Box<str>,
    mode: ExistsMode,
    storage: Rc<Storage>,
    storage_key_prefix: String,
    output: RefCell<Option<Rc<dyn Output>>>,
}

impl ExistsOperator {
    pub fn new(
        upstream: Rc<dyn Input>,
        relationship_name: impl Into<Box<str>>,
        mode: ExistsMode,
        storage: Rc<Storage>,
        storage_key_prefix: impl Into<String>,
    ) -> Rc<Self> {
        Rc::new(ExistsOperator {
            upstream,
            relationship_name: relationship_name.into(),
            mode,
            storage,
            storage_key_prefix: storage_key_prefix.into(),
            output: RefCell::new(None),
        })
    }

    fn primary_key(&self) -> PrimaryKey {
        self.upstream.schema().primary_key.clone()
    }

    fn count_key(&self, node_row: &rill_data::Row) -> String {
        let pk = self.primary_key();
        format!("{}:{:?}", self.storage_key_prefix, node_row.key_values(&pk))
    }

    fn cached_count(&self, node_row: &rill_data::Row) -> Option<usize> {
        let key = self.count_key(node_row);
        if !self.storage.contains(&key) {
            return None;
        }
        let count: usize = self.storage.take(&key);
        self.storage.put(&key, count);
        Some(count)
    }

    fn store_count(&self, node_row: &rill_data::Row, count: usize) {
        self.storage.put(&self.count_key(node_row), count);
    }

    fn clear_count(&self, node_row: &rill_data::Row) {
        self.storage.remove(&self.count_key(node_row));
    }

    fn emit(&self, change: Change) {
        if let Some(out) = self.output.borrow().as_ref() {
            out.push(change);
        }
    }

    /// Applies a change pushed by the upstream this operator wraps.
    pub fn push(&self, change: Change) {
        match change {
            Change::Add { node } => {
                let count = node.children(&self.relationship_name).len();
                self.store_count(&node.row, count);
                if included(count, self.mode) {
                    self.emit(Change::add(node));
                }
            }
            Change::Remove { node } => {
                let count = self
                    .cached_count(&node.row)
                    .unwrap_or_else(|| node.children(&self.relationship_name).len());
                self.clear_count(&node.row);
                if included(count, self.mode) {
                    self.emit(Change::remove(node));
                }
            }
            Change::Edit { node, old_node } => {
                let was_count = self
                    .cached_count(&old_node.row)
                    .unwrap_or_else(|| old_node.children(&self.relationship_name).len());
                let is_count = node.children(&self.relationship_name).len();
                self.store_count(&node.row, is_count);
                let (was, is) = (included(was_count, self.mode), included(is_count, self.mode));
                match (was, is) {
                    (false, false) => {}
                    (false, true) => self.emit(Change::add(node)),
                    (true, false) => self.emit(Change::remove(old_node)),
                    (true, true) => self.emit(Change::edit(old_node, node)),
                }
            }
            Change::Child {
                node,
                relationship_name,
                child,
            } => {
                let was_count = self
                    .cached_count(&node.row)
                    .unwrap_or_else(|| node.children(&self.relationship_name).len());
                let was = included(was_count, self.mode);
                if relationship_name.as_ref() != self.relationship_name.as_ref() {
                    if was {
                        self.emit(Change::Child {
                            node,
                            relationship_name,
                            child,
                        });
                    }
                    return;
                }
                let delta: i64 = match child.as_ref() {
                    Change::Add { .. } => 1,
                    Change::Remove { .. } => -1,
                    Change::Edit { .. } | Change::Child { .. } => 0,
                };
                let new_count = (was_count as i64 + delta).max(0) as usize;
                self.store_count(&node.row, new_count);
                let is = included(new_count, self.mode);
                match (was, is) {
                    (false, false) => {}
                    (false, true) => self.emit(Change::add(node)),
                    (true, false) => self.emit(Change::remove(node)),
                    (true, true) => self.emit(Change::Child {
                        node,
                        relationship_name,
                        child,
                    }),
                }
            }
        }
    }
}

impl Output for ExistsOperator {
    fn push(&self, change: Change) {
        ExistsOperator::push(self, change)
    }

    fn done_pushing(&self) {
        if let Some(out) = self.output.borrow().as_ref() {
            out.done_pushing();
        }
    }
}

impl Input for ExistsOperator {
    fn fetch(&self, request: &FetchRequest) -> NodeStream {
        let relationship_name = self.relationship_name.clone();
        let mode = self.mode;
        let storage = self.storage.clone();
        let prefix = self.storage_key_prefix.clone();
        let pk = self.primary_key();
        Box::new(self.upstream.fetch(request).filter_map(move |item| match item {
            StreamItem::Yield => Some(StreamItem::Yield),
            StreamItem::Row(node) => {
                let count = node.children(&relationship_name).len();
                storage.put(&format!("{prefix}:{:?}", node.row.key_values(&pk)), count);
                included(count, mode).then_some(StreamItem::Row(node))
            }
        }))
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
