//! [`ArrayView`]: applies a stream of [`Change`]s to an immutable
//! [`Entry`] tree, preserving object identity on unchanged subtrees
//! (spec.md §4.3, "Immutability discipline").
//!
//! **Relationship format.** `SourceSchema` (spec.md §3) does not carry a
//! per-relationship singular/plural flag -- only the query's own root
//! format is meaningful input to this component. We resolved this open
//! point (DESIGN.md) by materializing every non-root relationship as
//! `Format::Plural`; callers that need a singular relationship (e.g. a
//! query capped with a unique constraint) pass `Format::Singular` only
//! for the root via [`ArrayView::new`].

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use rill_data::{Change, Node, SourceSchema};
use tracing::debug;

use crate::entry::{derive_id, find_by_key, sorted_position, Entry, Format, Relationship};

/// The materialized tree for one operator graph root. Buffers pushed
/// changes until [`ArrayView::flush`], at which point they're applied in
/// order and listeners are notified once with the final result --
/// spec.md §4.3's "Batching" rule.
pub struct ArrayView {
    schema: Arc<SourceSchema>,
    with_ids: bool,
    root: RefCell<Relationship>,
    pending: RefCell<Vec<Change>>,
    listeners: RefCell<Vec<Box<dyn Fn(&Relationship)>>>,
}

impl ArrayView {
    pub fn new(schema: Arc<SourceSchema>, format: Format, with_ids: bool) -> Self {
        ArrayView {
            schema,
            with_ids,
            root: RefCell::new(Relationship::empty(format)),
            pending: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
        }
    }

    /// Buffers `change`; does not apply it or notify listeners until the
    /// next [`ArrayView::flush`].
    pub fn push(&self, change: Change) {
        self.pending.borrow_mut().push(change);
    }

    /// Applies every buffered change (in arrival order) and fires
    /// listeners once with the resulting tree, iff anything actually
    /// changed.
    pub fn flush(&self) {
        let changes: Vec<Change> = self.pending.borrow_mut().drain(..).collect();
        if changes.is_empty() {
            return;
        }
        let applied = changes.len();
        let mut changed = false;
        {
            let mut root = self.root.borrow_mut();
            for change in changes {
                if let Some(new_root) = apply_at_level(&root, &self.schema, &change, self.with_ids) {
                    *root = new_root;
                    changed = true;
                }
            }
        }
        debug!(table = %self.schema.table, applied, changed, "array_view: flush");
        if changed {
            let root = self.root.borrow();
            for listener in self.listeners.borrow().iter() {
                listener(&root);
            }
        }
    }

    /// The current tree. Auto-flushes any buffered changes first, for
    /// backward-compatible callers that never call `flush` explicitly
    /// (spec.md §4.3); well-behaved callers push then flush and use this
    /// only to read the settled result.
    pub fn data(&self) -> Relationship {
        self.flush();
        self.root.borrow().clone()
    }

    pub fn on_change(&self, listener: impl Fn(&Relationship) + 'static) {
        self.listeners.borrow_mut().push(Box::new(listener));
    }

    pub fn schema(&self) -> &Arc<SourceSchema> {
        &self.schema
    }
}

/// Converts a [`Relationship`] to an owned, index-addressable vector,
/// regardless of whether it's `Singular` or `Plural`.
fn to_vec(rel: &Relationship) -> Vec<Rc<Entry>> {
    rel.entries().into_iter().cloned().collect()
}

fn from_vec(format: Format, entries: Vec<Rc<Entry>>) -> Relationship {
    match format {
        Format::Singular => Relationship::Singular(entries.into_iter().next()),
        Format::Plural => Relationship::Plural(entries),
    }
}

/// Applies one `change` to `relationship` (a non-hidden level: either the
/// root or a relationship whose schema is not `isHidden`), returning
/// `None` when nothing observably changed at this level -- callers must
/// keep the original `Relationship` in that case to preserve identity
/// (spec.md §4.3, "applyChange preserves object identity for every
/// subtree not on the path from the changed row to the root").
fn apply_at_level(
    relationship: &Relationship,
    schema: &SourceSchema,
    change: &Change,
    with_ids: bool,
) -> Option<Relationship> {
    match change {
        Change::Add { node } => Some(insert_or_increment(relationship, schema, node, with_ids)),
        Change::Remove { node } => Some(remove_or_decrement(relationship, schema, node)),
        Change::Edit { node, old_node } => Some(apply_edit(relationship, schema, old_node, node, with_ids)),
        Change::Child {
            node,
            relationship_name,
            child,
        } => apply_child(relationship, schema, node, relationship_name, child, with_ids),
    }
}

/// Finds the entry whose row matches `node`'s primary key, if present,
/// adds one if absent (building a fresh subtree via [`build_entry`]) or
/// increments its `ref_count` if already there -- spec.md §4.3, `add`.
fn insert_or_increment(relationship: &Relationship, schema: &SourceSchema, node: &Node, with_ids: bool) -> Relationship {
    let format = relationship.format();
    let mut entries = to_vec(relationship);
    match find_by_key(&entries, &node.row, &schema.primary_key) {
        Some(idx) => {
            let incremented = entries[idx].with_ref_count(entries[idx].ref_count + 1);
            entries[idx] = incremented;
        }
        None => {
            let fresh = build_entry(node, schema, with_ids);
            let pos = sorted_position(&entries, &node.row, &schema.comparator);
            entries.insert(pos, fresh);
        }
    }
    from_vec(format, entries)
}

/// spec.md §4.3, `remove`: decrements `ref_count`, physically removing the
/// entry only once it reaches zero.
fn remove_or_decrement(relationship: &Relationship, schema: &SourceSchema, node: &Node) -> Relationship {
    let format = relationship.format();
    let mut entries = to_vec(relationship);
    if let Some(idx) = find_by_key(&entries, &node.row, &schema.primary_key) {
        if entries[idx].ref_count <= 1 {
            entries.remove(idx);
        } else {
            entries[idx] = entries[idx].with_ref_count(entries[idx].ref_count - 1);
        }
    }
    from_vec(format, entries)
}

/// spec.md §4.3, `edit`: if the sort key is unchanged, the entry is
/// swapped in place regardless of `ref_count` (every path reaching this
/// row sees the same updated content). If the sort key changed and
/// `ref_count == 1`, the entry simply moves. If the sort key changed and
/// `ref_count > 1`, a ref-count-decremented "ghost" is left at the old
/// position (for a future edit on the other referencing path to consume)
/// and a fresh entry is inserted at the new position.
fn apply_edit(relationship: &Relationship, schema: &SourceSchema, old_node: &Node, node: &Node, with_ids: bool) -> Relationship {
    let format = relationship.format();
    let mut entries = to_vec(relationship);
    let Some(idx) = find_by_key(&entries, &old_node.row, &schema.primary_key) else {
        return from_vec(format, entries);
    };
    let existing = entries[idx].clone();
    let new_id = with_ids.then(|| derive_id(&node.row, &schema.primary_key));

    let mut without_self = entries.clone();
    without_self.remove(idx);
    let new_pos = sorted_position(&without_self, &node.row, &schema.comparator);

    if new_pos == idx {
        entries[idx] = existing.with_row(node.row.clone(), new_id);
        return from_vec(format, entries);
    }

    if existing.ref_count <= 1 {
        entries.remove(idx);
        let moved = existing.with_row(node.row.clone(), new_id);
        let pos = sorted_position(&entries, &node.row, &schema.comparator);
        entries.insert(pos, moved);
    } else {
        let ghost = existing.with_ref_count(existing.ref_count - 1);
        entries[idx] = ghost;
        let fresh = build_entry(node, schema, with_ids);
        let pos = sorted_position(&entries, &node.row, &schema.comparator);
        entries.insert(pos, fresh);
    }
    from_vec(format, entries)
}

/// spec.md §4.3, `child`: recurses into the entry matching `node`'s
/// primary key's relationship named `relationship_name`. Returns `None`
/// (preserving identity) if the nested change produced no observable
/// change at that level.
fn apply_child(
    relationship: &Relationship,
    schema: &SourceSchema,
    node: &Node,
    relationship_name: &str,
    child: &Change,
    with_ids: bool,
) -> Option<Relationship> {
    let format = relationship.format();
    let mut entries = to_vec(relationship);
    let idx = find_by_key(&entries, &node.row, &schema.primary_key)?;
    let entry = entries[idx].clone();

    let child_schema = schema.relationships.get(relationship_name)?;
    let new_entry = if child_schema.is_hidden {
        apply_hidden_on_entry(&entry, child_schema, child, with_ids)?
    } else {
        let old_child_rel = entry
            .relationships
            .get(relationship_name)
            .cloned()
            .unwrap_or_else(|| Relationship::empty(Format::Plural));
        let new_child_rel = apply_at_level(&old_child_rel, child_schema, child, with_ids)?;
        entry.with_relationship(relationship_name, new_child_rel)
    };

    entries[idx] = new_entry;
    Some(from_vec(format, entries))
}

/// spec.md §4.3: "If `schema.isHidden`: collapse the hidden level by
/// recursing for each child under the hidden node's relationships; for
/// `edit` this is a no-op." Rows at a hidden schema are never themselves
/// materialized as an `Entry` -- instead, whatever change would have
/// applied to them is folded directly onto `entry`'s own relationships,
/// named after the hidden row's *grandchild* relationship (the common
/// case being a join through a junction table, where the junction row
/// itself must stay invisible but its one real child relationship must
/// still appear directly on the parent).
///
/// Returns `None` if nothing changed (an `Edit`, or a `Child` that itself
/// resolved to no change).
fn apply_hidden_on_entry(entry: &Rc<Entry>, hidden_schema: &SourceSchema, change: &Change, with_ids: bool) -> Option<Rc<Entry>> {
    match change {
        Change::Add { node } => {
            let mut current = entry.clone();
            for (name, child_schema) in hidden_schema.relationships.iter() {
                for grandchild in node.children(name) {
                    current = add_flattened(&current, name, child_schema, &grandchild, with_ids);
                }
            }
            Some(current)
        }
        Change::Remove { node } => {
            let mut current = entry.clone();
            for (name, child_schema) in hidden_schema.relationships.iter() {
                for grandchild in node.children(name) {
                    current = remove_flattened(&current, name, child_schema, &grandchild);
                }
            }
            Some(current)
        }
        Change::Edit { .. } => None,
        Change::Child {
            relationship_name,
            child,
            ..
        } => {
            let grandchild_schema = hidden_schema.relationships.get(relationship_name.as_ref())?;
            if grandchild_schema.is_hidden {
                apply_hidden_on_entry(entry, grandchild_schema, child, with_ids)
            } else {
                let old_rel = entry
                    .relationships
                    .get(relationship_name.as_ref())
                    .cloned()
                    .unwrap_or_else(|| Relationship::empty(Format::Plural));
                let new_rel = apply_at_level(&old_rel, grandchild_schema, child, with_ids)?;
                Some(entry.with_relationship(relationship_name, new_rel))
            }
        }
    }
}

fn add_flattened(entry: &Rc<Entry>, name: &str, schema: &SourceSchema, node: &Node, with_ids: bool) -> Rc<Entry> {
    let old_rel = entry
        .relationships
        .get(name)
        .cloned()
        .unwrap_or_else(|| Relationship::empty(Format::Plural));
    let new_rel = insert_or_increment(&old_rel, schema, node, with_ids);
    entry.with_relationship(name, new_rel)
}

fn remove_flattened(entry: &Rc<Entry>, name: &str, schema: &SourceSchema, node: &Node) -> Rc<Entry> {
    let old_rel = entry
        .relationships
        .get(name)
        .cloned()
        .unwrap_or_else(|| Relationship::empty(Format::Plural));
    let new_rel = remove_or_decrement(&old_rel, schema, node);
    entry.with_relationship(name, new_rel)
}

/// Materializes a brand-new `Entry` for `node` under `schema`, recursing
/// into every non-hidden relationship and flattening any hidden ones into
/// their own grandchild relationship names (mirroring
/// [`apply_hidden_on_entry`]'s Add case, but for first-time construction
/// rather than an incremental update).
pub fn build_entry(node: &Node, schema: &SourceSchema, with_ids: bool) -> Rc<Entry> {
    let mut relationships: IndexMap<Box<str>, Relationship> = IndexMap::new();
    for (name, child_schema) in schema.relationships.iter() {
        if child_schema.is_hidden {
            for hidden_node in node.children(name) {
                merge_hidden_build(&mut relationships, child_schema, &hidden_node, with_ids);
            }
        } else {
            let mut entries: Vec<Rc<Entry>> = node
                .children(name)
                .iter()
                .map(|child_node| build_entry(child_node, child_schema, with_ids))
                .collect();
            entries.sort_by(|a, b| child_schema.comparator.compare(&a.row, &b.row));
            relationships.insert(Box::from(name), Relationship::Plural(entries));
        }
    }
    let id = with_ids.then(|| derive_id(&node.row, &schema.primary_key));
    Entry::new(node.row.clone(), relationships, id)
}

fn merge_hidden_build(out: &mut IndexMap<Box<str>, Relationship>, hidden_schema: &SourceSchema, hidden_node: &Node, with_ids: bool) {
    for (name, child_schema) in hidden_schema.relationships.iter() {
        if child_schema.is_hidden {
            for grandchild in hidden_node.children(name) {
                merge_hidden_build(out, child_schema, &grandchild, with_ids);
            }
            continue;
        }
        let slot = out.entry(Box::from(name)).or_insert_with(|| Relationship::Plural(Vec::new()));
        let mut entries = to_vec(slot);
        for grandchild in hidden_node.children(name) {
            entries = vec_insert_or_increment(entries, child_schema, &grandchild, with_ids);
        }
        *slot = Relationship::Plural(entries);
    }
}

fn vec_insert_or_increment(mut entries: Vec<Rc<Entry>>, schema: &SourceSchema, node: &Node, with_ids: bool) -> Vec<Rc<Entry>> {
    match find_by_key(&entries, &node.row, &schema.primary_key) {
        Some(idx) => entries[idx] = entries[idx].with_ref_count(entries[idx].ref_count + 1),
        None => {
            let fresh = build_entry(node, schema, with_ids);
            let pos = sorted_position(&entries, &node.row, &schema.comparator);
            entries.insert(pos, fresh);
        }
    }
    entries
}
