//! [`Entry`] and [`Relationship`]: the nodes of the materialized tree
//! (spec.md §4.3).

use std::cmp::Ordering as CmpOrdering;
use std::rc::Rc;

use indexmap::IndexMap;
use rill_data::{Comparator, PrimaryKey, Row};

/// Whether a relationship (or the synthetic root) holds a single entry or
/// an ordered collection of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Singular,
    Plural,
}

/// The materialized value under one relationship name (or the synthetic
/// root `{"": V}` spec.md §4.3 describes) -- either a single [`Entry`] or
/// an ordered array of them, per its [`Format`].
#[derive(Debug, Clone)]
pub enum Relationship {
    Singular(Option<Rc<Entry>>),
    Plural(Vec<Rc<Entry>>),
}

impl Relationship {
    pub fn empty(format: Format) -> Self {
        match format {
            Format::Singular => Relationship::Singular(None),
            Format::Plural => Relationship::Plural(Vec::new()),
        }
    }

    pub fn format(&self) -> Format {
        match self {
            Relationship::Singular(_) => Format::Singular,
            Relationship::Plural(_) => Format::Plural,
        }
    }

    /// All entries this relationship currently holds, in display order.
    pub fn entries(&self) -> Vec<&Rc<Entry>> {
        match self {
            Relationship::Singular(e) => e.iter().collect(),
            Relationship::Plural(v) => v.iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Relationship::Singular(e) => e.is_some() as usize,
            Relationship::Plural(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One materialized row, plus its child relationships.
///
/// Entries are immutable once built: any mutation (spec.md §4.3's
/// "Immutability discipline") produces a new `Entry` and a new `Rc`
/// wrapping it, copying the path from the changed entry up to the root
/// while leaving sibling `Rc`s untouched so downstream consumers can
/// shallow-compare old vs new trees.
#[derive(Debug, Clone)]
pub struct Entry {
    pub row: Row,
    pub relationships: IndexMap<Box<str>, Relationship>,
    /// How many distinct relationship paths currently reach this exact
    /// row within its containing relationship. Always >= 1 while present;
    /// typical of junction-table fan-in (spec.md §4.3, "Reference
    /// counting rationale").
    pub ref_count: u32,
    /// A stable identity string derived from the primary key, present
    /// only when the view was built `with_ids`. Single-key tables use the
    /// key value's own JSON encoding; compound keys use a JSON array of
    /// the per-column values (spec.md §4.3).
    pub id: Option<Box<str>>,
}

impl Entry {
    pub fn new(row: Row, relationships: IndexMap<Box<str>, Relationship>, id: Option<Box<str>>) -> Rc<Entry> {
        Rc::new(Entry {
            row,
            relationships,
            ref_count: 1,
            id,
        })
    }

    /// A copy of this entry with `ref_count` changed, used when
    /// incrementing/decrementing a reference count without otherwise
    /// touching the entry's contents.
    pub fn with_ref_count(&self, ref_count: u32) -> Rc<Entry> {
        Rc::new(Entry {
            row: self.row.clone(),
            relationships: self.relationships.clone(),
            ref_count,
            id: self.id.clone(),
        })
    }

    /// A copy of this entry with one relationship replaced, used when a
    /// `Change::Child` updates a descendant without touching `row` or
    /// `ref_count`.
    pub fn with_relationship(&self, name: &str, relationship: Relationship) -> Rc<Entry> {
        let mut relationships = self.relationships.clone();
        relationships.insert(Box::from(name), relationship);
        Rc::new(Entry {
            row: self.row.clone(),
            relationships,
            ref_count: self.ref_count,
            id: self.id.clone(),
        })
    }

    /// A copy of this entry with `row` replaced (an in-place edit),
    /// keeping relationships and ref_count as-is.
    pub fn with_row(&self, row: Row, id: Option<Box<str>>) -> Rc<Entry> {
        Rc::new(Entry {
            row,
            relationships: self.relationships.clone(),
            ref_count: self.ref_count,
            id,
        })
    }
}

/// Derives the stable identity string for `row` under `primary_key`, per
/// spec.md §4.3: a single-key table uses the key's own JSON encoding; a
/// compound key is a JSON array of the per-column values, in key order.
pub fn derive_id(row: &Row, primary_key: &PrimaryKey) -> Box<str> {
    if primary_key.len() == 1 {
        let v = row.get(&primary_key[0]).cloned().unwrap_or(rill_data::Value::Null);
        serde_json::to_string(&v).expect("Value serializes infallibly").into()
    } else {
        let values: Vec<rill_data::Value> = primary_key
            .iter()
            .map(|c| row.get(c).cloned().unwrap_or(rill_data::Value::Null))
            .collect();
        serde_json::to_string(&values).expect("Value serializes infallibly").into()
    }
}

/// Locates the entry matching `row`'s primary key within `entries`
/// (already in sort order), returning its index.
pub fn find_by_key(entries: &[Rc<Entry>], row: &Row, primary_key: &PrimaryKey) -> Option<usize> {
    let key = row.key_values(primary_key);
    entries.iter().position(|e| e.row.key_values(primary_key) == key)
}

/// The position at which `row` would be inserted into `entries` to keep
/// them in `comparator` order.
pub fn sorted_position(entries: &[Rc<Entry>], row: &Row, comparator: &Comparator) -> usize {
    entries.partition_point(|e| comparator.compare(&e.row, row) == CmpOrdering::Less)
}
