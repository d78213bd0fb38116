//! [`SourceSchema`]: the per-operator-output schema describing a table's
//! columns, primary key, sort, and child relationships.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::ordering::{Comparator, Ordering, PrimaryKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Number,
    Integer,
    String,
    Bytes,
}

/// The schema of one operator's output: its table name, columns, primary
/// key, sort, derived comparator, visibility/provenance flags, and the
/// schemas of any child relationships it exposes.
#[derive(Debug, Clone)]
pub struct SourceSchema {
    pub table: Arc<str>,
    pub columns: IndexMap<Box<str>, ColumnType>,
    pub primary_key: PrimaryKey,
    pub sort: Ordering,
    pub comparator: Comparator,
    /// Whether rows at this level should be absent from the materialized
    /// view while still flowing through the operator graph — used for
    /// relationships that exist only to join through a junction table.
    pub is_hidden: bool,
    /// Whether rows at this level originated from a permissions-injected
    /// edge that must not be synced to the client.
    pub system: bool,
    pub relationships: IndexMap<Box<str>, Arc<SourceSchema>>,
}

impl SourceSchema {
    pub fn new(
        table: impl Into<Arc<str>>,
        columns: IndexMap<Box<str>, ColumnType>,
        primary_key: PrimaryKey,
        sort: Ordering,
    ) -> Self {
        let comparator = Comparator::new(sort.clone());
        SourceSchema {
            table: table.into(),
            columns,
            primary_key,
            sort,
            comparator,
            is_hidden: false,
            system: false,
            relationships: IndexMap::new(),
        }
    }

    pub fn hidden(mut self) -> Self {
        self.is_hidden = true;
        self
    }

    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    pub fn with_relationship(mut self, name: impl Into<Box<str>>, schema: Arc<SourceSchema>) -> Self {
        self.relationships.insert(name.into(), schema);
        self
    }
}
