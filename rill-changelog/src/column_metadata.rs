//! [`ColumnMetadataStore`]: the `_zero.column_metadata` table from spec.md
//! §6, tracking each replicated column's upstream type information.
//!
//! Named in §6 but not elaborated as its own component in §4; implemented
//! here as a second small keyed store alongside the change log, since both
//! are replica-side bookkeeping over the same upstream schema (SPEC_FULL.md
//! §4, "ColumnMetadataStore").

use std::collections::HashMap;

/// One row of `_zero.column_metadata`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    pub upstream_type: Box<str>,
    pub is_not_null: bool,
    pub is_enum: bool,
    pub is_array: bool,
    pub character_max_length: Option<i64>,
}

#[derive(Debug, Default)]
pub struct ColumnMetadataStore {
    entries: HashMap<(Box<str>, Box<str>), ColumnMetadata>,
}

impl ColumnMetadataStore {
    pub fn new() -> Self {
        ColumnMetadataStore::default()
    }

    pub fn set(&mut self, table: impl Into<Box<str>>, column: impl Into<Box<str>>, metadata: ColumnMetadata) {
        self.entries.insert((table.into(), column.into()), metadata);
    }

    pub fn get(&self, table: &str, column: &str) -> Option<&ColumnMetadata> {
        self.entries.get(&(Box::from(table), Box::from(column)))
    }

    /// Drops every column entry for `table` (mirrors a `drop-table` schema
    /// op in spec.md §6's change-stream tag list).
    pub fn remove_table(&mut self, table: &str) {
        self.entries.retain(|(t, _), _| t.as_ref() != table);
    }

    /// Drops a single column's entry (mirrors a `drop-column` schema op).
    pub fn remove_column(&mut self, table: &str, column: &str) {
        self.entries.remove(&(Box::from(table), Box::from(column)));
    }

    pub fn columns_for_table<'a>(&'a self, table: &'a str) -> impl Iterator<Item = (&'a str, &'a ColumnMetadata)> {
        self.entries
            .iter()
            .filter(move |((t, _), _)| t.as_ref() == table)
            .map(|((_, c), meta)| (c.as_ref(), meta))
    }
}
