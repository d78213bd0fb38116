//! Typed tags for the downstream change stream described in spec.md §6.
//!
//! Decoding the actual wire format is the replicator's job (out of scope
//! per spec.md §1: "the upstream CDC source ... and its wire schema
//! migration"). This module exists only so a future replicator has a
//! concrete Rust type to target instead of untyped strings -- the tag
//! names are fixed by the contract, nothing here interprets payload bytes.

use rill_data::Value;

/// The three-message transaction envelope every batch of row/schema ops is
/// wrapped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnTag {
    Begin,
    Commit,
    Rollback,
}

/// A row-level operation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOpTag {
    Insert,
    Update,
    Delete,
    Truncate,
    /// A backfill batch: row-key values followed by backfilled column
    /// values in declared order, carrying a `watermark` identifying the
    /// snapshot version it was taken at (spec.md §6).
    Backfill,
}

/// A schema-level operation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaOpTag {
    CreateTable,
    RenameTable,
    UpdateTableMetadata,
    AddColumn,
    UpdateColumn,
    DropColumn,
    DropTable,
    CreateIndex,
    DropIndex,
    BackfillCompleted,
}

/// Any tag that can appear in the downstream change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStreamTag {
    Txn(TxnTag),
    Row(RowOpTag),
    Schema(SchemaOpTag),
}

/// The `relation` every row op carries: which table, and the shape of its
/// row key.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub schema: Box<str>,
    pub name: Box<str>,
    pub row_key: RowKeySpec,
}

/// `rowKey.columns`, plus an optional upstream type tag -- present when
/// the relation's row key type isn't implied by the table's declared
/// schema (e.g. a full-row replica identity).
#[derive(Debug, Clone, PartialEq)]
pub struct RowKeySpec {
    pub columns: Vec<Box<str>>,
    pub upstream_type: Option<Box<str>>,
}

/// A single row's values for the `update`/`delete`/`insert` tags. `key` is
/// present only on `update` when the key changed or the table uses
/// full-row replica identity (spec.md §6).
#[derive(Debug, Clone, PartialEq)]
pub struct RowOpPayload {
    pub relation: Relation,
    pub row: indexmap::IndexMap<Box<str>, Value>,
    pub key: Option<indexmap::IndexMap<Box<str>, Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_distinguish_envelope_row_and_schema_ops() {
        assert_ne!(
            ChangeStreamTag::Txn(TxnTag::Begin),
            ChangeStreamTag::Row(RowOpTag::Insert)
        );
    }
}
