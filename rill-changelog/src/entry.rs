//! [`ChangeLogEntry`] and [`Op`]: one row of the change log table described
//! in spec.md §6.
//!
//! ```text
//! CREATE TABLE change_log (
//!     stateVersion TEXT,
//!     pos INTEGER,
//!     table TEXT,
//!     rowKey TEXT,
//!     op TEXT,
//!     backfillingColumnVersions TEXT DEFAULT '{}',
//!     PRIMARY KEY (stateVersion, pos)
//! );
//! CREATE UNIQUE INDEX change_log_table_row_key ON change_log (table, rowKey);
//! ```
//!
//! `rowKey` is a canonical JSON object (keys sorted) for row ops; it equals
//! `stateVersion` for `t`/`r` (table-wide) ops, which also always carry
//! `pos = -1`.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use rill_data::Value;

use crate::version::StateVersion;

/// The operation a change log entry records. Variant *declaration* order
/// doubles as the tie-break order spec.md §9 calls out ("the precedence of
/// `t` vs `r` ... is encoded by op-letter ordering"): the derived `Ord`
/// matches ASCII order of the single-letter codes (`d` < `r` < `s` < `t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Op {
    Delete,
    Reset,
    Set,
    Truncate,
}

impl Op {
    /// The single-letter code stored in the `op` column.
    pub fn code(self) -> char {
        match self {
            Op::Set => 's',
            Op::Delete => 'd',
            Op::Truncate => 't',
            Op::Reset => 'r',
        }
    }

    /// Whether this op applies to an entire table rather than one row
    /// (`pos = -1`, `rowKey = stateVersion`, per spec.md §6).
    pub fn is_table_wide(self) -> bool {
        matches!(self, Op::Truncate | Op::Reset)
    }
}

/// One row of the change log. Constructed only by [`crate::ChangeLog`]'s
/// `log_*` methods, which enforce the `(table, rowKey)` uniqueness
/// invariant and the backfill-merge semantics described in spec.md §4.4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogEntry {
    pub state_version: StateVersion,
    pub pos: i64,
    pub table: Box<str>,
    pub row_key: Box<str>,
    pub op: Op,
    /// Per-column version strings for columns still catching up from a
    /// backfill snapshot; empty once the row's live value is known for
    /// every column. See spec.md §4.4, "Set-with-backfill semantics".
    pub backfilling_column_versions: IndexMap<Box<str>, StateVersion>,
}

/// Canonicalizes a row's key columns into the sorted-keys JSON text stored
/// as `rowKey`. Uses a `BTreeMap` rather than relying on `serde_json`'s
/// (feature-gated) map ordering, so the sort is guaranteed regardless of
/// how the caller's `serde_json` is configured elsewhere in the workspace.
pub fn canonical_row_key(columns: &IndexMap<Box<str>, Value>) -> Box<str> {
    let sorted: BTreeMap<&str, &Value> = columns.iter().map(|(k, v)| (k.as_ref(), v)).collect();
    serde_json::to_string(&sorted)
        .expect("Value serializes infallibly")
        .into_boxed_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_ordering_matches_ascii_letter_order() {
        let mut ops = vec![Op::Truncate, Op::Set, Op::Reset, Op::Delete];
        ops.sort();
        assert_eq!(ops, vec![Op::Delete, Op::Reset, Op::Set, Op::Truncate]);
    }

    #[test]
    fn canonical_row_key_sorts_columns() {
        let mut columns = IndexMap::new();
        columns.insert(Box::from("b"), Value::from(2_i64));
        columns.insert(Box::from("a"), Value::from(1_i64));
        let key = canonical_row_key(&columns);
        assert_eq!(&*key, r#"{"a":1,"b":2}"#);
    }
}
