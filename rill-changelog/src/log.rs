//! [`ChangeLog`]: a replica-local, version-ordered index of which rows
//! changed, collapsed to "last op per `(table, rowKey)`" on read (spec.md
//! §4.4, §9).

use std::collections::HashMap;

use indexmap::IndexMap;
use rill_data::Value;
use tracing::debug;

use crate::entry::{canonical_row_key, ChangeLogEntry, Op};
use crate::version::StateVersion;

/// The key columns identifying a row, in the caller's chosen column order.
/// Callers pass whichever columns make up the table's primary key; the log
/// itself has no opinion on what a table's key is.
pub type RowKeyColumns = IndexMap<Box<str>, Value>;

/// A replica-side change log. Internally append-only state is collapsed
/// immediately on write (rather than accumulated and collapsed on read):
/// each `log_*` call replaces whatever entry previously existed for the
/// same `(table, rowKey)`, matching a SQL `INSERT ... ON CONFLICT (table,
/// rowKey) DO UPDATE` against the table layout in spec.md §6.
#[derive(Debug, Default)]
pub struct ChangeLog {
    entries: HashMap<(Box<str>, Box<str>), ChangeLogEntry>,
}

impl ChangeLog {
    pub fn new() -> Self {
        ChangeLog::default()
    }

    /// Records a set (insert or update), optionally reporting which
    /// columns were just populated from a backfill snapshot.
    ///
    /// `backfilled`:
    /// - `None` -- the row's backfill is complete; any previously tracked
    ///   backfilling columns are cleared.
    /// - `Some(cols)` -- each named column's backfill version is advanced
    ///   to `state_version`; columns already tracked but not named here
    ///   keep their existing version (a `json_patch`-style merge, not a
    ///   replace). An empty `cols` is distinct from `None`: the row is
    ///   still mid-backfill, but this particular change didn't populate
    ///   any new column.
    pub fn log_set_op(
        &mut self,
        state_version: impl Into<StateVersion>,
        pos: i64,
        table: impl Into<Box<str>>,
        row_key_columns: &RowKeyColumns,
        backfilled: Option<Vec<Box<str>>>,
    ) {
        let state_version = state_version.into();
        let table = table.into();
        let row_key = canonical_row_key(row_key_columns);
        let mut backfilling = self
            .entries
            .get(&(table.clone(), row_key.clone()))
            .map(|e| e.backfilling_column_versions.clone())
            .unwrap_or_default();
        match backfilled {
            None => backfilling.clear(),
            Some(cols) => {
                for col in cols {
                    backfilling.insert(col, state_version.clone());
                }
            }
        }
        debug!(%state_version, pos, %table, %row_key, "change_log: set");
        self.entries.insert(
            (table.clone(), row_key.clone()),
            ChangeLogEntry {
                state_version,
                pos,
                table,
                row_key,
                op: Op::Set,
                backfilling_column_versions: backfilling,
            },
        );
    }

    /// Records a delete. Always clears `backfilling_column_versions`: the
    /// row is gone regardless of which columns were mid-backfill.
    pub fn log_delete_op(
        &mut self,
        state_version: impl Into<StateVersion>,
        pos: i64,
        table: impl Into<Box<str>>,
        row_key_columns: &RowKeyColumns,
    ) {
        let state_version = state_version.into();
        let table = table.into();
        let row_key = canonical_row_key(row_key_columns);
        debug!(%state_version, pos, %table, %row_key, "change_log: delete");
        self.entries.insert(
            (table.clone(), row_key.clone()),
            ChangeLogEntry {
                state_version,
                pos,
                table,
                row_key,
                op: Op::Delete,
                backfilling_column_versions: IndexMap::new(),
            },
        );
    }

    /// Records a table-wide truncate. `pos = -1` and `rowKey =
    /// stateVersion`, per spec.md §6; a later reset or truncate of the
    /// same table in the same version overwrites this entry (the
    /// `(table, rowKey)` unique constraint collapses it, since both share
    /// the same `rowKey`).
    pub fn log_truncate_op(&mut self, state_version: impl Into<StateVersion>, table: impl Into<Box<str>>) {
        self.log_table_wide_op(state_version, table, Op::Truncate)
    }

    /// Records a table-wide reset (the replica is being fully resynced for
    /// this table). Same row-key/pos convention as truncate.
    pub fn log_reset_op(&mut self, state_version: impl Into<StateVersion>, table: impl Into<Box<str>>) {
        self.log_table_wide_op(state_version, table, Op::Reset)
    }

    fn log_table_wide_op(&mut self, state_version: impl Into<StateVersion>, table: impl Into<Box<str>>, op: Op) {
        let state_version = state_version.into();
        let table = table.into();
        let row_key: Box<str> = state_version.as_str().into();
        debug!(%state_version, %table, op = %op.code(), "change_log: table-wide op");
        self.entries.insert(
            (table.clone(), row_key.clone()),
            ChangeLogEntry {
                state_version,
                pos: -1,
                table,
                row_key,
                op,
                backfilling_column_versions: IndexMap::new(),
            },
        );
    }

    /// The single entry for `(table, rowKey)`, if logged and not since
    /// superseded by another op on the same row.
    pub fn entry(&self, table: &str, row_key_columns: &RowKeyColumns) -> Option<&ChangeLogEntry> {
        let row_key = canonical_row_key(row_key_columns);
        self.entries.get(&(Box::from(table), row_key))
    }

    /// Every current entry, in the canonical replay order: `(stateVersion,
    /// pos)` ascending, with `op` as a secondary key (spec.md §9's
    /// "downstream consumers rely on seeing `r` before `t`").
    pub fn entries_sorted(&self) -> Vec<&ChangeLogEntry> {
        let mut entries: Vec<&ChangeLogEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            (a.state_version.as_str(), a.pos, a.op).cmp(&(b.state_version.as_str(), b.pos, b.op))
        });
        entries
    }

    /// Entries with `stateVersion` strictly greater than `since`, in
    /// replay order -- the primitive a downstream consumer uses to compute
    /// the diff between two versions.
    pub fn entries_since(&self, since: &StateVersion) -> Vec<&ChangeLogEntry> {
        self.entries_sorted()
            .into_iter()
            .filter(|e| &e.state_version > since)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn key(a: i64) -> RowKeyColumns {
        let mut m = IndexMap::new();
        m.insert(Box::from("id"), Value::from(a));
        m
    }

    /// Scenario 5 from spec.md §8: truncate then reset then set, then a
    /// reset+truncate pair in a later version collapsing to the truncate.
    #[test]
    fn scenario_truncate_then_reset_then_set() {
        let mut log = ChangeLog::new();
        log.log_truncate_op("05", "foo");
        log.log_reset_op("05", "bar");
        log.log_set_op("05", 0, "foo", &key(8), None);

        assert_eq!(log.len(), 3);

        log.log_reset_op("06", "baz");
        log.log_truncate_op("06", "baz");

        let baz_entries: Vec<&ChangeLogEntry> = log
            .entries_sorted()
            .into_iter()
            .filter(|e| &*e.table == "baz")
            .collect();
        assert_eq!(baz_entries.len(), 1);
        assert_eq!(baz_entries[0].op, Op::Truncate);
        assert_eq!(baz_entries[0].pos, -1);
        assert_eq!(baz_entries[0].state_version.as_str(), "06");
    }

    /// Scenario 6 from spec.md §8: backfill merge semantics across a
    /// sequence of sets, a delete, and a subsequent set.
    #[test]
    fn scenario_backfill_merge() {
        let mut log = ChangeLog::new();
        let row = key(1);

        log.log_set_op("123", 0, "foo", &row, Some(vec![Box::from("c"), Box::from("b")]));
        log.log_set_op("2440", 0, "foo", &row, Some(vec![Box::from("d"), Box::from("c")]));
        log.log_set_op("2560", 0, "foo", &row, Some(vec![]));

        let entry = log.entry("foo", &row).unwrap();
        let versions: Vec<(&str, &str)> = entry
            .backfilling_column_versions
            .iter()
            .map(|(c, v)| (c.as_ref(), v.as_str()))
            .collect();
        assert_eq!(versions, vec![("b", "123"), ("c", "2440"), ("d", "2440")]);

        log.log_delete_op("2568", 0, "foo", &row);
        assert!(log.entry("foo", &row).unwrap().backfilling_column_versions.is_empty());

        log.log_set_op("2888", 0, "foo", &row, Some(vec![Box::from("e"), Box::from("f")]));
        let entry = log.entry("foo", &row).unwrap();
        let versions: Vec<(&str, &str)> = entry
            .backfilling_column_versions
            .iter()
            .map(|(c, v)| (c.as_ref(), v.as_str()))
            .collect();
        assert_eq!(versions, vec![("e", "2888"), ("f", "2888")]);

        log.log_set_op("2990", 0, "foo", &row, None);
        assert!(log.entry("foo", &row).unwrap().backfilling_column_versions.is_empty());
    }

    #[test]
    fn entries_since_excludes_versions_at_or_before_the_cutoff() {
        let mut log = ChangeLog::new();
        log.log_set_op("01", 0, "t", &key(1), None);
        log.log_set_op("02", 0, "t", &key(2), None);
        log.log_set_op("03", 0, "t", &key(3), None);

        let since = StateVersion::new("01");
        let after: Vec<i64> = log.entries_since(&since).iter().map(|e| e.pos).collect();
        assert_eq!(after.len(), 2);
    }

    #[test]
    fn last_op_per_row_after_delete_has_op_d_and_empty_backfill() {
        let mut log = ChangeLog::new();
        let row = key(9);
        log.log_set_op("01", 0, "t", &row, Some(vec![Box::from("x")]));
        log.log_delete_op("02", 0, "t", &row);
        let entry = log.entry("t", &row).unwrap();
        assert_eq!(entry.op, Op::Delete);
        assert!(entry.backfilling_column_versions.is_empty());
        assert_eq!(log.len(), 1);
    }

    proptest! {
        /// Universal invariant (spec.md §8): for every `(table, rowKey)`
        /// there is at most one entry, and any sequence of sets/deletes
        /// ending in a delete leaves that row's entry at `op='d'` with an
        /// empty backfill map, no matter how many sets or how much
        /// backfill bookkeeping preceded it.
        #[test]
        fn any_set_delete_sequence_ending_in_delete_collapses_to_a_clean_delete(
            set_versions in proptest::collection::vec(1u32..200, 0..12),
        ) {
            let mut log = ChangeLog::new();
            let row = key(1);
            for (i, v) in set_versions.iter().enumerate() {
                let version = format!("{v:010}-{i}");
                let cols = if i % 2 == 0 { Some(vec![Box::from("a")]) } else { None };
                log.log_set_op(version, i as i64, "t", &row, cols);
            }
            log.log_delete_op(format!("{:010}-final", u32::MAX), 0, "t", &row);

            prop_assert_eq!(log.len(), 1);
            let entry = log.entry("t", &row).unwrap();
            prop_assert_eq!(entry.op, Op::Delete);
            prop_assert!(entry.backfilling_column_versions.is_empty());
        }
    }
}
