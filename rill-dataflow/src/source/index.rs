//! A single sorted container backing one or more [`Connection`]s to a
//! [`Source`](super::Source).

use rill_data::{Comparator, Ordering, PrimaryKey, Row};

/// A sorted container keyed by a specific [`Ordering`], plus the number of
/// connections currently using it (the primary-key index is exempt from
/// the "refcount reaches zero" eviction rule — see spec.md §4.1).
pub struct Index {
    ordering: Ordering,
    comparator: Comparator,
    rows: Vec<Row>,
    refcount: usize,
}

impl Index {
    pub fn new(ordering: Ordering) -> Self {
        Index {
            comparator: Comparator::new(ordering.clone()),
            ordering,
            rows: Vec::new(),
            refcount: 0,
        }
    }

    pub fn seeded_from(ordering: Ordering, mut rows: Vec<Row>) -> Self {
        let comparator = Comparator::new(ordering.clone());
        rows.sort_by(|a, b| comparator.compare(a, b));
        Index {
            ordering,
            comparator,
            rows,
            refcount: 0,
        }
    }

    pub fn ordering(&self) -> &Ordering {
        &self.ordering
    }

    pub fn comparator(&self) -> &Comparator {
        &self.comparator
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn incref(&mut self) {
        self.refcount += 1;
    }

    pub fn decref(&mut self) -> usize {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount
    }

    pub fn refcount(&self) -> usize {
        self.refcount
    }

    /// The position at which `row` would be inserted to keep `rows`
    /// sorted, without regard to primary key — used for both insertion
    /// and as a starting point when searching for an exact row to remove.
    fn sorted_position(&self, row: &Row) -> usize {
        self.rows
            .partition_point(|r| self.comparator.compare(r, row) == std::cmp::Ordering::Less)
    }

    /// Locates the exact row matching `primary_key`'s values on `row`
    /// among rows that sort equal to `row` under this index's ordering
    /// (ties on the sort columns are broken by a linear scan of the tied
    /// range, since ties don't imply row identity).
    fn find_exact(&self, row: &Row, primary_key: &PrimaryKey) -> Option<usize> {
        let start = self.sorted_position(row);
        let key = row.key_values(primary_key);
        for (offset, candidate) in self.rows[start..].iter().enumerate() {
            if self.comparator.compare(candidate, row) != std::cmp::Ordering::Equal {
                break;
            }
            if candidate.key_values(primary_key) == key {
                return Some(start + offset);
            }
        }
        None
    }

    pub fn insert(&mut self, row: Row) {
        let pos = self.sorted_position(&row);
        self.rows.insert(pos, row);
    }

    /// Removes the row matching `row`'s primary key, returning whether a
    /// matching row was found.
    pub fn remove(&mut self, row: &Row, primary_key: &PrimaryKey) -> bool {
        match self.find_exact(row, primary_key) {
            Some(pos) => {
                self.rows.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, row: &Row, primary_key: &PrimaryKey) -> bool {
        self.find_exact(row, primary_key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_data::{Direction, Value};
    use std::sync::Arc;

    fn pk() -> PrimaryKey {
        Arc::from(vec![Box::from("a")])
    }

    fn row(a: i64) -> Row {
        Row::from_pairs([("a", Value::from(a))])
    }

    #[test]
    fn insert_keeps_rows_sorted() {
        let ordering = Ordering::new(vec![("a".into(), Direction::Asc)], &pk()).unwrap();
        let mut idx = Index::new(ordering);
        idx.insert(row(3));
        idx.insert(row(1));
        idx.insert(row(2));
        let values: Vec<i64> = idx
            .rows()
            .iter()
            .map(|r| match r.get("a") {
                Some(Value::Integer(i)) => i.try_into().unwrap(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn remove_locates_by_primary_key_not_just_sort_position() {
        let ordering = Ordering::new(vec![("a".into(), Direction::Asc)], &pk()).unwrap();
        let mut idx = Index::new(ordering);
        idx.insert(row(1));
        idx.insert(row(2));
        assert!(idx.remove(&row(1), &pk()));
        assert_eq!(idx.rows().len(), 1);
        assert!(!idx.remove(&row(1), &pk()));
    }

    #[test]
    fn refcount_tracks_connections() {
        let ordering = Ordering::new(vec![("a".into(), Direction::Asc)], &pk()).unwrap();
        let mut idx = Index::new(ordering);
        idx.incref();
        idx.incref();
        assert_eq!(idx.decref(), 1);
        assert_eq!(idx.decref(), 0);
    }
}
