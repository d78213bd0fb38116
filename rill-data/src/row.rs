//! [`Row`]: an immutable mapping from column name to [`Value`].

use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::value::Value;

/// An immutable row. Cloning a `Row` only bumps a reference count; any
/// "edit" of a row's contents must go through [`Row::with`], which
/// allocates a new underlying map rather than mutating in place.
#[derive(Debug, Clone)]
pub struct Row(Arc<IndexMap<Box<str>, Value>>);

impl Row {
    pub fn new(columns: IndexMap<Box<str>, Value>) -> Self {
        Row(Arc::new(columns))
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<Box<str>>,
    {
        Row(Arc::new(
            pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_ref(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Produce a new `Row` identical to this one except for the given
    /// column overrides. Used by operators that synthesize an edited row
    /// (e.g. a `set` upsert converted to an `edit`).
    pub fn with(&self, overrides: impl IntoIterator<Item = (Box<str>, Value)>) -> Row {
        let mut map = (*self.0).clone();
        for (k, v) in overrides {
            map.insert(k, v);
        }
        Row(Arc::new(map))
    }

    /// The values of `columns`, in the order given, for use as a lookup or
    /// grouping key. Panics if a named column is absent — callers are
    /// expected to validate column names against the schema up front.
    pub fn key_values(&self, columns: &[Box<str>]) -> SmallVec<[Value; 4]> {
        columns
            .iter()
            .map(|c| {
                self.get(c)
                    .cloned()
                    .unwrap_or_else(|| panic!("row is missing key column {c:?}"))
            })
            .collect()
    }

    /// Whether any of `columns` holds `Value::Null` on this row. Used by
    /// the Join operator: a parent whose join key contains a null never
    /// matches any child (nulls do not join).
    pub fn any_null(&self, columns: &[Box<str>]) -> bool {
        columns.iter().any(|c| matches!(self.get(c), None | Some(Value::Null)))
    }

    /// Whether `self` and `other` agree on every column in `columns`. Used
    /// to validate that an edit did not touch any enclosing join's parent-
    /// or child-key columns (spec.md §3, `Change::Edit`'s invariant).
    pub fn agrees_on(&self, other: &Row, columns: &[Box<str>]) -> bool {
        columns.iter().all(|c| self.get(c) == other.get(c))
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}
impl Eq for Row {}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(a: i64, b: &str) -> Row {
        Row::from_pairs([("a", Value::from(a)), ("b", Value::from(b))])
    }

    #[test]
    fn with_overrides_preserves_other_columns() {
        let r = row(1, "foo");
        let r2 = r.with([("b".into(), Value::from("bar"))]);
        assert_eq!(r2.get("a"), Some(&Value::from(1_i64)));
        assert_eq!(r2.get("b"), Some(&Value::from("bar")));
        // original untouched
        assert_eq!(r.get("b"), Some(&Value::from("foo")));
    }

    #[test]
    fn any_null_detects_missing_or_null_key_columns() {
        let r = Row::from_pairs([("a", Value::Null), ("b", Value::from(1_i64))]);
        let cols: Vec<Box<str>> = vec!["a".into()];
        assert!(r.any_null(&cols));
        let cols: Vec<Box<str>> = vec!["b".into()];
        assert!(!r.any_null(&cols));
    }

    #[test]
    fn agrees_on_compares_named_columns_only() {
        let r1 = row(1, "foo");
        let r2 = row(1, "bar");
        let cols: Vec<Box<str>> = vec!["a".into()];
        assert!(r1.agrees_on(&r2, &cols));
        let cols: Vec<Box<str>> = vec!["b".into()];
        assert!(!r1.agrees_on(&r2, &cols));
    }
}
