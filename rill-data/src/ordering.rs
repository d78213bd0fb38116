//! [`Ordering`] and [`Comparator`]: the total order a [`Source`] connection
//! requests rows in.
//!
//! [`Source`]: https://docs.rs/rill-dataflow (the crate this type feeds)

use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;

use crate::row::Row;

/// An ordered sequence of column names uniquely identifying a row within a
/// table. Order matters for index construction (it becomes the prefix of
/// any index built from an [`Ordering`] that starts with the primary key)
/// but not for equality checks.
pub type PrimaryKey = Arc<[Box<str>]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn apply(self, ord: CmpOrdering) -> CmpOrdering {
        match self {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        }
    }
}

/// A sequence of `(column, direction)` pairs. Must include every primary
/// key column (at any position, in any direction) to guarantee a total
/// order over rows — two rows that agree on every sorted column but differ
/// on an excluded PK column would otherwise be ordering-equivalent but
/// distinct, which breaks every index built from the ordering.
#[derive(Debug, Clone)]
pub struct Ordering {
    columns: Arc<[(Box<str>, Direction)]>,
}

impl Ordering {
    /// Validates that `columns` covers every column in `primary_key` before
    /// constructing the ordering, per the invariant above.
    pub fn new(
        columns: Vec<(Box<str>, Direction)>,
        primary_key: &PrimaryKey,
    ) -> Result<Self, rill_errors::RillError> {
        for pk_col in primary_key.iter() {
            if !columns.iter().any(|(c, _)| c == pk_col) {
                return Err(rill_errors::RillError::invariant(
                    "Ordering::new",
                    format!("ordering is missing primary key column {pk_col:?}"),
                ));
            }
        }
        Ok(Ordering {
            columns: columns.into(),
        })
    }

    /// An ordering consisting of exactly the primary key, ascending. Used
    /// to seed a `Source`'s primary-key index.
    pub fn primary_key(primary_key: &PrimaryKey) -> Self {
        Ordering {
            columns: primary_key
                .iter()
                .map(|c| (c.clone(), Direction::Asc))
                .collect(),
        }
    }

    pub fn columns(&self) -> &[(Box<str>, Direction)] {
        &self.columns
    }

    /// A new ordering with `prefix` columns prepended (ascending), used by
    /// `Source::fetch` when choosing or building an index for a
    /// constrained fetch: the constraint's columns become an ascending
    /// prefix ahead of the connection's requested sort.
    pub fn with_prefix(&self, prefix: &[Box<str>]) -> Ordering {
        let mut columns: Vec<(Box<str>, Direction)> = prefix
            .iter()
            .map(|c| (c.clone(), Direction::Asc))
            .collect();
        for (c, d) in self.columns.iter() {
            if !prefix.contains(c) {
                columns.push((c.clone(), *d));
            }
        }
        Ordering {
            columns: columns.into(),
        }
    }
}

impl PartialEq for Ordering {
    fn eq(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| a == b)
    }
}
impl Eq for Ordering {}

impl std::hash::Hash for Ordering {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.columns.len().hash(state);
        for (c, d) in self.columns.iter() {
            c.hash(state);
            d.hash(state);
        }
    }
}

/// A total order over [`Row`]s derived from an [`Ordering`]. Cheap to
/// clone (an `Arc` of the underlying column list).
#[derive(Debug, Clone)]
pub struct Comparator {
    ordering: Ordering,
}

impl Comparator {
    pub fn new(ordering: Ordering) -> Self {
        Comparator { ordering }
    }

    pub fn ordering(&self) -> &Ordering {
        &self.ordering
    }

    pub fn compare(&self, a: &Row, b: &Row) -> CmpOrdering {
        for (column, direction) in self.ordering.columns() {
            let (va, vb) = (a.get(column), b.get(column));
            let ord = va.cmp(&vb);
            let ord = direction.apply(ord);
            if ord != CmpOrdering::Equal {
                return ord;
            }
        }
        CmpOrdering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn pk() -> PrimaryKey {
        Arc::from(vec![Box::from("a")])
    }

    #[test]
    fn ordering_requires_primary_key_columns() {
        let err = Ordering::new(vec![("b".into(), Direction::Asc)], &pk());
        assert!(err.is_err());
    }

    #[test]
    fn ordering_accepts_pk_anywhere() {
        let ord = Ordering::new(
            vec![("b".into(), Direction::Asc), ("a".into(), Direction::Desc)],
            &pk(),
        );
        assert!(ord.is_ok());
    }

    #[test]
    fn comparator_orders_by_columns_in_sequence() {
        let ord = Ordering::new(vec![("a".into(), Direction::Asc)], &pk()).unwrap();
        let cmp = Comparator::new(ord);
        let r1 = Row::from_pairs([("a", Value::from(1_i64))]);
        let r2 = Row::from_pairs([("a", Value::from(2_i64))]);
        assert_eq!(cmp.compare(&r1, &r2), CmpOrdering::Less);
        assert_eq!(cmp.compare(&r2, &r1), CmpOrdering::Greater);
    }

    #[test]
    fn comparator_honors_descending_direction() {
        let ord = Ordering::new(vec![("a".into(), Direction::Desc)], &pk()).unwrap();
        let cmp = Comparator::new(ord);
        let r1 = Row::from_pairs([("a", Value::from(1_i64))]);
        let r2 = Row::from_pairs([("a", Value::from(2_i64))]);
        assert_eq!(cmp.compare(&r1, &r2), CmpOrdering::Greater);
    }

    #[test]
    fn with_prefix_hoists_constraint_columns_first() {
        let ord = Ordering::new(vec![("b".into(), Direction::Asc), ("a".into(), Direction::Asc)], &pk()).unwrap();
        let prefixed = ord.with_prefix(&[Box::from("c")]);
        let cols: Vec<&str> = prefixed.columns().iter().map(|(c, _)| c.as_ref()).collect();
        assert_eq!(cols, vec!["c", "b", "a"]);
    }
}
