//! [`Value`]: the JSON-compatible scalar type rows are built from.
//!
//! Modeled after `readyset-data::DfValue`: a single enum that every row
//! column and every comparison in the engine is expressed in terms of.

use std::cmp::Ordering as CmpOrdering;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// A JSON-compatible scalar value.
///
/// `undefined` (as might arrive from a JS-ish upstream wire format) has no
/// variant here: callers normalize it to `Value::Null` before it reaches
/// this type, per the data model's note that `undefined` is normalized to
/// `null` for comparison purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    /// An IEEE-754 double. Distinct from `Integer` so that callers that
    /// genuinely have a JSON number can round-trip it without forcing a
    /// bignum allocation.
    Number(f64),
    /// An arbitrary-precision integer, for columns that would overflow an
    /// `f64`'s 53 bits of exact integer precision (e.g. 64-bit primary
    /// keys).
    Integer(BigInt),
    String(String),
    Bytes(Vec<u8>),
}

/// Fixed rank assigned to each variant for the purposes of the engine's
/// total order across distinct types. `Null` ranks lowest, matching the
/// data model's requirement that `null` sorts below any non-null value.
///
/// The relative order of the non-null ranks is otherwise arbitrary (the
/// engine does not promise compatibility with any particular upstream
/// database's cross-type comparison rules) but fixed for the lifetime of
/// the engine, per spec.md §3.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Boolean(_) => 1,
        Value::Number(_) => 2,
        Value::Integer(_) => 3,
        Value::String(_) => 4,
        Value::Bytes(_) => 5,
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// A rough, non-exact size estimate in bytes, for callers doing memory
    /// accounting (ambient bookkeeping; the engine itself does not use
    /// this for any eviction policy — see SPEC_FULL.md §3).
    pub fn estimated_size(&self) -> usize {
        match self {
            Value::Null | Value::Boolean(_) | Value::Number(_) => std::mem::size_of::<Value>(),
            Value::Integer(i) => std::mem::size_of::<Value>() + i.bits() as usize / 8,
            Value::String(s) => std::mem::size_of::<Value>() + s.len(),
            Value::Bytes(b) => std::mem::size_of::<Value>() + b.len(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}
impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        let (ra, rb) = (type_rank(self), type_rank(other));
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Value::Null, Value::Null) => CmpOrdering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => {
                a.partial_cmp(b).unwrap_or(CmpOrdering::Equal)
            }
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            _ => unreachable!("type_rank partitions variants"),
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        type_rank(self).hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Number(n) => n.to_bits().hash(state),
            Value::Integer(i) => i.hash(state),
            Value::String(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(BigInt::from(i))
    }
}
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// A [`Value`] extended with sentinels that sort below/above every real
/// value, used solely to compute scan-start bounds for an index scan (see
/// `Source::fetch`'s bound computation in spec.md §4.1). `null` is *not*
/// represented here — it remains an ordinary (lowest-ranked) `Value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanBound {
    MinValue,
    Value(Value),
    MaxValue,
}

impl PartialOrd for ScanBound {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScanBound {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        match (self, other) {
            (ScanBound::MinValue, ScanBound::MinValue) => CmpOrdering::Equal,
            (ScanBound::MinValue, _) => CmpOrdering::Less,
            (_, ScanBound::MinValue) => CmpOrdering::Greater,
            (ScanBound::MaxValue, ScanBound::MaxValue) => CmpOrdering::Equal,
            (ScanBound::MaxValue, _) => CmpOrdering::Greater,
            (_, ScanBound::MaxValue) => CmpOrdering::Less,
            (ScanBound::Value(a), ScanBound::Value(b)) => a.cmp(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sorts_below_non_null_of_any_type() {
        assert!(Value::Null < Value::Boolean(false));
        assert!(Value::Null < Value::Integer(BigInt::from(-1_000_000)));
        assert!(Value::Null < Value::String(String::new()));
    }

    #[test]
    fn cross_type_order_is_fixed() {
        let mut values = vec![
            Value::from("z"),
            Value::Integer(BigInt::from(5)),
            Value::Null,
            Value::Boolean(true),
            Value::Number(1.5),
            Value::Bytes(vec![1]),
        ];
        values.sort();
        let ranks: Vec<u8> = values.iter().map(type_rank).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn scan_bound_sentinels_dominate_every_value() {
        let v = ScanBound::Value(Value::from(42_i64));
        assert!(ScanBound::MinValue < v);
        assert!(v < ScanBound::MaxValue);
    }
}
