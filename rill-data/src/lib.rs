//! Row, schema, and change types shared by every crate in the rill
//! synchronizing query engine.
//!
//! This crate has no behavior of its own beyond small derived helpers
//! (comparators, key extraction) — it exists purely so `rill-dataflow`,
//! `rill-view`, and `rill-changelog` agree on one vocabulary for rows and
//! deltas, the way `readyset-data` anchors the rest of the ReadySet
//! dataflow stack.

pub mod change;
pub mod node;
pub mod ordering;
pub mod row;
pub mod schema;
pub mod value;

pub use change::{Change, SourceChange};
pub use node::{ChildRelationship, Node, NodeStream, StreamItem};
pub use ordering::{Comparator, Direction, Ordering, PrimaryKey};
pub use row::Row;
pub use schema::{ColumnType, SourceSchema};
pub use value::{ScanBound, Value};
