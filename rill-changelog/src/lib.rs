//! The replica-side change log and column metadata store (spec.md §4.4,
//! §6): a version-ordered record of which rows in which tables were
//! set/deleted, or which tables were truncated/reset, so downstream
//! subscribers can compute a diff between two versions.
//!
//! This crate has no notion of *how* changes arrive (that's the
//! replicator's job, referenced only via the typed tags in [`wire`]); it
//! only maintains the log itself and the column-metadata side table.

pub mod column_metadata;
pub mod entry;
pub mod log;
pub mod version;
pub mod wire;

pub use column_metadata::{ColumnMetadata, ColumnMetadataStore};
pub use entry::{ChangeLogEntry, Op};
pub use log::{ChangeLog, RowKeyColumns};
pub use version::StateVersion;
