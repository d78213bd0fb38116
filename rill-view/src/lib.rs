//! [`ArrayView`]: the hierarchical materialization of an operator graph's
//! root output (spec.md §4.3) -- an immutable, reference-counted tree of
//! [`Entry`] mirroring the root's current rows, kept up to date by
//! applying [`Change`](rill_data::Change)s pushed from upstream.

pub mod entry;
pub mod view;

pub use entry::{derive_id, Entry, Format, Relationship};
pub use view::ArrayView;
