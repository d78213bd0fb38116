//! The operator graph: a cooperative, single-threaded dataflow runtime
//! over [`rill_data`]'s row and change vocabulary.
//!
//! Every node implements [`Input`]; pushes flow through plain method calls
//! on the concrete operator types rather than through a second trait,
//! since the shape of a `push` method (what extra context it needs, e.g.
//! `Take`'s partition constraint) differs per operator the same way
//! ReadySet's `dataflow::ops` nodes each have their own `on_input`.

pub mod framework;
pub mod ops;
pub mod source;

pub use framework::{node_stream, FetchRequest, Input, Output, StartBasis, StartCursor, Storage};
pub use source::{Source, SourceHandle};
