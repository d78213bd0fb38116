//! The client-side poke handler (spec.md §4.5): serializes server-sent
//! change batches ("pokes") into the local store under playback timing, so
//! a burst of pokes arriving faster than the server produced them doesn't
//! make the UI jump, and a poke arriving late doesn't stall forever.
//!
//! [`handler::PokeHandler`] owns the `pokeBuffer` FIFO and the
//! `playbackOffset` estimate; [`poke`] holds the wire types and the pure
//! eligibility/merge logic the handler drives on each frame tick.

pub mod handler;
pub mod poke;

pub use handler::{Clock, LocalStore, PokeHandler, SystemClock};
pub use poke::{CombinedPoke, MutationId, Poke, PokeBody};

pub use rill_errors::RillError;
