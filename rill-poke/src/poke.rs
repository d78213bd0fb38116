//! Wire types for the poke payload (spec.md §6, "Poke payload (server→client,
//! client-side view)") and the pure eligibility/merge logic the playback
//! loop drives. Kept free of any locking or timing so the scenarios in
//! spec.md §8 can be checked directly against fixed clock values.

use std::collections::VecDeque;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// How far a client's acknowledged mutations have advanced, per the
/// `lastMutationIDChanges` map in a poke.
pub type MutationId = i64;

/// One server-sent change batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poke {
    /// Server-side send time, in epoch milliseconds. Absent for pokes with
    /// no playback-timing requirement (e.g. a connection's initial sync).
    pub timestamp: Option<i64>,
    /// The cookie the server expected the client to be at before this
    /// poke, or `None` if this is the first poke of a connection.
    pub base_cookie: Option<String>,
    /// The cookie the client will be at after applying this poke.
    pub cookie: String,
    /// Per-client mutation-id advancement this poke represents.
    pub last_mutation_id_changes: IndexMap<Box<str>, MutationId>,
    /// Opaque patch operations applied to the local store, in order.
    pub patch: Vec<Json>,
}

impl Poke {
    /// A poke is purely this client's own mutation echoed back when every
    /// entry in `lastMutationIDChanges` names `client_id` -- per spec.md
    /// §4.5 such a poke "is always eligible" regardless of timing, since
    /// the client already has the mutation applied optimistically.
    pub fn is_self_mutation_only(&self, client_id: &str) -> bool {
        !self.last_mutation_id_changes.is_empty()
            && self.last_mutation_id_changes.keys().all(|c| c.as_ref() == client_id)
    }
}

/// A batch of pokes delivered together, tagged with the request that
/// produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PokeBody {
    pub request_id: Box<str>,
    pub pokes: Vec<Poke>,
}

/// Several eligible pokes merged into one application, per spec.md §4.5's
/// "union of patches and cookie advancement": the earliest `base_cookie`,
/// the latest `cookie`, mutation ids overwritten in arrival order, patches
/// concatenated in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedPoke {
    pub base_cookie: Option<String>,
    pub cookie: String,
    pub last_mutation_id_changes: IndexMap<Box<str>, MutationId>,
    pub patch: Vec<Json>,
}

/// How many milliseconds early/late a poke's `timestamp + playbackOffset`
/// estimate is allowed to drift before `playbackOffset` is recomputed
/// rather than kept (spec.md §4.5).
pub const OFFSET_RESET_THRESHOLD_MS: i64 = 1000;

/// The playback loop's tick period. A poke that becomes eligible more than
/// one frame ago by the time it's actually drained counts as a miss.
pub const FRAME_MS: i64 = 16;

/// Recomputes `playback_offset` given a freshly received poke's timestamp
/// and the local time it arrived, per spec.md §4.5: "Recompute
/// `playbackOffset` when unset or whenever a poke's timestamp diverges
/// from the current offset by more than a reset threshold."
///
/// Returns the offset to use going forward (unchanged if within the
/// threshold).
pub fn recompute_offset(current_offset: i64, poke_timestamp: i64, now_ms: i64) -> i64 {
    let candidate = now_ms - poke_timestamp;
    if current_offset < 0 || (candidate - current_offset).abs() > OFFSET_RESET_THRESHOLD_MS {
        candidate
    } else {
        current_offset
    }
}

/// The local time at or after which `poke` may be drained, given the
/// current `playback_offset` and `buffer_ms` (the caller's configured
/// `PLAYBACK_BUFFER_MS`). `None` for timestamp-less pokes, which are
/// eligible as soon as they're at the head of the buffer.
fn eligible_at(poke: &Poke, playback_offset: i64, buffer_ms: i64) -> Option<i64> {
    poke.timestamp.map(|ts| ts + playback_offset + buffer_ms)
}

/// Whether `poke`, currently at the head of the buffer, may be drained at
/// `now_ms`.
pub fn is_eligible(poke: &Poke, playback_offset: i64, buffer_ms: i64, now_ms: i64, client_id: &str) -> bool {
    match eligible_at(poke, playback_offset, buffer_ms) {
        None => true,
        Some(t) => now_ms >= t || poke.is_self_mutation_only(client_id),
    }
}

/// Drains the eligible prefix of `buffer` at `now_ms`, stopping at the
/// first ineligible poke (pokes are only ever drained in FIFO order: a
/// later poke cannot jump an earlier, still-ineligible one). Returns the
/// drained pokes and whether any of them was drained more than one frame
/// after it first became eligible (a playback miss, spec.md §4.5).
pub fn drain_eligible(
    buffer: &mut VecDeque<Poke>,
    playback_offset: i64,
    buffer_ms: i64,
    now_ms: i64,
    client_id: &str,
) -> (Vec<Poke>, bool) {
    let mut drained = Vec::new();
    let mut missed = false;
    while let Some(front) = buffer.front() {
        if !is_eligible(front, playback_offset, buffer_ms, now_ms, client_id) {
            break;
        }
        if let Some(t) = eligible_at(front, playback_offset, buffer_ms) {
            if now_ms - t > FRAME_MS {
                missed = true;
            }
        }
        drained.push(buffer.pop_front().expect("front() just returned Some"));
    }
    (drained, missed)
}

/// Merges a run of eligible pokes into one [`CombinedPoke`] to apply as a
/// single batch, per spec.md §4.5. `None` if `pokes` is empty.
pub fn merge_pokes(pokes: Vec<Poke>) -> Option<CombinedPoke> {
    let mut iter = pokes.into_iter();
    let first = iter.next()?;
    let mut combined = CombinedPoke {
        base_cookie: first.base_cookie,
        cookie: first.cookie,
        last_mutation_id_changes: first.last_mutation_id_changes,
        patch: first.patch,
    };
    for poke in iter {
        combined.cookie = poke.cookie;
        for (client, mutation_id) in poke.last_mutation_id_changes {
            combined.last_mutation_id_changes.insert(client, mutation_id);
        }
        combined.patch.extend(poke.patch);
    }
    Some(combined)
}
