//! [`PokeHandler`]: owns the `pokeBuffer` FIFO, the `playbackOffset`
//! estimate, and the `pokeLock` serializing applications (spec.md §4.5).
//!
//! Receiving a poke body and draining the buffer both go through the same
//! `tokio::sync::Mutex`, which is what gives the handler its two safety
//! properties for free: the buffer is only ever mutated while that lock is
//! held, and at most one application to the local store is ever in flight.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rill_errors::RillError;
use tokio::sync::Mutex;

use crate::poke::{drain_eligible, merge_pokes, recompute_offset, CombinedPoke, MutationId, Poke, PokeBody, FRAME_MS};

/// A source of the current local time, in epoch milliseconds. Abstracted
/// so the eligibility scenarios in spec.md §8 can be driven by fixed
/// values rather than real wall-clock timing.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// [`Clock`] backed by the system clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is after the epoch")
            .as_millis() as i64
    }
}

/// The client-side local store a combined poke is applied to. Consulted
/// for its current cookie so the handler can detect an unexpected base
/// cookie before applying (spec.md §4.5, "On 'unexpected base cookie'
/// failure").
pub trait LocalStore: Send + Sync {
    fn current_cookie(&self) -> Option<String>;
    fn apply(&self, combined: &CombinedPoke);
}

struct PlaybackState {
    buffer: VecDeque<Poke>,
    /// `-1` means unknown, matching spec.md §4.5's initial value.
    playback_offset: i64,
    loop_running: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        PlaybackState {
            buffer: VecDeque::new(),
            playback_offset: -1,
            loop_running: false,
        }
    }
}

/// The client-side poke handler described in spec.md §4.5.
///
/// `PokeHandler` is meant to be held behind an `Arc` by its caller: the
/// playback loop it spawns on receiving a poke into an idle buffer holds
/// its own clone of that `Arc` and runs until the buffer drains dry.
pub struct PokeHandler<S: LocalStore, C: Clock> {
    client_id: Box<str>,
    /// The caller's configured `PLAYBACK_BUFFER_MS` (spec.md §8 scenario 4
    /// uses 250; there is no one correct default).
    buffer_ms: i64,
    state: Mutex<PlaybackState>,
    store: S,
    clock: C,
    misses: AtomicU64,
    on_out_of_order_poke: Box<dyn Fn(RillError) + Send + Sync>,
}

impl<S: LocalStore, C: Clock> PokeHandler<S, C> {
    pub fn new(
        client_id: impl Into<Box<str>>,
        buffer_ms: i64,
        store: S,
        clock: C,
        on_out_of_order_poke: impl Fn(RillError) + Send + Sync + 'static,
    ) -> Self {
        PokeHandler {
            client_id: client_id.into(),
            buffer_ms,
            state: Mutex::new(PlaybackState::default()),
            store,
            clock,
            misses: AtomicU64::new(0),
            on_out_of_order_poke: Box::new(on_out_of_order_poke),
        }
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }

    /// Handles a freshly received poke body: recomputes `playbackOffset`
    /// as needed, appends every poke to the buffer, and starts the
    /// playback loop if it was idle. Returns the last mutation id this
    /// body reports for `self.client_id`, for upstream acknowledgement.
    ///
    /// Starting the loop itself is left to the caller (via
    /// [`Self::run_playback_loop`], typically `tokio::spawn`ed) so this
    /// method stays usable from a plain `&self` without requiring an
    /// `Arc`; it only reports whether a loop needs starting.
    pub async fn receive_poke_body(&self, body: PokeBody, now_ms: i64) -> (Option<MutationId>, bool) {
        let mut state = self.state.lock().await;
        let mut last_mutation_id = None;
        for poke in body.pokes {
            if let Some(ts) = poke.timestamp {
                state.playback_offset = recompute_offset(state.playback_offset, ts, now_ms);
            }
            if let Some(mid) = poke.last_mutation_id_changes.get(self.client_id.as_ref()) {
                last_mutation_id = Some(*mid);
            }
            state.buffer.push_back(poke);
        }
        let needs_loop = !state.buffer.is_empty() && !state.loop_running;
        if needs_loop {
            state.loop_running = true;
        }
        (last_mutation_id, needs_loop)
    }

    /// Drains and applies whatever is eligible at `now_ms`, without
    /// blocking on a frame timer. Returns whether the buffer still has
    /// entries afterward (the caller's playback loop keeps ticking while
    /// true).
    pub async fn tick(&self, now_ms: i64) -> bool {
        let mut state = self.state.lock().await;
        let (drained, missed) =
            drain_eligible(&mut state.buffer, state.playback_offset, self.buffer_ms, now_ms, &self.client_id);
        if missed {
            self.misses.fetch_add(1, AtomicOrdering::Relaxed);
            tracing::warn!(misses = self.misses(), "poke_handler: playback loop missed a frame");
        }
        if let Some(combined) = merge_pokes(drained) {
            self.apply(&combined);
        }
        let still_has_work = !state.buffer.is_empty();
        state.loop_running = still_has_work;
        still_has_work
    }

    fn apply(&self, combined: &CombinedPoke) {
        let current = self.store.current_cookie();
        if combined.base_cookie != current {
            (self.on_out_of_order_poke)(RillError::OutOfOrderPoke {
                expected: combined.base_cookie.clone(),
                actual: current,
            });
            return;
        }
        self.store.apply(combined);
    }

    /// Drops the buffer and resets `playbackOffset` to unknown (spec.md
    /// §4.5, "On disconnect").
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        state.buffer.clear();
        state.playback_offset = -1;
        state.loop_running = false;
    }
}

impl<S: LocalStore + 'static, C: Clock + 'static> PokeHandler<S, C> {
    /// Ticks once per frame (~16ms, spec.md §4.5) until the buffer runs
    /// dry, then returns. Intended to be spawned as its own task each time
    /// [`Self::receive_poke_body`] reports the loop needs (re)starting.
    pub async fn run_playback_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_MS as u64));
        loop {
            ticker.tick().await;
            let now_ms = self.clock.now_ms();
            if !self.tick(now_ms).await {
                break;
            }
        }
    }
}
