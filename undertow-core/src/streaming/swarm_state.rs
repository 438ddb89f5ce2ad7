//! Single-slot register of the torrent's lifecycle state.

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::engine::TorrentState;

/// Snapshot of what the engine last reported about the torrent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwarmState {
    /// `None` until the first state change alert
    pub torrent_state: Option<TorrentState>,
    /// Terminal flag set when the access stops
    pub stopped: bool,
    /// Most recent torrent-level engine error
    pub last_error: Option<String>,
}

impl SwarmState {
    pub fn has_metadata(&self) -> bool {
        self.torrent_state.is_some_and(TorrentState::has_metadata)
    }
}

/// Swarm state guarded by its own mutex and condition variable.
///
/// Only the event dispatcher advances the state. Every update notifies all
/// waiters so each re-checks its predicate against the new value.
#[derive(Default)]
pub struct SwarmStateTracker {
    state: Mutex<SwarmState>,
    changed: Condvar,
}

impl SwarmStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking snapshot.
    pub fn observe_state(&self) -> SwarmState {
        self.state.lock().clone()
    }

    /// Blocks until `predicate` holds for the current state or `deadline`
    /// passes. Returns whether the predicate held.
    pub fn wait_until<F>(&self, predicate: F, deadline: Instant) -> bool
    where
        F: Fn(&SwarmState) -> bool,
    {
        let mut state = self.state.lock();
        loop {
            if predicate(&state) {
                return true;
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return predicate(&state);
            }
        }
    }

    /// Records a new torrent state and wakes every waiter.
    pub fn advance(&self, new_state: TorrentState) {
        let mut state = self.state.lock();
        let previous = state.torrent_state.replace(new_state);
        if previous != Some(new_state) {
            tracing::info!("Torrent state: {}", new_state.label());
        }
        self.changed.notify_all();
    }

    /// Stores the engine's latest error and wakes every waiter.
    pub fn record_error(&self, message: String) {
        tracing::warn!("Torrent error: {message}");
        self.state.lock().last_error = Some(message);
        self.changed.notify_all();
    }

    /// Sets the terminal stopped flag and wakes every waiter.
    pub fn mark_stopped(&self) {
        self.state.lock().stopped = true;
        self.changed.notify_all();
    }
}
