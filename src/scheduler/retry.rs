use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use crate::tile::TileKey;

/// Wait before the first explicit re-request of a missing tile.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Re-requests per tile before giving up on it.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy)]
struct RetryEntry {
    attempts: u32,
    next_due: Instant,
}

/// Decides when a visible tile that never arrived is asked for again.
///
/// The server pushes tiles on its own after a viewport update; this is the
/// safety net for the ones it dropped. Delays double per attempt. A tile
/// that failed to decode is never re-requested.
#[derive(Debug)]
pub struct TileRetryTracker {
    entries: HashMap<TileKey, RetryEntry>,
    order: Vec<TileKey>,
    abandoned: HashSet<TileKey>,
    initial_delay: Duration,
    max_attempts: u32,
}

impl TileRetryTracker {
    pub fn new(initial_delay: Duration, max_attempts: u32) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            abandoned: HashSet::new(),
            initial_delay,
            max_attempts,
        }
    }

    /// Replace the set of wanted tiles.
    ///
    /// New keys start their first delay at `now`; keys no longer wanted are
    /// forgotten. `missing` should be in request priority order.
    pub fn track(&mut self, missing: impl IntoIterator<Item = TileKey>, now: Instant) {
        let wanted: Vec<TileKey> = missing
            .into_iter()
            .filter(|key| !self.abandoned.contains(key))
            .collect();

        let keep: HashSet<TileKey> = wanted.iter().copied().collect();
        self.entries.retain(|key, _| keep.contains(key));

        for key in &wanted {
            self.entries.entry(*key).or_insert(RetryEntry {
                attempts: 0,
                next_due: now + self.initial_delay,
            });
        }
        self.order = wanted;
    }

    /// Tiles to re-request now, in priority order. Each returned tile is
    /// rescheduled with a doubled delay.
    pub fn due(&mut self, now: Instant) -> Vec<TileKey> {
        let mut due = Vec::new();
        for key in &self.order {
            let Some(entry) = self.entries.get_mut(key) else {
                continue;
            };
            if entry.attempts >= self.max_attempts || entry.next_due > now {
                continue;
            }
            entry.attempts += 1;
            let backoff = self
                .initial_delay
                .saturating_mul(1u32 << entry.attempts.min(20));
            entry.next_due = now + backoff;
            due.push(*key);
        }
        due
    }

    /// The tile arrived.
    pub fn received(&mut self, key: &TileKey) {
        self.entries.remove(key);
        self.abandoned.remove(key);
    }

    /// The tile failed to decode; stop asking for it.
    pub fn abandon(&mut self, key: TileKey) {
        self.entries.remove(&key);
        self.order.retain(|k| *k != key);
        self.abandoned.insert(key);
    }

    pub fn is_abandoned(&self, key: &TileKey) -> bool {
        self.abandoned.contains(key)
    }

    /// Re-request attempts made so far for `key`.
    pub fn attempts(&self, key: &TileKey) -> Option<u32> {
        self.entries.get(key).map(|e| e.attempts)
    }

    /// Earliest time any tracked tile becomes due.
    pub fn next_due(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter(|e| e.attempts < self.max_attempts)
            .map(|e| e.next_due)
            .min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything, including abandoned tiles.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.abandoned.clear();
    }
}

impl Default for TileRetryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY, DEFAULT_MAX_RETRIES)
    }
}
