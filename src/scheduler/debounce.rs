use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default quiet period before a viewport update goes on the wire.
pub const DEFAULT_VIEWPORT_DEBOUNCE: Duration = Duration::from_millis(150);

/// A debounce timer fired for `key`.
///
/// Only act on it if [`Debouncer::fired`] accepts it; a firing can race
/// with a reschedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<K> {
    pub key: K,
    seq: u64,
}

/// Per-key trailing-edge debounce.
///
/// Each [`schedule`](Self::schedule) cancels the pending timer for the key
/// and starts a new one. When a timer runs out, its key is delivered on the
/// receiver returned by [`new`](Self::new).
pub struct Debouncer<K> {
    delay: Duration,
    pending: HashMap<K, (u64, JoinHandle<()>)>,
    next_seq: u64,
    tx: mpsc::UnboundedSender<Fired<K>>,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> (Self, mpsc::UnboundedReceiver<Fired<K>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let debouncer = Self {
            delay,
            pending: HashMap::new(),
            next_seq: 0,
            tx,
        };
        (debouncer, rx)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// (Re)start the timer for `key`.
    pub fn schedule(&mut self, key: K) {
        self.next_seq += 1;
        let seq = self.next_seq;
        let tx = self.tx.clone();
        let delay = self.delay;
        let fired = Fired {
            key: key.clone(),
            seq,
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(fired);
        });

        if let Some((_, previous)) = self.pending.insert(key, (seq, handle)) {
            previous.abort();
        }
    }

    /// Accept a firing. Returns `false` for a superseded or cancelled timer.
    pub fn fired(&mut self, fired: &Fired<K>) -> bool {
        match self.pending.get(&fired.key) {
            Some((seq, _)) if *seq == fired.seq => {
                self.pending.remove(&fired.key);
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self, key: &K) {
        if let Some((_, handle)) = self.pending.remove(key) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.pending.drain() {
            handle.abort();
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        for (_, handle) in self.pending.values() {
            handle.abort();
        }
    }
}
