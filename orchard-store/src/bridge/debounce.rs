//! Keyed debounce primitive.
//!
//! [`Debouncer::trigger`] (re)starts a timer for a key. When `window`
//! elapses without another trigger for that key, the key is emitted once on
//! the output channel. Bursts of triggers therefore collapse into a single
//! emission per key.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Coalesces repeated triggers per key.
///
/// Must be used from within a tokio runtime.
pub struct Debouncer<K> {
    window: Duration,
    timers: Arc<Mutex<Timers<K>>>,
    generation: AtomicU64,
    output: mpsc::UnboundedSender<K>,
}

/// Pending timers keyed by debounce key. The generation lets a timer that
/// already woke up tell whether it was superseded.
type Timers<K> = HashMap<K, (u64, JoinHandle<()>)>;

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Create a debouncer and the receiver its settled keys arrive on.
    pub fn new(window: Duration) -> (Self, mpsc::UnboundedReceiver<K>) {
        let (output, rx) = mpsc::unbounded_channel();
        let debouncer = Self {
            window,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            output,
        };
        (debouncer, rx)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Start or restart the timer for `key`.
    ///
    /// Returns true if a pending timer was reset.
    pub fn trigger(&self, key: K) -> bool {
        let window = self.window;
        let output = self.output.clone();
        let timers = Arc::clone(&self.timers);
        let settled = key.clone();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let mut pending = lock(&self.timers);
        let reset = match pending.remove(&key) {
            Some((_, previous)) => {
                previous.abort();
                true
            }
            None => false,
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            {
                let mut timers = lock(&timers);
                match timers.get(&settled) {
                    Some((current, _)) if *current == generation => {
                        timers.remove(&settled);
                    }
                    _ => return,
                }
            }
            let _ = output.send(settled);
        });
        pending.insert(key, (generation, handle));
        reset
    }

    /// Number of keys waiting for their window to elapse.
    pub fn pending(&self) -> usize {
        lock(&self.timers).len()
    }

    /// Drop every pending timer without emitting.
    pub fn cancel_all(&self) {
        for (_, (_, handle)) in lock(&self.timers).drain() {
            handle.abort();
        }
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, (_, handle)) in timers.drain() {
            handle.abort();
        }
    }
}

fn lock<K>(timers: &Mutex<Timers<K>>) -> MutexGuard<'_, Timers<K>> {
    timers.lock().unwrap_or_else(PoisonError::into_inner)
}
