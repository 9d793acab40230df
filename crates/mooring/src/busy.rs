use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;

/// Anything that can display a busy/idle flag, e.g. a spinner widget.
/// Registered weakly: the broadcaster never keeps an indicator alive.
///
/// `set_busy` runs while the broadcaster serializes its fan-out, so
/// implementations must not call back into the tracker.
pub trait BusyIndicator: Send + Sync {
    fn set_busy(&self, busy: bool);
}

/// Tracks the process-wide busy flag and fans out transitions.
///
/// The hosting scheduler holds a [`BusyScope`] around each unit of
/// application work; scopes nest, and the flag is "busy" while any scope
/// is open. Notification policy: observers are told only on actual
/// false/true transitions (a nested scope opening while already busy
/// notifies nobody), in registration order; indicators whose backing
/// object is gone are skipped and dropped.
///
/// The flag flips under the same lock that detects the depth edge, so
/// watch subscribers see edges in the order they happened; the indicator
/// list lock is taken before that lock drops, which serializes fan-out
/// in the same order.
pub struct BusyTracker {
    depth: Mutex<usize>,
    indicators: Mutex<Vec<Weak<dyn BusyIndicator>>>,
    flag: watch::Sender<bool>,
}

impl BusyTracker {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            depth: Mutex::new(0),
            indicators: Mutex::new(Vec::new()),
            flag,
        }
    }

    /// Current value of the flag. Read-only for external callers; only
    /// scopes mutate it.
    pub fn busy(&self) -> bool {
        *self.flag.borrow()
    }

    /// Watch-channel view of the flag for async observers.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.flag.subscribe()
    }

    /// Registers an indicator weakly. It will see the next transition;
    /// the current value is not pushed at registration time.
    pub fn sync(&self, indicator: Arc<dyn BusyIndicator>) {
        self.indicators.lock().push(Arc::downgrade(&indicator));
    }

    /// Marks a unit of work; the flag stays busy until the scope drops.
    pub fn scope(&self) -> BusyScope<'_> {
        let mut depth = self.depth.lock();
        *depth += 1;
        if *depth == 1 {
            self.transition(depth, true);
        }
        BusyScope { tracker: self }
    }

    fn release(&self) {
        let mut depth = self.depth.lock();
        *depth -= 1;
        if *depth == 0 {
            self.transition(depth, false);
        }
    }

    // Publishes one edge. The watch update happens while the depth lock
    // is still held, so edges cannot be observed out of order; the
    // indicators lock is acquired before the depth lock drops, so
    // fan-outs for successive edges cannot overlap or invert either.
    // Lock order is always depth, then indicators.
    fn transition(&self, depth: MutexGuard<'_, usize>, value: bool) {
        self.flag.send_replace(value);
        let mut indicators = self.indicators.lock();
        drop(depth);
        let mut live = Vec::with_capacity(indicators.len());
        indicators.retain(|weak| match weak.upgrade() {
            Some(indicator) => {
                live.push(indicator);
                true
            }
            None => false,
        });
        for indicator in live {
            indicator.set_busy(value);
        }
    }
}

impl Default for BusyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII marker for one busy unit of work.
pub struct BusyScope<'a> {
    tracker: &'a BusyTracker,
}

impl Drop for BusyScope<'_> {
    fn drop(&mut self) {
        self.tracker.release();
    }
}
