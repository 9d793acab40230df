use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::context::{SessionContext, SessionId, WeakSessionContext};

/// Default table size above which a sweep for dead sessions runs.
pub const DEFAULT_PURGE_WATERMARK: usize = 64;

struct ScopedEntry<V> {
    context: WeakSessionContext,
    value: V,
}

struct ScopedMapInner<V> {
    entries: HashMap<SessionId, ScopedEntry<V>>,
    base_watermark: usize,
    watermark: usize,
}

impl<V> ScopedMapInner<V> {
    fn maybe_purge(&mut self) {
        if self.entries.len() > self.watermark {
            self.purge();
        }
    }

    fn purge(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.context.is_alive());
        let live = self.entries.len();
        self.watermark = self.base_watermark.max(live * 2);
        let purged = before - live;
        if purged > 0 {
            debug!(purged, live, "purged dead session entries");
        }
        purged
    }
}

/// Map keyed by session identity whose entries never keep the session
/// alive.
///
/// Each entry holds a weak reference to its session context. Once the
/// last external [`SessionContext`] clone is dropped the entry is dead
/// and gets reclaimed, either by the amortized sweep that runs when the
/// table outgrows its watermark, or eagerly via [`ScopedMap::discard`] /
/// [`ScopedMap::purge`]. No per-entry locking: one mutex guards the
/// whole table, matching the one-lock-per-table coordinator policy.
pub struct ScopedMap<V> {
    inner: Mutex<ScopedMapInner<V>>,
}

impl<V> ScopedMap<V> {
    pub fn new(base_watermark: usize) -> Self {
        Self {
            inner: Mutex::new(ScopedMapInner {
                entries: HashMap::new(),
                base_watermark,
                watermark: base_watermark,
            }),
        }
    }

    pub fn insert(&self, ctx: &SessionContext, value: V) {
        let mut inner = self.inner.lock();
        inner.entries.insert(
            ctx.id(),
            ScopedEntry {
                context: ctx.downgrade(),
                value,
            },
        );
        inner.maybe_purge();
    }

    pub fn get(&self, ctx: &SessionContext) -> Option<V>
    where
        V: Clone,
    {
        let inner = self.inner.lock();
        inner.entries.get(&ctx.id()).map(|entry| entry.value.clone())
    }

    /// Returns the value for `ctx`, creating it on first access. The same
    /// value is returned for every later call within the session lifetime.
    pub fn get_or_insert_with(&self, ctx: &SessionContext, init: impl FnOnce() -> V) -> V
    where
        V: Clone,
    {
        let mut inner = self.inner.lock();
        let value = {
            let entry = inner
                .entries
                .entry(ctx.id())
                .or_insert_with(|| ScopedEntry {
                    context: ctx.downgrade(),
                    value: init(),
                });
            entry.value.clone()
        };
        inner.maybe_purge();
        value
    }

    /// Upserts the entry for `ctx` and mutates it in place.
    pub fn update<R>(
        &self,
        ctx: &SessionContext,
        init: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        let mut inner = self.inner.lock();
        let out = {
            let entry = inner
                .entries
                .entry(ctx.id())
                .or_insert_with(|| ScopedEntry {
                    context: ctx.downgrade(),
                    value: init(),
                });
            f(&mut entry.value)
        };
        inner.maybe_purge();
        out
    }

    pub fn with_mut<R>(&self, ctx: &SessionContext, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        inner
            .entries
            .get_mut(&ctx.id())
            .map(|entry| f(&mut entry.value))
    }

    /// Removes and returns the entry for `ctx`.
    pub fn take(&self, ctx: &SessionContext) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.entries.remove(&ctx.id()).map(|entry| entry.value)
    }

    pub fn discard(&self, ctx: &SessionContext) -> bool {
        self.take(ctx).is_some()
    }

    /// Drops every entry whose session has ended; returns how many went.
    pub fn purge(&self) -> usize {
        self.inner.lock().purge()
    }

    /// Number of entries currently in the table, dead ones included
    /// until the next sweep.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for ScopedMap<V> {
    fn default() -> Self {
        Self::new(DEFAULT_PURGE_WATERMARK)
    }
}

/// Deferred action run once when a session becomes ready to serve.
pub type OnloadCallback = Box<dyn FnOnce() + Send>;

/// Per-session queues of onload callbacks, FIFO per session.
pub struct OnloadQueue {
    pending: ScopedMap<Vec<OnloadCallback>>,
}

impl OnloadQueue {
    pub fn new(base_watermark: usize) -> Self {
        Self {
            pending: ScopedMap::new(base_watermark),
        }
    }

    pub fn push(&self, ctx: &SessionContext, callback: OnloadCallback) {
        self.pending
            .update(ctx, Vec::new, |queue| queue.push(callback));
    }

    /// Takes the session's queue, leaving no entry behind. The caller
    /// runs the callbacks in order, so none can run twice.
    pub fn drain(&self, ctx: &SessionContext) -> Vec<OnloadCallback> {
        self.pending.take(ctx).unwrap_or_default()
    }

    pub fn pending_for(&self, ctx: &SessionContext) -> usize {
        self.pending.with_mut(ctx, |queue| queue.len()).unwrap_or(0)
    }

    pub fn discard(&self, ctx: &SessionContext) -> bool {
        self.pending.discard(ctx)
    }

    pub fn purge(&self) -> usize {
        self.pending.purge()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for OnloadQueue {
    fn default() -> Self {
        Self::new(DEFAULT_PURGE_WATERMARK)
    }
}

struct LockedTransport {
    // Thin data pointer of the Arc at lock time; only compared after
    // pruning dead handles, so a recycled allocation cannot match.
    addr: usize,
    handle: Weak<dyn Any + Send + Sync>,
}

/// Weak set of transport handles locked for the current change event.
///
/// The hosting server locks the transport a change arrived on so the
/// update is not echoed back to it, and clears the set after every
/// change event. Handles are opaque; holding one here never keeps it
/// alive.
#[derive(Default)]
pub struct TransportLocks {
    locked: Mutex<Vec<LockedTransport>>,
}

impl TransportLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock<T: Send + Sync + 'static>(&self, transport: &Arc<T>) {
        let handle: Arc<dyn Any + Send + Sync> = Arc::<T>::clone(transport);
        let addr = Arc::as_ptr(transport) as *const () as usize;
        let mut locked = self.locked.lock();
        locked.retain(|t| t.handle.strong_count() > 0);
        if locked.iter().any(|t| t.addr == addr) {
            return;
        }
        locked.push(LockedTransport {
            addr,
            handle: Arc::downgrade(&handle),
        });
    }

    pub fn is_locked<T: Send + Sync + 'static>(&self, transport: &Arc<T>) -> bool {
        let addr = Arc::as_ptr(transport) as *const () as usize;
        let mut locked = self.locked.lock();
        locked.retain(|t| t.handle.strong_count() > 0);
        locked.iter().any(|t| t.addr == addr)
    }

    pub fn clear(&self) {
        self.locked.lock().clear();
    }

    pub fn len(&self) -> usize {
        let mut locked = self.locked.lock();
        locked.retain(|t| t.handle.strong_count() > 0);
        locked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
