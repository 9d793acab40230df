use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::context::{SessionContext, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DispatchOwner {
    session: SessionId,
    thread: ThreadId,
}

/// Gate deciding whether the calling thread may schedule state-changing
/// events against a session right now.
///
/// The hosting server records the dispatch owner before invoking
/// application callbacks. Background threads (timers, async jobs) that
/// fail [`ThreadGuard::unblocked`] must route their mutation through the
/// session's own execution channel instead of applying it directly; the
/// guard never blocks and never panics.
#[derive(Debug, Default)]
pub struct ThreadGuard {
    owner: Mutex<Option<DispatchOwner>>,
}

impl ThreadGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the calling thread as the dispatch owner for `ctx`.
    pub fn grant(&self, ctx: &SessionContext) {
        self.grant_to(ctx, thread::current().id());
    }

    /// One-shot permission for another thread to act for `ctx`.
    pub fn grant_to(&self, ctx: &SessionContext, thread: ThreadId) {
        *self.owner.lock() = Some(DispatchOwner {
            session: ctx.id(),
            thread,
        });
    }

    pub fn clear(&self) {
        *self.owner.lock() = None;
    }

    /// Clears the grant only if it belongs to `ctx`.
    pub(crate) fn clear_for(&self, ctx: &SessionContext) {
        let mut owner = self.owner.lock();
        if owner.map(|o| o.session) == Some(ctx.id()) {
            *owner = None;
        }
    }

    /// True iff `ctx` is the recorded session and the calling thread is
    /// the recorded dispatch thread.
    pub fn unblocked(&self, ctx: &SessionContext) -> bool {
        let owner = self.owner.lock();
        matches!(
            *owner,
            Some(o) if o.session == ctx.id() && o.thread == thread::current().id()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::RequestInfo;

    #[test]
    fn granted_thread_is_unblocked() {
        let guard = ThreadGuard::new();
        let ctx = SessionContext::new(RequestInfo::default());

        assert!(!guard.unblocked(&ctx));
        guard.grant(&ctx);
        assert!(guard.unblocked(&ctx));
    }

    #[test]
    fn other_session_stays_blocked() {
        let guard = ThreadGuard::new();
        let granted = SessionContext::new(RequestInfo::default());
        let other = SessionContext::new(RequestInfo::default());

        guard.grant(&granted);
        assert!(!guard.unblocked(&other));
    }

    #[test]
    fn clear_revokes_the_grant() {
        let guard = ThreadGuard::new();
        let ctx = SessionContext::new(RequestInfo::default());

        guard.grant(&ctx);
        guard.clear();
        assert!(!guard.unblocked(&ctx));
    }

    #[test]
    fn other_threads_stay_blocked() {
        let guard = Arc::new(ThreadGuard::new());
        let ctx = SessionContext::new(RequestInfo::default());
        guard.grant(&ctx);

        let worker_guard = Arc::clone(&guard);
        let worker_ctx = ctx.clone();
        std::thread::spawn(move || {
            assert!(!worker_guard.unblocked(&worker_ctx));
        })
        .join()
        .unwrap();

        assert!(guard.unblocked(&ctx));
    }

    #[test]
    fn grant_to_hands_permission_to_a_named_thread() {
        let guard = Arc::new(ThreadGuard::new());
        let ctx = SessionContext::new(RequestInfo::default());

        let worker_guard = Arc::clone(&guard);
        let worker_ctx = ctx.clone();
        let handle = std::thread::spawn(move || {
            while !worker_guard.unblocked(&worker_ctx) {
                std::thread::yield_now();
            }
        });

        guard.grant_to(&ctx, handle.thread().id());
        assert!(!guard.unblocked(&ctx));
        handle.join().unwrap();
    }
}
