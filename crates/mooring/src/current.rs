use std::cell::RefCell;
use std::marker::PhantomData;

use parking_lot::Mutex;

use crate::context::SessionContext;

thread_local! {
    // Stack of sessions being dispatched on this thread, innermost last.
    static ACTIVE_SESSIONS: RefCell<Vec<SessionContext>> = const { RefCell::new(Vec::new()) };
}

/// Resolves the session the calling code is currently acting for.
///
/// Resolution order: an explicit override (set once per inbound event by
/// the hosting server), then the innermost [`SessionScope`] entered on the
/// calling thread, then `None`. "No current session" is an ordinary
/// result, not an error.
#[derive(Debug, Default)]
pub struct CurrentSession {
    override_slot: Mutex<Option<SessionContext>>,
}

impl CurrentSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<SessionContext> {
        if let Some(ctx) = self.override_slot.lock().clone() {
            return Some(ctx);
        }
        ACTIVE_SESSIONS.with(|stack| stack.borrow().last().cloned())
    }

    /// Sets or clears the explicit override. The override takes precedence
    /// over any thread-scoped session until cleared.
    pub fn set_override(&self, ctx: Option<SessionContext>) {
        *self.override_slot.lock() = ctx;
    }

    /// Clears the override only if it currently points at `ctx`.
    pub(crate) fn clear_override_for(&self, ctx: &SessionContext) {
        let mut slot = self.override_slot.lock();
        if slot.as_ref() == Some(ctx) {
            *slot = None;
        }
    }
}

/// RAII marker for "this thread is dispatching an event for `ctx`".
///
/// The hosting server enters a scope before invoking application
/// callbacks and drops it afterwards; scopes nest, and dropping restores
/// the previous session. Not `Send`: the scope must end on the thread
/// that opened it.
#[derive(Debug)]
pub struct SessionScope {
    _not_send: PhantomData<*const ()>,
}

impl SessionScope {
    pub fn enter(ctx: SessionContext) -> Self {
        ACTIVE_SESSIONS.with(|stack| stack.borrow_mut().push(ctx));
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for SessionScope {
    fn drop(&mut self) {
        ACTIVE_SESSIONS.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
