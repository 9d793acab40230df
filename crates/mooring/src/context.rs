use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Request metadata captured by the hosting server when the session
/// connected. The coordinator only forwards these maps; it never parses
/// or validates them.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub cookies: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub arguments: HashMap<String, Vec<String>>,
}

/// Handle identifying one client session.
///
/// Cheap to clone; all clones refer to the same session. The hosting
/// server owns the canonical handle and drops it when the session ends,
/// at which point any session-scoped state keyed by it becomes
/// collectible (the coordinator only ever holds weak references).
#[derive(Debug, Clone)]
pub struct SessionContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    id: SessionId,
    request: RequestInfo,
}

impl SessionContext {
    pub fn new(request: RequestInfo) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: SessionId::new(),
                request,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn request(&self) -> &RequestInfo {
        &self.inner.request
    }

    pub fn downgrade(&self) -> WeakSessionContext {
        WeakSessionContext {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl PartialEq for SessionContext {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for SessionContext {}

impl Hash for SessionContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

/// Non-owning reference to a session context. Holding one of these does
/// not keep the session alive.
#[derive(Debug, Clone)]
pub struct WeakSessionContext {
    id: SessionId,
    inner: Weak<ContextInner>,
}

impl WeakSessionContext {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn upgrade(&self) -> Option<SessionContext> {
        self.inner.upgrade().map(|inner| SessionContext { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_are_equal_and_share_an_id() {
        let ctx = SessionContext::new(RequestInfo::default());
        let other = ctx.clone();
        assert_eq!(ctx, other);
        assert_eq!(ctx.id(), other.id());
    }

    #[test]
    fn distinct_sessions_differ() {
        let a = SessionContext::new(RequestInfo::default());
        let b = SessionContext::new(RequestInfo::default());
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn weak_handle_dies_with_last_clone() {
        let ctx = SessionContext::new(RequestInfo::default());
        let weak = ctx.downgrade();
        assert!(weak.is_alive());
        assert_eq!(weak.upgrade().as_ref(), Some(&ctx));

        drop(ctx);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn request_info_round_trips() {
        let mut request = RequestInfo::default();
        request
            .cookies
            .insert("sid".to_string(), "abc123".to_string());
        request
            .arguments
            .insert("theme".to_string(), vec!["dark".to_string()]);
        let ctx = SessionContext::new(request);
        assert_eq!(ctx.request().cookies.get("sid").unwrap(), "abc123");
        assert_eq!(ctx.request().arguments["theme"], vec!["dark"]);
    }
}
