use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::busy::{BusyIndicator, BusyScope, BusyTracker};
use crate::context::SessionContext;
use crate::current::CurrentSession;
use crate::endpoints::{EndpointRegistry, EndpointTarget};
use crate::guard::ThreadGuard;
use crate::location::LocationState;
use crate::scoped::{OnloadQueue, ScopedMap, TransportLocks, DEFAULT_PURGE_WATERMARK};
use crate::servers::ServerRegistry;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Session-scoped tables sweep for dead sessions once they outgrow
    /// this many entries.
    pub purge_watermark: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            purge_watermark: DEFAULT_PURGE_WATERMARK,
        }
    }
}

/// Process-wide coordination facilities for a server hosting many
/// concurrent interactive app sessions.
///
/// One instance is constructed at startup and shared by `Arc` with every
/// collaborator; there is no implicit global. Each table has its own
/// lock, so unrelated sessions never contend beyond a map access. No
/// operation here blocks.
pub struct Coordinator {
    current: CurrentSession,
    guard: ThreadGuard,
    busy: BusyTracker,
    servers: ServerRegistry,
    endpoints: EndpointRegistry,
    locations: ScopedMap<Arc<LocationState>>,
    global_location: Mutex<Option<Arc<LocationState>>>,
    onload: OnloadQueue,
    transport_locks: TransportLocks,
    cache: DashMap<String, Value>,
    exporter: Mutex<Option<Box<dyn Any + Send + Sync>>>,
    hold: AtomicBool,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    pub fn with_config(config: CoordinatorConfig) -> Self {
        Self {
            current: CurrentSession::new(),
            guard: ThreadGuard::new(),
            busy: BusyTracker::new(),
            servers: ServerRegistry::new(),
            endpoints: EndpointRegistry::new(),
            locations: ScopedMap::new(config.purge_watermark),
            global_location: Mutex::new(None),
            onload: OnloadQueue::new(config.purge_watermark),
            transport_locks: TransportLocks::new(),
            cache: DashMap::new(),
            exporter: Mutex::new(None),
            hold: AtomicBool::new(false),
        }
    }

    // --- current session -------------------------------------------------

    /// The session the calling code is acting for, if any.
    pub fn current_session(&self) -> Option<SessionContext> {
        self.current.current()
    }

    /// Explicit override used by the hosting server before dispatching an
    /// inbound event; cleared (or replaced) afterwards.
    pub fn set_current_session(&self, ctx: Option<SessionContext>) {
        self.current.set_override(ctx);
    }

    // --- dispatch-thread gate --------------------------------------------

    pub fn grant_dispatch(&self, ctx: &SessionContext) {
        self.guard.grant(ctx);
    }

    pub fn grant_dispatch_to(&self, ctx: &SessionContext, thread: ThreadId) {
        self.guard.grant_to(ctx, thread);
    }

    pub fn clear_dispatch(&self) {
        self.guard.clear();
    }

    /// Whether the calling thread may schedule state-changing events
    /// against `ctx` right now. Callers that get `false` must route the
    /// mutation through the session's own execution channel.
    pub fn unblocked(&self, ctx: &SessionContext) -> bool {
        self.guard.unblocked(ctx)
    }

    // --- location ---------------------------------------------------------

    /// Navigation state for the current session, created lazily on first
    /// access. Without a current session this returns the single global
    /// fallback instance (for non-session contexts such as a notebook).
    pub fn location(&self) -> Arc<LocationState> {
        match self.current_session() {
            Some(ctx) => self.location_for(&ctx),
            None => Arc::clone(
                self.global_location
                    .lock()
                    .get_or_insert_with(|| Arc::new(LocationState::new())),
            ),
        }
    }

    pub fn location_for(&self, ctx: &SessionContext) -> Arc<LocationState> {
        self.locations
            .get_or_insert_with(ctx, || Arc::new(LocationState::new()))
    }

    // --- onload -----------------------------------------------------------

    /// Defers `callback` until the current session has been served. With
    /// no current session the callback runs immediately, before this
    /// returns.
    pub fn onload(&self, callback: impl FnOnce() + Send + 'static) {
        match self.current_session() {
            None => callback(),
            Some(ctx) => self.onload.push(&ctx, Box::new(callback)),
        }
    }

    /// Host hook: the session is ready to serve. Runs its queued onload
    /// callbacks in registration order, exactly once, then forgets them.
    pub fn notify_ready(&self, ctx: &SessionContext) {
        let callbacks = self.onload.drain(ctx);
        if !callbacks.is_empty() {
            debug!(
                session = %ctx.id(),
                count = callbacks.len(),
                "running onload callbacks"
            );
        }
        for callback in callbacks {
            callback();
        }
    }

    pub fn pending_onload(&self, ctx: &SessionContext) -> usize {
        self.onload.pending_for(ctx)
    }

    // --- busy flag --------------------------------------------------------

    pub fn busy(&self) -> bool {
        self.busy.busy()
    }

    /// Wraps one unit of application work; the flag is busy while any
    /// scope is open.
    pub fn busy_scope(&self) -> BusyScope<'_> {
        self.busy.scope()
    }

    pub fn sync_busy(&self, indicator: Arc<dyn BusyIndicator>) {
        self.busy.sync(indicator);
    }

    pub fn subscribe_busy(&self) -> watch::Receiver<bool> {
        self.busy.subscribe()
    }

    // --- servers ----------------------------------------------------------

    pub fn servers(&self) -> &ServerRegistry {
        &self.servers
    }

    pub fn kill_all_servers(&self) {
        self.servers.kill_all();
    }

    // --- endpoints --------------------------------------------------------

    /// Publishes `target` under `name` for the current session (or
    /// globally when no session is current). Omitted output fields
    /// default to the target's declared fields.
    pub fn publish(
        &self,
        name: impl Into<String>,
        target: Arc<dyn EndpointTarget>,
        input_fields: Option<Vec<String>>,
        output_fields: Option<Vec<String>>,
    ) {
        let session = self.current_session().map(|ctx| ctx.id());
        self.endpoints
            .publish(session, name, target, input_fields, output_fields);
    }

    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    // --- request-derived views -------------------------------------------

    pub fn cookies(&self) -> HashMap<String, String> {
        self.current_session()
            .map(|ctx| ctx.request().cookies.clone())
            .unwrap_or_default()
    }

    pub fn headers(&self) -> HashMap<String, String> {
        self.current_session()
            .map(|ctx| ctx.request().headers.clone())
            .unwrap_or_default()
    }

    pub fn session_args(&self) -> HashMap<String, Vec<String>> {
        self.current_session()
            .map(|ctx| ctx.request().arguments.clone())
            .unwrap_or_default()
    }

    // --- transports, cache, exporter, hold --------------------------------

    pub fn transport_locks(&self) -> &TransportLocks {
        &self.transport_locks
    }

    /// Passthrough cache shared across sessions. Not managed here: no
    /// eviction, no scoping, just a well-known place.
    pub fn cache(&self) -> &DashMap<String, Value> {
        &self.cache
    }

    /// Parks a browser-automation handle for export tooling. The
    /// coordinator neither creates nor closes it.
    pub fn set_exporter(&self, exporter: Option<Box<dyn Any + Send + Sync>>) {
        *self.exporter.lock() = exporter;
    }

    pub fn take_exporter(&self) -> Option<Box<dyn Any + Send + Sync>> {
        self.exporter.lock().take()
    }

    pub fn has_exporter(&self) -> bool {
        self.exporter.lock().is_some()
    }

    /// Whether outbound comm events are currently held back.
    pub fn hold(&self) -> bool {
        self.hold.load(Ordering::SeqCst)
    }

    pub fn set_hold(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    // --- lifecycle --------------------------------------------------------

    /// Host hook: the session ended. Eagerly drops every entry keyed by
    /// it (location, pending onload callbacks, endpoint publications) and
    /// revokes any grant or override pointing at it. Entries whose
    /// handles were simply dropped are also reclaimed lazily; this hook
    /// just makes the reclaim immediate.
    pub fn discard_session(&self, ctx: &SessionContext) {
        let had_location = self.locations.discard(ctx);
        let had_onload = self.onload.discard(ctx);
        let endpoints = self.endpoints.discard_session(ctx.id());
        self.guard.clear_for(ctx);
        self.current.clear_override_for(ctx);
        debug!(
            session = %ctx.id(),
            had_location,
            had_onload,
            endpoints,
            "discarded session state"
        );
    }

    /// Sweeps every session-scoped table for dead sessions; returns how
    /// many entries were reclaimed.
    pub fn purge_sessions(&self) -> usize {
        self.locations.purge() + self.onload.purge()
    }

    /// Total entries across session-scoped tables, dead ones included
    /// until the next sweep.
    pub fn session_entries(&self) -> usize {
        self.locations.len() + self.onload.len()
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.servers.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestInfo;
    use crate::current::SessionScope;

    fn session() -> SessionContext {
        SessionContext::new(RequestInfo::default())
    }

    #[test]
    fn request_views_are_empty_without_a_session() {
        let coordinator = Coordinator::new();
        assert!(coordinator.cookies().is_empty());
        assert!(coordinator.headers().is_empty());
        assert!(coordinator.session_args().is_empty());
    }

    #[test]
    fn request_views_follow_the_current_session() {
        let coordinator = Coordinator::new();
        let mut request = RequestInfo::default();
        request
            .cookies
            .insert("sid".to_string(), "abc".to_string());
        let ctx = SessionContext::new(request);

        let _scope = SessionScope::enter(ctx);
        assert_eq!(coordinator.cookies().get("sid").unwrap(), "abc");
    }

    #[test]
    fn global_location_is_a_single_fallback_instance() {
        let coordinator = Coordinator::new();
        let first = coordinator.location();
        let second = coordinator.location();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn hold_and_exporter_slots() {
        let coordinator = Coordinator::new();
        assert!(!coordinator.hold());
        coordinator.set_hold(true);
        assert!(coordinator.hold());

        assert!(!coordinator.has_exporter());
        coordinator.set_exporter(Some(Box::new("driver".to_string())));
        assert!(coordinator.has_exporter());
        let exporter = coordinator.take_exporter().unwrap();
        assert_eq!(exporter.downcast_ref::<String>().unwrap(), "driver");
        assert!(!coordinator.has_exporter());
    }

    #[test]
    fn cache_is_a_plain_passthrough() {
        let coordinator = Coordinator::new();
        coordinator
            .cache()
            .insert("expensive".to_string(), Value::from(42));
        assert_eq!(
            coordinator.cache().get("expensive").unwrap().value(),
            &Value::from(42)
        );
    }

    #[test]
    fn discard_session_drops_all_scoped_state() {
        let coordinator = Coordinator::new();
        let ctx = session();

        coordinator.location_for(&ctx);
        coordinator.grant_dispatch(&ctx);
        coordinator.set_current_session(Some(ctx.clone()));
        coordinator.onload(|| {});
        assert_eq!(coordinator.pending_onload(&ctx), 1);

        coordinator.discard_session(&ctx);
        assert_eq!(coordinator.session_entries(), 0);
        assert_eq!(coordinator.pending_onload(&ctx), 0);
        assert!(!coordinator.unblocked(&ctx));
        assert!(coordinator.current_session().is_none());
    }
}
