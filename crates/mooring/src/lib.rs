//! Mooring: process-wide coordination for a server hosting many
//! concurrent interactive app sessions.
//!
//! Responsibilities:
//! - resolving which session the calling thread is allowed to affect
//! - session-scoped storage reclaimed automatically once a session ends
//! - busy/idle broadcast to weakly held indicators and watch subscribers
//! - registries of running servers and published data endpoints
//!
//! One [`Coordinator`] is constructed at startup and injected (usually
//! behind an `Arc`) into every collaborator. The hosting server drives
//! the lifecycle hooks: it enters a [`SessionScope`] and grants the
//! dispatch thread before invoking application callbacks, calls
//! [`Coordinator::notify_ready`] when a session has been served, and
//! [`Coordinator::discard_session`] when it ends. Everything else is
//! safe to call from any thread at any time; "no current session" is an
//! ordinary `None`, never an error.

mod busy;
mod context;
mod coordinator;
mod current;
mod endpoints;
mod guard;
mod location;
mod scoped;
mod servers;

pub use busy::{BusyIndicator, BusyScope, BusyTracker};
pub use context::{RequestInfo, SessionContext, SessionId, WeakSessionContext};
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use current::{CurrentSession, SessionScope};
pub use endpoints::{EndpointError, EndpointPublication, EndpointRegistry, EndpointTarget};
pub use guard::ThreadGuard;
pub use location::{LocationFields, LocationState};
pub use scoped::{OnloadCallback, OnloadQueue, ScopedMap, TransportLocks};
pub use servers::{
    ServerControl, ServerHandle, ServerRegistry, ServerSummary, ShutdownSignal, StopError,
};
