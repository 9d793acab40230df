use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::context::SessionId;

#[derive(Debug, Error)]
pub enum StopError {
    /// Expected race during bulk shutdown; callers swallow it.
    #[error("server already stopped")]
    AlreadyStopped,
    #[error("server shutdown failed: {0}")]
    Failed(String),
}

/// Stop control for one running server process.
pub trait ServerControl: Send + Sync {
    fn stop(&self) -> Result<(), StopError>;
}

/// Watch-backed [`ServerControl`]: the first `stop` flips the channel so
/// the server's accept loop can wind down; a second `stop` reports
/// [`StopError::AlreadyStopped`].
#[derive(Debug)]
pub struct ShutdownSignal {
    stopped: AtomicBool,
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> (Arc<Self>, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Arc::new(Self {
                stopped: AtomicBool::new(false),
                tx,
            }),
            rx,
        )
    }
}

impl ServerControl for ShutdownSignal {
    fn stop(&self) -> Result<(), StopError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(StopError::AlreadyStopped);
        }
        // Receivers may all be gone by now; that is still a clean stop.
        let _ = self.tx.send(true);
        Ok(())
    }
}

/// One running server process: where it listens, which top-level app it
/// serves, and the sessions currently attached to it.
#[derive(Clone)]
pub struct ServerHandle {
    pub address: String,
    pub port: u16,
    pub app_name: String,
    pub sessions: HashSet<SessionId>,
    control: Arc<dyn ServerControl>,
}

impl ServerHandle {
    pub fn new(
        address: impl Into<String>,
        port: u16,
        app_name: impl Into<String>,
        control: Arc<dyn ServerControl>,
    ) -> Self {
        Self {
            address: address.into(),
            port,
            app_name: app_name.into(),
            sessions: HashSet::new(),
            control,
        }
    }

    pub fn with_sessions(mut self, sessions: impl IntoIterator<Item = SessionId>) -> Self {
        self.sessions.extend(sessions);
        self
    }

    pub fn stop(&self) -> Result<(), StopError> {
        self.control.stop()
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("app_name", &self.app_name)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerSummary {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub app_name: String,
    pub sessions: usize,
}

/// Registry of running servers keyed by caller-chosen identifier.
/// Entries leave only via explicit shutdown, never implicitly.
#[derive(Default)]
pub struct ServerRegistry {
    servers: Mutex<HashMap<String, ServerHandle>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: impl Into<String>, handle: ServerHandle) {
        let id = id.into();
        info!(
            server = %id,
            address = %handle.address,
            port = handle.port,
            app = %handle.app_name,
            "registered server"
        );
        self.servers.lock().insert(id, handle);
    }

    pub fn remove(&self, id: &str) -> Option<ServerHandle> {
        self.servers.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.servers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.lock().is_empty()
    }

    pub fn summaries(&self) -> Vec<ServerSummary> {
        let servers = self.servers.lock();
        let mut summaries: Vec<ServerSummary> = servers
            .iter()
            .map(|(id, handle)| ServerSummary {
                id: id.clone(),
                address: handle.address.clone(),
                port: handle.port,
                app_name: handle.app_name.clone(),
                sessions: handle.sessions.len(),
            })
            .collect();
        summaries.sort_by(|a, b| (&a.address, a.port).cmp(&(&b.address, b.port)));
        summaries
    }

    /// Stops every registered server and clears the registry. A server
    /// that was already stopped is a no-op; any other stop failure is
    /// logged and swallowed. The registry empties unconditionally.
    pub fn kill_all(&self) {
        let drained = std::mem::take(&mut *self.servers.lock());
        for (id, handle) in drained {
            match handle.stop() {
                Ok(()) => info!(server = %id, "stopped server"),
                Err(StopError::AlreadyStopped) => {
                    debug!(server = %id, "server already stopped")
                }
                Err(err) => warn!(server = %id, error = %err, "failed to stop server"),
            }
        }
    }
}

impl fmt::Display for ServerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summaries = self.summaries();
        if summaries.is_empty() {
            return write!(f, "no servers");
        }
        for (n, summary) in summaries.iter().enumerate() {
            if n > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "{}:{} - {}",
                summary.address, summary.port, summary.app_name
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct CountingControl {
        stops: AtomicUsize,
    }

    impl CountingControl {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                stops: AtomicUsize::new(0),
            })
        }
    }

    impl ServerControl for CountingControl {
        fn stop(&self) -> Result<(), StopError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct AlreadyStoppedControl;

    impl ServerControl for AlreadyStoppedControl {
        fn stop(&self) -> Result<(), StopError> {
            Err(StopError::AlreadyStopped)
        }
    }

    #[test]
    fn kill_all_swallows_already_stopped_and_clears() {
        let registry = ServerRegistry::new();
        let healthy = CountingControl::new();
        registry.register(
            "healthy",
            ServerHandle::new("127.0.0.1", 5006, "dashboard", healthy.clone()),
        );
        registry.register(
            "stale",
            ServerHandle::new("127.0.0.1", 5007, "report", Arc::new(AlreadyStoppedControl)),
        );

        registry.kill_all();
        assert!(registry.is_empty());
        assert_eq!(healthy.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_signal_stops_once() {
        let (signal, rx) = ShutdownSignal::new();
        assert!(!*rx.borrow());

        signal.stop().unwrap();
        assert!(*rx.borrow());
        assert!(matches!(signal.stop(), Err(StopError::AlreadyStopped)));
    }

    #[test]
    fn display_lists_servers_or_says_none() {
        let registry = ServerRegistry::new();
        assert_eq!(registry.to_string(), "no servers");

        let (control, _rx) = ShutdownSignal::new();
        registry.register(
            "a",
            ServerHandle::new("127.0.0.1", 5006, "dashboard", control.clone()),
        );
        registry.register(
            "b",
            ServerHandle::new("127.0.0.1", 5007, "report", control),
        );
        assert_eq!(
            registry.to_string(),
            "127.0.0.1:5006 - dashboard\n127.0.0.1:5007 - report"
        );
    }

    #[test]
    fn entries_stay_until_explicit_shutdown() {
        let registry = ServerRegistry::new();
        let (control, _rx) = ShutdownSignal::new();
        registry.register(
            "only",
            ServerHandle::new("0.0.0.0", 8080, "viewer", control),
        );

        assert_eq!(registry.len(), 1);
        let removed = registry.remove("only").unwrap();
        assert_eq!(removed.app_name, "viewer");
        assert!(registry.is_empty());
    }
}
