use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::context::SessionId;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("field is read-only: {0}")]
    ReadOnly(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Data object whose fields can be exposed through an ad-hoc endpoint.
///
/// The registry stores targets untouched; field validation and the
/// request/response mechanics belong to whatever serves the endpoint.
pub trait EndpointTarget: Send + Sync {
    /// Declared field names, used as the default output set.
    fn fields(&self) -> Vec<String>;
    fn get(&self, field: &str) -> Option<Value>;
    fn set(&self, field: &str, value: Value) -> Result<(), EndpointError>;
}

/// What was published: the target plus which of its fields are exposed
/// for input and output.
#[derive(Clone)]
pub struct EndpointPublication {
    pub target: Arc<dyn EndpointTarget>,
    pub input_fields: Vec<String>,
    pub output_fields: Vec<String>,
}

type EndpointKey = (Option<SessionId>, String);

/// Publications keyed by (session, endpoint name). `None` as the session
/// addresses publications made outside any session. Republishing a key
/// overwrites the previous publication.
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: Mutex<HashMap<EndpointKey, EndpointPublication>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(
        &self,
        session: Option<SessionId>,
        name: impl Into<String>,
        target: Arc<dyn EndpointTarget>,
        input_fields: Option<Vec<String>>,
        output_fields: Option<Vec<String>>,
    ) {
        let name = name.into();
        let output_fields = output_fields.unwrap_or_else(|| target.fields());
        let input_fields = input_fields.unwrap_or_default();
        debug!(endpoint = %name, session = ?session, "published endpoint");
        self.endpoints.lock().insert(
            (session, name),
            EndpointPublication {
                target,
                input_fields,
                output_fields,
            },
        );
    }

    pub fn lookup(&self, session: Option<SessionId>, name: &str) -> Option<EndpointPublication> {
        self.endpoints
            .lock()
            .get(&(session, name.to_string()))
            .cloned()
    }

    /// Drops every publication for `session`; returns how many went.
    pub fn discard_session(&self, session: SessionId) -> usize {
        let mut endpoints = self.endpoints.lock();
        let before = endpoints.len();
        endpoints.retain(|(key_session, _), _| *key_session != Some(session));
        before - endpoints.len()
    }

    pub fn len(&self) -> usize {
        self.endpoints.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.lock().is_empty()
    }
}
