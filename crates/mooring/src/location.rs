use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use url::Url;

/// Snapshot of one session's navigation state, mirroring the fields a
/// browser exposes on `window.location`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationFields {
    pub href: String,
    pub protocol: String,
    pub hostname: String,
    pub port: Option<u16>,
    pub pathname: String,
    pub search: String,
    pub hash: String,
    /// Whether assigning a new href should trigger a full page reload.
    pub reload: bool,
}

/// Per-session navigation state.
///
/// Created lazily on first access for a session and shared by every
/// caller for that session's lifetime; a single global instance backs
/// non-session contexts. Interior mutability so the handle can be shared
/// as `Arc<LocationState>` while the session updates it.
#[derive(Debug, Default)]
pub struct LocationState {
    fields: RwLock<LocationFields>,
}

impl LocationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_href(href: &str) -> Result<Self, url::ParseError> {
        let state = Self::new();
        state.set_href(href)?;
        Ok(state)
    }

    pub fn snapshot(&self) -> LocationFields {
        self.fields.read().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut LocationFields)) {
        f(&mut self.fields.write());
    }

    /// Replaces every field from a full URL.
    pub fn set_href(&self, href: &str) -> Result<(), url::ParseError> {
        let url = Url::parse(href)?;
        let mut fields = self.fields.write();
        fields.href = url.to_string();
        fields.protocol = url.scheme().to_string();
        fields.hostname = url.host_str().unwrap_or_default().to_string();
        fields.port = url.port();
        fields.pathname = url.path().to_string();
        fields.search = url.query().map(|q| format!("?{q}")).unwrap_or_default();
        fields.hash = url
            .fragment()
            .map(|f| format!("#{f}"))
            .unwrap_or_default();
        Ok(())
    }

    /// Decoded key/value pairs from the search string, in order.
    pub fn query_params(&self) -> Vec<(String, String)> {
        let fields = self.fields.read();
        let search = fields.search.trim_start_matches('?');
        url::form_urlencoded::parse(search.as_bytes())
            .into_owned()
            .collect()
    }

    /// Rewrites the search string from key/value pairs.
    pub fn set_query_params<I, K, V>(&self, params: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            serializer.append_pair(key.as_ref(), value.as_ref());
        }
        let encoded = serializer.finish();
        let mut fields = self.fields.write();
        fields.search = if encoded.is_empty() {
            String::new()
        } else {
            format!("?{encoded}")
        };
    }
}
