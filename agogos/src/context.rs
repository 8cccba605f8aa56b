//! Request-scoped context.
//!
//! A context is created by the transport for every request and travels with the resolve
//! parameters of every field. Entries are copy-on-write: a request transform can derive a
//! context for the layers it wraps without affecting sibling fields.
use std::sync::Arc;

use http::HeaderMap;
use serde_json_bytes::ByteString;
use serde_json_bytes::Value;

use crate::json_ext::Object;

#[derive(Clone, Debug, Default)]
pub struct Context {
    headers: Arc<HeaderMap>,
    entries: Arc<Object>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context carrying the headers of the inbound request.
    pub fn with_headers(headers: HeaderMap) -> Self {
        Self {
            headers: Arc::new(headers),
            entries: Default::default(),
        }
    }

    /// Headers of the inbound request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns a copy of this context with `key` set to `value`.
    pub fn with_entry(&self, key: impl Into<ByteString>, value: impl Into<Value>) -> Self {
        let mut entries = (*self.entries).clone();
        entries.insert(key.into(), value.into());
        Self {
            headers: self.headers.clone(),
            entries: Arc::new(entries),
        }
    }
}

#[cfg(test)]
mod tests {
    use http::header::AUTHORIZATION;
    use http::HeaderValue;

    use super::*;

    #[test]
    fn derived_context_does_not_leak_into_parent() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        let context = Context::with_headers(headers);
        let derived = context.with_entry("key", "value");

        assert_eq!(derived.get("key"), Some(&Value::from("value")));
        assert_eq!(context.get("key"), None);
        assert_eq!(
            derived.headers().get(AUTHORIZATION),
            Some(&HeaderValue::from_static("Bearer abc"))
        );
    }
}
