//! HTTP request and response described as plain data.
//!
//! # Design
//! `HttpRequest` is produced once by `RequestFactory::build` and handed to a
//! `RestExecutor` once; nothing mutates it in between. `HttpResponse` is
//! produced by a `ResponseSink` after the transfer. Both use owned types so a
//! request can move to whichever thread ends up executing it.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

pub(crate) const HEADER_APP_ID: &str = "X-Application-Id";
pub(crate) const HEADER_APP_KEY: &str = "X-Application-Key";
pub(crate) const HEADER_SESSION_TOKEN: &str = "X-Session-Token";
pub(crate) const HEADER_USER_AGENT: &str = "User-Agent";
pub(crate) const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub(crate) const HEADER_CONTENT_LENGTH: &str = "Content-Length";
pub(crate) const HEADER_X_CONTENT_LENGTH: &str = "X-Content-Length";
pub(crate) const HEADER_X_ACL: &str = "X-ACL";
pub(crate) const CONTENT_TYPE_JSON: &str = "application/json";
pub(crate) const USER_AGENT_DEFAULT: &str = "baas embedded sdk";

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TLS settings applied to every request built after they are set.
///
/// Paths point at PEM files; `ca_path` is a directory of PEM files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub ca_info: Option<PathBuf>,
    pub ca_path: Option<PathBuf>,
    pub verify_peer: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            client_cert: None,
            client_key: None,
            ca_info: None,
            ca_path: None,
            verify_peer: true,
        }
    }
}

impl HttpOptions {
    pub fn client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert = Some(path.into());
        self
    }

    pub fn client_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_key = Some(path.into());
        self
    }

    pub fn ca_info(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_info = Some(path.into());
        self
    }

    pub fn ca_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(path.into());
        self
    }

    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }
}

/// A fully assembled request, ready to be executed exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    /// Rendered `Key: Value` lines, in the order they will be sent.
    pub headers: Vec<String>,
    pub body: Vec<u8>,
    /// Proxy URL; empty disables proxying.
    pub proxy: String,
    pub options: HttpOptions,
}

impl HttpRequest {
    /// Split each rendered header line back into its key and value.
    pub fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key, value.trim_start()))
    }

    /// First header value whose key matches `name` case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_pairs()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }
}

/// A response as received from the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// 0 when no status line could be parsed.
    pub status_code: u16,
    /// Reason phrase from the status line. `UreqEngine` does not expose the
    /// phrase the server sent and reports the canonical one for the code
    /// instead (`400 Bad Request`, never a custom `400 File size over`).
    pub reason_phrase: String,
    /// Header multimap in arrival order.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// First header value whose key matches `name` case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Body as a JSON object. Anything else (empty, malformed, an array)
    /// reads as an empty object.
    pub fn json_object(&self) -> Map<String, Value> {
        if self.body.is_empty() {
            return Map::new();
        }
        match serde_json::from_slice::<Value>(&self.body) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                tracing::warn!("response body is not a JSON object");
                Map::new()
            }
            Err(err) => {
                tracing::warn!(error = %err, "response body is not valid JSON");
                Map::new()
            }
        }
    }
}
