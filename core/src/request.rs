//! Request factory: the only place that knows the wire-level URL scheme and
//! header names.
//!
//! # Design
//! A factory is created per request by `Service::request_factory`, which
//! snapshots the session token under the service lock. Missing credentials
//! latch an `ErrorCode` at construction; once latched every builder call is
//! a no-op and the caller is expected to check `error()` before `build()`.
//! Building is pure data transformation and never touches the network.

use crate::config::Credentials;
use crate::error::ErrorCode;
use crate::http::{
    HttpMethod, HttpOptions, HttpRequest, HEADER_APP_ID, HEADER_APP_KEY, HEADER_SESSION_TOKEN,
    HEADER_USER_AGENT, USER_AGENT_DEFAULT,
};

/// Path segment naming the backend API version.
const API_VERSION: &str = "1";

#[derive(Debug, Clone)]
pub struct RequestFactory {
    endpoint_url: String,
    tenant_id: String,
    app_id: String,
    app_key: String,
    session_token: String,
    proxy: String,
    options: HttpOptions,
    method: HttpMethod,
    path: String,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    session_none: bool,
    error: Option<ErrorCode>,
}

impl RequestFactory {
    /// `session_token` is the already-validated token string; pass `""` when
    /// no valid session exists.
    pub fn new(credentials: &Credentials, session_token: impl Into<String>, options: HttpOptions) -> Self {
        let mut factory = Self {
            endpoint_url: credentials.endpoint_url.clone(),
            tenant_id: credentials.tenant_id.clone(),
            app_id: credentials.app_id.clone(),
            app_key: credentials.app_key.clone(),
            session_token: session_token.into(),
            proxy: credentials.proxy.clone(),
            options,
            method: HttpMethod::Get,
            path: String::new(),
            params: Vec::new(),
            headers: Vec::new(),
            body: Vec::new(),
            session_none: false,
            error: None,
        };
        factory.error = factory.check_parameters();
        factory
    }

    fn check_parameters(&self) -> Option<ErrorCode> {
        let code = if self.endpoint_url.is_empty() {
            ErrorCode::EndpointUrl
        } else if self.tenant_id.is_empty() {
            ErrorCode::TenantId
        } else if self.app_id.is_empty() {
            ErrorCode::AppId
        } else if self.app_key.is_empty() {
            ErrorCode::AppKey
        } else {
            return None;
        };
        tracing::error!(error = %code, "request factory misconfigured");
        Some(code)
    }

    pub fn error(&self) -> Option<ErrorCode> {
        self.error
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Set method and API path (relative to `/1/{tenant}`).
    pub fn method(mut self, method: HttpMethod, path: impl Into<String>) -> Self {
        if self.error.is_none() {
            self.method = method;
            self.path = path.into();
        }
        self
    }

    pub fn get(self, path: impl Into<String>) -> Self {
        self.method(HttpMethod::Get, path)
    }

    pub fn post(self, path: impl Into<String>) -> Self {
        self.method(HttpMethod::Post, path)
    }

    pub fn put(self, path: impl Into<String>) -> Self {
        self.method(HttpMethod::Put, path)
    }

    pub fn delete(self, path: impl Into<String>) -> Self {
        self.method(HttpMethod::Delete, path)
    }

    pub fn append_path(mut self, path: &str) -> Self {
        if self.error.is_none() {
            self.path.push_str(path);
        }
        self
    }

    /// Replace all query parameters.
    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if self.error.is_none() {
            self.params = params.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        }
        self
    }

    /// Add one query parameter; ignored when key or value is empty.
    pub fn append_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        if self.error.is_none() && !key.is_empty() && !value.is_empty() {
            self.params.push((key, value));
        }
        self
    }

    /// Replace all caller-supplied headers.
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if self.error.is_none() {
            self.headers = headers.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        }
        self
    }

    /// Add one header; ignored when key or value is empty.
    pub fn append_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        if self.error.is_none() && !key.is_empty() && !value.is_empty() {
            self.headers.push((key, value));
        }
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        if self.error.is_none() {
            self.body = body.into();
        }
        self
    }

    /// Do not send the session header even when a token is available.
    pub fn session_none(mut self) -> Self {
        if self.error.is_none() {
            self.session_none = true;
        }
        self
    }

    /// Assemble the request. Check `error()` first: a latched factory still
    /// produces a request, just not a usable one.
    pub fn build(self) -> HttpRequest {
        let url = self.url();

        let mut headers: Vec<(String, String)> = Vec::with_capacity(self.headers.len() + 4);
        let last_user_agent = self
            .headers
            .iter()
            .rposition(|(key, value)| !value.is_empty() && key.eq_ignore_ascii_case(HEADER_USER_AGENT));
        for (index, (key, value)) in self.headers.into_iter().enumerate() {
            if key.eq_ignore_ascii_case(HEADER_USER_AGENT) && Some(index) != last_user_agent {
                continue;
            }
            headers.push((key, value));
        }

        headers.push((HEADER_APP_ID.to_string(), self.app_id));
        headers.push((HEADER_APP_KEY.to_string(), self.app_key));
        if !self.session_none && !self.session_token.is_empty() {
            headers.push((HEADER_SESSION_TOKEN.to_string(), self.session_token));
        }
        if last_user_agent.is_none() {
            headers.push((HEADER_USER_AGENT.to_string(), USER_AGENT_DEFAULT.to_string()));
        }

        let headers = headers
            .into_iter()
            .filter(|(key, value)| !key.is_empty() && !value.is_empty())
            .map(|(key, value)| format!("{key}: {value}"))
            .collect();

        HttpRequest {
            url,
            method: self.method,
            headers,
            body: self.body,
            proxy: self.proxy,
            options: self.options,
        }
    }

    /// `build()` that refuses to run on a latched factory.
    pub fn try_build(self) -> Result<HttpRequest, ErrorCode> {
        match self.error {
            Some(code) => Err(code),
            None => Ok(self.build()),
        }
    }

    fn url(&self) -> String {
        let mut url = self.endpoint_url.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str(API_VERSION);
        url.push('/');
        url.push_str(&self.tenant_id);
        url.push_str(&self.path);
        url.push_str(&self.query_string());
        url
    }

    fn query_string(&self) -> String {
        let pairs: Vec<String> = self
            .params
            .iter()
            .filter(|(key, value)| !key.is_empty() && !value.is_empty())
            .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
            .collect();
        if pairs.is_empty() {
            String::new()
        } else {
            format!("?{}", pairs.join("&"))
        }
    }
}
