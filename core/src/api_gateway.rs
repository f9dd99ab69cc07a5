//! Custom API gateway calls: `{method} /api/{name}{subpath}`.

use std::sync::Arc;

use crate::engine::{HttpEngine, UreqEngine};
use crate::error::ErrorCode;
use crate::http::{HttpMethod, HttpResponse, HEADER_CONTENT_TYPE};
use crate::result::BaasResult;
use crate::service::Service;

const API_PATH: &str = "/api";

pub struct ApiGateway<E = UreqEngine> {
    service: Arc<Service<E>>,
    api_name: String,
    method: HttpMethod,
    subpath: String,
    headers: Vec<(String, String)>,
    params: Vec<(String, String)>,
    content_type: String,
    timeout: i32,
}

impl<E: HttpEngine> ApiGateway<E> {
    /// `subpath` is appended verbatim after the API name, e.g. `"/items/1"`.
    pub fn new(
        service: Arc<Service<E>>,
        api_name: impl Into<String>,
        method: HttpMethod,
        subpath: impl Into<String>,
    ) -> Self {
        let timeout = service.default_timeout();
        Self {
            service,
            api_name: api_name.into(),
            method,
            subpath: subpath.into(),
            headers: Vec::new(),
            params: Vec::new(),
            content_type: String::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> i32 {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: i32) {
        self.timeout = timeout;
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Empty names or values are ignored, and so is `Content-Type`; use
    /// `set_content_type` for that.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let (name, value) = (name.into(), value.into());
        if name.is_empty() || value.is_empty() || name.eq_ignore_ascii_case(HEADER_CONTENT_TYPE) {
            return;
        }
        self.headers.push((name, value));
    }

    /// Remove every header called `name`; returns how many were removed.
    pub fn remove_header(&mut self, name: &str) -> usize {
        remove_all(&mut self.headers, name)
    }

    pub fn clear_headers(&mut self) {
        self.headers.clear();
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn add_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let (name, value) = (name.into(), value.into());
        if name.is_empty() || value.is_empty() {
            return;
        }
        self.params.push((name, value));
    }

    pub fn remove_param(&mut self, name: &str) -> usize {
        remove_all(&mut self.params, name)
    }

    pub fn clear_params(&mut self) {
        self.params.clear();
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = content_type.into();
    }

    /// A body is only sent with POST and PUT, and then needs a content type.
    pub fn execute_custom_api(&self, body: impl Into<Vec<u8>>) -> BaasResult<HttpResponse> {
        if self.api_name.is_empty() {
            tracing::error!("API name is empty");
            return BaasResult::FatalError(ErrorCode::ApiName);
        }

        let carries_body = matches!(self.method, HttpMethod::Post | HttpMethod::Put);
        let body = if carries_body { body.into() } else { Vec::new() };
        if !body.is_empty() && self.content_type.is_empty() {
            tracing::error!(api = %self.api_name, "request body without content type");
            return BaasResult::FatalError(ErrorCode::ContentType);
        }

        tracing::debug!(api = %self.api_name, method = %self.method, "custom API call");
        self.service.execute_request(
            |factory| {
                let mut factory = factory
                    .method(self.method, API_PATH)
                    .append_path(&format!("/{}{}", self.api_name, self.subpath))
                    .headers(self.headers.iter().cloned())
                    .params(self.params.iter().cloned());
                if !body.is_empty() {
                    factory = factory
                        .append_header(HEADER_CONTENT_TYPE, self.content_type.as_str())
                        .body(body);
                }
                factory.build()
            },
            self.timeout,
        )
    }
}

fn remove_all(pairs: &mut Vec<(String, String)>, name: &str) -> usize {
    let before = pairs.len();
    pairs.retain(|(key, _)| key != name);
    before - pairs.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, ServiceConfig};
    use crate::testing::{FakeEngine, Script};

    fn gateway(name: &str, method: HttpMethod, subpath: &str) -> (ApiGateway<FakeEngine>, FakeEngine) {
        let engine = FakeEngine::new(Script::ok(r#"{"ok":1}"#));
        let shared = engine.clone();
        let config = ServiceConfig::new(Credentials::new("http://localhost", "tenant", "app", "key"));
        let service = Arc::new(Service::with_engine(config, move || shared.clone()));
        (ApiGateway::new(service, name, method, subpath), engine)
    }

    #[test]
    fn get_builds_api_path_with_headers_and_params() {
        let (mut api, engine) = gateway("weather", HttpMethod::Get, "/today");
        api.add_header("X-Trace", "1");
        api.add_param("city", "tokyo");

        let result = api.execute_custom_api("ignored");
        assert_eq!(result.success().unwrap().body_text(), r#"{"ok":1}"#);

        let sent = engine.last_request().unwrap();
        assert_eq!(sent.method, HttpMethod::Get);
        assert_eq!(sent.url, "http://localhost/1/tenant/api/weather/today?city=tokyo");
        assert_eq!(sent.header("X-Trace"), Some("1"));
        assert!(sent.body.is_empty());
    }

    #[test]
    fn post_body_carries_content_type() {
        let (mut api, engine) = gateway("echo", HttpMethod::Post, "");
        api.set_content_type("text/plain");
        assert!(api.execute_custom_api("hello").is_success());

        let sent = engine.last_request().unwrap();
        assert_eq!(sent.url, "http://localhost/1/tenant/api/echo");
        assert_eq!(sent.header("Content-Type"), Some("text/plain"));
        assert_eq!(sent.body, b"hello");
    }

    #[test]
    fn body_without_content_type_is_rejected() {
        let (api, engine) = gateway("echo", HttpMethod::Put, "");
        assert_eq!(api.execute_custom_api("x").fatal_error(), Some(ErrorCode::ContentType));
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn empty_body_needs_no_content_type() {
        let (api, engine) = gateway("echo", HttpMethod::Post, "");
        assert!(api.execute_custom_api(Vec::new()).is_success());
        assert_eq!(engine.last_request().unwrap().header("Content-Type"), None);
    }

    #[test]
    fn empty_name_is_rejected() {
        let (api, engine) = gateway("", HttpMethod::Get, "");
        assert_eq!(api.execute_custom_api(Vec::new()).fatal_error(), Some(ErrorCode::ApiName));
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn header_and_param_bookkeeping() {
        let (mut api, _) = gateway("a", HttpMethod::Get, "");
        api.add_header("Content-Type", "application/json");
        api.add_header("content-type", "application/json");
        api.add_header("", "v");
        api.add_header("X-A", "");
        api.add_header("X-A", "1");
        api.add_header("X-A", "2");
        api.add_header("X-B", "3");
        assert_eq!(api.headers().len(), 3);
        assert_eq!(api.remove_header("X-A"), 2);
        assert_eq!(api.remove_header("X-A"), 0);
        api.clear_headers();
        assert!(api.headers().is_empty());

        api.add_param("k", "v");
        api.add_param("k", "");
        assert_eq!(api.params().len(), 1);
        assert_eq!(api.remove_param("k"), 1);
        api.add_param("k", "v");
        api.clear_params();
        assert!(api.params().is_empty());
    }
}
