//! Service facade: credentials, session, TLS options and the executor pool
//! for one backend application.
//!
//! # Design
//! A `Service` is shared by reference (usually `Arc<Service>`) across
//! threads. The session token sits behind its own mutex and the HTTP options
//! behind an `RwLock`; both are only read while snapshotting a
//! `RequestFactory`, so a change affects the next request built, never one
//! already in flight. The executor taken from the pool is held by a drop
//! guard and goes back even if the transfer closure panics.
//!
//! Every `execute_*` method follows the same steps:
//! 1. snapshot a `RequestFactory`; a configuration error returns before the
//!    pool is touched,
//! 2. let the caller build the `HttpRequest`,
//! 3. acquire an executor or fail with `ConnectionOver`,
//! 4. run the transfer and return the executor.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::config::{Credentials, ServiceConfig};
use crate::engine::{HttpEngine, UreqEngine};
use crate::error::ErrorCode;
use crate::executor::RestExecutor;
use crate::http::{HttpOptions, HttpRequest, HttpResponse};
use crate::pool::ExecutorPool;
use crate::request::RequestFactory;
use crate::result::BaasResult;
use crate::session::SessionToken;

pub struct Service<E = UreqEngine> {
    credentials: Credentials,
    http_options: RwLock<HttpOptions>,
    session: Mutex<SessionToken>,
    pool: ExecutorPool<E>,
    default_timeout: i32,
}

impl Service<UreqEngine> {
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_engine(config, UreqEngine::new)
    }

    /// Shared service from bare credentials with default options.
    pub fn create(
        endpoint_url: impl Into<String>,
        tenant_id: impl Into<String>,
        app_id: impl Into<String>,
        app_key: impl Into<String>,
        proxy: impl Into<String>,
    ) -> Arc<Self> {
        let credentials = Credentials::new(endpoint_url, tenant_id, app_id, app_key).with_proxy(proxy);
        Arc::new(Self::new(ServiceConfig::new(credentials)))
    }
}

impl<E: HttpEngine> Service<E> {
    /// Service whose pool builds engines with `factory`.
    pub fn with_engine(config: ServiceConfig, factory: impl Fn() -> E + Send + Sync + 'static) -> Self {
        tracing::debug!(
            endpoint = %config.credentials.endpoint_url,
            tenant = %config.credentials.tenant_id,
            max_connections = config.max_connections,
            "creating service"
        );
        Self {
            credentials: config.credentials,
            http_options: RwLock::new(config.http_options),
            session: Mutex::new(SessionToken::default()),
            pool: ExecutorPool::new(config.max_connections, factory),
            default_timeout: config.timeout_secs,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn endpoint_url(&self) -> &str {
        &self.credentials.endpoint_url
    }

    pub fn tenant_id(&self) -> &str {
        &self.credentials.tenant_id
    }

    pub fn app_id(&self) -> &str {
        &self.credentials.app_id
    }

    pub fn app_key(&self) -> &str {
        &self.credentials.app_key
    }

    pub fn proxy(&self) -> &str {
        &self.credentials.proxy
    }

    /// Timeout in seconds applied when an operation passes `<= 0`.
    pub fn default_timeout(&self) -> i32 {
        self.default_timeout
    }

    pub fn pool(&self) -> &ExecutorPool<E> {
        &self.pool
    }

    fn session(&self) -> MutexGuard<'_, SessionToken> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current session. An expired token is cleared on the way.
    pub fn session_token(&self) -> SessionToken {
        let mut session = self.session();
        if session.is_stale() {
            tracing::debug!("session token expired, clearing");
            session.clear();
        }
        session.clone()
    }

    pub fn set_session_token(&self, token: SessionToken) {
        *self.session() = token;
    }

    pub fn clear_session_token(&self) {
        self.session().clear();
    }

    pub fn http_options(&self) -> HttpOptions {
        self.http_options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Takes effect for requests built after this call.
    pub fn set_http_options(&self, options: HttpOptions) {
        *self.http_options.write().unwrap_or_else(PoisonError::into_inner) = options;
    }

    /// Factory carrying a snapshot of the current session token.
    pub fn request_factory(&self) -> RequestFactory {
        let token = self.session().token().to_string();
        RequestFactory::new(&self.credentials, token, self.http_options())
    }

    pub fn execute_common<B, R>(&self, build: B, run: R) -> BaasResult<HttpResponse>
    where
        B: FnOnce(RequestFactory) -> HttpRequest,
        R: FnOnce(&mut RestExecutor<E>, &HttpRequest) -> BaasResult<HttpResponse>,
    {
        self.execute_prepared(self.request_factory(), build, run)
    }

    /// `execute_common` with a factory snapshotted earlier by the caller.
    pub fn execute_prepared<B, R>(&self, factory: RequestFactory, build: B, run: R) -> BaasResult<HttpResponse>
    where
        B: FnOnce(RequestFactory) -> HttpRequest,
        R: FnOnce(&mut RestExecutor<E>, &HttpRequest) -> BaasResult<HttpResponse>,
    {
        if let Some(code) = factory.error() {
            return BaasResult::FatalError(code);
        }
        let request = build(factory);

        let Some(mut checkout) = Checkout::acquire(&self.pool) else {
            return BaasResult::FatalError(ErrorCode::ConnectionOver);
        };
        match checkout.executor() {
            Some(executor) => run(executor, &request),
            None => BaasResult::FatalError(ErrorCode::Fatal),
        }
    }

    pub fn execute_request<B>(&self, build: B, timeout: i32) -> BaasResult<HttpResponse>
    where
        B: FnOnce(RequestFactory) -> HttpRequest,
    {
        let timeout = self.timeout(timeout);
        self.execute_common(build, |executor, request| executor.execute_request(request, timeout))
    }

    /// `execute_request` with a factory snapshotted earlier by the caller.
    pub fn execute_request_with<B>(&self, factory: RequestFactory, build: B, timeout: i32) -> BaasResult<HttpResponse>
    where
        B: FnOnce(RequestFactory) -> HttpRequest,
    {
        let timeout = self.timeout(timeout);
        self.execute_prepared(factory, build, |executor, request| {
            executor.execute_request(request, timeout)
        })
    }

    pub fn execute_file_upload<B>(&self, build: B, path: &Path, timeout: i32) -> BaasResult<HttpResponse>
    where
        B: FnOnce(RequestFactory) -> HttpRequest,
    {
        let timeout = self.timeout(timeout);
        self.execute_common(build, |executor, request| {
            executor.execute_file_upload(request, path, timeout)
        })
    }

    pub fn execute_file_download<B>(&self, build: B, path: &Path, timeout: i32) -> BaasResult<HttpResponse>
    where
        B: FnOnce(RequestFactory) -> HttpRequest,
    {
        let timeout = self.timeout(timeout);
        self.execute_common(build, |executor, request| {
            executor.execute_file_download(request, path, timeout)
        })
    }

    fn timeout(&self, timeout: i32) -> i32 {
        if timeout > 0 {
            timeout
        } else {
            self.default_timeout
        }
    }
}

/// An executor on loan from a pool.
struct Checkout<'a, E: HttpEngine> {
    pool: &'a ExecutorPool<E>,
    executor: Option<RestExecutor<E>>,
}

impl<'a, E: HttpEngine> Checkout<'a, E> {
    fn acquire(pool: &'a ExecutorPool<E>) -> Option<Self> {
        let executor = pool.acquire()?;
        Some(Self {
            pool,
            executor: Some(executor),
        })
    }

    fn executor(&mut self) -> Option<&mut RestExecutor<E>> {
        self.executor.as_mut()
    }
}

impl<E: HttpEngine> Drop for Checkout<'_, E> {
    fn drop(&mut self) {
        if let Some(executor) = self.executor.take() {
            self.pool.release(executor);
        }
    }
}
