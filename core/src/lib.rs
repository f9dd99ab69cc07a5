//! Synchronous client core for a BaaS backend.
//!
//! # Overview
//! A `Service` holds the tenant/app credentials, the session of the
//! logged-in user and a bounded pool of transport executors. Feature types
//! (`User`, `ObjectBucket`, `FileBucket`, `ApiGateway`) validate their
//! arguments, describe a request through a `RequestFactory` and let the
//! service run it. Every operation blocks the calling thread and returns a
//! `BaasResult`: success, a REST error from the server, or a fatal error
//! code.
//!
//! # Design
//! - Building a request is pure data transformation (`request`); only an
//!   `HttpEngine` (`engine`) touches the network.
//! - Executors are never shared: the pool moves them out on acquire and back
//!   in on release, and fails fast when the ceiling is reached.
//! - The session token is one mutex-guarded cell per `Service`, snapshotted
//!   into each request, so concurrent operations and a logout never race on
//!   the header value.
//! - Logging goes through `tracing`; the library never installs a
//!   subscriber.

pub mod api_gateway;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod file_bucket;
pub mod handler;
pub mod http;
pub mod object_bucket;
pub mod pool;
pub mod request;
pub mod result;
pub mod service;
pub mod session;
pub mod user;

#[cfg(test)]
pub(crate) mod testing;

pub use api_gateway::ApiGateway;
pub use config::{ConfigError, Credentials, ServiceConfig};
pub use engine::{HttpEngine, Transfer, UreqEngine};
pub use error::{Error, ErrorCode, RestError, TransferError};
pub use executor::RestExecutor;
pub use file_bucket::{FileBucket, FileMetadata};
pub use handler::ResponseSink;
pub use http::{HttpMethod, HttpOptions, HttpRequest, HttpResponse};
pub use object_bucket::{BaasObject, ObjectBucket, ObjectQueryResult};
pub use pool::ExecutorPool;
pub use request::RequestFactory;
pub use result::BaasResult;
pub use service::Service;
pub use session::SessionToken;
pub use user::{User, UserEntity};
