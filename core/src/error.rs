//! Error vocabulary shared by every operation.
//!
//! # Design
//! `ErrorCode` names each fatal condition exactly once: configuration
//! problems caught while building a request, local precondition failures,
//! pool exhaustion, transfer failures and protocol violations. A response
//! that parsed but fell outside 2xx is not fatal; it travels as a
//! `RestError` carrying the raw status and body.

use thiserror::Error;

/// A failure that never reached, or never produced, an interpretable HTTP
/// response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorCode {
    #[error("invalid argument")]
    InvalidArgument,

    #[error("endpoint URL is empty")]
    EndpointUrl,

    #[error("tenant id is empty")]
    TenantId,

    #[error("app id is empty")]
    AppId,

    #[error("app key is empty")]
    AppKey,

    #[error("failed to open local file")]
    OpenFile,

    /// Downloaded size disagrees with `X-Content-Length`, or the header is
    /// missing.
    #[error("downloaded file size mismatch")]
    FileDownload,

    /// The transfer finished but no status line could be parsed.
    #[error("incorrect HTTP response")]
    IncorrectResponse,

    /// The executor pool has no idle executor and cannot create another.
    #[error("too many concurrent connections")]
    ConnectionOver,

    #[error("not logged in")]
    NotLoggedIn,

    #[error("session token expired")]
    SessionExpired,

    #[error("bucket name is empty")]
    BucketName,

    #[error("object id is empty")]
    ObjectId,

    #[error("API name is empty")]
    ApiName,

    #[error("content type is empty")]
    ContentType,

    /// Timeout, DNS failure, refused connection, I/O error mid-transfer.
    #[error("transfer runtime error")]
    TransferRuntime,

    /// The transfer engine was handed something it cannot use (bad URL,
    /// bad proxy, unreadable TLS material).
    #[error("transfer logic error")]
    TransferLogic,

    #[error("unexpected transfer error")]
    TransferFatal,

    /// Internal misuse, e.g. a file download requested with a non-GET method.
    #[error("internal error")]
    Fatal,
}

/// A fully parsed HTTP response whose status is outside 2xx.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("HTTP {status_code}: {reason}")]
pub struct RestError {
    pub status_code: u16,
    /// Response body, passed through verbatim (usually JSON text).
    pub reason: String,
}

/// Failure category reported by an `HttpEngine`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("runtime transfer failure: {0}")]
    Runtime(String),

    #[error("transfer misuse: {0}")]
    Logic(String),

    #[error("unexpected transfer failure: {0}")]
    Unexpected(String),
}

impl TransferError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TransferError::Runtime(_) => ErrorCode::TransferRuntime,
            TransferError::Logic(_) => ErrorCode::TransferLogic,
            TransferError::Unexpected(_) => ErrorCode::TransferFatal,
        }
    }
}

/// `std::result::Result`-friendly view of a failed `BaasResult`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Rest(#[from] RestError),

    #[error("{0}")]
    Fatal(#[from] ErrorCode),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_error_categories_map_to_distinct_codes() {
        assert_eq!(TransferError::Runtime("timeout".into()).code(), ErrorCode::TransferRuntime);
        assert_eq!(TransferError::Logic("bad url".into()).code(), ErrorCode::TransferLogic);
        assert_eq!(TransferError::Unexpected("?".into()).code(), ErrorCode::TransferFatal);
    }

    #[test]
    fn rest_error_display_includes_status_and_body() {
        let err = RestError {
            status_code: 404,
            reason: r#"{"error":"not found"}"#.to_string(),
        };
        assert_eq!(err.to_string(), r#"HTTP 404: {"error":"not found"}"#);
    }

    #[test]
    fn error_converts_from_code() {
        let err: Error = ErrorCode::ConnectionOver.into();
        assert_eq!(err, Error::Fatal(ErrorCode::ConnectionOver));
        assert_eq!(err.to_string(), "too many concurrent connections");
    }
}
