//! Transport executor: one engine, one transfer at a time.
//!
//! # Design
//! `RestExecutor` owns its `HttpEngine` exclusively and takes `&mut self` for
//! every transfer, so two threads can never drive the same engine. Executors
//! live in an `ExecutorPool`; standalone ones (pool id 0) are only useful in
//! tests. Every entry point funnels into `make_result`, the single place that
//! turns "what the engine said" plus "what the sink holds" into a
//! `BaasResult`.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use crate::config::DEFAULT_TIMEOUT_SECS;
use crate::engine::{HttpEngine, Transfer, Upload};
use crate::error::{ErrorCode, RestError, TransferError};
use crate::handler::{FileDownloadSink, ResponseBuffer};
use crate::http::{
    HttpMethod, HttpRequest, HttpResponse, HEADER_APP_KEY, HEADER_CONTENT_LENGTH, HEADER_SESSION_TOKEN,
    HEADER_X_CONTENT_LENGTH,
};
use crate::result::BaasResult;

pub struct RestExecutor<E> {
    engine: E,
    pool_id: u64,
    id: usize,
}

impl<E: HttpEngine> RestExecutor<E> {
    /// An executor that belongs to no pool.
    pub fn new(engine: E) -> Self {
        Self::pooled(engine, 0, 0)
    }

    pub(crate) fn pooled(engine: E, pool_id: u64, id: usize) -> Self {
        Self { engine, pool_id, id }
    }

    /// Creation index within the owning pool.
    pub fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub fn execute_request(&mut self, request: &HttpRequest, timeout: i32) -> BaasResult<HttpResponse> {
        tracing::trace!(executor = self.id, "execute request");
        dump_request(request);

        let mut sink = ResponseBuffer::new();
        let outcome = self.engine.perform(Transfer {
            request,
            timeout: resolve_timeout(timeout),
            upload: None,
            sink: &mut sink,
        });
        make_result(outcome, sink.parse())
    }

    /// Stream `path` as the body of a PUT (overwrite) or POST (new file).
    pub fn execute_file_upload(
        &mut self,
        request: &HttpRequest,
        path: &Path,
        timeout: i32,
    ) -> BaasResult<HttpResponse> {
        tracing::trace!(executor = self.id, path = %path.display(), "execute file upload");
        dump_request(request);

        let (mut file, length) = match File::open(path).and_then(|file| {
            let length = file.metadata()?.len();
            Ok((file, length))
        }) {
            Ok(opened) => opened,
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "cannot open upload source");
                return BaasResult::FatalError(ErrorCode::OpenFile);
            }
        };

        if !matches!(request.method, HttpMethod::Put | HttpMethod::Post) {
            tracing::error!(method = %request.method, "file upload requires PUT or POST");
            return BaasResult::FatalError(ErrorCode::Fatal);
        }

        let mut request = request.clone();
        request.headers.push(format!("{HEADER_CONTENT_LENGTH}: {length}"));

        let mut sink = ResponseBuffer::new();
        let outcome = self.engine.perform(Transfer {
            request: &request,
            timeout: resolve_timeout(timeout),
            upload: Some(Upload {
                reader: &mut file,
                length,
            }),
            sink: &mut sink,
        });
        make_result(outcome, sink.parse())
    }

    /// GET into `path`, then verify the byte count against
    /// `X-Content-Length`.
    pub fn execute_file_download(
        &mut self,
        request: &HttpRequest,
        path: &Path,
        timeout: i32,
    ) -> BaasResult<HttpResponse> {
        tracing::trace!(executor = self.id, path = %path.display(), "execute file download");
        dump_request(request);

        let mut sink = match FileDownloadSink::create(path) {
            Ok(sink) => sink,
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "cannot open download destination");
                return BaasResult::FatalError(ErrorCode::OpenFile);
            }
        };

        if request.method != HttpMethod::Get {
            tracing::error!(method = %request.method, "file download requires GET");
            return BaasResult::FatalError(ErrorCode::Fatal);
        }

        let outcome = self.engine.perform(Transfer {
            request,
            timeout: resolve_timeout(timeout),
            upload: None,
            sink: &mut sink,
        });
        let (response, written) = sink.finish();

        match make_result(outcome, response) {
            BaasResult::Success(response) if !download_size_matches(&response, written) => {
                tracing::error!(written, "downloaded size differs from X-Content-Length");
                BaasResult::FatalError(ErrorCode::FileDownload)
            }
            other => other,
        }
    }
}

/// Non-positive timeouts fall back to the default.
fn resolve_timeout(secs: i32) -> Duration {
    let secs = if secs <= 0 { DEFAULT_TIMEOUT_SECS } else { secs };
    Duration::from_secs(secs.unsigned_abs().into())
}

fn download_size_matches(response: &HttpResponse, written: u64) -> bool {
    let Some(declared) = response.header(HEADER_X_CONTENT_LENGTH) else {
        tracing::error!("download response carries no X-Content-Length");
        return false;
    };
    declared.trim().parse::<u64>().is_ok_and(|declared| declared == written)
}

/// A transfer failure wins unless an error response was already parsed;
/// then the server's answer is the more useful outcome.
fn make_result(outcome: Result<(), TransferError>, response: HttpResponse) -> BaasResult<HttpResponse> {
    if let Err(err) = outcome {
        if response.status_code < 300 {
            tracing::error!(error = %err, status = response.status_code, "transfer failed");
            return BaasResult::FatalError(err.code());
        }
        tracing::warn!(error = %err, status = response.status_code, "transfer failed after error response");
    }

    tracing::debug!(
        status = response.status_code,
        reason = %response.reason_phrase,
        headers = response.headers.len(),
        body_len = response.body.len(),
        "response"
    );

    if response.status_code == 0 {
        tracing::error!("response has no status code");
        return BaasResult::FatalError(ErrorCode::IncorrectResponse);
    }
    if response.is_success() {
        BaasResult::Success(response)
    } else {
        BaasResult::RestError(RestError {
            status_code: response.status_code,
            reason: response.body_text(),
        })
    }
}

fn dump_request(request: &HttpRequest) {
    if !tracing::enabled!(tracing::Level::TRACE) {
        return;
    }
    let header_names: Vec<&str> = request.header_pairs().map(|(key, _)| key).collect();
    let has_session = request.header(HEADER_SESSION_TOKEN).is_some();
    let has_app_key = request.header(HEADER_APP_KEY).is_some();
    tracing::trace!(
        method = %request.method,
        url = %request.url,
        headers = ?header_names,
        has_app_key,
        has_session,
        body_len = request.body.len(),
        "request"
    );
}
