//! Scripted engine for unit tests.

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::{HttpEngine, Transfer};
use crate::error::TransferError;
use crate::http::HttpRequest;

/// What a `FakeEngine` replays on every transfer.
#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    header_lines: Vec<String>,
    chunks: Vec<Vec<u8>>,
    failure: Option<TransferError>,
}

impl Script {
    /// Nothing at all is received.
    pub(crate) fn silent() -> Self {
        Self::default()
    }

    pub(crate) fn status(code: u16, reason: &str) -> Self {
        Self {
            header_lines: vec![format!("HTTP/1.1 {code} {reason}\r\n")],
            ..Self::default()
        }
    }

    pub(crate) fn ok(body: &str) -> Self {
        Self::status(200, "OK").body(body)
    }

    pub(crate) fn header(mut self, key: &str, value: &str) -> Self {
        self.header_lines.push(format!("{key}: {value}\r\n"));
        self
    }

    pub(crate) fn body(mut self, chunk: impl Into<Vec<u8>>) -> Self {
        self.chunks.push(chunk.into());
        self
    }

    /// Deliver everything, then fail.
    pub(crate) fn fail(mut self, err: TransferError) -> Self {
        self.failure = Some(err);
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct Recorded {
    pub(crate) calls: usize,
    pub(crate) requests: Vec<HttpRequest>,
    pub(crate) uploads: Vec<Vec<u8>>,
    pub(crate) timeouts: Vec<Duration>,
}

/// Clones share one script and one record, so a test can keep a handle
/// while the pool owns the engines.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeEngine {
    script: Arc<Mutex<Script>>,
    recorded: Arc<Mutex<Recorded>>,
}

impl FakeEngine {
    pub(crate) fn new(script: Script) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            recorded: Arc::default(),
        }
    }

    pub(crate) fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub(crate) fn calls(&self) -> usize {
        self.recorded.lock().unwrap().calls
    }

    pub(crate) fn last_request(&self) -> Option<HttpRequest> {
        self.recorded.lock().unwrap().requests.last().cloned()
    }

    pub(crate) fn last_upload(&self) -> Option<Vec<u8>> {
        self.recorded.lock().unwrap().uploads.last().cloned()
    }

    pub(crate) fn last_timeout(&self) -> Option<Duration> {
        self.recorded.lock().unwrap().timeouts.last().copied()
    }
}

impl HttpEngine for FakeEngine {
    fn perform(&mut self, transfer: Transfer<'_>) -> Result<(), TransferError> {
        let script = self.script.lock().unwrap().clone();
        {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.calls += 1;
            recorded.requests.push(transfer.request.clone());
            recorded.timeouts.push(transfer.timeout);
            if let Some(upload) = transfer.upload {
                let mut bytes = Vec::new();
                upload.reader.read_to_end(&mut bytes).unwrap();
                recorded.uploads.push(bytes);
            }
        }

        for line in &script.header_lines {
            transfer.sink.header_line(line);
        }
        if !script.header_lines.is_empty() {
            transfer.sink.header_line("\r\n");
        }
        for chunk in &script.chunks {
            transfer
                .sink
                .write_body(chunk)
                .map_err(|err| TransferError::Runtime(err.to_string()))?;
        }
        match script.failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
