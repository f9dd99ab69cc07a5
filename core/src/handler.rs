//! Response sinks fed by an `HttpEngine` during a transfer.
//!
//! # Design
//! The engine pushes raw header lines (CRLF-terminated, status line first)
//! and body chunks into a `ResponseSink`. `ResponseBuffer` keeps both in
//! memory and parses them into an `HttpResponse` once the transfer is over.
//! `FileDownloadSink` streams the body of a 200 response to disk instead and
//! falls back to buffering for any other status, so error payloads stay
//! readable.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::http::HttpResponse;

const STATUS_LINE_MARKERS: [&str; 2] = ["HTTP/1.1 ", "HTTP/1.0 "];
const STATUS_CODE_LEN: usize = 3;

/// Receiver for the raw response stream of one transfer.
pub trait ResponseSink {
    fn header_line(&mut self, line: &str);

    /// An error aborts the transfer.
    fn write_body(&mut self, chunk: &[u8]) -> io::Result<()>;
}

/// Buffers the whole response in memory.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    header_lines: Vec<String>,
    body: Vec<u8>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the last status line. Searching backwards skips the
    /// `CONNECT` response a proxy sends before the real one.
    fn status_line_index(&self) -> Option<usize> {
        self.header_lines.iter().rposition(|line| {
            line.len() > STATUS_LINE_MARKERS[0].len() + STATUS_CODE_LEN
                && STATUS_LINE_MARKERS.iter().any(|marker| line.starts_with(marker))
        })
    }

    /// Status code of the last status line seen so far, or 0.
    pub fn status_code(&self) -> u16 {
        self.status_line_index()
            .map(|index| parse_status_line(&self.header_lines[index]).0)
            .unwrap_or(0)
    }

    pub fn parse(self) -> HttpResponse {
        let Some(index) = self.status_line_index() else {
            if !self.header_lines.is_empty() {
                tracing::error!("response carries no status line");
            }
            return HttpResponse {
                body: self.body,
                ..HttpResponse::default()
            };
        };

        let (status_code, reason_phrase) = parse_status_line(&self.header_lines[index]);
        let headers = self.header_lines[index + 1..]
            .iter()
            .filter_map(|line| parse_header_line(line))
            .collect();

        HttpResponse {
            status_code,
            reason_phrase,
            headers,
            body: self.body,
        }
    }
}

impl ResponseSink for ResponseBuffer {
    fn header_line(&mut self, line: &str) {
        self.header_lines.push(line.to_string());
    }

    fn write_body(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.body.extend_from_slice(chunk);
        Ok(())
    }
}

/// Split `HTTP/1.1 200 OK\r\n` into `(200, "OK")`. A non-numeric code
/// yields 0; the reason is only taken when a space follows the code.
fn parse_status_line(line: &str) -> (u16, String) {
    let marker_len = STATUS_LINE_MARKERS[0].len();
    let code_end = marker_len + STATUS_CODE_LEN;
    let status_code = line
        .get(marker_len..code_end)
        .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);

    let reason_phrase = match line.get(code_end..) {
        Some(rest) if rest.len() > 1 && rest.starts_with(' ') => strip_crlf(&rest[1..]).to_string(),
        _ => String::new(),
    };
    (status_code, reason_phrase)
}

/// Split `Key: value\r\n` at the first colon. Lines without a colon (the
/// blank terminator, malformed input) are skipped.
fn parse_header_line(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(':')?;
    let value = strip_crlf(value).trim_start_matches(' ');
    Some((key.to_string(), value.to_string()))
}

/// Drop the CRLF terminator. A line too short to carry one is malformed
/// and yields an empty value.
fn strip_crlf(text: &str) -> &str {
    text.strip_suffix("\r\n").unwrap_or_else(|| {
        if text.len() >= 2 {
            text.trim_end_matches(['\r', '\n'])
        } else {
            ""
        }
    })
}

/// Writes a 200 response body to a local file.
#[derive(Debug)]
pub struct FileDownloadSink {
    buffer: ResponseBuffer,
    file: File,
    status_code: u16,
    bytes_written: u64,
}

impl FileDownloadSink {
    /// Create or truncate the destination file.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            buffer: ResponseBuffer::new(),
            file: File::create(path)?,
            status_code: 0,
            bytes_written: 0,
        })
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Status is resolved lazily from the header lines received so far.
    fn status_code(&mut self) -> u16 {
        if self.status_code == 0 {
            self.status_code = self.buffer.status_code();
        }
        self.status_code
    }

    /// Flush the file and hand back the parsed response plus bytes on disk.
    pub fn finish(mut self) -> (HttpResponse, u64) {
        if let Err(err) = self.file.flush() {
            tracing::error!(error = %err, "failed to flush downloaded file");
        }
        (self.buffer.parse(), self.bytes_written)
    }
}

impl ResponseSink for FileDownloadSink {
    fn header_line(&mut self, line: &str) {
        self.buffer.header_line(line);
    }

    fn write_body(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.status_code() != 200 {
            tracing::debug!(status = self.status_code, "buffering non-200 download body");
            return self.buffer.write_body(chunk);
        }
        self.file.write_all(chunk).inspect_err(|err| {
            tracing::error!(error = %err, "failed to write downloaded file");
        })?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }
}
