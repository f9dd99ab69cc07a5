//! Transfer engines: the code that actually moves bytes over the network.
//!
//! # Design
//! An `HttpEngine` performs one transfer at a time and is not shared between
//! threads; `ExecutorPool` hands each engine to exactly one operation. The
//! engine reports what it receives through a `ResponseSink` in wire order
//! (status line, header lines, blank line, body chunks) and pulls upload
//! bodies from a plain `Read`. Failures are reported by category only; the
//! executor decides what a failure means given what the sink already holds.

use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::time::Duration;

use ureq::tls::{Certificate, ClientCert, PemItem, PrivateKey, RootCerts, TlsConfig};
use ureq::SendBody;

use crate::error::TransferError;
use crate::handler::ResponseSink;
use crate::http::{HttpMethod, HttpOptions, HttpRequest};

const READ_CHUNK_SIZE: usize = 16 * 1024;

/// A request body streamed from a reader.
pub struct Upload<'a> {
    pub reader: &'a mut dyn Read,
    /// Declared size, already present as `Content-Length` in the request.
    pub length: u64,
}

/// Everything one transfer needs.
pub struct Transfer<'a> {
    pub request: &'a HttpRequest,
    /// Applies to the whole exchange, connect included.
    pub timeout: Duration,
    /// Replaces `request.body` when present.
    pub upload: Option<Upload<'a>>,
    pub sink: &'a mut dyn ResponseSink,
}

pub trait HttpEngine: Send {
    fn perform(&mut self, transfer: Transfer<'_>) -> Result<(), TransferError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AgentSettings {
    proxy: String,
    timeout: Duration,
    options: HttpOptions,
}

/// Engine backed by a single `ureq::Agent`.
///
/// The agent is rebuilt only when proxy, timeout or TLS settings differ from
/// the previous transfer.
#[derive(Default)]
pub struct UreqEngine {
    agent: Option<(AgentSettings, ureq::Agent)>,
}

impl UreqEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn agent(&mut self, settings: AgentSettings) -> Result<ureq::Agent, TransferError> {
        if let Some((current, agent)) = &self.agent {
            if *current == settings {
                return Ok(agent.clone());
            }
        }
        tracing::debug!(proxy = %settings.proxy, timeout_secs = settings.timeout.as_secs(), "building transfer agent");
        let agent = build_agent(&settings)?;
        self.agent = Some((settings, agent.clone()));
        Ok(agent)
    }
}

impl HttpEngine for UreqEngine {
    fn perform(&mut self, transfer: Transfer<'_>) -> Result<(), TransferError> {
        let Transfer {
            request,
            timeout,
            upload,
            sink,
        } = transfer;

        let agent = self.agent(AgentSettings {
            proxy: request.proxy.clone(),
            timeout,
            options: request.options.clone(),
        })?;

        let mut builder = ureq::http::Request::builder()
            .method(request.method.as_str())
            .uri(request.url.as_str());
        for (key, value) in request.header_pairs() {
            builder = builder.header(key, value);
        }

        let result = match (upload, request.method) {
            (Some(upload), _) => {
                tracing::trace!(length = upload.length, "streaming request body");
                let req = builder.body(SendBody::from_reader(upload.reader)).map_err(logic_error)?;
                agent.run(req)
            }
            (None, HttpMethod::Get | HttpMethod::Delete) => {
                agent.run(builder.body(()).map_err(logic_error)?)
            }
            (None, HttpMethod::Post | HttpMethod::Put) => {
                agent.run(builder.body(request.body.as_slice()).map_err(logic_error)?)
            }
        };
        let mut response = result.map_err(classify)?;

        let version = if response.version() == ureq::http::Version::HTTP_10 {
            "HTTP/1.0"
        } else {
            "HTTP/1.1"
        };
        let status = response.status();
        // ureq drops the wire reason phrase; the canonical one stands in.
        sink.header_line(&format!(
            "{version} {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        ));
        for (name, value) in response.headers() {
            sink.header_line(&format!(
                "{}: {}\r\n",
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes())
            ));
        }
        sink.header_line("\r\n");

        let mut reader = response.body_mut().as_reader();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let read = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransferError::Runtime(format!("reading response body: {err}"))),
            };
            sink.write_body(&chunk[..read])
                .map_err(|err| TransferError::Runtime(format!("response sink rejected body: {err}")))?;
        }
        Ok(())
    }
}

fn logic_error(err: ureq::http::Error) -> TransferError {
    TransferError::Logic(err.to_string())
}

fn classify(err: ureq::Error) -> TransferError {
    match &err {
        ureq::Error::BadUri(_)
        | ureq::Error::Http(_)
        | ureq::Error::InvalidProxyUrl
        | ureq::Error::RequireHttpsOnly(_) => TransferError::Logic(err.to_string()),
        ureq::Error::Io(_)
        | ureq::Error::Timeout(_)
        | ureq::Error::HostNotFound
        | ureq::Error::ConnectionFailed
        | ureq::Error::ConnectProxyFailed(_)
        | ureq::Error::Protocol(_)
        | ureq::Error::Tls(_) => TransferError::Runtime(err.to_string()),
        _ => TransferError::Unexpected(err.to_string()),
    }
}

fn build_agent(settings: &AgentSettings) -> Result<ureq::Agent, TransferError> {
    // Empty means "no proxy", including any proxy named in the environment.
    let proxy = if settings.proxy.is_empty() {
        None
    } else {
        Some(
            ureq::Proxy::new(&settings.proxy)
                .map_err(|err| TransferError::Logic(format!("invalid proxy {}: {err}", settings.proxy)))?,
        )
    };

    let config = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(settings.timeout))
        .proxy(proxy)
        .tls_config(tls_config(&settings.options)?)
        .build();
    Ok(config.new_agent())
}

fn tls_config(options: &HttpOptions) -> Result<TlsConfig, TransferError> {
    let mut builder = TlsConfig::builder().disable_verification(!options.verify_peer);

    let mut roots = Vec::new();
    if let Some(path) = &options.ca_info {
        roots.extend(read_certificates(path)?);
    }
    if let Some(dir) = &options.ca_path {
        let entries = fs::read_dir(dir).map_err(|err| tls_error(dir, err))?;
        for entry in entries {
            let path = entry.map_err(|err| tls_error(dir, err))?.path();
            if path.is_file() {
                roots.extend(read_certificates(&path)?);
            }
        }
    }
    if !roots.is_empty() {
        builder = builder.root_certs(RootCerts::new_with_certs(&roots));
    }

    match (&options.client_cert, &options.client_key) {
        (Some(cert), Some(key)) => {
            let chain = read_certificates(cert)?;
            let pem = fs::read(key).map_err(|err| tls_error(key, err))?;
            let key = PrivateKey::from_pem(&pem).map_err(|err| tls_error(key, err))?;
            builder = builder.client_cert(Some(ClientCert::new_with_certs(&chain, key)));
        }
        (None, None) => {}
        _ => {
            return Err(TransferError::Logic(
                "client certificate and key must be configured together".to_string(),
            ))
        }
    }

    Ok(builder.build())
}

fn read_certificates(path: &Path) -> Result<Vec<Certificate<'static>>, TransferError> {
    let pem = fs::read(path).map_err(|err| tls_error(path, err))?;
    let mut certs = Vec::new();
    for item in ureq::tls::parse_pem(&pem) {
        if let PemItem::Certificate(cert) = item.map_err(|err| tls_error(path, err))? {
            certs.push(cert);
        }
    }
    Ok(certs)
}

fn tls_error(path: &Path, err: impl std::fmt::Display) -> TransferError {
    TransferError::Logic(format!("TLS material {}: {err}", path.display()))
}
