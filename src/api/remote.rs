//! Purpose: Stream link values from a dump served over HTTP(S).
//! Exports: `RemoteStreamer`.
//! Role: Thin composition of a blocking `ureq` GET with `Extractor::extract`.
//! Invariants: The body is handed to the extractor as soon as headers arrive; nothing is buffered whole.
//! Invariants: Transport and status failures surface as errors; there are no retries.
//! Invariants: Offset and cancellation are forwarded to the extractor unchanged.
//! Invariants: A raised token ends a pending request or a stalled body read within one poll interval.
#![allow(clippy::result_large_err)]

use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use url::Url;

use crate::core::cancel::CancelToken;
use crate::core::error::{Error, ErrorKind};
use crate::core::extract::{ExtractOptions, Extraction, Extractor};

type ApiResult<T> = Result<T, Error>;

const USER_AGENT: &str = concat!(
    "extlinks/",
    env!("CARGO_PKG_VERSION"),
    " (externallinks dump reader)"
);

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);
// Blocked waits wake this often to look at the cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(50);
const BODY_CHUNK_BYTES: usize = 64 * 1024;
const BODY_QUEUE_CHUNKS: usize = 4;

#[derive(Clone)]
struct AgentSettings {
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    tls_config: Option<Arc<ureq::rustls::ClientConfig>>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            tls_config: None,
        }
    }
}

#[derive(Clone)]
pub struct RemoteStreamer {
    extractor: Extractor,
    settings: AgentSettings,
    agent: ureq::Agent,
}

impl RemoteStreamer {
    pub fn new(extractor: Extractor) -> Self {
        let settings = AgentSettings::default();
        let agent = build_agent(&settings);
        Self {
            extractor,
            settings,
            agent,
        }
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Replaces the HTTP agent outright; later `with_timeouts`/`with_tls_ca_file` rebuild it.
    pub fn with_agent(mut self, agent: ureq::Agent) -> Self {
        self.agent = agent;
        self
    }

    /// Defaults are 30s to connect and 300s per read; `None` waits indefinitely.
    pub fn with_timeouts(mut self, connect: Option<Duration>, read: Option<Duration>) -> Self {
        self.settings.connect_timeout = connect;
        self.settings.read_timeout = read;
        self.agent = build_agent(&self.settings);
        self
    }

    pub fn with_tls_ca_file(mut self, path: impl AsRef<Path>) -> ApiResult<Self> {
        let path = path.as_ref();
        let cert_bytes = std::fs::read(path).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("failed to read TLS CA/certificate file")
                .with_path(path)
                .with_source(err)
        })?;
        let mut cert_reader = Cursor::new(cert_bytes);
        let certs = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message("failed to parse TLS CA/certificate file")
                    .with_path(path)
                    .with_source(err)
            })?;
        if certs.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("TLS CA/certificate file contains no certificates")
                .with_path(path));
        }

        let _ = ureq::rustls::crypto::aws_lc_rs::default_provider().install_default();
        let mut root_store = ureq::rustls::RootCertStore::empty();
        let (added, _) = root_store.add_parsable_certificates(certs);
        if added == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("TLS CA/certificate file contains no parsable certificates")
                .with_path(path));
        }

        let tls_config = ureq::rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        self.settings.tls_config = Some(Arc::new(tls_config));
        self.agent = build_agent(&self.settings);
        Ok(self)
    }

    /// Fetches `uri` and extracts its links starting at `options.offset()`.
    pub fn stream(&self, uri: &str, options: ExtractOptions) -> ApiResult<Extraction> {
        let url = parse_dataset_url(uri)?;
        options.cancel().check()?;
        tracing::info!(url = %url, offset = options.offset(), "requesting dump");

        let response = self.send(&url, options.cancel())?;
        tracing::debug!(
            status = response.status(),
            content_length = response.header("Content-Length").unwrap_or("-"),
            content_type = response.header("Content-Type").unwrap_or("-"),
            "dump response headers received"
        );

        options.cancel().check()?;
        let body = CancellableBody::spawn(response.into_reader(), options.cancel().clone())?;
        self.extractor.extract(body, options)
    }

    /// Issues the GET on a helper thread so a raised token can abandon it before headers arrive.
    fn send(&self, url: &Url, cancel: &CancelToken) -> ApiResult<ureq::Response> {
        let (tx, rx) = mpsc::sync_channel(1);
        let agent = self.agent.clone();
        let target = url.to_string();
        thread::Builder::new()
            .name("extlinks-fetch".to_string())
            .spawn(move || {
                let _ = tx.send(agent.get(&target).call());
            })
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to start request thread")
                    .with_source(err)
            })?;

        let result = loop {
            match rx.recv_timeout(CANCEL_POLL) {
                Ok(result) => break result,
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.is_cancelled() {
                        tracing::debug!(url = %url, "request abandoned after cancellation");
                        return Err(Error::cancelled());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::new(ErrorKind::Internal)
                        .with_message("request thread exited without a response"));
                }
            }
        };
        match result {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(code, _)) => Err(status_error(code, url)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Io)
                .with_message(format!("request for {url} failed"))
                .with_source(err)),
        }
    }
}

/// Response body pumped through a bounded queue by a helper thread.
///
/// A read that is waiting on the network fails once the token is raised; the
/// helper notices the dropped queue on its next chunk and releases the connection.
struct CancellableBody {
    chunks: Receiver<io::Result<Vec<u8>>>,
    current: Cursor<Vec<u8>>,
    cancel: CancelToken,
    done: bool,
}

impl CancellableBody {
    fn spawn<R>(mut reader: R, cancel: CancelToken) -> ApiResult<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, chunks) = mpsc::sync_channel(BODY_QUEUE_CHUNKS);
        thread::Builder::new()
            .name("extlinks-body".to_string())
            .spawn(move || {
                loop {
                    let mut chunk = vec![0u8; BODY_CHUNK_BYTES];
                    match reader.read(&mut chunk) {
                        Ok(len) => {
                            chunk.truncate(len);
                            if tx.send(Ok(chunk)).is_err() || len == 0 {
                                return;
                            }
                        }
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(err) => {
                            let _ = tx.send(Err(err));
                            return;
                        }
                    }
                }
            })
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to start body reader thread")
                    .with_source(err)
            })?;
        Ok(Self {
            chunks,
            current: Cursor::new(Vec::new()),
            cancel,
            done: false,
        })
    }
}

impl Read for CancellableBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let len = self.current.read(buf)?;
            if len > 0 || buf.is_empty() || self.done {
                return Ok(len);
            }
            match self.chunks.recv_timeout(CANCEL_POLL) {
                Ok(Ok(chunk)) => {
                    self.done = chunk.is_empty();
                    self.current = Cursor::new(chunk);
                }
                Ok(Err(err)) => {
                    self.done = true;
                    return Err(err);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.cancel.is_cancelled() {
                        return Err(io::Error::other("dump transfer cancelled"));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.done = true;
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "body reader stopped before the end of the response",
                    ));
                }
            }
        }
    }
}

impl std::fmt::Debug for RemoteStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStreamer")
            .field("extractor", &self.extractor)
            .field("connect_timeout", &self.settings.connect_timeout)
            .field("read_timeout", &self.settings.read_timeout)
            .field("custom_ca", &self.settings.tls_config.is_some())
            .finish()
    }
}

fn build_agent(settings: &AgentSettings) -> ureq::Agent {
    let mut builder = ureq::AgentBuilder::new().user_agent(USER_AGENT);
    if let Some(timeout) = settings.connect_timeout {
        builder = builder.timeout_connect(timeout);
    }
    if let Some(timeout) = settings.read_timeout {
        builder = builder.timeout_read(timeout);
    }
    if let Some(tls_config) = &settings.tls_config {
        builder = builder.tls_config(Arc::clone(tls_config));
    }
    builder.build()
}

fn parse_dataset_url(uri: &str) -> ApiResult<Url> {
    let url = Url::parse(uri).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid dataset uri `{uri}`"))
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("dataset uri must use http or https scheme")
            .with_hint("Use `extlinks extract <PATH>` for local files."));
    }
    Ok(url)
}

fn status_error(status: u16, url: &Url) -> Error {
    Error::new(error_kind_from_status(status))
        .with_message(format!("remote returned status {status} for {url}"))
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        404 | 410 => ErrorKind::NotFound,
        401 | 403 => ErrorKind::Permission,
        400..=499 => ErrorKind::Usage,
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::{CancellableBody, RemoteStreamer, error_kind_from_status, parse_dataset_url};
    use crate::core::cancel::CancelToken;
    use std::io::{self, Read};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    struct Stalled(mpsc::Receiver<()>);

    impl Read for Stalled {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }
    use crate::core::error::ErrorKind;
    use crate::core::extract::{ExtractOptions, Extractor};

    #[test]
    fn parse_dataset_url_accepts_http_and_https() {
        let url = parse_dataset_url(
            "https://dumps.wikimedia.org/enwiki/latest/enwiki-latest-externallinks.sql.gz",
        )
        .expect("url");
        assert_eq!(url.host_str(), Some("dumps.wikimedia.org"));
        assert!(parse_dataset_url("http://localhost:8080/x.sql").is_ok());
    }

    #[test]
    fn parse_dataset_url_rejects_other_schemes() {
        let err = parse_dataset_url("ftp://example.com/x.sql.gz").expect_err("scheme");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = parse_dataset_url("not a url").expect_err("garbage");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn status_kinds_are_stable() {
        assert_eq!(error_kind_from_status(404), ErrorKind::NotFound);
        assert_eq!(error_kind_from_status(403), ErrorKind::Permission);
        assert_eq!(error_kind_from_status(416), ErrorKind::Usage);
        assert_eq!(error_kind_from_status(503), ErrorKind::Io);
    }

    #[test]
    fn cancelled_token_skips_the_request() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let streamer = RemoteStreamer::new(Extractor::default());
        // Port 9 (discard) is never contacted because cancellation is checked first.
        let err = streamer
            .stream(
                "http://127.0.0.1:9/dump.sql.gz",
                ExtractOptions::new().with_cancel(cancel),
            )
            .expect_err("cancelled");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn missing_ca_file_is_usage_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = RemoteStreamer::new(Extractor::default())
            .with_tls_ca_file(dir.path().join("missing.pem"))
            .expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn body_passes_chunks_through_in_order() {
        let data = (0..200_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        let mut body = CancellableBody::spawn(io::Cursor::new(data.clone()), CancelToken::new())
            .expect("spawn");
        let mut out = Vec::new();
        body.read_to_end(&mut out).expect("read");
        assert_eq!(out, data);
    }

    #[test]
    fn raised_token_ends_a_stalled_body_read() {
        let (_hold, rx) = mpsc::channel::<()>();
        let cancel = CancelToken::new();
        let mut body = CancellableBody::spawn(Stalled(rx), cancel.clone()).expect("spawn");
        let raiser = cancel.clone();
        let started = Instant::now();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            raiser.cancel();
        });
        let mut buf = [0u8; 16];
        let err = body.read(&mut buf).expect_err("cancelled");
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
