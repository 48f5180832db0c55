//! The physical HTTP exchange.
//!
//! [`Transport`] performs exactly one request/response exchange and knows
//! nothing about retries. [`ReqwestTransport`] is the default implementation.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::HeaderMap;
use reqwest::{redirect, Method, StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::body::BodyStream;
use crate::{NetterError, Result, TransportOptions};

type BoxError = Box<dyn StdError + Send + Sync>;

/// What went wrong in the transport, as far as retrying is concerned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportErrorKind {
    /// The redirect limit was reached.
    TooManyRedirects,
    /// The server certificate is signed by an unknown authority.
    UnknownCertificateAuthority,
    /// The URL scheme is not one the transport speaks.
    UnsupportedScheme,
    /// The exchange timed out.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// The exchange was aborted by cancellation.
    Cancelled,
    /// Any other I/O or protocol failure.
    Other,
}

impl TransportErrorKind {
    /// Structural failures that another attempt cannot fix.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::TooManyRedirects | Self::UnknownCertificateAuthority | Self::UnsupportedScheme
        )
    }

    /// Infers the kind from an error and its source chain.
    pub fn of(err: &(dyn StdError + 'static)) -> Self {
        if let Some(err) = err.downcast_ref::<reqwest::Error>() {
            if err.is_redirect() {
                return Self::TooManyRedirects;
            }
        }

        let chain = chain_text(err);
        if ["unknownissuer", "unknown issuer", "unable to get local issuer"]
            .iter()
            .any(|needle| chain.contains(needle))
        {
            return Self::UnknownCertificateAuthority;
        }
        if [
            "scheme is not allowed",
            "unsupported protocol scheme",
            "unsupported scheme",
        ]
        .iter()
        .any(|needle| chain.contains(needle))
        {
            return Self::UnsupportedScheme;
        }
        if chain.contains("stopped after") && chain.contains("redirects") {
            return Self::TooManyRedirects;
        }

        if let Some(err) = err.downcast_ref::<reqwest::Error>() {
            if err.is_timeout() {
                return Self::Timeout;
            }
            if err.is_connect() {
                return Self::Connect;
            }
        }
        if let Some(err) = err.downcast_ref::<std::io::Error>() {
            match err.kind() {
                std::io::ErrorKind::TimedOut => return Self::Timeout,
                std::io::ErrorKind::ConnectionRefused => return Self::Connect,
                _ => {}
            }
        }
        Self::Other
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TooManyRedirects => "too many redirects",
            Self::UnknownCertificateAuthority => "unknown certificate authority",
            Self::UnsupportedScheme => "unsupported scheme",
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Cancelled => "cancelled",
            Self::Other => "io",
        })
    }
}

fn chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        text.push_str(": ");
        text.push_str(&err.to_string());
        source = err.source();
    }
    text.to_ascii_lowercase()
}

/// Error reported by a [`Transport`].
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: BoxError,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    /// Wraps an error, inferring its kind from the source chain.
    pub fn from_source(source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Self {
            kind: TransportErrorKind::of(&*source),
            source,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(TransportErrorKind::Cancelled, "exchange aborted")
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::from_source(err)
    }
}

/// Incrementally readable response body.
#[async_trait]
pub trait ResponseBody: Send {
    /// Returns the next chunk, or `None` at the end of the body.
    async fn chunk(&mut self) -> std::result::Result<Option<Bytes>, TransportError>;

    /// Returns the next chunk of at most `max` bytes.
    ///
    /// The default defers to [`chunk`](Self::chunk), so bodies that cannot
    /// split their frames may return more than `max`.
    async fn chunk_max(
        &mut self,
        max: usize,
    ) -> std::result::Result<Option<Bytes>, TransportError> {
        let _ = max;
        self.chunk().await
    }
}

#[async_trait]
impl ResponseBody for reqwest::Response {
    async fn chunk(&mut self) -> std::result::Result<Option<Bytes>, TransportError> {
        reqwest::Response::chunk(self)
            .await
            .map_err(TransportError::from)
    }
}

/// A body that is already in memory.
struct FullBody(Option<Bytes>);

#[async_trait]
impl ResponseBody for FullBody {
    async fn chunk(&mut self) -> std::result::Result<Option<Bytes>, TransportError> {
        Ok(self.0.take().filter(|bytes| !bytes.is_empty()))
    }

    async fn chunk_max(
        &mut self,
        max: usize,
    ) -> std::result::Result<Option<Bytes>, TransportError> {
        let Some(rest) = self.0.as_mut().filter(|bytes| !bytes.is_empty()) else {
            return Ok(None);
        };
        if rest.len() <= max {
            return Ok(self.0.take());
        }
        Ok(Some(rest.split_to(max)))
    }
}

/// HTTP response returned by a transport.
///
/// The status is kept as a raw number since transports may report 0 when no
/// status line was read.
pub struct Response {
    status: u16,
    headers: HeaderMap,
    url: Url,
    body: Box<dyn ResponseBody>,
}

impl Response {
    pub fn new(status: u16, headers: HeaderMap, url: Url, body: impl ResponseBody + 'static) -> Self {
        Self {
            status,
            headers,
            url,
            body: Box::new(body),
        }
    }

    /// Builds a response whose body is already in memory.
    pub fn from_bytes(status: u16, url: Url, body: impl Into<Bytes>) -> Self {
        Self::new(status, HeaderMap::new(), url, FullBody(Some(body.into())))
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// The status as a [`StatusCode`], if it is a valid one.
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.status).ok()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        self.body.chunk().await.map_err(NetterError::ResponseBody)
    }

    /// Reads the whole body.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Reads the whole body as text, replacing invalid UTF-8.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| {
            NetterError::Decode(format!(
                "invalid JSON response: {err}; body: {}",
                String::from_utf8_lossy(&bytes)
            ))
        })
    }

    /// Reads and discards up to `limit` bytes, then closes the body.
    ///
    /// Returns the number of bytes pulled from the body. Bodies that only
    /// yield whole frames may overshoot by the tail of the last frame.
    pub(crate) async fn drain(mut self, limit: usize) -> std::result::Result<usize, TransportError> {
        let mut read = 0;
        while read < limit {
            match self.body.chunk_max(limit - read).await? {
                Some(chunk) => read += chunk.len(),
                None => break,
            }
        }
        Ok(read)
    }
}

impl From<reqwest::Response> for Response {
    fn from(response: reqwest::Response) -> Self {
        Self {
            status: response.status().as_u16(),
            headers: response.headers().clone(),
            url: response.url().clone(),
            body: Box::new(response),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// One physical exchange handed to a [`Transport`].
#[derive(Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<BodyStream>,
    /// Length computed when the request was built; 0 when unknown.
    pub content_length: u64,
}

/// Performs a single HTTP exchange.
///
/// Implementations must be safe to share between concurrent requests.
/// Dropping the returned future aborts the exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> std::result::Result<Response, TransportError>;
}

/// [`Transport`] backed by a pooled `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(options: &TransportOptions) -> std::result::Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(&options.user_agent)
            .redirect(redirect::Policy::limited(options.max_redirects))
            .pool_idle_timeout(Duration::from_millis(options.pool_idle_timeout_ms));

        if options.connect_timeout_ms > 0 {
            builder = builder.connect_timeout(Duration::from_millis(options.connect_timeout_ms));
        }
        if options.tcp_keepalive_ms > 0 {
            builder = builder.tcp_keepalive(Duration::from_millis(options.tcp_keepalive_ms));
        }
        if options.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(options.timeout_ms));
        }
        if !options.keep_alive {
            builder = builder.pool_max_idle_per_host(0);
        }

        let http = builder.build().map_err(TransportError::from)?;
        Ok(Self { http })
    }

    /// Uses an already configured client.
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> std::result::Result<Response, TransportError> {
        let mut builder = self
            .http
            .request(request.method, request.url)
            .headers(request.headers);

        if let Some(body) = request.body {
            // Caller readers are synchronous; keep them off the async workers.
            let payload = tokio::task::spawn_blocking(move || body.into_bytes())
                .await
                .map_err(|err| TransportError::new(TransportErrorKind::Other, err))?
                .map_err(|err| TransportError::new(TransportErrorKind::Other, err))?;
            builder = builder.body(payload);
        }

        let response = builder.send().await?;
        Ok(Response::from(response))
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;

    use super::{Response, ResponseBody, TransportError, TransportErrorKind};

    /// Yields `total` bytes in `frame`-sized chunks and counts what was pulled.
    struct CountingBody {
        total: usize,
        frame: usize,
        split: bool,
        pulled: Arc<AtomicUsize>,
    }

    impl CountingBody {
        fn take(&mut self, max: usize) -> Option<Bytes> {
            let n = self.total.min(max);
            if n == 0 {
                return None;
            }
            self.total -= n;
            self.pulled.fetch_add(n, Ordering::SeqCst);
            Some(Bytes::from(vec![b'x'; n]))
        }
    }

    #[async_trait]
    impl ResponseBody for CountingBody {
        async fn chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
            let frame = self.frame;
            Ok(self.take(frame))
        }

        async fn chunk_max(&mut self, max: usize) -> Result<Option<Bytes>, TransportError> {
            if !self.split {
                return self.chunk().await;
            }
            let max = max.min(self.frame);
            Ok(self.take(max))
        }
    }

    fn counting(total: usize, frame: usize, split: bool) -> (Response, Arc<AtomicUsize>) {
        let pulled = Arc::new(AtomicUsize::new(0));
        let body = CountingBody {
            total,
            frame,
            split,
            pulled: Arc::clone(&pulled),
        };
        let url = "http://127.0.0.1/".parse().unwrap();
        (Response::new(503, HeaderMap::new(), url, body), pulled)
    }

    #[derive(Debug, thiserror::Error)]
    #[error("error sending request")]
    struct Outer(#[source] io::Error);

    #[test]
    fn infers_terminal_kinds_from_source_chain() {
        let err = TransportError::from_source(Outer(io::Error::other(
            "invalid peer certificate: UnknownIssuer",
        )));
        assert_eq!(err.kind(), TransportErrorKind::UnknownCertificateAuthority);
        assert!(err.is_terminal());

        let err = TransportError::from_source("unsupported protocol scheme \"ftp\"");
        assert_eq!(err.kind(), TransportErrorKind::UnsupportedScheme);

        let err = TransportError::from_source("Get \"/x\": stopped after 10 redirects");
        assert_eq!(err.kind(), TransportErrorKind::TooManyRedirects);
    }

    #[test]
    fn infers_retryable_kinds() {
        let err = TransportError::from_source(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(err.kind(), TransportErrorKind::Connect);
        assert!(!err.is_terminal());

        let err = TransportError::from_source(io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(err.kind(), TransportErrorKind::Timeout);

        let err = TransportError::from_source("connection reset by peer");
        assert_eq!(err.kind(), TransportErrorKind::Other);
        assert!(!TransportError::cancelled().is_terminal());
    }

    #[tokio::test]
    async fn drain_stops_after_limit() {
        let url = "http://127.0.0.1/".parse().unwrap();
        let response = Response::from_bytes(500, url, vec![b'x'; 10_000]);
        assert_eq!(response.drain(4096).await.unwrap(), 4096);

        let url = "http://127.0.0.1/".parse().unwrap();
        let response = Response::from_bytes(500, url, vec![b'x'; 100]);
        assert_eq!(response.drain(4096).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn drain_splits_large_frames() {
        let (response, pulled) = counting(65_536, 65_536, true);
        assert_eq!(response.drain(4096).await.unwrap(), 4096);
        assert_eq!(pulled.load(Ordering::SeqCst), 4096);
    }

    #[tokio::test]
    async fn drain_of_unsplittable_frames_stops_at_first_frame_past_limit() {
        let (response, pulled) = counting(10_000, 1024, false);
        assert_eq!(response.drain(4096).await.unwrap(), 4096);
        assert_eq!(pulled.load(Ordering::SeqCst), 4096);

        let (response, pulled) = counting(65_536, 3000, false);
        assert_eq!(response.drain(4096).await.unwrap(), 6000);
        assert_eq!(pulled.load(Ordering::SeqCst), 6000);
    }

    #[tokio::test]
    async fn status_zero_has_no_status_code() {
        let url = "http://127.0.0.1/".parse().unwrap();
        let response = Response::from_bytes(0, url, "");
        assert_eq!(response.status(), 0);
        assert!(response.status_code().is_none());
        assert_eq!(response.text().await.unwrap(), "");
    }
}
