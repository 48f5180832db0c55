use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::body::{Body, BodyStream, BodySupplier};
use crate::transport::TransportRequest;
use crate::{NetterError, Result};

/// Cancellation token plus optional deadline attached to a request.
#[derive(Clone, Debug, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CancelSignal {
    pub fn new(token: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { token, deadline }
    }

    /// Returns the matching error if the signal has already fired.
    pub fn check(&self) -> Option<NetterError> {
        if self.token.is_cancelled() {
            return Some(NetterError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(NetterError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Completes when the token is cancelled or the deadline passes.
    pub async fn fired(&self) -> NetterError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => NetterError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => NetterError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                NetterError::Cancelled
            }
        }
    }
}

/// A logical HTTP request whose body can be replayed on every attempt.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<BodySupplier>,
    content_length: u64,
    signal: CancelSignal,
}

impl Request {
    /// Builds a request, capturing the body for replay.
    ///
    /// One-shot readers are read to the end here and factories are called
    /// once to learn the content length. Unsupported bodies fail with
    /// [`NetterError::InvalidBodyType`].
    pub fn new(method: &str, url: &str, body: Option<Body>) -> Result<Self> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| NetterError::InvalidMethod(method.to_owned()))?;
        let parsed = Url::parse(url).map_err(|source| NetterError::InvalidUrl {
            url: url.to_owned(),
            source,
        })?;

        let (body, content_length) = match body {
            Some(body) => {
                let (supplier, len) = body.into_supplier()?;
                (Some(supplier), len)
            }
            None => (None, 0),
        };

        Ok(Self {
            method,
            url: parsed,
            headers: HeaderMap::new(),
            body,
            content_length,
            signal: CancelSignal::default(),
        })
    }

    /// Replaces any existing values of the header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Adds a value without removing existing ones.
    pub fn append_header(&mut self, name: &str, value: &str) -> Result<()> {
        let (name, value) = parse_header(name, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Aborts the request, including any backoff wait, when `token` is
    /// cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.signal.token = token;
        self
    }

    /// Gives up on the request once `deadline` has passed.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.signal.deadline = Some(deadline);
        self
    }

    /// Sets a deadline `timeout` from now for the whole logical request.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&BodySupplier> {
        self.body.as_ref()
    }

    /// Content length measured when the request was built.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    pub(crate) fn to_transport(&self, body: Option<BodyStream>) -> TransportRequest {
        TransportRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body,
            content_length: self.content_length,
        }
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
        NetterError::InvalidHeader {
            name: name.to_owned(),
            reason: err.to_string(),
        }
    })?;
    let header_value = HeaderValue::from_str(value).map_err(|err| NetterError::InvalidHeader {
        name: name.to_owned(),
        reason: err.to_string(),
    })?;
    Ok((header_name, header_value))
}
