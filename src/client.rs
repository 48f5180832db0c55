use std::fmt;
use std::sync::{Arc, OnceLock};

use reqwest::header;

use crate::{
    logger::default_logger,
    retry::{self, Verdict},
    Body, Logger, NetterError, Request, ReqwestTransport, Response, Result, RetryPolicy, Transport,
    TransportOptions,
};

/// Bytes read from an unwanted response body before it is closed.
const DRAIN_LIMIT: usize = 4096;

#[derive(Clone)]
/// HTTP client that retries transient failures with exponential backoff.
pub struct Client {
    transport: Arc<dyn Transport>,
    logger: Option<Arc<dyn Logger>>,
    policy: RetryPolicy,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("policy", &self.policy)
            .field("has_logger", &self.logger.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Creates a client with the default transport, logger and policy.
    pub fn new() -> Self {
        let logger = default_logger();
        let transport = default_transport(&TransportOptions::default(), logger.as_ref());
        Self::with_transport(transport)
    }

    /// Creates a client for the default transport configured with `options`.
    pub fn with_options(options: &TransportOptions) -> Result<Self> {
        let transport = ReqwestTransport::new(options).map_err(NetterError::Transport)?;
        Ok(Self::with_transport(transport))
    }

    /// Creates a client over a custom transport.
    pub fn with_transport(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
            logger: Some(default_logger()),
            policy: RetryPolicy::default(),
        }
    }

    /// Creates a client whose retry policy is read from the environment.
    ///
    /// See [`RetryPolicy::from_env`] for the variables.
    pub fn from_env() -> std::result::Result<Self, String> {
        Ok(Self::new().with_policy(RetryPolicy::from_env()?))
    }

    /// The process-wide client used by [`get`] and [`post`].
    pub fn shared() -> &'static Client {
        static SHARED: OnceLock<Client> = OnceLock::new();
        SHARED.get_or_init(Client::new)
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    /// Disables logging of transport errors and retries.
    pub fn without_logger(mut self) -> Self {
        self.logger = None;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        self.request("GET", url, None).await
    }

    /// Sends `body` with the given `Content-Type`.
    pub async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<Body>,
    ) -> Result<Response> {
        let mut request = Request::new("POST", url, Some(body.into()))?;
        request.set_header(header::CONTENT_TYPE.as_str(), content_type)?;
        self.execute(&request).await
    }

    pub async fn request(&self, method: &str, url: &str, body: Option<Body>) -> Result<Response> {
        let request = Request::new(method, url, body)?;
        self.execute(&request).await
    }

    /// Runs the request, retrying transient failures.
    ///
    /// Returns the first response that is not retryable, the first terminal
    /// transport error, a cancellation error, or
    /// [`NetterError::ExhaustedRetries`] once the policy runs out.
    pub async fn execute(&self, request: &Request) -> Result<Response> {
        let policy = self.policy;
        let method = request.method();
        let url = request.url();
        let signal = request.signal();

        for attempt in 0..=policy.max_retries {
            let body = match request.body() {
                Some(supplier) => Some(supplier.supply().map_err(NetterError::Body)?),
                None => None,
            };

            #[cfg(feature = "tracing")]
            tracing::debug!(%method, %url, attempt, "sending request");

            let outcome = tokio::select! {
                biased;
                err = signal.fired() => return Err(err),
                outcome = self.transport.send(request.to_transport(body)) => outcome,
            };
            let status = outcome.as_ref().map(Response::status).ok();

            if let Err(err) = &outcome {
                self.log(format_args!("ERROR: {method} {url} request failed: {err}"));
            }

            match retry::classify(&outcome, signal) {
                Verdict::Done => return outcome.map_err(NetterError::Transport),
                Verdict::Cancelled(err) => return Err(err),
                Verdict::Retry => {}
            }

            let remaining = policy.max_retries - attempt;
            if remaining == 0 {
                // Closed without draining.
                drop(outcome);
                break;
            }

            if let Ok(response) = outcome {
                tokio::select! {
                    biased;
                    err = signal.fired() => return Err(err),
                    _ = self.drain_body(response) => {}
                }
            }

            let wait = policy.backoff(attempt);
            let desc = match status {
                Some(code) if code > 0 => format!("{method} {url} (status: {code})"),
                _ => format!("{method} {url}"),
            };
            self.log(format_args!(
                "RETRY {desc} retrying in {wait:?} ({remaining} left)"
            ));

            tokio::select! {
                biased;
                err = signal.fired() => return Err(err),
                _ = tokio::time::sleep(wait) => {}
            }
        }

        Err(NetterError::ExhaustedRetries {
            method: method.to_string(),
            url: url.to_string(),
            attempts: policy.max_attempts(),
        })
    }

    async fn drain_body(&self, response: Response) {
        if let Err(err) = response.drain(DRAIN_LIMIT).await {
            self.log(format_args!("ERROR: reading response body: {err}"));
        }
    }

    fn log(&self, message: fmt::Arguments<'_>) {
        if let Some(logger) = &self.logger {
            logger.log(message);
        }
    }
}

/// Builds the reqwest transport, falling back to reqwest's defaults when the
/// configured client cannot be built.
fn default_transport(options: &TransportOptions, logger: &dyn Logger) -> ReqwestTransport {
    match ReqwestTransport::new(options) {
        Ok(transport) => transport,
        Err(err) => {
            logger.log(format_args!("ERROR: building transport: {err}"));
            ReqwestTransport::from_client(reqwest::Client::new())
        }
    }
}

/// Sends a GET request with the shared client.
pub async fn get(url: &str) -> Result<Response> {
    Client::shared().get(url).await
}

/// Sends a POST request with the shared client.
pub async fn post(url: &str, content_type: &str, body: impl Into<Body>) -> Result<Response> {
    Client::shared().post(url, content_type, body).await
}
