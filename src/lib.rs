//! `netter` is an async HTTP client that retries transient failures.
//!
//! One logical request becomes up to `max_retries + 1` physical attempts:
//! - transport errors are retried unless they are structural (redirect limit,
//!   unknown certificate authority, unsupported scheme);
//! - status 0 and 5xx responses are retried, except 501;
//! - waits double from [`RetryPolicy::min_wait`] up to
//!   [`RetryPolicy::max_wait`];
//! - request bodies are captured once and replayed on every attempt.
//!
//! ```no_run
//! use netter::{Client, Request, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn run() -> netter::Result<()> {
//! let client = Client::new().with_policy(RetryPolicy {
//!     max_retries: 2,
//!     min_wait: Duration::from_millis(100),
//!     max_wait: Duration::from_secs(1),
//! });
//!
//! let mut request = Request::new("PUT", "http://127.0.0.1:8080/v1/foo", Some("hello".into()))?;
//! request.set_header("x-trace", "abc")?;
//! let response = client.execute(&request).await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

mod body;
mod client;
mod error;
mod logger;
mod options;
mod request;
mod transport;

pub mod retry;

pub use body::{Body, BodyFactory, BodyStream, BodySupplier, SeekRead};
pub use client::{get, post, Client};
pub use error::NetterError;
#[cfg(feature = "tracing")]
pub use logger::TracingLogger;
pub use logger::{Logger, StderrLogger};
pub use options::TransportOptions;
pub use request::{CancelSignal, Request};
pub use retry::{RetryPolicy, Verdict};
pub use transport::{
    ReqwestTransport, Response, ResponseBody, Transport, TransportError, TransportErrorKind,
    TransportRequest,
};

pub use reqwest::{header, Method, StatusCode, Url};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, NetterError>;
