use std::io;

use crate::transport::TransportError;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum NetterError {
    /// The body value is not one of the supported representations.
    #[error("cannot handle body of type {type_name}")]
    InvalidBodyType { type_name: String },
    /// The HTTP method is not a valid token.
    #[error("invalid method: {0}")]
    InvalidMethod(String),
    /// The request URL could not be parsed.
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    /// A header name or value is not valid HTTP.
    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
    /// The body supplier could not produce a stream.
    #[error("request body: {0}")]
    Body(#[source] io::Error),
    /// Network, TLS or protocol error reported by the transport.
    #[error("transport error: {0}")]
    Transport(#[source] TransportError),
    /// Reading a returned response body failed.
    #[error("response body: {0}")]
    ResponseBody(#[source] TransportError),
    /// Response decoding error.
    #[error("decode error: {0}")]
    Decode(String),
    /// The request's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,
    /// The request's deadline passed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
    /// Every attempt classified as retryable and the budget ran out.
    #[error("{method} {url} giving up after {attempts} attempts")]
    ExhaustedRetries {
        method: String,
        url: String,
        attempts: u32,
    },
}

impl NetterError {
    /// Returns true for [`NetterError::Cancelled`] and [`NetterError::DeadlineExceeded`].
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Returns the transport error, if this error came from the transport.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(err) | Self::ResponseBody(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::NetterError;

    #[test]
    fn exhausted_message_names_attempt_count() {
        let err = NetterError::ExhaustedRetries {
            method: "GET".to_owned(),
            url: "http://127.0.0.1/".to_owned(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "GET http://127.0.0.1/ giving up after 3 attempts"
        );
        assert!(!err.is_cancellation());
    }

    #[test]
    fn cancellation_variants() {
        assert!(NetterError::Cancelled.is_cancellation());
        assert!(NetterError::DeadlineExceeded.is_cancellation());
    }
}
