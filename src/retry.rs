//! Retry classification and backoff.

use std::time::Duration;

use crate::request::CancelSignal;
use crate::transport::{Response, TransportError};
use crate::NetterError;

/// Configures retry behavior.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Wait before the first retry; doubles on every following one.
    pub min_wait: Duration,
    /// Upper bound for any single wait.
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Builds a policy from environment variables, keeping defaults for
    /// missing ones.
    ///
    /// Reads:
    /// - `NETTER_MAX_RETRIES`
    /// - `NETTER_WAIT_MIN_MS`
    /// - `NETTER_WAIT_MAX_MS`
    pub fn from_env() -> std::result::Result<Self, String> {
        let mut policy = Self::default();
        if let Some(max_retries) = env_u64("NETTER_MAX_RETRIES")? {
            policy.max_retries = u32::try_from(max_retries)
                .map_err(|_| format!("NETTER_MAX_RETRIES is out of range: {max_retries}"))?;
        }
        if let Some(ms) = env_u64("NETTER_WAIT_MIN_MS")? {
            policy.min_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("NETTER_WAIT_MAX_MS")? {
            policy.max_wait = Duration::from_millis(ms);
        }
        Ok(policy)
    }

    /// Total number of physical attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        backoff(self.min_wait, self.max_wait, attempt)
    }
}

fn env_u64(name: &str) -> std::result::Result<Option<u64>, String> {
    match std::env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("{name} must be a non-negative integer, got '{value}'")),
        Err(_) => Ok(None),
    }
}

/// `min * 2^attempt`, clamped to `max`.
///
/// Overflow clamps to `max` as well, and so does `min > max`. Server hints
/// such as `Retry-After` are not consulted.
pub fn backoff(min: Duration, max: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| min.checked_mul(factor))
        .filter(|delay| *delay <= max)
        .unwrap_or(max)
}

/// Result of classifying one attempt.
#[derive(Debug)]
pub enum Verdict {
    /// Transient failure; try again if the budget allows.
    Retry,
    /// Hand the outcome to the caller as is.
    Done,
    /// The caller gave up; return this error instead of the outcome.
    Cancelled(NetterError),
}

impl Verdict {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry)
    }
}

/// Decides whether an attempt is worth repeating.
///
/// Cancellation wins over everything else. Transport errors are retried
/// unless they are structural (see [`TransportError::is_terminal`]). Responses
/// are retried on status 0 and 5xx, except 501.
pub fn classify(
    outcome: &std::result::Result<Response, TransportError>,
    signal: &CancelSignal,
) -> Verdict {
    if let Some(err) = signal.check() {
        return Verdict::Cancelled(err);
    }
    match outcome {
        Err(err) if err.is_terminal() => Verdict::Done,
        Err(_) => Verdict::Retry,
        Ok(response) if is_retryable_status(response.status()) => Verdict::Retry,
        Ok(_) => Verdict::Done,
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 0 || ((500..=599).contains(&status) && status != 501)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::{backoff, classify, is_retryable_status, RetryPolicy, Verdict};
    use crate::request::CancelSignal;
    use crate::transport::{Response, TransportError, TransportErrorKind};
    use crate::NetterError;

    fn response(status: u16) -> Result<Response, TransportError> {
        Ok(Response::from_bytes(
            status,
            "http://127.0.0.1/".parse().unwrap(),
            "",
        ))
    }

    fn idle() -> CancelSignal {
        CancelSignal::new(CancellationToken::new(), None)
    }

    #[test]
    fn statuses() {
        assert!(classify(&response(503), &idle()).is_retry());
        assert!(classify(&response(500), &idle()).is_retry());
        assert!(classify(&response(599), &idle()).is_retry());
        assert!(classify(&response(0), &idle()).is_retry());
        assert!(!classify(&response(501), &idle()).is_retry());
        assert!(!classify(&response(200), &idle()).is_retry());
        assert!(!classify(&response(302), &idle()).is_retry());
        assert!(!classify(&response(404), &idle()).is_retry());
        assert!(!classify(&response(429), &idle()).is_retry());
        assert!(!is_retryable_status(600));
    }

    #[test]
    fn transport_errors() {
        for kind in [
            TransportErrorKind::TooManyRedirects,
            TransportErrorKind::UnknownCertificateAuthority,
            TransportErrorKind::UnsupportedScheme,
        ] {
            let outcome = Err(TransportError::new(kind, "boom"));
            assert!(matches!(classify(&outcome, &idle()), Verdict::Done), "{kind}");
        }
        for kind in [
            TransportErrorKind::Timeout,
            TransportErrorKind::Connect,
            TransportErrorKind::Other,
        ] {
            let outcome = Err(TransportError::new(kind, "boom"));
            assert!(classify(&outcome, &idle()).is_retry(), "{kind}");
        }
    }

    #[test]
    fn cancellation_overrides_everything() {
        let token = CancellationToken::new();
        token.cancel();
        let signal = CancelSignal::new(token, None);

        for outcome in [response(503), response(200)] {
            assert!(matches!(
                classify(&outcome, &signal),
                Verdict::Cancelled(NetterError::Cancelled)
            ));
        }
    }

    #[tokio::test]
    async fn passed_deadline_is_reported() {
        let deadline = tokio::time::Instant::now() - Duration::from_millis(1);
        let signal = CancelSignal::new(CancellationToken::new(), Some(deadline));
        assert!(matches!(
            classify(&response(503), &signal),
            Verdict::Cancelled(NetterError::DeadlineExceeded)
        ));
    }

    #[test]
    fn backoff_doubles_from_min() {
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(10);
        let waits: Vec<_> = (0..4).map(|attempt| backoff(min, max, attempt)).collect();
        assert_eq!(
            waits,
            [1, 2, 4, 8].map(Duration::from_secs).to_vec()
        );
        assert_eq!(backoff(min, max, 4), max);
        assert_eq!(backoff(min, max, 10), max);
    }

    #[test]
    fn backoff_clamps_on_overflow_and_inverted_bounds() {
        let max = Duration::from_secs(10);
        assert_eq!(backoff(Duration::from_secs(1), max, 40), max);
        assert_eq!(backoff(Duration::MAX, max, 1), max);
        assert_eq!(
            backoff(Duration::from_secs(10), Duration::from_secs(1), 0),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.min_wait, Duration::from_secs(1));
        assert_eq!(policy.max_wait, Duration::from_secs(10));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
    }
}
