/// Configures the default reqwest-backed transport.
///
/// Durations are in milliseconds. A zero timeout disables it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportOptions {
    /// TCP connect timeout.
    pub connect_timeout_ms: u64,
    /// Interval between TCP keep-alive probes.
    pub tcp_keepalive_ms: u64,
    /// Timeout for a whole exchange, from sending the request to the end of
    /// the response headers and body.
    pub timeout_ms: u64,
    /// How long an idle pooled connection is kept.
    pub pool_idle_timeout_ms: u64,
    /// Keep connections open between requests.
    pub keep_alive: bool,
    /// Redirects followed before the exchange fails.
    pub max_redirects: usize,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            tcp_keepalive_ms: 30_000,
            timeout_ms: 60_000,
            pool_idle_timeout_ms: 90_000,
            keep_alive: false,
            max_redirects: 10,
            user_agent: format!("netter/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}
