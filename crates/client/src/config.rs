use std::time::Duration;

/// Default REST base URL for a locally running server.
pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";

/// Errors raised while reading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// REST base URL, without a trailing slash.
    pub api_url: String,
    /// Base URL for progress streams. A `ws://` or `wss://` scheme selects
    /// the WebSocket transport; anything else uses server-sent events.
    pub stream_url: String,
    /// Bearer token attached to every request, if any.
    pub token: Option<String>,
    /// Per-request timeout for REST calls (streams are not bounded by it).
    pub request_timeout: Duration,
    /// Delay before the single reconnection attempt after a stream fault.
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    /// Config pointing at `api_url` with every other field defaulted.
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            stream_url: api_url.clone(),
            api_url,
            token: None,
            request_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(3),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                      |
    /// |----------------------------------|------------------------------|
    /// | `CLEANFLOW_API_URL`              | `http://localhost:8080/api`  |
    /// | `CLEANFLOW_STREAM_URL`           | same as the API URL          |
    /// | `CLEANFLOW_TOKEN`                | unset                        |
    /// | `CLEANFLOW_REQUEST_TIMEOUT_SECS` | `30`                         |
    /// | `CLEANFLOW_RECONNECT_DELAY_SECS` | `3`                          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let mut config =
            Self::new(non_empty("CLEANFLOW_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()));

        if let Some(stream_url) = non_empty("CLEANFLOW_STREAM_URL") {
            config.stream_url = stream_url.trim_end_matches('/').to_string();
        }
        config.token = non_empty("CLEANFLOW_TOKEN");

        if let Some(value) = non_empty("CLEANFLOW_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = parse_secs("CLEANFLOW_REQUEST_TIMEOUT_SECS", value)?;
        }
        if let Some(value) = non_empty("CLEANFLOW_RECONNECT_DELAY_SECS") {
            config.reconnect_delay = parse_secs("CLEANFLOW_RECONNECT_DELAY_SECS", value)?;
        }

        Ok(config)
    }

    /// Whether the stream base URL selects the WebSocket transport.
    pub fn uses_websocket(&self) -> bool {
        self.stream_url.starts_with("ws://") || self.stream_url.starts_with("wss://")
    }
}

fn parse_secs(var: &'static str, value: String) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::Invalid { var, value })
}
