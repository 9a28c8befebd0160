//! Stream connection configuration.

use std::{fmt, time::Duration};

use tracing::warn;

/// Default upstream base address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8082";
/// Default credential identity.
pub const DEFAULT_IDENTITY: &str = "admin@admin.com";
/// Default credential secret.
pub const DEFAULT_SECRET: &str = "admin";
/// Default fixed delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(4000);
/// Default streaming port used when the base address cannot be parsed.
pub const DEFAULT_FALLBACK_PORT: u16 = 8082;

const BASE_URL_VARS: &[&str] = &["TRACCAR_SOCKET_URL", "TRACCAR_SOCKET_BASE", "TRACCAR_BASE"];
const IDENTITY_VARS: &[&str] = &["TRACCAR_WS_USER", "TRACCAR_USER"];
const SECRET_VARS: &[&str] = &["TRACCAR_WS_PASSWORD", "TRACCAR_PASSWORD"];
const RECONNECT_VAR: &str = "TRACCAR_RECONNECT_MS";

/// Immutable parameters for one telemetry stream.
#[derive(Clone)]
pub struct StreamConfig {
    // Upstream
    /// Base address of the tracking service (`http`, `https`, `ws` or `wss`).
    pub base_url: String,
    /// Identity sent to the session endpoint.
    pub identity: String,
    /// Secret sent to the session endpoint.
    pub secret: String,

    // Reconnection
    /// Fixed wait between a failure and the next connection attempt.
    pub reconnect_delay: Duration,

    // Fallback endpoint
    /// Host used when `base_url` does not parse.
    pub fallback_host: String,
    /// Port used when `base_url` does not parse.
    pub fallback_port: u16,

    // Timeouts
    /// Upper bound on the streaming handshake.
    pub connect_timeout: Duration,
    /// Upper bound on the session request.
    pub request_timeout: Duration,

    /// User agent sent with the session request and the handshake.
    pub user_agent: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            identity: DEFAULT_IDENTITY.to_string(),
            secret: DEFAULT_SECRET.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            fallback_host: "localhost".to_string(),
            fallback_port: DEFAULT_FALLBACK_PORT,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            user_agent: concat!("tms-telemetry/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("base_url", &self.base_url)
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .field("reconnect_delay", &self.reconnect_delay)
            .field("fallback_host", &self.fallback_host)
            .field("fallback_port", &self.fallback_port)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl StreamConfig {
    /// Create a new configuration with the given base address.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Build a configuration from `TRACCAR_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// For each setting the first non-empty variable wins; missing settings
    /// keep their defaults.
    pub fn from_env_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| lookup(key).filter(|value| !value.trim().is_empty()))
        };

        let mut config = Self::default();
        if let Some(base) = first(BASE_URL_VARS) {
            config.base_url = base;
        }
        if let Some(identity) = first(IDENTITY_VARS) {
            config.identity = identity;
        }
        if let Some(secret) = first(SECRET_VARS) {
            config.secret = secret;
        }
        if let Some(raw) = first(&[RECONNECT_VAR][..]) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.reconnect_delay = Duration::from_millis(ms),
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid {RECONNECT_VAR}"),
            }
        }
        config
    }

    /// Set the credential pair.
    #[must_use]
    pub fn credentials(mut self, identity: impl Into<String>, secret: impl Into<String>) -> Self {
        self.identity = identity.into();
        self.secret = secret.into();
        self
    }

    /// Set the fixed reconnect delay.
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the host used when the base address does not parse.
    #[must_use]
    pub fn fallback_host(mut self, host: impl Into<String>) -> Self {
        self.fallback_host = host.into();
        self
    }

    /// Set the port used when the base address does not parse.
    #[must_use]
    pub fn fallback_port(mut self, port: u16) -> Self {
        self.fallback_port = port;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the session request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the user agent.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Validate the configuration.
    ///
    /// An unparsable `base_url` is accepted: endpoint derivation falls back
    /// to `fallback_host:fallback_port`.
    pub fn validate(&self) -> Result<(), String> {
        if self.reconnect_delay.is_zero() {
            return Err("Reconnect delay must be > 0".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.request_timeout.is_zero() {
            return Err("Request timeout must be > 0".to_string());
        }
        if self.fallback_host.trim().is_empty() {
            return Err("Fallback host cannot be empty".to_string());
        }
        if self.fallback_port == 0 {
            return Err("Fallback port must be > 0".to_string());
        }
        Ok(())
    }
}
