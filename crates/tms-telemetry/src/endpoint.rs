//! Endpoint derivation for the session request and the streaming socket.
//!
//! Both endpoints hang off the configured base address. Scheme handling is
//! symmetric: `http`/`ws` select the plain transport, `https`/`wss` the
//! encrypted one. A base that does not parse (or parses to something other
//! than those four schemes) falls back to `fallback_host:fallback_port` over
//! the plain transport.

use tracing::warn;
use url::Url;

use crate::{
    config::StreamConfig,
    error::{TransportError, TransportResult},
};

/// Subscription path appended to the base address.
pub const SOCKET_PATH: &str = "/api/socket";
/// Session path appended to the base address.
pub const SESSION_PATH: &str = "/api/session";

/// Build the streaming endpoint, e.g. `ws://host/api/socket`.
pub fn socket_url(config: &StreamConfig) -> TransportResult<Url> {
    match parse_base(&config.base_url) {
        Some((url, secure)) => {
            let scheme = if secure { "wss" } else { "ws" };
            rebase(url, scheme, |path| {
                if path.ends_with(SOCKET_PATH) {
                    path.to_string()
                } else {
                    format!("{path}{SOCKET_PATH}")
                }
            })
        }
        None => fallback(config, "ws", SOCKET_PATH),
    }
}

/// Build the session endpoint, e.g. `http://host/api/session`.
pub fn session_url(config: &StreamConfig) -> TransportResult<Url> {
    match parse_base(&config.base_url) {
        Some((url, secure)) => {
            let scheme = if secure { "https" } else { "http" };
            rebase(url, scheme, |path| {
                let path = path.strip_suffix(SOCKET_PATH).unwrap_or(path);
                if path.ends_with(SESSION_PATH) {
                    path.to_string()
                } else {
                    format!("{path}{SESSION_PATH}")
                }
            })
        }
        None => fallback(config, "http", SESSION_PATH),
    }
}

/// Parse the base address, returning it with its transport security flag.
fn parse_base(base: &str) -> Option<(Url, bool)> {
    let url = Url::parse(base.trim()).ok()?;
    let secure = match url.scheme() {
        "http" | "ws" => false,
        "https" | "wss" => true,
        _ => return None,
    };
    if url.host_str().is_none_or(str::is_empty) {
        return None;
    }
    Some((url, secure))
}

fn rebase<F>(mut url: Url, scheme: &str, path: F) -> TransportResult<Url>
where
    F: FnOnce(&str) -> String,
{
    url.set_scheme(scheme)
        .map_err(|()| TransportError::config(format!("Cannot switch {url} to {scheme}")))?;

    // Credentials travel in the negotiated session, never in the URL.
    url.set_username("")
        .map_err(|()| TransportError::config("Cannot strip username"))?;
    url.set_password(None)
        .map_err(|()| TransportError::config("Cannot strip password"))?;
    url.set_query(None);
    url.set_fragment(None);

    let new_path = path(url.path().trim_end_matches('/'));
    url.set_path(&new_path);
    Ok(url)
}

fn fallback(config: &StreamConfig, scheme: &str, path: &str) -> TransportResult<Url> {
    warn!(
        base_url = %config.base_url,
        host = %config.fallback_host,
        port = config.fallback_port,
        "Base URL is unparsable, using fallback endpoint"
    );
    let raw = format!(
        "{scheme}://{}:{}{path}",
        config.fallback_host, config.fallback_port
    );
    Url::parse(&raw).map_err(|e| TransportError::config(format!("Invalid fallback endpoint {raw}: {e}")))
}
