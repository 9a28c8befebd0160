//! Session negotiation against the upstream tracking service.
//!
//! The upstream authenticates the streaming socket with a cookie obtained from
//! a form POST to `/api/session`. [`SessionNegotiator`] makes sure that at most
//! one such request is in flight per client, whatever the number of callers.

use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderValue;
use reqwest::cookie::{CookieStore, Jar};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::StreamConfig,
    endpoint::session_url,
    error::{NegotiationError, TransportError, TransportResult},
    single_flight::SingleFlight,
};

/// One-shot credential exchange with the upstream service.
#[async_trait]
pub trait SessionApi: Send + Sync + 'static {
    /// Perform exactly one credential exchange request.
    async fn create_session(&self) -> Result<(), NegotiationError>;

    /// Session material to attach to the streaming handshake for `url`.
    fn cookie_header(&self, _url: &Url) -> Option<HeaderValue> {
        None
    }
}

/// [`SessionApi`] backed by an HTTP client with a persistent cookie jar.
pub struct HttpSessionApi {
    client: reqwest::Client,
    jar: Arc<Jar>,
    session_url: Url,
    identity: String,
    secret: String,
}

impl HttpSessionApi {
    /// Build the HTTP client and derive the session endpoint from `config`.
    pub fn new(config: &StreamConfig) -> TransportResult<Self> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| TransportError::config(format!("Failed to build client: {e}")))?;

        Ok(Self {
            client,
            jar,
            session_url: session_url(config)?,
            identity: config.identity.clone(),
            secret: config.secret.clone(),
        })
    }

    /// The endpoint credentials are posted to.
    pub fn session_url(&self) -> &Url {
        &self.session_url
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn create_session(&self) -> Result<(), NegotiationError> {
        debug!(url = %self.session_url, "Requesting session");

        let response = self
            .client
            .post(self.session_url.clone())
            .form(&[
                ("email", self.identity.as_str()),
                ("password", self.secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| NegotiationError::Unreachable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NegotiationError::Rejected { status });
        }
        Ok(())
    }

    fn cookie_header(&self, url: &Url) -> Option<HeaderValue> {
        // Cookies were stored against the HTTP origin.
        let mut lookup = url.clone();
        let scheme = match url.scheme() {
            "wss" => "https",
            "ws" => "http",
            other => other,
        };
        lookup.set_scheme(scheme).ok()?;
        self.jar.cookies(&lookup)
    }
}

/// Shares a single in-flight credential exchange between all callers.
pub struct SessionNegotiator<A: SessionApi> {
    api: Arc<A>,
    flight: SingleFlight<(), NegotiationError>,
}

impl<A: SessionApi> SessionNegotiator<A> {
    /// Wrap a session API.
    pub fn new(api: A) -> Self {
        Self {
            api: Arc::new(api),
            flight: SingleFlight::new(),
        }
    }

    /// Ensure a session exists, joining any negotiation already in flight.
    ///
    /// A failure leaves the negotiator empty so the next call issues a new
    /// request. A success is reused until [`Self::invalidate`].
    pub async fn ensure_session(&self) -> Result<(), NegotiationError> {
        let api = Arc::clone(&self.api);
        let outcome = self
            .flight
            .run(move || async move { api.create_session().await })
            .await;

        match &outcome {
            Ok(()) => debug!("Session available"),
            Err(e) => warn!(error = %e, "Session negotiation failed"),
        }
        outcome
    }

    /// Forget the current session; the next call renegotiates.
    pub fn invalidate(&self) {
        info!("Invalidating session");
        self.flight.invalidate();
    }

    /// Whether a negotiation has started and not yet resolved.
    pub fn is_pending(&self) -> bool {
        self.flight.is_pending()
    }

    /// Whether the negotiator holds neither a pending attempt nor a session.
    pub fn is_empty(&self) -> bool {
        self.flight.is_empty()
    }

    /// Session material for the streaming handshake.
    pub fn cookie_header(&self, url: &Url) -> Option<HeaderValue> {
        self.api.cookie_header(url)
    }

    /// The underlying session API.
    pub fn api(&self) -> &A {
        &self.api
    }
}
