//! Consumer-facing stream state and callbacks.

use std::fmt;

use crate::error::TransportError;

/// One decoded inbound record, passed through un-interpreted.
pub type Payload = serde_json::Value;

/// Observable status of a logical stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Negotiating a session or opening the socket.
    Connecting,
    /// The socket is open and frames are flowing.
    Connected,
    /// A negotiation or transport failure was observed.
    Error,
    /// Waiting out the reconnect delay.
    Retrying,
    /// Stopped by the caller. Terminal, and never reported to observers.
    Stopped,
}

impl ConnectionState {
    /// Lowercase wire name, e.g. `"retrying"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Retrying => "retrying",
            Self::Stopped => "stopped",
        }
    }

    /// Check if the stream is delivering payloads.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if the stream has been stopped (terminal state).
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives status transitions, payloads and errors from a running stream.
///
/// Callbacks run on a dedicated dispatch task, never on the connection loop,
/// and are invoked one at a time in emission order. None of them fire once
/// the stream has been stopped.
pub trait StreamObserver: Send + Sync + 'static {
    /// Called on every status transition.
    fn on_status(&self, state: ConnectionState);

    /// Called once per successfully decoded inbound frame.
    fn on_payload(&self, _payload: Payload) {}

    /// Called for negotiation, transport and decode failures.
    fn on_error(&self, _error: &TransportError) {}
}

type StatusFn = Box<dyn Fn(ConnectionState) + Send + Sync>;
type PayloadFn = Box<dyn Fn(Payload) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&TransportError) + Send + Sync>;

/// Closure-based [`StreamObserver`]; unset callbacks are ignored.
///
/// ```rust
/// use tms_telemetry::Callbacks;
///
/// let callbacks = Callbacks::new()
///     .status(|state| println!("status: {state}"))
///     .payload(|payload| println!("payload: {payload}"))
///     .error(|error| eprintln!("error: {error}"));
/// # drop(callbacks);
/// ```
#[derive(Default)]
pub struct Callbacks {
    status: Option<StatusFn>,
    payload: Option<PayloadFn>,
    error: Option<ErrorFn>,
}

impl Callbacks {
    /// Create an empty set of callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status callback.
    #[must_use]
    pub fn status<F>(mut self, f: F) -> Self
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.status = Some(Box::new(f));
        self
    }

    /// Set the payload callback.
    #[must_use]
    pub fn payload<F>(mut self, f: F) -> Self
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        self.payload = Some(Box::new(f));
        self
    }

    /// Set the error callback.
    #[must_use]
    pub fn error<F>(mut self, f: F) -> Self
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.error = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("status", &self.status.is_some())
            .field("payload", &self.payload.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

impl StreamObserver for Callbacks {
    fn on_status(&self, state: ConnectionState) {
        if let Some(f) = &self.status {
            f(state);
        }
    }

    fn on_payload(&self, payload: Payload) {
        if let Some(f) = &self.payload {
            f(payload);
        }
    }

    fn on_error(&self, error: &TransportError) {
        if let Some(f) = &self.error {
            f(error);
        }
    }
}
