//! Stream supervisor: one logical subscription to the live telemetry feed.
//!
//! The supervisor runs in a background task and handles:
//! - Session negotiation before every connection attempt
//! - Opening the streaming socket with the negotiated session
//! - Decoding inbound frames and forwarding them to the observer
//! - Failure classification and fixed-delay reconnection
//! - Cooperative shutdown through [`StreamHandle::stop`]
//!
//! Observer callbacks run on a separate dispatch task fed by an unbounded
//! channel, so a slow observer never stalls the connection loop. Every
//! delivery passes through an [`EmitGate`]; once the gate is closed by
//! `stop()`, queued emissions are discarded.

use std::{borrow::Cow, cell::Cell, sync::Arc};

use futures_util::StreamExt;
use http::{
    HeaderValue,
    header::{COOKIE, USER_AGENT},
};
use parking_lot::{Mutex, ReentrantMutex};
use tokio::{
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_with_config,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        error::ProtocolError,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::StreamConfig,
    endpoint::socket_url,
    error::{NegotiationError, TransportError, TransportResult},
    observer::{ConnectionState, Payload, StreamObserver},
    session::{HttpSessionApi, SessionApi, SessionNegotiator},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STOP_REASON: &str = "client stopped";

// ============================================================================
// Client
// ============================================================================

struct ClientInner<A: SessionApi> {
    config: StreamConfig,
    socket_url: Url,
    negotiator: SessionNegotiator<A>,
}

/// Entry point to the live telemetry feed.
///
/// The client owns the configuration and the session negotiator. It is cheap
/// to clone; every stream started from it shares one negotiator, so at most
/// one credential exchange is in flight per client.
///
/// # Example
///
/// ```rust,no_run
/// use tms_telemetry::{Callbacks, StreamConfig, TelemetryClient};
///
/// # async fn run() -> Result<(), tms_telemetry::TransportError> {
/// let config = StreamConfig::new("https://track.example.com")
///     .credentials("ops@example.com", "secret");
/// let client = TelemetryClient::new(config)?;
///
/// let handle = client.start(
///     Callbacks::new()
///         .status(|state| println!("status: {state}"))
///         .payload(|payload| println!("payload: {payload}")),
/// );
///
/// // ...
/// handle.stop();
/// # Ok(())
/// # }
/// ```
pub struct TelemetryClient<A: SessionApi = HttpSessionApi> {
    inner: Arc<ClientInner<A>>,
}

impl<A: SessionApi> Clone for TelemetryClient<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl TelemetryClient<HttpSessionApi> {
    /// Create a client that negotiates sessions over HTTP.
    pub fn new(config: StreamConfig) -> TransportResult<Self> {
        let api = HttpSessionApi::new(&config)?;
        Self::with_session_api(config, api)
    }
}

impl<A: SessionApi> TelemetryClient<A> {
    /// Create a client with a custom session API.
    pub fn with_session_api(config: StreamConfig, api: A) -> TransportResult<Self> {
        config.validate().map_err(TransportError::config)?;
        let socket_url = socket_url(&config)?;

        info!(url = %socket_url, "Telemetry client created");

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                socket_url,
                negotiator: SessionNegotiator::new(api),
            }),
        })
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// The streaming endpoint every connection attempt targets.
    pub fn socket_url(&self) -> &Url {
        &self.inner.socket_url
    }

    /// The shared session negotiator.
    pub fn negotiator(&self) -> &SessionNegotiator<A> {
        &self.inner.negotiator
    }

    /// Ensure a session exists, joining any negotiation already in flight.
    pub async fn ensure_session(&self) -> Result<(), NegotiationError> {
        self.inner.negotiator.ensure_session().await
    }

    /// Start a stream, reporting to `observer` until the handle is stopped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<O: StreamObserver>(&self, observer: O) -> StreamHandle {
        let gate = Arc::new(EmitGate::new());
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(dispatch(events_rx, Arc::clone(&gate), observer));

        let supervisor = Supervisor {
            client: Arc::clone(&self.inner),
            events: events_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(supervisor.run());

        StreamHandle {
            gate,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Start a stream with an HTTP-negotiated session.
///
/// Shorthand for [`TelemetryClient::new`] followed by [`TelemetryClient::start`].
pub fn start<O: StreamObserver>(config: StreamConfig, observer: O) -> TransportResult<StreamHandle> {
    Ok(TelemetryClient::new(config)?.start(observer))
}

// ============================================================================
// Stop handle
// ============================================================================

/// Handle to a running stream. Dropping it stops the stream.
#[must_use = "dropping the handle stops the stream"]
pub struct StreamHandle {
    gate: Arc<EmitGate>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamHandle {
    /// Stop the stream.
    ///
    /// Cancels a pending reconnect, closes an open socket with a normal
    /// closure and aborts one being opened. No callback fires after this
    /// returns. Safe to call repeatedly, from any thread, and from inside
    /// an observer callback.
    pub fn stop(&self) {
        if self.gate.close() {
            info!("Stopping telemetry stream");
        }
        self.cancel.cancel();
    }

    /// Whether [`Self::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the supervisor task to finish.
    ///
    /// The task only finishes after [`Self::stop`], once the socket close has
    /// been sent. Later calls return immediately.
    pub async fn closed(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Telemetry supervisor task failed");
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Emission gate and dispatch
// ============================================================================

enum Emission {
    Status(ConnectionState),
    Payload(Payload),
    Error(TransportError),
}

/// Stopped flag guarding every callback invocation.
///
/// The lock is held while a callback runs, so `stop()` from another thread
/// waits for an in-progress callback and nothing fires after it returns.
/// It is re-entrant so a callback can stop its own stream.
struct EmitGate {
    stopped: ReentrantMutex<Cell<bool>>,
}

impl EmitGate {
    fn new() -> Self {
        Self {
            stopped: ReentrantMutex::new(Cell::new(false)),
        }
    }

    /// Close the gate. Returns `true` on the first call only.
    fn close(&self) -> bool {
        !self.stopped.lock().replace(true)
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.stopped.lock().get()
    }

    /// Invoke the matching callback unless the gate is closed.
    fn deliver<O: StreamObserver>(&self, observer: &O, emission: Emission) -> bool {
        let stopped = self.stopped.lock();
        if stopped.get() {
            return false;
        }
        match emission {
            Emission::Status(state) => observer.on_status(state),
            Emission::Payload(payload) => observer.on_payload(payload),
            Emission::Error(error) => observer.on_error(&error),
        }
        true
    }
}

async fn dispatch<O: StreamObserver>(
    mut events: mpsc::UnboundedReceiver<Emission>,
    gate: Arc<EmitGate>,
    observer: O,
) {
    while let Some(emission) = events.recv().await {
        if !gate.deliver(&observer, emission) {
            break;
        }
    }
    debug!("Telemetry dispatch finished");
}

// ============================================================================
// Supervisor
// ============================================================================

/// How a connected socket ended.
enum Disconnect {
    /// The caller stopped the stream.
    Stopped,
    /// The socket closed or failed; reconnect.
    Closed,
}

struct Supervisor<A: SessionApi> {
    client: Arc<ClientInner<A>>,
    events: mpsc::UnboundedSender<Emission>,
    cancel: CancellationToken,
}

impl<A: SessionApi> Supervisor<A> {
    /// Main entry point - run until stopped.
    async fn run(self) {
        let url = &self.client.socket_url;
        let delay = self.client.config.reconnect_delay;
        info!(url = %url, "Starting telemetry stream");

        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            self.emit_status(ConnectionState::Connecting);

            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                opened = self.open(attempt) => opened,
            };

            match opened {
                Ok(socket) => {
                    info!(url = %url, attempt, "Telemetry stream connected");
                    self.emit_status(ConnectionState::Connected);
                    match self.pump(socket).await {
                        Disconnect::Stopped => break,
                        Disconnect::Closed => info!(url = %url, "Telemetry stream closed"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Telemetry stream failed to open");
                    if e.is_session_rejection() {
                        self.client.negotiator.invalidate();
                    }
                    self.emit_status(ConnectionState::Error);
                    self.emit(Emission::Error(e));
                }
            }

            self.emit_status(ConnectionState::Retrying);
            debug!(delay_ms = delay.as_millis(), attempt, "Waiting before reconnect");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(url = %url, "Telemetry stream stopped");
    }

    /// Negotiate a session and open the socket.
    async fn open(&self, attempt: u64) -> TransportResult<Socket> {
        self.client.negotiator.ensure_session().await?;

        let config = &self.client.config;
        let url = &self.client.socket_url;
        debug!(url = %url, attempt, "Opening telemetry socket");

        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        if let Some(cookie) = self.client.negotiator.cookie_header(url) {
            headers.insert(COOKIE, cookie);
        }
        if let Ok(agent) = HeaderValue::from_str(&config.user_agent) {
            headers.insert(USER_AGENT, agent);
        }

        let (socket, _response) = tokio::time::timeout(
            config.connect_timeout,
            connect_async_with_config(request, None, false),
        )
        .await
        .map_err(|_| TransportError::timeout(config.connect_timeout))??;

        Ok(socket)
    }

    /// Forward frames until the socket ends or the stream is stopped.
    async fn pump(&self, mut socket: Socket) -> Disconnect {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.close(&mut socket).await;
                    return Disconnect::Stopped;
                }
                frame = socket.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.decode(&text),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => self.decode(&text),
                        Err(e) => self.emit(Emission::Error(TransportError::decode(
                            format!("Binary frame is not UTF-8: {e}"),
                        ))),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!(frame = ?frame, "Server closed telemetry socket");
                        return Disconnect::Closed;
                    }
                    // Ping/pong replies are queued by the transport itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) if is_abrupt_close(&e) => {
                        debug!(error = %e, "Telemetry socket dropped");
                        return Disconnect::Closed;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Telemetry socket error");
                        self.emit_status(ConnectionState::Error);
                        self.emit(Emission::Error(e.into()));
                        return Disconnect::Closed;
                    }
                    None => return Disconnect::Closed,
                },
            }
        }
    }

    /// Decode one text frame; failures are reported without dropping the socket.
    fn decode(&self, text: &str) {
        match serde_json::from_str::<Payload>(text) {
            Ok(payload) => self.emit(Emission::Payload(payload)),
            Err(e) => {
                debug!(error = %e, len = text.len(), "Discarding malformed telemetry frame");
                self.emit(Emission::Error(e.into()));
            }
        }
    }

    async fn close(&self, socket: &mut Socket) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Borrowed(STOP_REASON),
        };
        match tokio::time::timeout(self.client.config.connect_timeout, socket.close(Some(frame)))
            .await
        {
            Ok(Ok(())) => debug!("Telemetry socket closed"),
            Ok(Err(e)) => debug!(error = %e, "Telemetry socket close failed"),
            Err(_) => debug!("Telemetry socket close timed out"),
        }
    }

    fn emit_status(&self, state: ConnectionState) {
        debug!(state = %state, "Telemetry stream status");
        self.emit(Emission::Status(state));
    }

    /// Queue an emission for the dispatcher.
    ///
    /// Never touches the gate lock: the dispatcher holds it while a callback
    /// runs, and the connection loop must not wait on the observer.
    fn emit(&self, emission: Emission) {
        if self.cancel.is_cancelled() {
            return;
        }
        // The dispatcher is gone only after stop; nothing left to notify.
        let _ = self.events.send(emission);
    }
}

/// Peer went away without a close handshake; treated as an ordinary close.
fn is_abrupt_close(error: &tungstenite::Error) -> bool {
    matches!(
        error,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    impl StreamObserver for Counting {
        fn on_status(&self, _state: ConnectionState) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_gate_close_is_idempotent() {
        let gate = EmitGate::new();
        assert!(!gate.is_closed());
        assert!(gate.close());
        assert!(!gate.close());
        assert!(gate.is_closed());
    }

    #[test]
    fn test_gate_blocks_delivery_after_close() {
        let calls = Arc::new(AtomicUsize::new(0));
        let observer = Counting {
            calls: Arc::clone(&calls),
        };
        let gate = EmitGate::new();

        assert!(gate.deliver(&observer, Emission::Status(ConnectionState::Connecting)));
        gate.close();
        assert!(!gate.deliver(&observer, Emission::Status(ConnectionState::Connected)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_gate_allows_reentrant_close() {
        struct StopsItself {
            gate: Arc<EmitGate>,
        }

        impl StreamObserver for StopsItself {
            fn on_status(&self, _state: ConnectionState) {
                self.gate.close();
            }
        }

        let gate = Arc::new(EmitGate::new());
        let observer = StopsItself {
            gate: Arc::clone(&gate),
        };
        assert!(gate.deliver(&observer, Emission::Status(ConnectionState::Connected)));
        assert!(gate.is_closed());
    }

    #[test]
    fn test_abrupt_close_classification() {
        assert!(is_abrupt_close(&tungstenite::Error::ConnectionClosed));
        assert!(is_abrupt_close(&tungstenite::Error::Protocol(
            ProtocolError::ResetWithoutClosingHandshake
        )));
        assert!(!is_abrupt_close(&tungstenite::Error::Utf8));
    }
}
