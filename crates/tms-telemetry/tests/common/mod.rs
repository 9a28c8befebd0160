//! Shared fixtures: a scripted WebSocket server, a scripted session API and
//! an observer that records everything it sees.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use http::{HeaderValue, StatusCode};
use parking_lot::Mutex;
use serde_json::Value;
use tms_telemetry::{
    ConnectionState, ErrorClass, NegotiationError, SessionApi, StreamObserver, TransportError,
};
use tokio::{io::AsyncWriteExt, net::TcpListener, sync::mpsc, time::timeout};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        Message,
        handshake::server::{ErrorResponse, Request, Response},
        protocol::CloseFrame,
    },
};
use tracing_subscriber::EnvFilter;
use url::Url;

pub const WAIT: Duration = Duration::from_secs(5);

/// Route crate logs to the test output; `RUST_LOG` overrides the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Scripted WebSocket server
// ---------------------------------------------------------------------------

/// What the server does with one accepted connection.
#[derive(Clone, Debug)]
pub enum Script {
    /// Send the frames, then drop the TCP stream without a close handshake.
    SendThenDrop(Vec<&'static str>),
    /// Send the frames, then keep reading until the client goes away.
    SendThenHold(Vec<&'static str>),
    /// Write raw bytes after the upgrade, then read until the client goes away.
    SendRaw(&'static [u8]),
    /// Refuse the upgrade with the given status.
    Reject(u16),
}

/// Details of one upgrade request.
#[derive(Clone, Debug)]
pub struct Handshake {
    pub path: String,
    pub cookie: Option<String>,
}

pub struct TestServer {
    pub base_url: String,
    pub accepted: Arc<AtomicUsize>,
    pub handshakes: Arc<Mutex<Vec<Handshake>>>,
    /// One entry per held connection: the close frame the client sent, if any.
    pub closes: mpsc::UnboundedReceiver<Option<CloseFrame<'static>>>,
}

impl TestServer {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub async fn next_close(&mut self) -> Option<CloseFrame<'static>> {
        timeout(WAIT, self.closes.recv())
            .await
            .expect("timed out waiting for client close")
            .expect("server close channel dropped")
    }
}

/// Start a server that plays `scripts` in order; the last one repeats.
pub async fn start_server(scripts: Vec<Script>) -> TestServer {
    assert!(!scripts.is_empty(), "at least one script required");
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test server");
    let addr = listener.local_addr().expect("local addr");

    let accepted = Arc::new(AtomicUsize::new(0));
    let handshakes = Arc::new(Mutex::new(Vec::new()));
    let (close_tx, closes) = mpsc::unbounded_channel();

    {
        let accepted = Arc::clone(&accepted);
        let handshakes = Arc::clone(&handshakes);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let index = accepted.fetch_add(1, Ordering::SeqCst);
                let script = scripts
                    .get(index)
                    .or_else(|| scripts.last())
                    .cloned()
                    .expect("script");
                let handshakes = Arc::clone(&handshakes);
                let close_tx = close_tx.clone();
                tokio::spawn(serve(stream, script, handshakes, close_tx));
            }
        });
    }

    TestServer {
        base_url: format!("http://{addr}"),
        accepted,
        handshakes,
        closes,
    }
}

async fn serve(
    stream: tokio::net::TcpStream,
    script: Script,
    handshakes: Arc<Mutex<Vec<Handshake>>>,
    close_tx: mpsc::UnboundedSender<Option<CloseFrame<'static>>>,
) {
    let reject = match &script {
        Script::Reject(status) => Some(*status),
        _ => None,
    };

    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        handshakes.lock().push(Handshake {
            path: req.uri().path().to_string(),
            cookie: req
                .headers()
                .get(http::header::COOKIE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });
        match reject {
            Some(status) => {
                let mut error = ErrorResponse::new(None);
                *error.status_mut() = StatusCode::from_u16(status).expect("status");
                Err(error)
            }
            None => Ok(resp),
        }
    };

    let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
        return;
    };

    match script {
        Script::SendThenDrop(frames) => {
            for frame in frames {
                let _ = ws.send(Message::Text(frame.to_string())).await;
            }
            let _ = ws.flush().await;
            drop(ws);
        }
        Script::SendThenHold(frames) => {
            for frame in frames {
                let _ = ws.send(Message::Text(frame.to_string())).await;
            }
            let mut close = None;
            while let Some(msg) = ws.next().await {
                if let Ok(Message::Close(frame)) = msg {
                    close = frame.map(CloseFrame::into_owned);
                    break;
                }
            }
            let _ = close_tx.send(close);
        }
        Script::SendRaw(bytes) => {
            let _ = ws.get_mut().write_all(bytes).await;
            while let Some(Ok(_)) = ws.next().await {}
        }
        Script::Reject(_) => {}
    }
}

// ---------------------------------------------------------------------------
// Scripted session API
// ---------------------------------------------------------------------------

/// Session API replaying scripted outcomes; succeeds once the script runs out.
pub struct ScriptedSession {
    outcomes: Mutex<VecDeque<Result<(), NegotiationError>>>,
    requests: Arc<AtomicUsize>,
    latency: Duration,
    cookie: Option<&'static str>,
}

impl ScriptedSession {
    pub fn ok() -> Self {
        Self::new(Vec::new())
    }

    pub fn new(outcomes: Vec<Result<(), NegotiationError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            requests: Arc::new(AtomicUsize::new(0)),
            latency: Duration::ZERO,
            cookie: None,
        }
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn cookie(mut self, cookie: &'static str) -> Self {
        self.cookie = Some(cookie);
        self
    }

    /// Counter shared with the API, readable after it moves into a client.
    pub fn requests(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl SessionApi for ScriptedSession {
    async fn create_session(&self) -> Result<(), NegotiationError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.outcomes.lock().pop_front().unwrap_or(Ok(()))
    }

    fn cookie_header(&self, _url: &Url) -> Option<HeaderValue> {
        self.cookie.map(HeaderValue::from_static)
    }
}

pub fn rejected() -> NegotiationError {
    NegotiationError::Rejected {
        status: StatusCode::UNAUTHORIZED,
    }
}

// ---------------------------------------------------------------------------
// Recording observer
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum Seen {
    Status(ConnectionState),
    Payload(Value),
    Error(ErrorClass),
}

pub struct Recorder {
    tx: mpsc::UnboundedSender<Seen>,
    log: Arc<Mutex<Vec<Seen>>>,
}

impl Recorder {
    fn record(&self, seen: Seen) {
        self.log.lock().push(seen.clone());
        let _ = self.tx.send(seen);
    }
}

impl StreamObserver for Recorder {
    fn on_status(&self, state: ConnectionState) {
        self.record(Seen::Status(state));
    }

    fn on_payload(&self, payload: Value) {
        self.record(Seen::Payload(payload));
    }

    fn on_error(&self, error: &TransportError) {
        self.record(Seen::Error(error.class()));
    }
}

pub struct Events {
    rx: mpsc::UnboundedReceiver<Seen>,
    log: Arc<Mutex<Vec<Seen>>>,
}

impl Events {
    pub async fn next(&mut self) -> Seen {
        timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("observer dropped")
    }

    /// Collect events up to and including the first one matching `pred`.
    pub async fn until(&mut self, pred: impl Fn(&Seen) -> bool) -> Vec<Seen> {
        let mut seen = Vec::new();
        loop {
            let event = self.next().await;
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    /// Everything recorded so far.
    pub fn snapshot(&self) -> Vec<Seen> {
        self.log.lock().clone()
    }
}

pub fn recorder() -> (Recorder, Events) {
    init_tracing();
    let (tx, rx) = mpsc::unbounded_channel();
    let log = Arc::new(Mutex::new(Vec::new()));
    (
        Recorder {
            tx,
            log: Arc::clone(&log),
        },
        Events { rx, log },
    )
}

pub fn status(state: ConnectionState) -> Seen {
    Seen::Status(state)
}

pub fn is_status(state: ConnectionState) -> impl Fn(&Seen) -> bool {
    move |seen| *seen == Seen::Status(state)
}
