//! # TMS Telemetry
//!
//! Live vehicle telemetry stream client for the fleet-management front end.
//!
//! The client authenticates against the upstream tracking service with a
//! one-shot session request, opens a persistent WebSocket feed with the
//! negotiated session, and delivers every decoded record to an observer.
//! Failures are retried on a fixed interval until the stream is stopped.
//!
//! ## Features
//!
//! - **Single-flight sessions**: concurrent callers share one credential exchange
//! - **Fixed-delay reconnect**: no backoff, no jitter; stop cancels the pending retry
//! - **Non-blocking delivery**: observers run off the connection loop
//! - **Silent after stop**: no callback fires once [`StreamHandle::stop`] returns
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tms_telemetry::{Callbacks, StreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StreamConfig::from_env();
//!
//!     let handle = tms_telemetry::start(
//!         config,
//!         Callbacks::new()
//!             .status(|state| println!("status: {state}"))
//!             .payload(|payload| println!("{payload}"))
//!             .error(|error| eprintln!("error: {error}")),
//!     )?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.stop();
//!     handle.closed().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod observer;
pub mod session;
pub mod single_flight;
pub mod supervisor;
pub mod traccar;

// Re-export commonly used types
pub use config::StreamConfig;
pub use error::{ErrorClass, NegotiationError, TransportError, TransportResult};
pub use observer::{Callbacks, ConnectionState, Payload, StreamObserver};
pub use session::{HttpSessionApi, SessionApi, SessionNegotiator};
pub use single_flight::SingleFlight;
pub use supervisor::{StreamHandle, TelemetryClient, start};
pub use traccar::TraccarMessage;
