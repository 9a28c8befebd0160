//! Position Stream Example
//!
//! Connects to a tracking server and prints every position fix it reports.
//! Configuration is read from the `TRACCAR_*` environment variables.
//!
//! Run with: `cargo run -p tms-telemetry --example stream_positions`

use tms_telemetry::{Callbacks, StreamConfig, TelemetryClient, TraccarMessage};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = StreamConfig::from_env();
    println!("Config: {config:?}");

    let client = TelemetryClient::new(config)?;
    println!("Streaming from {}", client.socket_url());

    let handle = client.start(
        Callbacks::new()
            .status(|state| println!("[{state}]"))
            .payload(|payload| match TraccarMessage::from_payload(&payload) {
                Ok(message) => {
                    for position in &message.positions {
                        println!(
                            "device {:>5}  {:>10.5} {:>10.5}  {:>6.1} km/h",
                            position.device_id,
                            position.latitude,
                            position.longitude,
                            position.speed_kmh(),
                        );
                    }
                }
                Err(e) => eprintln!("unexpected record: {e}"),
            })
            .error(|error| eprintln!("error: {error}")),
    );

    tokio::signal::ctrl_c().await?;
    handle.stop();
    handle.closed().await;
    Ok(())
}
