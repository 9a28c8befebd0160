use std::time::Duration;

use clap::Args;
use tms_telemetry::{
    Callbacks, ConnectionState, Payload, StreamConfig, TelemetryClient, TraccarMessage,
};
use tokio::runtime;
use tracing::{error, info, warn};

/// Stream settings and output format.
#[derive(Args)]
pub struct Cmd {
    /// Base address of the tracking server, e.g. "https://track.example.com".
    /// The streaming and session paths are derived from it.
    #[arg(long, value_name = "URL")]
    base: Option<String>,

    /// Account used for session negotiation.
    #[arg(short, long, value_name = "ID")]
    user: Option<String>,

    /// Secret for the account.
    #[arg(short, long, value_name = "SECRET")]
    password: Option<String>,

    /// Wait between reconnect attempts.
    /// Accepts human-readable formats like "4s", "1m", "500ms".
    #[arg(short, long, value_parser = humantime::parse_duration)]
    reconnect: Option<Duration>,

    /// Pretty-print each record as JSON.
    #[arg(long, conflicts_with = "traccar")]
    json: bool,

    /// Print a one-line summary per device, position and event.
    #[arg(long)]
    traccar: bool,
}

#[derive(Clone, Copy)]
enum Format {
    Compact,
    Pretty,
    Traccar,
}

impl Cmd {
    fn config(&self) -> StreamConfig {
        self.apply(StreamConfig::from_env())
    }

    /// Layer the command-line flags over `config`.
    fn apply(&self, mut config: StreamConfig) -> StreamConfig {
        if let Some(base) = &self.base {
            config.base_url = base.clone();
        }
        if let Some(user) = &self.user {
            config.identity = user.clone();
        }
        if let Some(password) = &self.password {
            config.secret = password.clone();
        }
        if let Some(delay) = self.reconnect {
            config = config.reconnect_delay(delay);
        }
        config
    }

    fn format(&self) -> Format {
        if self.traccar {
            Format::Traccar
        } else if self.json {
            Format::Pretty
        } else {
            Format::Compact
        }
    }
}

pub fn run(cmd: Cmd) -> eyre::Result<()> {
    let config = cmd.config();
    let format = cmd.format();

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async move {
        let client = TelemetryClient::new(config)?;
        info!(url = %client.socket_url(), "Following telemetry stream");

        let handle = client.start(
            Callbacks::new()
                .status(report_status)
                .payload(move |payload| print_payload(format, &payload))
                .error(|e| warn!(class = ?e.class(), "{e}")),
        );

        tokio::signal::ctrl_c().await?;
        info!("Interrupted");
        handle.stop();
        handle.closed().await;
        Ok::<_, eyre::Report>(())
    })
}

fn report_status(state: ConnectionState) {
    match state {
        ConnectionState::Error => error!("Stream error"),
        ConnectionState::Retrying => warn!("Stream lost, retrying"),
        state => info!("Stream {state}"),
    }
}

fn print_payload(format: Format, payload: &Payload) {
    match format {
        Format::Compact => println!("{payload}"),
        Format::Pretty => match serde_json::to_string_pretty(payload) {
            Ok(text) => println!("{text}"),
            Err(e) => warn!(error = %e, "Failed to format record"),
        },
        Format::Traccar => match TraccarMessage::from_payload(payload) {
            Ok(message) => print_summary(&message),
            Err(e) => warn!(error = %e, "Record is not a Traccar message"),
        },
    }
}

fn print_summary(message: &TraccarMessage) {
    for device in &message.devices {
        println!(
            "device   {:>6}  {:<24} {}",
            device.id,
            device.name.as_deref().unwrap_or("-"),
            device.status.as_deref().unwrap_or("unknown"),
        );
    }
    for position in &message.positions {
        let ignition = match position.ignition() {
            Some(true) => "on",
            Some(false) => "off",
            None => "-",
        };
        println!(
            "position {:>6}  {:>10.5} {:>10.5}  {:>6.1} km/h  {:>5.0}°  ign {}  {}",
            position.device_id,
            position.latitude,
            position.longitude,
            position.speed_kmh(),
            position.course,
            ignition,
            position.fix_time.as_deref().unwrap_or("-"),
        );
    }
    for event in &message.events {
        println!(
            "event    {:>6}  {:<24} {}",
            event.device_id,
            event.kind,
            event.event_time.as_deref().unwrap_or("-"),
        );
    }
}
