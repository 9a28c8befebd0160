use clap::Parser;
use tracing_subscriber::EnvFilter;

mod tail;

/// Follow the live vehicle telemetry feed of a tracking server.
///
/// Connection settings fall back to the TRACCAR_* environment variables,
/// then to the built-in development defaults.
///
/// Examples:
///   tms-tail --base https://track.example.com --user ops@example.com
///   RUST_LOG=tms_telemetry=debug tms-tail --traccar
///
#[derive(Parser)]
#[command(author, version)]
struct Cli {
    #[command(flatten)]
    cmd: tail::Cmd,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    if let Err(err) = tail::run(args.cmd) {
        eprintln!("{:?}", err);
        std::process::exit(1);
    }
}
