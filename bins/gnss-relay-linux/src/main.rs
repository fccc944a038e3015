use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use gnss_relay_core::RelayConfig;
use gnss_relay_server::RelayServer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Relay one GNSS data stream to many outputs.
#[derive(Debug, Parser)]
#[command(name = "gnss-relay", version)]
struct Args {
    /// JSON configuration file; command line options override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input stream path, e.g. `serial://ttyUSB0:115200#ubx`.
    #[arg(long = "in")]
    input: Option<String>,

    /// Output stream path; repeat for more outputs.
    #[arg(long = "out")]
    outputs: Vec<String>,

    /// Message types and intervals for converting outputs, e.g. `1004,1019(10)`.
    #[arg(long = "msg")]
    messages: Option<String>,

    /// Receiver command file sent on start and stop.
    #[arg(long = "cmd")]
    commands: Option<PathBuf>,

    /// Station id for converted messages.
    #[arg(long = "sta")]
    station_id: Option<u16>,

    /// Status line period in seconds.
    #[arg(long, default_value_t = 5)]
    status_secs: u64,

    /// Trace level (0-2).
    #[arg(short = 't', long)]
    trace: Option<u8>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::load(path)?,
            None => RelayConfig::default(),
        };
        if let Some(input) = self.input {
            config.input = input;
        }
        if !self.outputs.is_empty() {
            config.outputs = self.outputs;
        }
        if let Some(messages) = self.messages {
            config.messages = messages;
        }
        if let Some(path) = &self.commands {
            config.commands = Some(std::fs::read_to_string(path)?);
        }
        if self.station_id.is_some() {
            config.station_id = self.station_id;
        }
        if let Some(trace) = self.trace {
            config.trace_level = trace;
        }
        Ok(config)
    }
}

fn default_filter(trace_level: u8) -> &'static str {
    match trace_level {
        0 => "info",
        1 => "info,gnss_relay_core=debug,gnss_relay_protocol=debug,gnss_relay_server=debug",
        _ => "info,gnss_relay_core=trace,gnss_relay_protocol=trace,gnss_relay_server=trace",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let status_period = Duration::from_secs(args.status_secs.max(1));
    let config = args.into_config()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter(config.trace_level).into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server = RelayServer::from_config(&config)?;
    let status = server.status();
    let token = server.shutdown_token();
    let mut relay = tokio::spawn(server.run());

    tracing::info!("gnss-relay started: {} -> {}", config.input, config.outputs.join(" "));

    let mut ticker = tokio::time::interval(status_period);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down...");
                break;
            }
            _ = ticker.tick() => {
                let now = chrono::Utc::now().format("%Y/%m/%d %H:%M:%S");
                eprintln!("{} {}", now, status.snapshot());
            }
            result = &mut relay => {
                result?;
                tracing::warn!("Relay stopped unexpectedly");
                return Ok(());
            }
        }
    }

    token.cancel();
    let last = relay.await?;
    eprintln!("{} {}", chrono::Utc::now().format("%Y/%m/%d %H:%M:%S"), last);
    tracing::info!("Shutdown complete");
    Ok(())
}
