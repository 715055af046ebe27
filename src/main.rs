//! Command-line interface for mqtt-blast
//!
//! # Usage Examples
//!
//! ```bash
//! # Mirror the classic local stress setup: 1 subscriber, 50 publishers,
//! # 100 messages each, as fast as the broker accepts them
//! mqtt-blast run --broker localhost:1883 --topic blast/load
//!
//! # Paced QoS 1 load with a strict loss budget and a JSON report file
//! mqtt-blast run --broker broker.example.com:1883 \
//!   --publishers 20 --qos 1 --repeat 1000 --repeat-delay 10 \
//!   --max-loss-pct 0 --output report.json
//!
//! # Human-readable summary against an MQTT 3.1.1 broker
//! mqtt-blast run --broker localhost:1883 --protocol 3.1.1 --format table
//! ```
//!
//! # Exit Codes
//! - 0: run completed within the loss threshold
//! - 1: a client handle failed to connect (or the session could not run)
//! - 2: loss threshold exceeded

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use blast_client::{ProtocolVersion, QosLevel};
use blast_report::{format_table, ReportMeta, RunReport};
use mqtt_blast::config::broker::parse_broker_addr;
use mqtt_blast::config::duration::parse_duration_to_secs;
use mqtt_blast::{run_session, SessionConfig};

#[derive(Parser)]
#[command(name = "mqtt-blast")]
#[command(about = "An MQTT publish/subscribe load-test harness")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one load session against a broker
    Run(RunArgs),
}

/// Protocol revision for CLI.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProtocolChoice {
    #[value(name = "3.1.1")]
    V311,
    #[value(name = "5")]
    V5,
}

impl From<ProtocolChoice> for ProtocolVersion {
    fn from(choice: ProtocolChoice) -> Self {
        match choice {
            ProtocolChoice::V311 => ProtocolVersion::V311,
            ProtocolChoice::V5 => ProtocolVersion::V5,
        }
    }
}

/// Output format for the run report.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Table,
}

/// Arguments for the run command.
#[derive(Args)]
struct RunArgs {
    /// Broker address as host:port (port defaults to 1883)
    #[arg(long, default_value = "localhost:1883", env = "MQTT_BROKER")]
    broker: String,

    /// Topic to publish to and subscribe on
    #[arg(long, default_value = "blast/load")]
    topic: String,

    /// Number of concurrent publishers
    #[arg(long, short = 'n', default_value = "50")]
    publishers: usize,

    /// QoS level for publishes and the subscription (0, 1 or 2)
    #[arg(long, default_value = "0")]
    qos: u8,

    /// Messages each publisher sends
    #[arg(long, default_value = "100")]
    repeat: u64,

    /// Minimum milliseconds between a publisher's messages (0 = full speed)
    #[arg(long, default_value = "0")]
    repeat_delay: u64,

    /// Maximum session duration, e.g. "60", "90s", "5m"
    #[arg(long, default_value = "60s")]
    duration: String,

    /// Grace period for in-flight messages after publishers finish
    #[arg(long, default_value = "30s")]
    grace: String,

    /// MQTT protocol revision
    #[arg(long, default_value = "5")]
    protocol: ProtocolChoice,

    /// Payload size in bytes, tracking header included (minimum 16)
    #[arg(long, default_value = "256")]
    payload_size: usize,

    /// Prefix for generated client ids
    #[arg(long, default_value = "blast")]
    client_id_prefix: String,

    /// MQTT keep-alive interval in seconds
    #[arg(long, default_value = "30")]
    keep_alive: u64,

    /// Connect with a persistent session instead of a clean one
    #[arg(long)]
    no_clean_session: bool,

    /// Seconds a QoS 1/2 publish waits for its broker ack
    #[arg(long, default_value = "5")]
    ack_timeout: u64,

    /// Seconds each handle waits for its CONNACK
    #[arg(long, default_value = "10")]
    connect_timeout: u64,

    /// Maximum tolerated loss percentage before the run fails
    #[arg(long, default_value = "0.0")]
    max_loss_pct: f64,

    /// Base seed for deterministic payload filler
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Report format written to stdout
    #[arg(long, short = 'f', default_value = "json")]
    format: OutputFormat,

    /// Also write the JSON report to this file
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let code = match run_load(args).await {
                Ok(code) => code,
                Err(err) => {
                    tracing::error!("Session failed: {:#}", err);
                    1
                }
            };
            std::process::exit(code);
        }
    }
}

async fn run_load(args: RunArgs) -> anyhow::Result<i32> {
    let (broker_host, broker_port) = parse_broker_addr(&args.broker)?;
    let qos = QosLevel::try_from(args.qos)?;
    let protocol = ProtocolVersion::from(args.protocol);
    let duration = Duration::from_secs(parse_duration_to_secs(&args.duration)?);
    let grace = Duration::from_secs(parse_duration_to_secs(&args.grace)?);

    let config = SessionConfig {
        broker_host,
        broker_port,
        topic: args.topic.clone(),
        publishers: args.publishers,
        qos,
        protocol,
        repeat: args.repeat,
        repeat_delay: Duration::from_millis(args.repeat_delay),
        duration,
        grace,
        payload_size: args.payload_size,
        client_id_prefix: args.client_id_prefix,
        keep_alive: Duration::from_secs(args.keep_alive),
        clean_session: !args.no_clean_session,
        connect_timeout: Duration::from_secs(args.connect_timeout),
        ack_timeout: Duration::from_secs(args.ack_timeout),
        seed: args.seed,
    };

    tracing::info!(
        "Starting load session against {}:{} on topic {}",
        config.broker_host,
        config.broker_port,
        config.topic
    );

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, draining session");
            signal_token.cancel();
        }
    });

    let outcome = run_session(config, cancel).await?;

    let meta = ReportMeta {
        broker: args.broker,
        topic: args.topic,
        qos: qos.as_u8(),
        protocol: protocol.to_string(),
        publisher_count: args.publishers,
        max_loss_pct: args.max_loss_pct,
        started_at: outcome.started_at,
        completed_at: outcome.completed_at,
    };
    let report = RunReport::build(meta, &outcome.subscriber, &outcome.publishers);

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, &json)
            .with_context(|| format!("Failed to write report to {path:?}"))?;
        tracing::info!("Report written to {:?}", path);
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => println!("{}", format_table(&report)),
    }

    Ok(report.exit_code())
}
