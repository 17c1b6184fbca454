//! Meterbridge - Real-time Meter Visualization Bridge Binary
//!
//! A standalone binary bundling the relay server, static file server,
//! replay sender, session recorder, and log generator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use futures_util::SinkExt;
use meterbridge::{
    generator, FileLogSink, HttpLogSink, LiveMonitor, LogSink, MeterViewModel, RecordingEngine,
    RelayConfig, ReplayEngine, StaticConfig, DEFAULT_RELAY_PORT, DEFAULT_STATIC_PORT,
};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "meterbridge")]
#[command(about = "Real-time meter visualization bridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "Relay, record, replay and serve multi-device meter state")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server (default)
    Relay(RelayArgs),

    /// Serve static files for the visualizer frontend
    Serve(ServeArgs),

    /// Play a recorded log into the relay
    Replay(ReplayArgs),

    /// Record live relay state into a session log
    Record(RecordArgs),

    /// Generate a synthetic session log
    Generate(GenerateArgs),
}

#[derive(Args)]
struct RelayArgs {
    /// Bind address (falls back to BRIDGE_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (falls back to BRIDGE_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory for uploaded session logs
    #[arg(long, default_value = "logs")]
    logs_dir: String,
}

#[derive(Args)]
struct ServeArgs {
    /// Bind address (falls back to STATIC_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (falls back to STATIC_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory to serve files from
    #[arg(long, default_value = ".")]
    dir: String,
}

#[derive(Args)]
struct ReplayArgs {
    /// Log file to play back
    file: String,

    /// Relay WebSocket URL
    #[arg(long, default_value_t = format!("ws://127.0.0.1:{DEFAULT_RELAY_PORT}/ws"))]
    relay_url: String,
}

#[derive(Args)]
struct RecordArgs {
    /// Recording duration in seconds
    #[arg(short, long, default_value_t = 30)]
    duration: u64,

    /// Session name
    #[arg(long, default_value = "session")]
    name: String,

    /// Directory the session log is written to
    #[arg(short, long, default_value = "logs")]
    output: String,

    /// Relay WebSocket URL
    #[arg(long, default_value_t = format!("ws://127.0.0.1:{DEFAULT_RELAY_PORT}/ws"))]
    relay_url: String,

    /// Relay HTTP base URL, used for polling and the save-log backup
    #[arg(long, default_value_t = format!("http://127.0.0.1:{DEFAULT_RELAY_PORT}"))]
    relay_http_url: String,
}

#[derive(Args)]
struct GenerateArgs {
    /// Output file
    #[arg(short, long, default_value = "logs/meter-log-simulated.json")]
    output: String,

    /// Simulated duration in seconds
    #[arg(short, long, default_value_t = 30)]
    duration: u64,

    /// Sampling interval in milliseconds
    #[arg(short, long, default_value_t = 200)]
    interval: u64,

    /// Number of simulated devices
    #[arg(long, default_value_t = 4)]
    devices: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    match cli.command.unwrap_or(Commands::Relay(RelayArgs {
        host: None,
        port: None,
        logs_dir: "logs".to_string(),
    })) {
        Commands::Relay(args) => relay_command(args).await?,
        Commands::Serve(args) => serve_command(args).await?,
        Commands::Replay(args) => replay_command(args).await?,
        Commands::Record(args) => record_command(args).await?,
        Commands::Generate(args) => generate_command(args)?,
    }

    Ok(())
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

async fn relay_command(args: RelayArgs) -> anyhow::Result<()> {
    let mut config = RelayConfig::from_env().with_logs_dir(&args.logs_dir);
    if let Some(host) = args.host {
        config = config.with_host(host);
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    meterbridge::serve_relay(config).await?;
    Ok(())
}

async fn serve_command(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = StaticConfig::from_env().with_base_dir(&args.dir);
    if let Some(host) = args.host {
        config = config.with_host(host);
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    meterbridge::serve_static(config).await?;
    Ok(())
}

/// Play a log file into the relay: a local view model runs the playback and
/// every change notification is forwarded as a state envelope.
async fn replay_command(args: ReplayArgs) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(&args.file).await?;

    let vm = MeterViewModel::new();
    let mut engine = ReplayEngine::new(vm.clone());
    let frames = engine.load(&text)?;
    info!(frames, "loaded {}", args.file);

    let (stream, _) = tokio_tungstenite::connect_async(&args.relay_url).await?;
    let (mut sink, _read) = futures_util::StreamExt::split(stream);

    // Bridge change notifications into the socket through a channel; the
    // listener callback is synchronous.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    vm.on_change(move |snapshot| {
        let envelope = serde_json::json!({
            "type": "state",
            "payload": snapshot.to_payload(),
        });
        let _ = tx.send(envelope.to_string());
    });
    let forward = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    engine.play();
    while engine.is_playing() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    // Let the tail of the queue drain before tearing the socket down.
    tokio::time::sleep(Duration::from_millis(200)).await;
    forward.abort();
    info!("replay finished");
    Ok(())
}

/// Record live state for a fixed duration, then write the session log and
/// back it up to the relay.
async fn record_command(args: RecordArgs) -> anyhow::Result<()> {
    let monitor = LiveMonitor::new(
        MeterViewModel::new(),
        &args.relay_url,
        format!("{}/state", args.relay_http_url),
    );

    let recorder = Arc::new(Mutex::new(RecordingEngine::new()));
    recorder.lock().unwrap().start(&args.name);
    let hook = Arc::clone(&recorder);
    monitor.view_model().on_change(move |snapshot| {
        hook.lock().unwrap().record(&snapshot.values);
    });

    monitor.start();
    info!("recording for {}s", args.duration);
    tokio::time::sleep(Duration::from_secs(args.duration)).await;
    monitor.stop();

    let session = recorder
        .lock()
        .unwrap()
        .stop()
        .ok_or_else(|| anyhow::anyhow!("recording produced no session"))?;
    println!("Recorded {} entries", session.entries.len());

    let file_sink = FileLogSink::new(&args.output);
    let filename = file_sink.save(&session, None).await?;
    println!("Saved to {}/{}", args.output, filename);

    // Backup upload is best effort; a dead relay must not fail the run.
    let http_sink = HttpLogSink::new(format!("{}/save-log", args.relay_http_url));
    if let Err(e) = http_sink.save(&session, Some(&filename)).await {
        warn!("relay backup failed: {}", e);
    }
    Ok(())
}

fn generate_command(args: GenerateArgs) -> anyhow::Result<()> {
    let config = generator::GeneratorConfig {
        duration_ms: args.duration * 1000,
        interval_ms: args.interval,
        devices: args.devices,
    };
    let records = generator::generate_log(&config, &mut rand::thread_rng());
    let text = serde_json::to_string_pretty(&records)?;
    if let Some(parent) = std::path::Path::new(&args.output).parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&args.output, text)?;
    println!("Generated {} records over {}s", records.len(), args.duration);
    println!("Saved to: {}", args.output);
    Ok(())
}
