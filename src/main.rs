use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use leaposc::app::Orchestrator;
use leaposc::persistence::config_file::{self, default_config_path};
use leaposc::persistence::config_portal::ConfigPortal;
use leaposc::tracking::simulated::SyntheticSource;
use leaposc::transport::osc_sender::UdpOscSender;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Streams hand tracking data as OSC messages over UDP.
#[derive(Parser, Debug)]
#[command(name = "leaposc", version, about)]
struct Args {
    /// Configuration file (default: <config dir>/leaposc/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// OSC target host, saved to the configuration
    #[arg(long)]
    osc_ip: Option<String>,

    /// OSC target port, saved to the configuration
    #[arg(long)]
    osc_port: Option<u16>,

    /// Yield instead of sleeping when no frames are pending, saved to the configuration
    #[arg(long)]
    low_latency: Option<bool>,

    /// Number of simulated tracking devices
    #[arg(long, default_value_t = 1)]
    devices: u32,

    /// Frames per second of each simulated device
    #[arg(long, default_value_t = 90)]
    frame_rate: u32,

    /// Seconds between configuration autosaves
    #[arg(long, default_value_t = 300)]
    autosave_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut doc = config_file::load_or_create(&config_path).await?;
    if let Some(ip) = args.osc_ip {
        doc.osc_ip = ip;
    }
    if let Some(port) = args.osc_port {
        doc.osc_port = port;
    }
    if let Some(low_latency) = args.low_latency {
        doc.low_latency_mode = low_latency;
    }
    let portal = Arc::new(ConfigPortal::from_document(doc));

    let transport = portal.transport_config();
    info!(
        "Sending OSC to {}:{}{}",
        transport.osc_ip,
        transport.osc_port,
        if transport.low_latency_mode { " (low latency)" } else { "" }
    );
    let sender = UdpOscSender::new(&transport.osc_ip, transport.osc_port)
        .map_err(|e| eyre!("Failed to create OSC sender: {}", e))?;

    let orchestrator = Arc::new(Orchestrator::new(portal.clone(), Arc::new(sender), None));
    orchestrator
        .start(Box::new(SyntheticSource::new(args.devices, args.frame_rate)))
        .map_err(|e| eyre!("Failed to start pipeline: {}", e))?;

    let cancel = CancellationToken::new();
    let autosave = config_file::start_autosave_task(
        portal.clone(),
        config_path.clone(),
        args.autosave_secs,
        cancel.clone(),
    );
    let tick = tokio::spawn(run_consumer_tick(
        orchestrator.clone(),
        transport.low_latency_mode,
        cancel.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;
    info!("Shutdown requested");

    cancel.cancel();
    if let Err(e) = tick.await {
        error!("Consumer tick ended abnormally: {}", e);
    }
    if let Err(e) = autosave.await {
        error!("Autosave task ended abnormally: {}", e);
    }

    if let Err(e) = orchestrator.stop() {
        error!("Failed to stop pipeline: {}", e);
    }
    orchestrator.close_transport();

    config_file::save_portal(&config_path, &portal).await?;
    info!("Configuration saved to {}", config_path.display());
    Ok(())
}

/// Drains the frame queue until cancelled.
async fn run_consumer_tick(
    orchestrator: Arc<Orchestrator>,
    low_latency: bool,
    cancel: CancellationToken,
) {
    let mut total: u64 = 0;
    while !cancel.is_cancelled() {
        let processed = orchestrator.process_pending_frames();
        total += processed as u64;

        if processed == 0 {
            if low_latency {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
    }
    info!("Consumer tick stopped after {} frame(s)", total);
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
