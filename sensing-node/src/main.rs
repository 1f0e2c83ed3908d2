use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use watchpost_node::camera::{self, CameraDriver, CameraFactory, FrameSource, SourceSettings, SyntheticCamera};
use watchpost_node::clock::{Clock, SystemClock};
use watchpost_node::config::{AgentConfig, CameraSource};
use watchpost_node::detection::{BlobDetector, MotionGate};
use watchpost_node::error::{AgentError, Result};
use watchpost_node::pipeline::CaptureLoop;
use watchpost_node::remote::spawn_remote;
use watchpost_node::settings::RuntimeSettings;
use watchpost_node::stabilizer::DetectionStabilizer;
use watchpost_node::state::SharedState;
use watchpost_node::worker::Worker;
use watchpost_node::Shutdown;

/// How long shutdown waits for each loop before detaching it.
const CAPTURE_GRACE: Duration = Duration::from_secs(5);
const REMOTE_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path (YAML or TOML); environment variables override it
    #[arg(short, long)]
    config: Option<String>,

    /// Log level, overrides `logging.level` from the config
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("failed to load configuration")?;

    init_logging(args.log_level.as_deref().unwrap_or(&config.logging.level))?;

    config.validate()?;

    info!("Starting Watchpost sensing node");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let settings = Arc::new(RuntimeSettings::from_config(&config));
    let shared = Arc::new(SharedState::new(settings.snapshot().history_capacity));
    let stabilizer = Arc::new(DetectionStabilizer::new(Arc::clone(&settings)));
    let shutdown = Shutdown::new();

    // Capture side
    let factory = camera_factory(config.camera.source);
    let device = camera::select_device(&config.camera, Arc::clone(&factory));
    let source = FrameSource::new(
        factory.create(),
        SourceSettings::from_config(&config.camera, device),
        Arc::clone(&clock),
    );
    let capture = CaptureLoop::new(
        source,
        Box::new(BlobDetector::default()),
        stabilizer,
        Arc::clone(&shared),
        Arc::clone(&settings),
        Arc::clone(&clock),
    )
    .with_motion_gate(MotionGate::new());
    let capture_worker = {
        let shutdown = shutdown.clone();
        Worker::spawn("capture", move || capture.run(shutdown))
            .context("failed to spawn capture thread")?
    };

    // Remote side
    let remote_worker = if config.remote.enabled {
        Some(
            spawn_remote(config.remote.clone(), shared, settings, clock, shutdown.clone())
                .context("failed to spawn remote thread")?,
        )
    } else {
        info!("Remote control disabled by configuration");
        None
    };

    wait_for_shutdown().await;
    shutdown.trigger();

    capture_worker.join_within(CAPTURE_GRACE);
    if let Some(worker) = remote_worker {
        // An in-flight long-poll is abandoned rather than waited out.
        worker.join_within(REMOTE_GRACE);
    }

    info!("Shutting down Watchpost sensing node");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_thread_names(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AgentError::ConfigError(e.to_string()))?;

    Ok(())
}

fn load_config(path: Option<&str>) -> Result<AgentConfig> {
    use config::{Config, Environment, File};

    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::with_name(path));
    }

    let settings = builder
        .add_source(
            Environment::with_prefix("WATCHPOST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

fn camera_factory(source: CameraSource) -> Arc<dyn CameraFactory> {
    match source {
        CameraSource::Synthetic => {
            Arc::new(|| Box::new(SyntheticCamera::new(vec![0])) as Box<dyn CameraDriver>)
        }
    }
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
