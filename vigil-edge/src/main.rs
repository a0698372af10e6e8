// Vigil edge daemon
// Captures frames on an interval and runs remote object detection on them

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vigil_bus::{serve_bridge, InProcessBus, LocalBus, RemoteBus};
use vigil_cloud::{resolve_credentials, IotResultPublisher, S3ArtifactStore};
use vigil_core::{LabelTable, PipelineConfig};
use vigil_eye::{default_camera, CaptureProducer, GrpcInferenceClient, InferenceConsumer, RetryingClient};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Edge camera capture and object detection pipeline", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON or TOML); environment overrides still apply
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture and inference in one process
    Run,

    /// Capture frames and announce them
    Capture {
        /// Bus bridge of the inference process, e.g. http://127.0.0.1:8790
        #[arg(long)]
        bus_url: Option<String>,
    },

    /// Run inference on frames announced through the bus bridge
    Infer {
        /// Address the bus bridge listens on
        #[arg(long, default_value = "127.0.0.1:8790")]
        listen: SocketAddr,
    },

    /// Print the resolved configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let config = Arc::new(config);

    if let Commands::CheckConfig = cli.command {
        println!("{}", serde_json::to_string_pretty(config.as_ref())?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        let _ = shutdown_tx.send(true);
    });

    match cli.command {
        Commands::Run => run_pipeline(config, shutdown_rx).await,
        Commands::Capture { bus_url } => run_capture(config, bus_url, shutdown_rx).await,
        Commands::Infer { listen } => run_inference(config, listen, shutdown_rx).await,
        Commands::CheckConfig => Ok(()),
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_pipeline(config: Arc<PipelineConfig>, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    info!("Starting capture and inference");
    let bus = Arc::new(InProcessBus::new());
    let producer = CaptureProducer::new(config.clone(), default_camera(), bus.clone());
    producer.probe().await.context("Camera is not usable")?;

    let consumer = Arc::new(build_consumer(config)?);
    let subscription = consumer.attach(bus.as_ref()).await?;
    let worker = {
        let consumer = consumer.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };

    producer.run(shutdown).await;
    worker.await.context("Inference worker failed")?;
    subscription.cancel();
    info!("Pipeline stopped");
    Ok(())
}

async fn run_capture(
    config: Arc<PipelineConfig>,
    bus_url: Option<String>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let bus: Arc<dyn LocalBus> = match bus_url {
        Some(url) => {
            info!("Publishing captures to {}", url);
            Arc::new(RemoteBus::new(url)?)
        }
        None => {
            warn!("No --bus-url given, captures have no local subscribers");
            Arc::new(InProcessBus::new())
        }
    };
    let producer = CaptureProducer::new(config, default_camera(), bus);
    producer.probe().await.context("Camera is not usable")?;
    producer.run(shutdown).await;
    Ok(())
}

async fn run_inference(
    config: Arc<PipelineConfig>,
    listen: SocketAddr,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let bus = Arc::new(InProcessBus::new());
    let consumer = build_consumer(config)?;
    let subscription = consumer.attach(bus.as_ref()).await?;

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind bus bridge on {}", listen))?;
    let bridge = {
        let shutdown = shutdown.clone();
        tokio::spawn(serve_bridge(bus, listener, shutdown_requested(shutdown)))
    };

    consumer.run(shutdown).await;
    subscription.cancel();
    if let Err(e) = bridge.await? {
        error!("Bus bridge failed: {}", e);
    }
    Ok(())
}

fn build_consumer(config: Arc<PipelineConfig>) -> anyhow::Result<InferenceConsumer> {
    let labels = LabelTable::load(&config.label_path)?;
    info!("Loaded {} labels from {}", labels.len(), config.label_path.display());

    let client = RetryingClient::new(GrpcInferenceClient::from_config(&config), config.inference_retries);
    let credentials = resolve_credentials(|key| std::env::var(key).ok())?;
    let publisher = IotResultPublisher::from_config(&config, credentials.clone())?;
    let store = S3ArtifactStore::from_config(&config, credentials)?;
    if config.bucket.is_empty() {
        warn!("S3_BUCKET_NAME is not set, uploads will fail");
    }
    if config.iot_endpoint.is_empty() {
        warn!("IOT_DATA_ENDPOINT is not set, result publishing will fail");
    }

    Ok(InferenceConsumer::new(
        config,
        Arc::new(client),
        Arc::new(labels),
        Arc::new(publisher),
        Arc::new(store),
    ))
}

async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Wait for SIGINT or SIGTERM
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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
