// Property price server entry point.
//
// Startup sequence:
// 1. Parse CLI arguments
// 2. Initialize tracing (stderr)
// 3. Load config and apply bind overrides
// 4. Load the preprocessor and model artifacts
// 5. Bind and serve until Ctrl+C or SIGTERM

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use pricer_core::PricePredictor;
use pricer_server::config;
use pricer_server::AppState;
use tokio::signal;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(
    name = "pricer",
    about = "HTTP API for property price estimates",
    version = env!("CARGO_PKG_VERSION")
)]
struct ServerArgs {
    /// Config file to load instead of config/pricer.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();

    init_tracing()?;
    info!("Pricer starting up");

    let mut config = match &args.config {
        Some(path) => config::load_config_file(path),
        None => config::load_config(),
    }
    .context("failed to load configuration")?;
    config::apply_bind_overrides(&mut config.server, args.host, args.port);
    match &args.config {
        Some(path) => info!("Config loaded from {}", path.display()),
        None => info!("Config loaded from config/{}", config::CONFIG_FILE),
    }
    info!(
        "Artifacts: preprocessor={}, model={}",
        config.artifacts.preprocessor.display(),
        config.artifacts.model.display()
    );

    let predictor = PricePredictor::load(&config.artifacts.preprocessor, &config.artifacts.model)
        .context("failed to load model artifacts")?;
    info!(
        "Loaded preprocessor: {} blocks over {} columns, remainder {:?}",
        predictor.preprocessor().transformers().len(),
        predictor.preprocessor().input_columns().count(),
        predictor.preprocessor().remainder()
    );
    info!(
        "Loaded model: {} trees over {} features ({})",
        predictor.model().num_trees(),
        predictor.model().num_features(),
        predictor.model().objective()
    );

    let state = AppState::new(predictor, config.response);

    let listener = pricer_server::bind(&config.server).await.with_context(|| {
        format!(
            "failed to bind host {} port {}",
            config.server.host, config.server.port
        )
    })?;

    pricer_server::serve(listener, state, shutdown_signal())
        .await
        .context("server error")?;

    info!("Pricer shut down cleanly");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("pricer_server=info,pricer_core=info,tower_http=info")
        }))
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
