use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use proxed_core::{
    MemoryExecutionSink, MemoryProjectStore, MemoryTeamMetrics, Pipeline, StaticDeviceVerifier,
};
use proxed_provider::{WreqDispatcher, WreqDispatcherConfig};
use proxed_router::proxy_router;
use tracing::info;

mod cli;
mod seed;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("proxed failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    let projects = Arc::new(MemoryProjectStore::default());
    let metrics = Arc::new(MemoryTeamMetrics::default());
    if !cli.seed.trim().is_empty() {
        let config = seed::load_seed(&cli.seed)?;
        seed::apply_seed(config, &projects, &metrics);
    }

    let mut dispatcher_config = WreqDispatcherConfig::default();
    if let Some(url) = cli.openai_base_url {
        dispatcher_config.openai_base_url = url;
    }
    if let Some(url) = cli.anthropic_base_url {
        dispatcher_config.anthropic_base_url = url;
    }
    if let Some(url) = cli.google_base_url {
        dispatcher_config.google_base_url = url;
    }
    let dispatcher = Arc::new(WreqDispatcher::new(dispatcher_config)?);

    // Device attestation plugs in behind the DeviceVerifier trait; the
    // standalone binary accepts every token.
    let pipeline = Pipeline::new(
        projects,
        Arc::new(StaticDeviceVerifier::accepting()),
        metrics,
        Arc::new(MemoryExecutionSink::default()),
        dispatcher,
    );
    let app = proxy_router(Arc::new(pipeline));

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("proxed=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
