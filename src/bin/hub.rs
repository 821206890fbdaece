use anyhow::Context;
use clap::Parser;
use fleetwatch::{
    config::read_config_file,
    hub::{Collaborators, Hub},
    storage, util,
};
use tracing::{error, info, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let level = util::get_log_level();
    let filter = filter::Targets::new().with_targets(vec![("fleetwatch", level), ("fleetwatch_hub", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let store = storage::open(&config.storage)
        .await
        .context("failed to open status store")?;

    let hub = Hub::start(&config, store, Collaborators::default())?;

    #[cfg(feature = "api")]
    if let Some(settings) = &config.api {
        let api_config = fleetwatch::api::ApiConfig::from_settings(settings);
        let addr = fleetwatch::api::spawn_api_server(api_config, hub.api_state()).await?;
        info!("API available at http://{addr}/api/v1");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }

    info!("shutting down");
    hub.shutdown().await;

    Ok(())
}
