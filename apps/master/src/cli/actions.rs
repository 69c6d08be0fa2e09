use tokio::select;
use tokio::signal::unix;
use tokio::signal::unix::SignalKind;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{prelude::*, util::SubscriberInitExt, EnvFilter};

use crate::{
    cli::{arguments, master::Master},
    config::MasterConfig,
};

pub async fn run(args: arguments::Run) -> eyre::Result<()> {
    let config = MasterConfig::from_path(args.config)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.logger.level).into())
        .from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .try_init()?;

    let mut master = Master::new(config);
    master.run().await?;

    let mut sigterm =
        unix::signal(SignalKind::terminate()).expect("Failed to create SIGTERM signal handler");
    let mut sigint =
        unix::signal(SignalKind::interrupt()).expect("Failed to create SIGINT signal handler");

    select! {
        _ = master.cancelled() => {
            tracing::info!("Shutdown requested by a client");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM signal");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT signal");
        }
    }

    master.shutdown().await;

    Ok(())
}
