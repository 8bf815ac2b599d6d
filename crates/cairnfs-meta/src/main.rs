#![warn(missing_docs)]

//! `cairn-meta`: the CairnFS metadata and replica-placement server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cairnfs_meta::{init_logging, server, ControlPlane, MetaConfig};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Command line for the metadata server.
#[derive(Debug, Parser)]
#[command(name = "cairn-meta", version, about = "CairnFS metadata server")]
struct Cli {
    /// Path to a .toml or .json config file
    #[arg(short, long, env = "CAIRN_META_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen address from the config file
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => MetaConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => MetaConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    config.validate()?;

    init_logging(&config.log)?;
    tracing::info!(
        node_name = %config.node_name,
        replication_factor = config.replication_factor,
        "cairn-meta starting"
    );

    let plane = Arc::new(ControlPlane::with_tcp_dispatch(config.clone()));
    let report = plane.load();
    if let Some(e) = &report.file_error {
        tracing::warn!(error = %e, "starting with an empty file table");
    }
    if let Some(e) = &report.node_error {
        tracing::warn!(error = %e, "starting with an empty node registry");
    }

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server_handle = tokio::spawn(server::serve(
        listener,
        plane.clone(),
        shutdown_rx.clone(),
    ));
    let recovery_handle = tokio::spawn(plane.recovery().clone().run(shutdown_rx.clone()));
    let save_handle = tokio::spawn(save_loop(plane.clone(), shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    match server_handle.await {
        Ok(Err(e)) => tracing::error!(error = %e, "control listener failed"),
        Err(e) => tracing::error!(error = %e, "control listener task panicked"),
        Ok(Ok(())) => {}
    }
    let _ = recovery_handle.await;
    let _ = save_handle.await;

    save_now(plane).await?;
    tracing::info!("cairn-meta stopped");
    Ok(())
}

async fn save_loop(plane: Arc<ControlPlane>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(plane.config().save_interval());
    // The first tick fires immediately; nothing has changed yet.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = save_now(plane.clone()).await {
                    tracing::error!(error = %e, "periodic metadata save failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn save_now(plane: Arc<ControlPlane>) -> Result<()> {
    tokio::task::spawn_blocking(move || plane.save())
        .await
        .context("save task panicked")?
        .context("failed to save metadata")
}
