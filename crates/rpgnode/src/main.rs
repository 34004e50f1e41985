mod cli;

use clap::Parser;
use eyre::{eyre, WrapErr};
use tokio::sync::broadcast::error::RecvError;

use rpgnode_core::events::ServiceEvent;
use rpgnode_core::{CoreError, NodeService, ServiceConfig};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_filter)),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let mut config = ServiceConfig::from_file(&args.config).context("load service configuration")?;
    if let Some(network) = args.network {
        config.network = network;
    }
    tracing::info!(
        network = %config.network,
        spawn = config.spawn.is_some(),
        remotes = config.connect.len(),
        "starting node service"
    );

    let service = NodeService::new(config);
    let events = tokio::spawn(log_events(service.subscribe_events()));

    if let Err(err) = service.start().await {
        let message = format_start_error(&err);
        // Bring down anything that did start before reporting.
        if let Err(stop_err) = service.stop().await {
            tracing::warn!(error = %stop_err, "failed to stop after startup error");
        }
        return Err(eyre!(message).wrap_err("while starting the node service"));
    }

    tracing::info!(height = service.height(), "node service ready");

    tokio::signal::ctrl_c()
        .await
        .context("listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    service.stop().await.context("stop node service")?;
    events.abort();
    Ok(())
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<ServiceEvent>) {
    loop {
        match events.recv().await {
            Ok(ServiceEvent::Tip(height)) => tracing::debug!(height, "tip"),
            Ok(ServiceEvent::Synced) => tracing::info!("daemon is synced"),
            Ok(ServiceEvent::Error(err)) => tracing::error!(error = %err, "service error"),
            Ok(ServiceEvent::Block(_) | ServiceEvent::Tx(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event log fell behind");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

fn format_start_error(err: &CoreError) -> String {
    let mut lines = vec![format!("{err}")];

    match err {
        CoreError::Config(_) => lines.push(
            "hint: check the \"spawn\" and \"connect\" sections of the configuration and the \
             generated rpg.conf in the daemon datadir"
                .into(),
        ),
        CoreError::Process(_) => lines.push(
            "hint: verify that \"spawn.exec\" points at an executable rpgd binary".into(),
        ),
        CoreError::Zmq(_) => lines.push(
            "hint: verify the zmqpubrawtx endpoint and that the daemon was built with ZMQ support"
                .into(),
        ),
        _ if err.is_warming_up() => lines.push(
            "hint: the daemon is still loading; raise \"timings.start_retry_count\" to wait longer"
                .into(),
        ),
        CoreError::Rpc(_) => lines.push(
            "hint: verify the RPC host, port and credentials, and that the daemon is running"
                .into(),
        ),
        _ => {}
    }

    lines.join("\n")
}
