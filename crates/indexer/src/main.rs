use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing::{error, info};

use indexer::config::Config;
use indexer::follower::BlockFollower;
use indexer::logging;
use indexer::processor::Processor;
use indexer::shutdown::Shutdown;
use indexer::sweeper;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file from the current directory
    dotenv().ok();

    logging::init_logging()?;

    let cfg = Config::from_env()?;

    info!("🚀 Starting hivemoji indexer");
    info!("Hive node: {}", cfg.hive_rpc_url);
    info!("Database: {}", mask_dsn(&cfg.postgres_dsn));

    let db = storage::connect(&cfg.postgres_dsn).await?;
    let store = storage::Store::new(db);
    store.ensure_schema().await.context("ensure schema")?;

    let client = hive::HiveClient::new(&cfg.hive_rpc_url)?;

    let shutdown = Arc::new(Shutdown::new());
    install_signal_handlers(shutdown.clone());

    let follower = BlockFollower::new(
        client,
        Processor::new(store.clone()),
        &cfg,
        shutdown.clone(),
    );
    let follower_handle = tokio::spawn(async move { follower.run().await });

    let sweeper_handle = tokio::spawn(sweeper::run(
        store.clone(),
        cfg.incomplete_chunk_ttl,
        cfg.incomplete_cleanup_interval,
        shutdown.clone(),
    ));

    let addr = cfg.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    info!("📡 Read API listening on {}", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, api::router(store))
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
        .context("http server")?;

    // The server only returns once shutdown was triggered; collect the
    // long-lived tasks.
    match follower_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("follower: {}", e),
        Err(e) => error!("follower task: {}", e),
    }
    if let Err(e) = sweeper_handle.await {
        error!("sweeper task: {}", e);
    }

    info!("hivemoji indexer stopped");
    Ok(())
}

fn install_signal_handlers(shutdown: Arc<Shutdown>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!("install SIGTERM handler: {}", e);
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
        }

        shutdown.trigger();
    });
}

/// Mask credentials in the connection string for logging.
fn mask_dsn(dsn: &str) -> String {
    match (dsn.find("//"), dsn.find('@')) {
        (Some(scheme), Some(at)) if scheme + 2 < at => {
            format!("{}****{}", &dsn[..scheme + 2], &dsn[at..])
        }
        _ => dsn.to_string(),
    }
}
