use std::sync::Arc;

use orderbook_mirror::binance::{BinanceClient, VenueFeed};
use orderbook_mirror::config::Config;
use orderbook_mirror::orderbook::BookRegistry;
use orderbook_mirror::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        pairs = ?config.trading_pairs,
        ws_url = %config.ws_url,
        bootstrap = ?config.bootstrap_mode,
        "Starting order book mirror"
    );

    let registry = Arc::new(BookRegistry::new());
    let client = Arc::new(BinanceClient::new(config.rest_url.clone()));
    let feed = Arc::new(VenueFeed::new(
        &config,
        Arc::clone(&registry),
        Arc::clone(&client),
    ));

    // Books exist before the first diff arrives
    feed.initialize_books().await;

    let feed_stats = feed.stats();
    let feed_task = tokio::spawn({
        let feed = Arc::clone(&feed);
        async move {
            if let Err(e) = feed.run().await {
                tracing::error!(error = %e, "Venue feed stopped");
            }
        }
    });

    // Shutdown broadcast: ctrl-c stops the HTTP surfaces, then the feed
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal (Ctrl+C)");
                let _ = signal_tx.send(());
            }
            Err(err) => {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
            }
        }
    });

    let state = AppState::new(Arc::clone(&registry), feed_stats);
    let mut server_shutdown_rx = shutdown_tx.subscribe();
    server::serve(config.port, state, async move {
        server_shutdown_rx.recv().await.ok();
        tracing::info!("Shutting down HTTP server...");
    })
    .await?;

    // Surfaces are down; kill the upstream connection and any pending
    // reconnect timer
    feed_task.abort();
    tracing::info!("Order book mirror stopped");

    Ok(())
}
