use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use herald_core::config::HeraldConfig;
use herald_core::{Clock, Messenger, SystemClock};
use herald_polls::{PollRegistry, PollTally, VoteAggregator};
use herald_scheduler::{Dispatcher, FireOutcome, JobStore, Ticker, TickerConfig};
use tokio::sync::mpsc;
use tracing::info;

mod app;
mod bridge;
mod http;
mod ws;

#[derive(Debug, Parser)]
#[command(name = "herald-gateway", version, about = "Recurring message scheduler and poll tally service")]
struct Args {
    /// Path to herald.toml (default: ~/.herald/herald.toml)
    #[arg(long, env = "HERALD_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "herald_gateway=info,herald_scheduler=info,herald_polls=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let args = Args::parse();
    let config = HeraldConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        HeraldConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(&db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // messaging session lives in the bridge sidecar; poll its status in the background
    let bridge = Arc::new(bridge::BridgeMessenger::new(&config.bridge)?);
    bridge.refresh_status().await;
    tokio::spawn(Arc::clone(&bridge).run_status_poller(
        Duration::from_secs(config.bridge.status_poll_secs.max(1)),
        shutdown_rx.clone(),
    ));
    let messenger: Arc<dyn Messenger> = bridge;

    // Outcome channel: Ticker → notification router
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<FireOutcome>(256);
    // Tally channel: VoteAggregator → websocket broadcast
    let (tally_tx, mut tally_rx) = mpsc::channel::<PollTally>(256);

    let store = JobStore::new(db, Arc::clone(&clock), config.scheduler.zone)?;
    let dispatcher = Arc::new(Dispatcher::with_default_routes(Arc::clone(&messenger)));
    let ticker = Arc::new(
        Ticker::new(
            store,
            dispatcher,
            Arc::clone(&clock),
            TickerConfig::from(&config.scheduler),
        )
        .with_outcomes(outcome_tx),
    );

    let registry = Arc::new(
        PollRegistry::new(Arc::clone(&messenger), Arc::clone(&clock))
            .with_retention_hours(config.polls.retention_hours),
    );
    let aggregator = Arc::new(
        VoteAggregator::new(Arc::clone(&registry), Arc::clone(&messenger), Arc::clone(&clock))
            .with_max_history(config.polls.max_history)
            .with_tallies(tally_tx),
    );

    let cleanup_every = Duration::from_secs(config.polls.cleanup_interval_secs.max(1));
    let state = Arc::new(app::AppState::new(
        config,
        Arc::clone(&ticker),
        Arc::clone(&registry),
        aggregator,
    ));
    let router = app::build_router(Arc::clone(&state));

    // Route fired schedules: sent polls become tally-able, every outcome goes to ws.
    let state_for_router = Arc::clone(&state);
    tokio::spawn(async move {
        while let Some(outcome) = outcome_rx.recv().await {
            if let Some(sent) = outcome.sent.as_ref() {
                if sent.poll().is_some() {
                    state_for_router.registry.register(sent);
                }
            }
            state_for_router.broadcaster.emit("schedule_fired", &outcome);
        }
    });

    let state_for_tallies = Arc::clone(&state);
    tokio::spawn(async move {
        while let Some(tally) = tally_rx.recv().await {
            state_for_tallies.broadcaster.emit("poll_result", &tally);
        }
    });

    let registry_for_cleanup = Arc::clone(&registry);
    let cleanup_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        registry_for_cleanup
            .run_cleanup(cleanup_every, cleanup_shutdown)
            .await
    });

    let ticker_for_loop = Arc::clone(&ticker);
    let mut ticker_task = tokio::spawn(async move { ticker_for_loop.run(shutdown_rx).await });

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Herald gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    });

    // A scheduler that cannot persist state must not keep serving.
    tokio::select! {
        served = server.into_future() => served?,
        ticked = &mut ticker_task => {
            let _ = shutdown_tx.send(true);
            return match ticked {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(anyhow::anyhow!("scheduler stopped: {e}")),
                Err(e) => Err(anyhow::anyhow!("scheduler task panicked: {e}")),
            };
        }
    }

    // signal background loops to stop
    let _ = shutdown_tx.send(true);
    let _ = ticker_task.await;
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
