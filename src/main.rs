//! PlacarLive: hub pro Brasileirão data
//!
//! Co dělá:
//!   1. HTTP JSON API nad football-data.org (tabulky, zápasy, live) přes TTL cache
//!   2. Ranking geral 2015..dnes: snapshot na disku, refresh na pozadí po 24h
//!   3. WS live feed: jeden poll loop (20s) pro všechny připojené klienty
//!   4. Heartbeat do logs/*.jsonl každou minutu
//!
//! Spuštění:
//!   FD_API_TOKEN=... cargo run --bin placar-hub

mod config;
mod http;
mod ws;

use anyhow::{Context, Result};
use config::HubConfig;
use dotenv::dotenv;
use football_api::{ClientConfig, FootballDataClient, HistoricalStandings, MatchQuery, QueryTtls};
use http::HubState;
use live_broadcaster::{BroadcasterConfig, LiveBroadcaster, LiveSource};
use logger::{now_iso, EventLogger, HubHeartbeatEvent};
use ranking::{spawn_refresh_worker, AggregatorConfig, RankingAggregator, SnapshotStore};
use std::env;
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cfg = HubConfig::from_env()?;

    info!("=== PlacarLive hub ===");
    info!("Competition: {} via {}", cfg.competition, cfg.base_url);
    info!("Logs: {}", cfg.log_dir.display());

    // Single instance lock
    let lock_file_path = env::temp_dir().join("placar_hub.lock");
    let lock_file = match File::create(&lock_file_path) {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to create lock file at {:?}: {}", lock_file_path, e);
            return Ok(());
        }
    };

    let mut lock = fd_lock::RwLock::new(lock_file);
    let _write_guard = match lock.try_write() {
        Ok(guard) => {
            info!("Acquired single-instance lock.");
            guard
        }
        Err(_) => {
            warn!("Another instance of placar-hub is already running! Exiting.");
            return Ok(());
        }
    };

    let logger = Arc::new(EventLogger::new(&cfg.log_dir));

    let client = FootballDataClient::new(ClientConfig {
        base_url:    cfg.base_url.clone(),
        token:       cfg.api_token.clone(),
        competition: cfg.competition.clone(),
        timeout:     cfg.timeout,
    })
    .with_event_log(Arc::clone(&logger));

    let historical = HistoricalStandings::load(&cfg.historical_path)
        .await
        .with_context(|| format!("historical standings {}", cfg.historical_path.display()))?;
    info!("Historical standings: {} seasons", historical.len());

    let query = Arc::new(MatchQuery::new(Arc::new(client), QueryTtls::default(), historical));

    let aggregator = RankingAggregator::new(
        query.upstream(),
        SnapshotStore::new(&cfg.snapshot_path),
        AggregatorConfig { start_year: cfg.start_year, ..AggregatorConfig::default() },
        Arc::clone(&logger),
    );
    let (ranking, mut ranking_errors) = spawn_refresh_worker(Arc::new(aggregator));
    tokio::spawn(async move {
        while let Some(e) = ranking_errors.recv().await {
            error!("background ranking refresh: {}", e);
        }
    });

    let live = Arc::new(LiveBroadcaster::new(
        Arc::clone(&query) as Arc<dyn LiveSource>,
        BroadcasterConfig { poll_interval: cfg.poll_interval },
        Arc::clone(&logger),
    ));

    {
        let state = HubState {
            query:   Arc::clone(&query),
            ranking: ranking.clone(),
            live:    Arc::clone(&live),
        };
        let bind = cfg.http_bind;
        tokio::spawn(async move {
            if let Err(e) = http::start_http_server(state, bind).await {
                warn!("http server stopped: {e}");
            }
        });
    }

    {
        let live = Arc::clone(&live);
        let bind = cfg.ws_bind;
        tokio::spawn(async move {
            if let Err(e) = ws::start_ws_server(live, bind).await {
                warn!("ws server stopped: {e}");
            }
        });
    }

    // Heartbeat summary
    {
        let live = Arc::clone(&live);
        let query = Arc::clone(&query);
        let logger = Arc::clone(&logger);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;

                let subscribers = live.subscriber_count().await;
                let polling = live.is_polling().await;
                let cache_entries = query.cache_len();

                let _ = logger.log(&HubHeartbeatEvent {
                    ts: now_iso(),
                    event: "HUB_HEARTBEAT",
                    subscribers,
                    polling,
                    cache_entries,
                });
                info!(
                    "HB: subscribers={}, polling={}, cache={} (see {}/*.jsonl)",
                    subscribers, polling, cache_entries, logger.log_dir().display()
                );
            }
        });
    }

    // Ranking zahřát hned po startu, ať první request nečeká
    ranking.request_refresh();

    tokio::signal::ctrl_c().await.context("ctrl-c handler")?;
    info!("Shutting down");
    live.shutdown().await;
    query.shutdown();

    Ok(())
}
