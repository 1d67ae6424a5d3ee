mod api;
mod calendar;
mod config;
mod db;
mod error;
mod game;
mod holidays;
mod market_data;
mod realtime;
mod settlement;
mod state;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::FeedLatency;
use crate::api::routes::{router, ApiState};
use crate::calendar::GameClock;
use crate::config::{Config, CHANNEL_CAPACITY};
use crate::db::store;
use crate::error::Result;
use crate::game::addition::QuizBook;
use crate::holidays::{HolidayCalendar, HolidayRefresher};
use crate::market_data::MarketData;
use crate::realtime::Realtime;
use crate::settlement::{SettlementScheduler, Settler};
use crate::state::LocalStore;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    store::ensure_profiles(&pool, &cfg.default_pin).await?;
    info!("Database ready at {}", cfg.db_path);

    if cfg.admin_pin == cfg.default_pin {
        warn!("ADMIN_PIN equals the default player PIN; set ADMIN_PIN to something private");
    }

    // --- Local cache ---
    let local = LocalStore::open(&cfg.cache_path);
    info!("Local cache at {} ({} keys)", cfg.cache_path, local.len());

    // --- Shared services ---
    let clock = GameClock::new(cfg.utc_offset_minutes);
    let latency = Arc::new(FeedLatency::new());
    let health = Arc::new(HealthState::new());
    let realtime = Realtime::new(CHANNEL_CAPACITY);

    let holidays = Arc::new(HolidayCalendar::new(&cfg, Arc::clone(&local), Arc::clone(&latency))?);
    info!("Holiday calendar loaded with {} cached dates", holidays.len());

    let market = Arc::new(MarketData::new(
        &cfg,
        Arc::clone(&local),
        Arc::clone(&latency),
        Arc::clone(&health),
    )?);
    info!("Quote source: {:?}", cfg.quote_source);

    let settler = Arc::new(Settler::new(
        pool.clone(),
        Arc::clone(&market),
        realtime.clone(),
        Arc::clone(&health),
    ));
    let quizzes = Arc::new(QuizBook::new(Duration::from_secs(cfg.quiz_duration_secs)));

    // --- Spawn tasks ---

    // Holiday refresher (first tick fetches immediately, then hourly)
    let refresher = HolidayRefresher::new(Arc::clone(&holidays), clock);
    tokio::spawn(async move { refresher.run().await });

    // Settlement scheduler (every 60s, acts only after market close)
    let scheduler = SettlementScheduler::new(
        Arc::clone(&settler),
        pool.clone(),
        clock,
        Arc::clone(&holidays),
    );
    tokio::spawn(async move { scheduler.run().await });

    // HTTP API server
    let api_state = ApiState {
        pool,
        cfg: Arc::new(cfg.clone()),
        clock,
        holidays,
        market,
        settler,
        quizzes,
        realtime,
        local,
        latency,
        health,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
