//! Breakout Miner — volume-breakout feature mining for crypto pairs
//!
//! Usage:
//!   breakout-miner run --top-n 30          — Mine the top symbols once
//!   breakout-miner watch                   — Deep run, then shallow runs every 2h
//!   breakout-miner report --hours 24       — Print the market summary as JSON
//!   breakout-miner serve --port 3002       — Launch the read/trigger API

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use engine::api::binance::{DEFAULT_BASE_URL, VISION_BASE_URL};
use engine::api::coingecko;
use engine::{
    build_market_summary, BarProvider, BinanceClient, CoinGeckoClient, ExpeditionRequest,
    Miner, MinerConfig, MiningProgress, MiningStatus, MiningStore, RunResult, Schedule,
    SqliteStore, SymbolDirectory,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "breakout-miner")]
#[command(about = "Volume-breakout feature miner", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mine symbols once and exit
    Run {
        /// Symbols to mine (comma-separated); defaults to the top N by market cap
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// Number of symbols to take from the directory
        #[arg(long, default_value_t = 30)]
        top_n: usize,
        /// Days of history to fetch
        #[arg(long, default_value_t = 30)]
        days: u32,
        /// Kline interval
        #[arg(long, default_value = "1h")]
        interval: String,
        /// Only detect events in the trailing N bars
        #[arg(long)]
        event_window: Option<usize>,
    },
    /// Mine on a schedule until Ctrl+C
    Watch {
        /// Symbols per recurring run
        #[arg(long, default_value_t = 20)]
        top_n: usize,
        /// Days of history per recurring run
        #[arg(long, default_value_t = 1)]
        days: u32,
        /// Hours between runs
        #[arg(long, default_value_t = 2)]
        every_hours: u64,
        /// Symbols in the first run
        #[arg(long, default_value_t = 30)]
        initial_top_n: usize,
        /// Days of history in the first run
        #[arg(long, default_value_t = 30)]
        initial_days: u32,
    },
    /// Print the market summary
    Report {
        /// Number of symbols (highest volume first)
        #[arg(long, default_value_t = 10)]
        top_n: usize,
        /// Trailing window in hours
        #[arg(long, default_value_t = 24)]
        hours: u32,
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<String>,
    },
    /// Launch the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3002)]
        port: u16,
    },
}

/// Environment-driven settings
struct Settings {
    db_path: String,
    binance_url: String,
    fallback_urls: Vec<String>,
    coingecko_url: String,
}

impl Settings {
    fn from_env() -> Self {
        let fallback_urls = match std::env::var("MINER_FALLBACK_URLS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => vec![VISION_BASE_URL.to_string()],
        };

        Self {
            db_path: std::env::var("MINER_DB_PATH").unwrap_or_else(|_| "data/miner.db".to_string()),
            binance_url: std::env::var("MINER_BINANCE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            fallback_urls,
            coingecko_url: std::env::var("MINER_COINGECKO_URL")
                .unwrap_or_else(|_| coingecko::DEFAULT_BASE_URL.to_string()),
        }
    }
}

/// Provenance tag for a host: "binance" for the primary API, else the hostname
fn provider_name(url: &str) -> String {
    let host = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or(url);
    match host {
        "api.binance.com" => "binance".to_string(),
        "data-api.binance.vision" => "binance-vision".to_string(),
        other => other.trim_start_matches("api.").to_string(),
    }
}

#[derive(Clone)]
struct AppState {
    store: Arc<SqliteStore>,
    miner: Arc<Miner>,
    progress: Arc<MiningProgress>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,persistence=debug,breakout_miner=debug,sqlx=warn")
    } else {
        EnvFilter::new("info,engine=info,persistence=info,breakout_miner=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

async fn open_store(settings: &Settings) -> anyhow::Result<Arc<SqliteStore>> {
    let db = persistence::Database::new(&settings.db_path)
        .await
        .map_err(|e| {
            error!("Failed to initialize database: {}", e);
            anyhow::anyhow!("Database initialization failed: {}", e)
        })?;
    info!("Database initialized: {}", settings.db_path);
    Ok(Arc::new(SqliteStore::new(Arc::new(db))))
}

fn build_miner(
    settings: &Settings,
    store: Arc<SqliteStore>,
    config: MinerConfig,
) -> anyhow::Result<Miner> {
    let mut providers: Vec<Arc<dyn BarProvider>> = vec![Arc::new(BinanceClient::with_base_url(
        provider_name(&settings.binance_url),
        settings.binance_url.as_str(),
    ))];
    for url in &settings.fallback_urls {
        providers.push(Arc::new(BinanceClient::with_base_url(
            provider_name(url),
            url.as_str(),
        )));
    }
    info!(
        providers = ?providers.iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
        "Bar providers configured"
    );

    let directory: Arc<dyn SymbolDirectory> =
        Arc::new(CoinGeckoClient::new(settings.coingecko_url.as_str()));

    Miner::new(providers, Some(directory), store, config)
        .map_err(|e| anyhow::anyhow!("Invalid miner configuration: {}", e))
}

/// Cancel the miner on Ctrl+C
fn cancel_on_ctrl_c(progress: Arc<MiningProgress>) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, requesting cancel...");
        progress.cancel();
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    let settings = Settings::from_env();

    match cli.command {
        Commands::Run {
            symbols,
            top_n,
            days,
            interval,
            event_window,
        } => {
            cmd_run(&settings, symbols, top_n, days, interval, event_window).await?;
        }
        Commands::Watch {
            top_n,
            days,
            every_hours,
            initial_top_n,
            initial_days,
        } => {
            let schedule = Schedule {
                initial: ExpeditionRequest {
                    symbols: None,
                    top_n: initial_top_n,
                    lookback_days: Some(initial_days),
                },
                recurring: ExpeditionRequest {
                    symbols: None,
                    top_n,
                    lookback_days: Some(days),
                },
                every: Duration::from_secs(every_hours * 3600),
            };
            cmd_watch(&settings, schedule).await?;
        }
        Commands::Report {
            top_n,
            hours,
            output,
        } => {
            cmd_report(&settings, top_n, hours, output).await?;
        }
        Commands::Serve { host, port } => {
            cmd_serve(&settings, &host, port).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Run command — one expedition
// ============================================================================

async fn cmd_run(
    settings: &Settings,
    symbols: Vec<String>,
    top_n: usize,
    days: u32,
    interval: String,
    event_window: Option<usize>,
) -> anyhow::Result<()> {
    println!("\n=== Breakout Miner v{} ===", APP_VERSION);

    let store = open_store(settings).await?;
    let mut config = MinerConfig {
        interval,
        lookback_days: days,
        ..Default::default()
    };
    config.pipeline.breakout.event_window = event_window;

    let miner = Arc::new(build_miner(settings, store, config)?);
    let progress = miner.progress();
    cancel_on_ctrl_c(progress.clone());

    println!("Database: {}", settings.db_path);
    println!(
        "Symbols: {}",
        if symbols.is_empty() {
            format!("top {} by market cap", top_n)
        } else {
            symbols.join(", ")
        }
    );
    println!("Days: {} | Interval: {}", days, miner.config().interval);
    println!();

    let request = ExpeditionRequest {
        symbols: (!symbols.is_empty()).then_some(symbols),
        top_n,
        lookback_days: Some(days),
    };

    let handle = tokio::spawn({
        let miner = miner.clone();
        async move { miner.run_expedition(&request).await }
    });

    // Progress display loop
    while !handle.is_finished() {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let snap = progress.snapshot();
        if snap.status == MiningStatus::Mining {
            let bar_len = 30;
            let filled = (snap.progress_pct as usize * bar_len) / 100;
            let bar: String = "=".repeat(filled) + &" ".repeat(bar_len - filled);
            print!(
                "\r  [{}] {:.0}% ({}/{}) {} | {} events   ",
                bar,
                snap.progress_pct,
                snap.completed,
                snap.total_symbols,
                snap.current_symbol,
                snap.events_found
            );
        }
    }
    println!();

    let result = handle
        .await
        .map_err(|e| anyhow::anyhow!("Mining task panicked: {}", e))?
        .map_err(|e| anyhow::anyhow!("Expedition failed: {}", e))?;
    print_run(&result);
    Ok(())
}

fn print_run(result: &RunResult) {
    println!("\n{:=<78}", "");
    println!(
        "Run {}: {} processed, {} errors, {:.1}s{}",
        result.run_id,
        result.symbols_processed,
        result.errors,
        result.elapsed_seconds,
        if result.cancelled { " (cancelled)" } else { "" }
    );
    println!("{:=<78}", "");
    println!(
        "{:<14} {:<16} {:>7} {:>10} {:>8} {:>10}",
        "Symbol", "Exchange", "Bars", "Observ.", "Events", "Features"
    );
    println!("{:-<78}", "");
    for o in &result.outcomes {
        println!(
            "{:<14} {:<16} {:>7} {:>10} {:>8} {:>10}{}",
            o.symbol,
            o.exchange,
            o.bars,
            o.observations_written,
            o.events_found,
            o.feature_vectors_written,
            if o.is_clean() { "" } else { "  (write errors)" }
        );
    }
    for f in &result.failures {
        println!("{:<14} skipped: {}", f.symbol, f.reason);
    }
    println!("{:-<78}", "");
    println!(
        "Totals: {} observations | {} events | {} feature vectors",
        result.observations_written, result.events_found, result.feature_vectors_written
    );
}

// ============================================================================
// Watch command — scheduled expeditions
// ============================================================================

async fn cmd_watch(settings: &Settings, schedule: Schedule) -> anyhow::Result<()> {
    info!("Breakout Miner v{} watching", APP_VERSION);

    let store = open_store(settings).await?;
    let miner = build_miner(settings, store, MinerConfig::default())?;
    cancel_on_ctrl_c(miner.progress());

    info!(
        initial_top_n = schedule.initial.top_n,
        top_n = schedule.recurring.top_n,
        every_secs = schedule.every.as_secs(),
        "Scheduled mining started (Ctrl+C to stop)"
    );

    let cycles = miner
        .run_scheduled(&schedule)
        .await
        .map_err(|e| anyhow::anyhow!("Scheduled mining failed: {}", e))?;
    info!("Done after {} expeditions", cycles);
    Ok(())
}

// ============================================================================
// Report command — market summary JSON
// ============================================================================

async fn cmd_report(
    settings: &Settings,
    top_n: usize,
    hours: u32,
    output: Option<String>,
) -> anyhow::Result<()> {
    let store = open_store(settings).await?;
    let summary = build_market_summary(store.as_ref(), top_n, hours)
        .await
        .map_err(|e| anyhow::anyhow!("Summary failed: {}", e))?;
    let json = serde_json::to_string_pretty(&summary)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json)?;
            info!(
                symbols = summary.symbols_tracked,
                "Summary written to {}", path
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

// ============================================================================
// Serve command — Axum web server
// ============================================================================

async fn cmd_serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    info!("Breakout Miner v{} starting...", APP_VERSION);

    let store = open_store(settings).await?;
    let miner = Arc::new(build_miner(settings, store.clone(), MinerConfig::default())?);

    let state = AppState {
        store,
        progress: miner.progress(),
        miner,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/observations", get(api_observations))
        .route("/features", get(api_features))
        .route("/events", get(api_events))
        .route("/runs", get(api_runs))
        .route("/summary", get(api_summary))
        .route("/mine", post(api_start_mining))
        .route("/mine/status", get(api_mining_status))
        .route("/mine/cancel", post(api_cancel_mining))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Breakout Miner v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health              - Health check");
    println!("  GET  /api/observations        - Scored observations (?symbol=&days=)");
    println!("  GET  /api/features            - Feature vectors (?symbol=&days=)");
    println!("  GET  /api/events              - Breakout events (?symbol=&days=)");
    println!("  GET  /api/runs                - Recent run statistics (?limit=)");
    println!("  GET  /api/summary             - Market summary (?top_n=&hours=)");
    println!("  POST /api/mine                - Start a mining expedition");
    println!("  GET  /api/mine/status         - Poll mining progress");
    println!("  POST /api/mine/cancel         - Cancel running expedition");
    println!("\n  Database: {}", settings.db_path);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "breakout-miner",
        "version": APP_VERSION,
        "time": Utc::now().to_rfc3339(),
    }))
}

#[derive(Deserialize)]
struct SeriesParams {
    symbol: Option<String>,
    days: Option<u32>,
}

/// GET /api/observations
async fn api_observations(
    State(state): State<AppState>,
    Query(params): Query<SeriesParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state
        .store
        .query_observations(params.symbol.as_deref(), params.days)
        .await
    {
        Ok(rows) => Ok(Json(serde_json::json!({
            "count": rows.len(),
            "observations": rows,
        }))),
        Err(e) => {
            error!("Observation query failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/features
async fn api_features(
    State(state): State<AppState>,
    Query(params): Query<SeriesParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state
        .store
        .query_feature_vectors(params.symbol.as_deref(), params.days)
        .await
    {
        Ok(rows) => Ok(Json(serde_json::json!({
            "count": rows.len(),
            "features": rows,
        }))),
        Err(e) => {
            error!("Feature query failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/events
async fn api_events(
    State(state): State<AppState>,
    Query(params): Query<SeriesParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state
        .store
        .query_breakout_events(params.symbol.as_deref(), params.days)
        .await
    {
        Ok(rows) => Ok(Json(serde_json::json!({
            "count": rows.len(),
            "events": rows,
        }))),
        Err(e) => {
            error!("Breakout event query failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Deserialize)]
struct RunsParams {
    #[serde(default = "default_runs_limit")]
    limit: usize,
}

fn default_runs_limit() -> usize {
    20
}

/// GET /api/runs
async fn api_runs(
    State(state): State<AppState>,
    Query(params): Query<RunsParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.store.recent_runs(params.limit).await {
        Ok(runs) => Ok(Json(serde_json::json!({
            "count": runs.len(),
            "runs": runs,
        }))),
        Err(e) => {
            error!("Run stats query failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Deserialize)]
struct SummaryParams {
    #[serde(default = "default_top_n")]
    top_n: usize,
    #[serde(default = "default_hours")]
    hours: u32,
}

fn default_top_n() -> usize {
    10
}

fn default_hours() -> u32 {
    24
}

/// GET /api/summary
async fn api_summary(
    State(state): State<AppState>,
    Query(params): Query<SummaryParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match build_market_summary(state.store.as_ref(), params.top_n, params.hours).await {
        Ok(summary) => Ok(Json(serde_json::to_value(summary).unwrap_or_default())),
        Err(e) => {
            error!("Summary failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/mine — start an expedition in the background
async fn api_start_mining(
    State(state): State<AppState>,
    Json(request): Json<ExpeditionRequest>,
) -> Json<serde_json::Value> {
    if !state.progress.try_begin() {
        let pct = state.progress.progress_pct();
        return Json(serde_json::json!({
            "success": false,
            "message": format!("Miner already running ({:.0}% complete)", pct),
        }));
    }

    info!(
        symbols = ?request.symbols,
        top_n = request.top_n,
        "Starting mining expedition"
    );

    let miner = state.miner.clone();
    let progress = state.progress.clone();
    tokio::spawn(async move {
        if let Err(e) = miner.run_expedition(&request).await {
            warn!("Expedition failed: {}", e);
        }
        progress.end();
    });

    Json(serde_json::json!({
        "success": true,
        "message": "Mining expedition started",
    }))
}

/// POST /api/mine/cancel
async fn api_cancel_mining(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.progress.cancel();
    info!("Mining cancel requested via API");
    Json(serde_json::json!({
        "success": true,
        "message": "Cancel requested"
    }))
}

/// GET /api/mine/status
async fn api_mining_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(state.progress.snapshot()).unwrap_or_default())
}
