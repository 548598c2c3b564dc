//! Database schema definitions

/// SQL to create all tables
/// NOTE: timestamps are INTEGER milliseconds since the Unix epoch (UTC).
/// Undefined indicator values are stored as NULL, never as 0.
pub const CREATE_TABLES: &str = r#"
-- One row per scored bar (append-only, duplicates allowed)
CREATE TABLE IF NOT EXISTS observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL,
    rsi REAL,
    macd REAL,
    macd_signal REAL,
    macd_histogram REAL,
    bb_upper REAL,
    bb_middle REAL,
    bb_lower REAL,
    bb_width REAL,
    bb_position REAL,
    support REAL,
    resistance REAL,
    return_1 REAL,
    return_24 REAL,
    volatility REAL,
    trend_strength REAL,
    volume_mean REAL,
    volume_ratio REAL,
    breakout_score REAL,
    tier_2x INTEGER NOT NULL DEFAULT 0,
    tier_3x INTEGER NOT NULL DEFAULT 0,
    tier_5x INTEGER NOT NULL DEFAULT 0,
    exchange TEXT NOT NULL DEFAULT 'unknown',
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Bars scoring above the event threshold
CREATE TABLE IF NOT EXISTS breakout_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    kind TEXT NOT NULL,
    volume_multiplier REAL NOT NULL,
    price_impact_1 REAL NOT NULL DEFAULT 0,
    price_impact_24 REAL NOT NULL DEFAULT 0,
    follow_through REAL NOT NULL DEFAULT 0,
    confidence REAL NOT NULL DEFAULT 0,
    exchange TEXT NOT NULL DEFAULT 'unknown',
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Supervised-learning vectors: JSON payload + label columns
CREATE TABLE IF NOT EXISTS feature_vectors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    payload TEXT NOT NULL,
    breakout_next INTEGER NOT NULL DEFAULT 0,
    breakout_within_24 INTEGER NOT NULL DEFAULT 0,
    return_next REAL NOT NULL DEFAULT 0,
    return_24 REAL NOT NULL DEFAULT 0,
    horizon_bars INTEGER NOT NULL DEFAULT 24,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- One row per mining run
CREATE TABLE IF NOT EXISTS run_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    symbols_processed INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0,
    elapsed_seconds REAL NOT NULL DEFAULT 0,
    success_rate REAL NOT NULL DEFAULT 0,
    observations_written INTEGER NOT NULL DEFAULT 0,
    events_found INTEGER NOT NULL DEFAULT 0,
    feature_vectors_written INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_observations_symbol_time ON observations(symbol, timestamp);
CREATE INDEX IF NOT EXISTS idx_observations_time ON observations(timestamp);
CREATE INDEX IF NOT EXISTS idx_breakouts_symbol ON breakout_events(symbol, timestamp);
CREATE INDEX IF NOT EXISTS idx_breakouts_kind ON breakout_events(kind, timestamp);
CREATE INDEX IF NOT EXISTS idx_features_symbol ON feature_vectors(symbol, timestamp);
CREATE INDEX IF NOT EXISTS idx_features_labels ON feature_vectors(breakout_next, breakout_within_24);
CREATE INDEX IF NOT EXISTS idx_run_stats_run ON run_stats(run_id)
"#;

/// Additive column migrations, applied after `CREATE_TABLES`.
/// "duplicate column name" failures are expected on every run after the first.
pub const MIGRATIONS: &[&str] = &[];
