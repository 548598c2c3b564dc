//! Mining orchestrator
//!
//! Drives symbols one at a time through fetch → pipeline → store, falling back
//! across bar providers, and tallies the outcome of each run into a
//! [`RunResult`].

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::api::{BarProvider, SymbolDirectory};
use crate::error::{PipelineError, PipelineResult, ProviderError};
use crate::pipeline::{run_pipeline, PipelineConfig};
use crate::store::{MiningStore, RunStats};
use crate::types::Bar;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Kline interval requested from providers
    pub interval: String,
    pub lookback_days: u32,
    /// Jittered pause between symbols, in milliseconds
    pub pause_min_ms: u64,
    pub pause_max_ms: u64,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            interval: "1h".to_string(),
            lookback_days: 30,
            pause_min_ms: 1_000,
            pause_max_ms: 3_000,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl MinerConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.interval.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("interval must be set".into()));
        }
        if self.pause_min_ms > self.pause_max_ms {
            return Err(PipelineError::InvalidConfig(format!(
                "pause_min_ms ({}) exceeds pause_max_ms ({})",
                self.pause_min_ms, self.pause_max_ms
            )));
        }
        self.pipeline.validate()
    }
}

/// What to mine in one expedition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpeditionRequest {
    /// Explicit symbols; when absent the symbol directory is asked for `top_n`
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default)]
    pub lookback_days: Option<u32>,
}

fn default_top_n() -> usize {
    30
}

impl Default for ExpeditionRequest {
    fn default() -> Self {
        Self {
            symbols: None,
            top_n: default_top_n(),
            lookback_days: None,
        }
    }
}

/// A deep first expedition, then shallow ones on a fixed cadence
#[derive(Debug, Clone)]
pub struct Schedule {
    pub initial: ExpeditionRequest,
    pub recurring: ExpeditionRequest,
    pub every: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            initial: ExpeditionRequest {
                symbols: None,
                top_n: 30,
                lookback_days: Some(30),
            },
            recurring: ExpeditionRequest {
                symbols: None,
                top_n: 20,
                lookback_days: Some(1),
            },
            every: Duration::from_secs(2 * 3600),
        }
    }
}

/// Result of mining one symbol
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolOutcome {
    pub symbol: String,
    /// Provider that supplied the bars
    pub exchange: String,
    pub bars: usize,
    pub observations_written: usize,
    pub events_found: usize,
    pub feature_vectors_written: usize,
    /// One entry per failed table append
    pub write_errors: Vec<String>,
}

impl SymbolOutcome {
    pub fn is_clean(&self) -> bool {
        self.write_errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolFailure {
    pub symbol: String,
    pub reason: String,
}

/// Tally of one expedition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub symbols_attempted: usize,
    pub symbols_processed: usize,
    pub errors: usize,
    pub observations_written: usize,
    pub events_found: usize,
    pub feature_vectors_written: usize,
    pub elapsed_seconds: f64,
    pub cancelled: bool,
    pub outcomes: Vec<SymbolOutcome>,
    pub failures: Vec<SymbolFailure>,
}

impl RunResult {
    fn new(run_id: String, symbols_attempted: usize) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            symbols_attempted,
            symbols_processed: 0,
            errors: 0,
            observations_written: 0,
            events_found: 0,
            feature_vectors_written: 0,
            elapsed_seconds: 0.0,
            cancelled: false,
            outcomes: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn tally(&mut self, outcome: SymbolOutcome) {
        self.observations_written += outcome.observations_written;
        self.events_found += outcome.events_found;
        self.feature_vectors_written += outcome.feature_vectors_written;
        if outcome.is_clean() {
            self.symbols_processed += 1;
        } else {
            self.errors += 1;
        }
        self.outcomes.push(outcome);
    }

    fn fail(&mut self, symbol: &str, reason: String) {
        self.errors += 1;
        self.failures.push(SymbolFailure {
            symbol: symbol.to_string(),
            reason,
        });
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            run_id: self.run_id.clone(),
            symbols_processed: self.symbols_processed,
            errors: self.errors,
            elapsed_seconds: self.elapsed_seconds,
            observations_written: self.observations_written,
            events_found: self.events_found,
            feature_vectors_written: self.feature_vectors_written,
        }
    }
}

/// Mining status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MiningStatus {
    Idle,
    Mining,
    Waiting,
    Complete,
    Error,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Shared progress tracker, polled by the HTTP status endpoint
pub struct MiningProgress {
    pub status: RwLock<MiningStatus>,
    pub current_symbol: RwLock<String>,
    pub total_symbols: AtomicU32,
    pub completed: AtomicU32,
    pub errors: AtomicU32,
    pub events_found: AtomicU32,
    pub cancelled: AtomicBool,
    /// Held by the one expedition a caller started through `try_begin`
    running: AtomicBool,
    pub current_cycle: AtomicU32,
    pub last_run: RwLock<Option<RunResult>>,
    pub error_message: RwLock<Option<String>>,
    pub started_at: RwLock<Option<String>>,
}

impl MiningProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(MiningStatus::Idle),
            current_symbol: RwLock::new(String::new()),
            total_symbols: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            errors: AtomicU32::new(0),
            events_found: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            running: AtomicBool::new(false),
            current_cycle: AtomicU32::new(0),
            last_run: RwLock::new(None),
            error_message: RwLock::new(None),
            started_at: RwLock::new(None),
        }
    }

    /// Prepare for a new run. Keeps `last_run` and the cycle counter.
    pub fn reset(&self) {
        self.set_status(MiningStatus::Mining);
        write(&self.current_symbol).clear();
        self.total_symbols.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.events_found.store(0, Ordering::Relaxed);
        *write(&self.error_message) = None;
        *write(&self.started_at) = Some(Utc::now().to_rfc3339());
    }

    pub fn set_status(&self, status: MiningStatus) {
        *write(&self.status) = status;
    }

    pub fn status(&self) -> MiningStatus {
        *read(&self.status)
    }

    pub fn fail(&self, message: impl Into<String>) {
        *write(&self.error_message) = Some(message.into());
        self.set_status(MiningStatus::Error);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn progress_pct(&self) -> f32 {
        let total = self.total_symbols.load(Ordering::Relaxed);
        let done = self.completed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (done as f32 / total as f32) * 100.0
        }
    }

    /// Claim the run slot, clearing any earlier cancel. Returns false when
    /// another caller already holds it.
    pub fn try_begin(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.cancelled.store(false, Ordering::Relaxed);
        self.set_status(MiningStatus::Mining);
        true
    }

    /// Release the slot taken by `try_begin`
    pub fn end(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            || matches!(self.status(), MiningStatus::Mining | MiningStatus::Waiting)
    }

    pub fn snapshot(&self) -> MiningSnapshot {
        MiningSnapshot {
            status: self.status(),
            current_symbol: read(&self.current_symbol).clone(),
            total_symbols: self.total_symbols.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            events_found: self.events_found.load(Ordering::Relaxed),
            progress_pct: self.progress_pct(),
            current_cycle: self.current_cycle.load(Ordering::Relaxed),
            cancelled: self.is_cancelled(),
            started_at: read(&self.started_at).clone(),
            error_message: read(&self.error_message).clone(),
            last_run: read(&self.last_run).clone(),
        }
    }
}

impl Default for MiningProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`MiningProgress`]
#[derive(Debug, Clone, Serialize)]
pub struct MiningSnapshot {
    pub status: MiningStatus,
    pub current_symbol: String,
    pub total_symbols: u32,
    pub completed: u32,
    pub errors: u32,
    pub events_found: u32,
    pub progress_pct: f32,
    pub current_cycle: u32,
    pub cancelled: bool,
    pub started_at: Option<String>,
    pub error_message: Option<String>,
    pub last_run: Option<RunResult>,
}

pub struct Miner {
    providers: Vec<Arc<dyn BarProvider>>,
    directory: Option<Arc<dyn SymbolDirectory>>,
    store: Arc<dyn MiningStore>,
    config: MinerConfig,
    progress: Arc<MiningProgress>,
}

impl Miner {
    pub fn new(
        providers: Vec<Arc<dyn BarProvider>>,
        directory: Option<Arc<dyn SymbolDirectory>>,
        store: Arc<dyn MiningStore>,
        config: MinerConfig,
    ) -> PipelineResult<Self> {
        if providers.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "at least one bar provider is required".into(),
            ));
        }
        config.validate()?;
        Ok(Self {
            providers,
            directory,
            store,
            config,
            progress: Arc::new(MiningProgress::new()),
        })
    }

    /// Share an externally owned progress tracker
    pub fn with_progress(mut self, progress: Arc<MiningProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> Arc<MiningProgress> {
        self.progress.clone()
    }

    pub fn config(&self) -> &MinerConfig {
        &self.config
    }

    /// First provider returning a non-empty series wins
    async fn fetch_series(&self, symbol: &str, lookback_days: u32) -> PipelineResult<(String, Vec<Bar>)> {
        let since = Utc::now() - chrono::Duration::days(i64::from(lookback_days));

        for provider in &self.providers {
            match provider
                .fetch_bars(symbol, &self.config.interval, since)
                .await
            {
                Ok(bars) if !bars.is_empty() => {
                    debug!(symbol, provider = provider.name(), bars = bars.len(), "Series fetched");
                    return Ok((provider.name().to_string(), bars));
                }
                Ok(_) => {
                    debug!(symbol, provider = provider.name(), "Provider returned no bars");
                }
                Err(e) => {
                    warn!(symbol, provider = provider.name(), error = %e, "Provider failed, trying next");
                }
            }
        }

        Err(ProviderError::Exhausted {
            symbol: symbol.to_string(),
        }
        .into())
    }

    pub async fn mine_symbol(&self, symbol: &str) -> PipelineResult<SymbolOutcome> {
        self.mine_symbol_with(symbol, self.config.lookback_days).await
    }

    /// Fetch, run the pipeline and append to all three tables. Each append is
    /// attempted even when a sibling fails; failures land in `write_errors`.
    pub async fn mine_symbol_with(
        &self,
        symbol: &str,
        lookback_days: u32,
    ) -> PipelineResult<SymbolOutcome> {
        let (exchange, bars) = self.fetch_series(symbol, lookback_days).await?;
        let output = run_pipeline(&bars, &exchange, &self.config.pipeline)?;

        let mut outcome = SymbolOutcome {
            symbol: symbol.to_string(),
            exchange: exchange.clone(),
            bars: bars.len(),
            ..Default::default()
        };

        match self
            .store
            .append_observations(symbol, &exchange, &output.scored)
            .await
        {
            Ok(n) => outcome.observations_written = n,
            Err(e) => {
                warn!(symbol, error = %e, "Observation append failed");
                outcome.write_errors.push(format!("observations: {e}"));
            }
        }

        match self.store.append_breakout_events(&output.events).await {
            Ok(n) => outcome.events_found = n,
            Err(e) => {
                warn!(symbol, error = %e, "Breakout event append failed");
                outcome.write_errors.push(format!("breakout_events: {e}"));
            }
        }

        match self.store.append_feature_vectors(&output.features).await {
            Ok(n) => outcome.feature_vectors_written = n,
            Err(e) => {
                warn!(symbol, error = %e, "Feature vector append failed");
                outcome.write_errors.push(format!("feature_vectors: {e}"));
            }
        }

        info!(
            symbol,
            exchange = %exchange,
            bars = outcome.bars,
            events = output.events.len(),
            features = output.features.len(),
            "Symbol mined"
        );
        Ok(outcome)
    }

    async fn resolve_symbols(&self, request: &ExpeditionRequest) -> PipelineResult<Vec<String>> {
        if let Some(symbols) = &request.symbols {
            return Ok(symbols.clone());
        }
        let directory = self.directory.as_ref().ok_or_else(|| {
            PipelineError::InvalidConfig("no symbols given and no symbol directory configured".into())
        })?;
        Ok(directory.list_candidate_symbols(request.top_n).await?)
    }

    /// Mine every requested symbol once, then record run statistics
    pub async fn run_expedition(&self, request: &ExpeditionRequest) -> PipelineResult<RunResult> {
        let started = Instant::now();
        self.progress.reset();

        let symbols = match self.resolve_symbols(request).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Could not list symbols");
                self.progress.fail(e.to_string());
                return Err(e);
            }
        };
        let lookback_days = request.lookback_days.unwrap_or(self.config.lookback_days);
        let run_id = format!("run-{}", Utc::now().timestamp_millis());

        info!(
            run_id = %run_id,
            symbols = symbols.len(),
            lookback_days,
            "Starting mining expedition"
        );
        self.progress
            .total_symbols
            .store(symbols.len() as u32, Ordering::Relaxed);

        let mut result = RunResult::new(run_id, symbols.len());

        for (i, symbol) in symbols.iter().enumerate() {
            if self.progress.is_cancelled() {
                info!("Expedition cancelled");
                result.cancelled = true;
                break;
            }
            *write(&self.progress.current_symbol) = symbol.clone();

            match self.mine_symbol_with(symbol, lookback_days).await {
                Ok(outcome) => {
                    self.progress
                        .events_found
                        .fetch_add(outcome.events_found as u32, Ordering::Relaxed);
                    if !outcome.is_clean() {
                        self.progress.errors.fetch_add(1, Ordering::Relaxed);
                    }
                    result.tally(outcome);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Skipping symbol");
                    self.progress.errors.fetch_add(1, Ordering::Relaxed);
                    result.fail(symbol, e.to_string());
                }
            }
            self.progress.completed.fetch_add(1, Ordering::Relaxed);

            if i + 1 < symbols.len() {
                self.pause().await;
            }
        }

        result.elapsed_seconds = started.elapsed().as_secs_f64();

        if let Err(e) = self.store.record_run_stats(&result.stats()).await {
            warn!(run_id = %result.run_id, error = %e, "Failed to record run stats");
        }

        info!(
            run_id = %result.run_id,
            processed = result.symbols_processed,
            errors = result.errors,
            events = result.events_found,
            elapsed_secs = result.elapsed_seconds,
            "Expedition complete"
        );

        *write(&self.progress.last_run) = Some(result.clone());
        self.progress.set_status(MiningStatus::Complete);
        Ok(result)
    }

    /// Run `schedule.initial`, then `schedule.recurring` every `schedule.every`
    /// until cancelled. Returns the number of completed expeditions.
    pub async fn run_scheduled(&self, schedule: &Schedule) -> PipelineResult<u32> {
        let mut cycles = 0u32;
        let mut request = &schedule.initial;

        loop {
            if self.progress.is_cancelled() {
                break;
            }
            self.progress.current_cycle.store(cycles + 1, Ordering::Relaxed);

            match self.run_expedition(request).await {
                Ok(_) => cycles += 1,
                // A failed listing is retried next cycle
                Err(PipelineError::SourceUnavailable(e)) => {
                    error!(error = %e, "Expedition failed");
                }
                Err(e) => return Err(e),
            }
            request = &schedule.recurring;

            if self.progress.is_cancelled() {
                break;
            }
            self.progress.set_status(MiningStatus::Waiting);
            info!(
                next_in_secs = schedule.every.as_secs(),
                "Waiting for next expedition"
            );
            self.sleep_unless_cancelled(schedule.every).await;
        }

        self.progress.set_status(MiningStatus::Idle);
        info!(cycles, "Scheduled mining stopped");
        Ok(cycles)
    }

    async fn pause(&self) {
        let delay = jitter(self.config.pause_min_ms, self.config.pause_max_ms);
        self.sleep_unless_cancelled(delay).await;
    }

    /// Sleep in short steps so cancellation is noticed promptly
    async fn sleep_unless_cancelled(&self, total: Duration) {
        const STEP: Duration = Duration::from_millis(250);
        let deadline = Instant::now() + total;
        while !self.progress.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(STEP.min(deadline - now)).await;
        }
    }
}

fn jitter(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureRow, FeatureVector};
    use crate::store::{MarketActivity, SqliteStore};
    use crate::types::{BreakoutEvent, ScoredBar};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use persistence::repository::{BreakoutEventRecord, ObservationRecord, RunStatsRecord};
    use persistence::{Database, DbError};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn series(symbol: &str, n: usize, spike_at: usize) -> Vec<Bar> {
        let start = Utc::now() - ChronoDuration::hours(n as i64);
        (0..n)
            .map(|i| {
                let close = dec!(50) + Decimal::from(i as i64 % 7);
                Bar {
                    symbol: symbol.to_string(),
                    timestamp: start + ChronoDuration::hours(i as i64),
                    open: close,
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                    volume: if i == spike_at { dec!(1000) } else { dec!(100) },
                }
            })
            .collect()
    }

    struct StubProvider {
        name: String,
        bars: HashMap<String, Vec<Bar>>,
        down: bool,
    }

    impl StubProvider {
        fn with(name: &str, symbols: &[&str]) -> Self {
            Self {
                name: name.to_string(),
                bars: symbols
                    .iter()
                    .map(|s| (s.to_string(), series(s, 80, 60)))
                    .collect(),
                down: false,
            }
        }

        fn down(name: &str) -> Self {
            Self {
                name: name.to_string(),
                bars: HashMap::new(),
                down: true,
            }
        }
    }

    #[async_trait]
    impl BarProvider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_bars(
            &self,
            symbol: &str,
            _interval: &str,
            _since: DateTime<Utc>,
        ) -> Result<Vec<Bar>, ProviderError> {
            if self.down {
                return Err(ProviderError::unavailable(&self.name, "connection refused"));
            }
            Ok(self.bars.get(symbol).cloned().unwrap_or_default())
        }
    }

    struct StubDirectory(Vec<String>);

    #[async_trait]
    impl SymbolDirectory for StubDirectory {
        async fn list_candidate_symbols(&self, limit: usize) -> Result<Vec<String>, ProviderError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    /// Delegates to SQLite but refuses breakout events
    struct NoEventsStore(SqliteStore);

    #[async_trait]
    impl MiningStore for NoEventsStore {
        async fn append_observations(
            &self,
            symbol: &str,
            exchange: &str,
            series: &[ScoredBar],
        ) -> PipelineResult<usize> {
            self.0.append_observations(symbol, exchange, series).await
        }

        async fn append_breakout_events(&self, _events: &[BreakoutEvent]) -> PipelineResult<usize> {
            Err(DbError::Query("disk full".into()).into())
        }

        async fn append_feature_vectors(&self, vectors: &[FeatureVector]) -> PipelineResult<usize> {
            self.0.append_feature_vectors(vectors).await
        }

        async fn record_run_stats(&self, stats: &RunStats) -> PipelineResult<()> {
            self.0.record_run_stats(stats).await
        }

        async fn query_observations(
            &self,
            symbol: Option<&str>,
            since_days: Option<u32>,
        ) -> PipelineResult<Vec<ObservationRecord>> {
            self.0.query_observations(symbol, since_days).await
        }

        async fn query_feature_vectors(
            &self,
            symbol: Option<&str>,
            since_days: Option<u32>,
        ) -> PipelineResult<Vec<FeatureRow>> {
            self.0.query_feature_vectors(symbol, since_days).await
        }

        async fn query_breakout_events(
            &self,
            symbol: Option<&str>,
            since_days: Option<u32>,
        ) -> PipelineResult<Vec<BreakoutEventRecord>> {
            self.0.query_breakout_events(symbol, since_days).await
        }

        async fn recent_runs(&self, limit: usize) -> PipelineResult<Vec<RunStatsRecord>> {
            self.0.recent_runs(limit).await
        }

        async fn market_activity(
            &self,
            top_n: usize,
            window_hours: u32,
        ) -> PipelineResult<MarketActivity> {
            self.0.market_activity(top_n, window_hours).await
        }
    }

    fn fast_config() -> MinerConfig {
        MinerConfig {
            pause_min_ms: 0,
            pause_max_ms: 0,
            ..Default::default()
        }
    }

    async fn sqlite() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::new(Arc::new(Database::in_memory().await.unwrap())))
    }

    #[tokio::test]
    async fn test_falls_back_to_next_provider() {
        let store = sqlite().await;
        let miner = Miner::new(
            vec![
                Arc::new(StubProvider::down("binance")),
                Arc::new(StubProvider::with("vision", &[])),
                Arc::new(StubProvider::with("mexc", &["SOLUSDT"])),
            ],
            None,
            store.clone(),
            fast_config(),
        )
        .unwrap();

        let outcome = miner.mine_symbol("SOLUSDT").await.unwrap();
        assert_eq!(outcome.exchange, "mexc");
        assert_eq!(outcome.bars, 80);
        assert_eq!(outcome.observations_written, 80);
        assert_eq!(outcome.events_found, 1);
        assert_eq!(outcome.feature_vectors_written, 46);
        assert!(outcome.is_clean());

        let rows = store.query_observations(Some("SOLUSDT"), None).await.unwrap();
        assert!(rows.iter().all(|r| r.exchange == "mexc"));
    }

    #[tokio::test]
    async fn test_all_providers_exhausted() {
        let miner = Miner::new(
            vec![Arc::new(StubProvider::down("binance"))],
            None,
            sqlite().await,
            fast_config(),
        )
        .unwrap();

        let err = miner.mine_symbol("DOGEUSDT").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SourceUnavailable(ProviderError::Exhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_expedition_tallies_and_records_stats() {
        let store = sqlite().await;
        let miner = Miner::new(
            vec![Arc::new(StubProvider::with("binance", &["BTCUSDT", "ETHUSDT"]))],
            Some(Arc::new(StubDirectory(vec![
                "BTCUSDT".into(),
                "ETHUSDT".into(),
                "XYZUSDT".into(),
            ]))),
            store.clone(),
            fast_config(),
        )
        .unwrap();

        let result = miner
            .run_expedition(&ExpeditionRequest {
                top_n: 3,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(result.symbols_attempted, 3);
        assert_eq!(result.symbols_processed, 2);
        assert_eq!(result.errors, 1);
        assert_eq!(result.failures[0].symbol, "XYZUSDT");
        assert_eq!(result.observations_written, 160);
        assert_eq!(result.events_found, 2);

        let progress = miner.progress();
        assert_eq!(progress.status(), MiningStatus::Complete);
        assert_eq!(progress.completed.load(Ordering::Relaxed), 3);
        assert!(progress.snapshot().last_run.is_some());

        let runs = store.recent_runs(5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].symbols_processed, 2);
        assert_eq!(runs[0].errors, 1);
        assert!((runs[0].success_rate - 200.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_append_does_not_block_siblings() {
        let store = Arc::new(NoEventsStore(SqliteStore::new(Arc::new(
            Database::in_memory().await.unwrap(),
        ))));
        let miner = Miner::new(
            vec![Arc::new(StubProvider::with("binance", &["BTCUSDT"]))],
            None,
            store.clone(),
            fast_config(),
        )
        .unwrap();

        let result = miner
            .run_expedition(&ExpeditionRequest {
                symbols: Some(vec!["BTCUSDT".into()]),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(result.symbols_processed, 0);
        assert_eq!(result.errors, 1);
        let outcome = &result.outcomes[0];
        assert_eq!(outcome.write_errors.len(), 1);
        assert_eq!(outcome.observations_written, 80);
        assert_eq!(outcome.feature_vectors_written, 46);

        let features = store.query_feature_vectors(Some("BTCUSDT"), None).await.unwrap();
        assert_eq!(features.len(), 46);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_mines_nothing() {
        let miner = Miner::new(
            vec![Arc::new(StubProvider::with("binance", &["BTCUSDT"]))],
            None,
            sqlite().await,
            fast_config(),
        )
        .unwrap();
        miner.progress().cancel();

        let result = miner
            .run_expedition(&ExpeditionRequest {
                symbols: Some(vec!["BTCUSDT".into()]),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(result.cancelled);
        assert!(result.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_scheduled_runs_until_cancelled() {
        let miner = Arc::new(
            Miner::new(
                vec![Arc::new(StubProvider::with("binance", &["BTCUSDT"]))],
                Some(Arc::new(StubDirectory(vec!["BTCUSDT".into()]))),
                sqlite().await,
                fast_config(),
            )
            .unwrap(),
        );
        let progress = miner.progress();
        let schedule = Schedule {
            every: Duration::from_millis(10),
            ..Default::default()
        };

        let handle = tokio::spawn({
            let miner = miner.clone();
            async move { miner.run_scheduled(&schedule).await }
        });

        for _ in 0..500 {
            if progress.current_cycle.load(Ordering::Relaxed) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        progress.cancel();

        let cycles = handle.await.unwrap().unwrap();
        assert!(cycles >= 2, "only {cycles} cycles ran");
        assert_eq!(progress.status(), MiningStatus::Idle);
    }

    #[test]
    fn test_rejects_inverted_pause() {
        let config = MinerConfig {
            pause_min_ms: 10,
            pause_max_ms: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(jitter(3, 3) == Duration::from_millis(3));
    }

    #[test]
    fn test_only_one_caller_claims_the_run() {
        let progress = MiningProgress::new();
        progress.cancel();

        let claimed = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| progress.try_begin()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count()
        });
        assert_eq!(claimed, 1);
        assert!(progress.is_running());
        assert!(!progress.is_cancelled());
        assert_eq!(progress.status(), MiningStatus::Mining);

        progress.end();
        progress.set_status(MiningStatus::Complete);
        assert!(!progress.is_running());
        assert!(progress.try_begin());
    }
}
