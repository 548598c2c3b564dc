//! Persistence layer for the breakout miner
//!
//! SQLite storage for the four append-only tables the mining pipeline writes:
//! scored observations, breakout events, feature vectors and run statistics.

pub mod repository;
pub mod schema;

pub use sqlx::sqlite::SqlitePool;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Pragmas applied to every new database. `journal_mode` is skipped for
/// in-memory databases, which cannot use WAL.
const PRAGMAS: &[(&str, &str)] = &[
    ("synchronous", "PRAGMA synchronous=NORMAL"),
    ("foreign_keys", "PRAGMA foreign_keys=ON"),
    // 8 MB cache size (negative = KiB)
    ("cache_size", "PRAGMA cache_size=-8000"),
];

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) a database file and bring its schema up to date
    pub async fn new(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations().await?;
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&db.pool)
            .await
            .map_err(|e| DbError::Connection(format!("WAL pragma failed: {e}")))?;
        db.configure_pragmas().await?;

        debug!(path = %path.display(), "Database ready");
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub async fn in_memory() -> DbResult<Self> {
        // A single connection: every new connection to `:memory:` is a fresh database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations().await?;
        db.configure_pragmas().await?;

        Ok(db)
    }

    /// Run database migrations (execute each statement individually)
    async fn run_migrations(&self) -> DbResult<()> {
        for statement in schema::CREATE_TABLES.split(';') {
            // Strip comment-only lines, then check if any SQL remains
            let sql: String = statement
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");
            let sql = sql.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Migration(format!("{e}: {sql}")))?;
        }

        for migration in schema::MIGRATIONS {
            if let Err(e) = sqlx::query(migration).execute(&self.pool).await {
                if !e.to_string().contains("duplicate column name") {
                    return Err(DbError::Migration(format!("{e}: {migration}")));
                }
            }
        }

        Ok(())
    }

    async fn configure_pragmas(&self) -> DbResult<()> {
        for (name, pragma) in PRAGMAS {
            sqlx::query(pragma)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Connection(format!("{name} pragma failed: {e}")))?;
        }
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Clone the pool for use in spawned tasks
    pub fn pool_clone(&self) -> SqlitePool {
        self.pool.clone()
    }
}

/// Epoch-millisecond cutoff for a trailing window of `hours`, measured from now
pub fn cutoff_millis_hours(hours: u32) -> i64 {
    Utc::now().timestamp_millis() - i64::from(hours) * 3_600_000
}

/// Epoch-millisecond cutoff for a trailing window of `days`, measured from now
pub fn cutoff_millis(days: u32) -> i64 {
    cutoff_millis_hours(days.saturating_mul(24))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_creates_all_tables() {
        let db = Database::in_memory().await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        let names: Vec<String> = tables.into_iter().map(|(n,)| n).collect();
        assert_eq!(
            names,
            vec!["breakout_events", "feature_vectors", "observations", "run_stats"]
        );
    }

    #[tokio::test]
    async fn test_migrations_are_rerunnable() {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();

        let cols: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_table_info('feature_vectors')")
                .fetch_all(db.pool())
                .await
                .unwrap();
        assert!(cols.iter().any(|(name,)| name == "horizon_bars"));
    }

    #[tokio::test]
    async fn test_base_schema_has_every_column() {
        assert!(schema::MIGRATIONS.is_empty());
        let db = Database::in_memory().await.unwrap();

        let cols: Vec<(String,)> = sqlx::query_as("SELECT name FROM pragma_table_info('run_stats')")
            .fetch_all(db.pool())
            .await
            .unwrap();
        for expected in ["observations_written", "events_found", "feature_vectors_written"] {
            assert!(cols.iter().any(|(name,)| name == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_cutoff_is_in_the_past() {
        let now = Utc::now().timestamp_millis();
        let cutoff = cutoff_millis(1);
        assert!(cutoff < now);
        assert!((now - cutoff - 86_400_000).abs() < 5_000);
    }
}
