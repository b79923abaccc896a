//! Persistence Layer
//!
//! Durable, idempotent storage for everything the collectors bring back.
//! Uses SQLite through a pooled sqlx connection; the schema is created at
//! startup and every entity is keyed by its natural key so replays are no-ops.
//!
//! # Database Schema
//!
//! ## seasons
//! - label: unique season label (e.g. "1.5")
//! - status: "active", "completed", "cancelled" (at most one active row)
//! - start_date / end_date, initial_capital
//!
//! ## llm_models
//! - name: unique display name
//! - provider, model_id (external id)
//!
//! ## leaderboard_snapshots
//! - unique (model_id, timestamp); never updated after insert
//!
//! ## trades
//! - unique trade_id; exit fields and status move forward only
//!
//! ## model_chats
//! - unique (model_id, timestamp, content); insert-only
//!
//! Every entity row keeps the verbatim source payload in `raw_data`.

pub mod models;
pub mod repository;
pub mod season_repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub use repository::{DataPersistence, PersistOutcome, PersistenceError};
pub use season_repository::SeasonRepository;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/nof1_tracker.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Enable query logging
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/nof1_tracker.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_connections);

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_queries);

        Self {
            url,
            max_connections,
            log_queries,
        }
    }

    fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:")
    }
}

/// Initialize the database connection pool with default settings
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    init_database_with(&DatabaseConfig {
        url: database_url.to_string(),
        ..DatabaseConfig::default()
    })
    .await
}

/// Initialize the database connection pool
///
/// An in-memory database lives and dies with its connection, so the pool is
/// pinned to a single connection that is never recycled.
///
/// # Errors
/// Returns error if the store is unreachable or the schema cannot be created
pub async fn init_database_with(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    // Ensure data directory exists
    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let level = if config.log_queries {
        tracing::log::LevelFilter::Debug
    } else {
        tracing::log::LevelFilter::Trace
    };
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .log_statements(level);

    let pool = if config.is_in_memory() {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?
    };

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

/// Create tables and indexes if they do not exist yet
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    let tables: [(&str, &str); 5] = [
        (
            "seasons",
            r#"
            CREATE TABLE IF NOT EXISTS seasons (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                label TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL CHECK(status IN ('active', 'completed', 'cancelled')),
                start_date DATETIME NOT NULL,
                end_date DATETIME,
                initial_capital REAL NOT NULL DEFAULT 10000.0,
                created_at DATETIME NOT NULL,
                updated_at DATETIME
            )
            "#,
        ),
        (
            "llm_models",
            r#"
            CREATE TABLE IF NOT EXISTS llm_models (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                provider TEXT NOT NULL,
                model_id TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME NOT NULL
            )
            "#,
        ),
        (
            "leaderboard_snapshots",
            r#"
            CREATE TABLE IF NOT EXISTS leaderboard_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                season_id INTEGER NOT NULL REFERENCES seasons(id),
                model_id INTEGER NOT NULL REFERENCES llm_models(id),
                timestamp DATETIME NOT NULL,
                rank INTEGER NOT NULL,
                total_assets REAL NOT NULL,
                pnl REAL NOT NULL,
                pnl_percent REAL NOT NULL,
                win_rate REAL,
                total_trades INTEGER NOT NULL DEFAULT 0,
                sharpe_ratio REAL,
                fees REAL,
                raw_data TEXT,
                created_at DATETIME NOT NULL,
                UNIQUE (model_id, timestamp)
            )
            "#,
        ),
        (
            "trades",
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                season_id INTEGER NOT NULL REFERENCES seasons(id),
                model_id INTEGER NOT NULL REFERENCES llm_models(id),
                trade_id TEXT NOT NULL UNIQUE,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL CHECK(side IN ('buy', 'sell')),
                entry_price REAL NOT NULL,
                exit_price REAL,
                size REAL NOT NULL,
                leverage INTEGER NOT NULL DEFAULT 1,
                pnl REAL,
                pnl_percent REAL,
                status TEXT NOT NULL CHECK(status IN ('open', 'closed', 'liquidated')),
                opened_at DATETIME NOT NULL,
                closed_at DATETIME,
                raw_data TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        ),
        (
            "model_chats",
            r#"
            CREATE TABLE IF NOT EXISTS model_chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                season_id INTEGER NOT NULL REFERENCES seasons(id),
                model_id INTEGER NOT NULL REFERENCES llm_models(id),
                timestamp DATETIME NOT NULL,
                content TEXT NOT NULL,
                decision TEXT NOT NULL CHECK(decision IN ('buy', 'sell', 'hold', 'close', 'none')),
                symbol TEXT,
                confidence REAL,
                raw_data TEXT,
                created_at DATETIME NOT NULL,
                UNIQUE (model_id, timestamp, content)
            )
            "#,
        ),
    ];

    for (name, ddl) in tables {
        sqlx::query(ddl).execute(pool).await.map_err(|e| {
            DatabaseError::MigrationError(format!("Failed to create {} table: {}", name, e))
        })?;
    }

    let indexes = [
        // The store itself refuses a second active season
        "CREATE UNIQUE INDEX IF NOT EXISTS uix_seasons_single_active ON seasons(status) WHERE status = 'active'",
        "CREATE INDEX IF NOT EXISTS ix_leaderboard_timestamp ON leaderboard_snapshots(timestamp)",
        "CREATE INDEX IF NOT EXISTS ix_leaderboard_season_id ON leaderboard_snapshots(season_id)",
        "CREATE INDEX IF NOT EXISTS ix_trades_model_id ON trades(model_id)",
        "CREATE INDEX IF NOT EXISTS ix_trades_season_id ON trades(season_id)",
        "CREATE INDEX IF NOT EXISTS ix_trades_opened_at ON trades(opened_at)",
        "CREATE INDEX IF NOT EXISTS ix_model_chats_timestamp ON model_chats(timestamp)",
        "CREATE INDEX IF NOT EXISTS ix_model_chats_season_id ON model_chats(season_id)",
    ];

    for ddl in indexes {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;
    }

    info!("✓ Database migrations completed successfully");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_init() {
        let pool = init_database("sqlite::memory:").await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn test_migrations() {
        let pool = init_database("sqlite::memory:").await.unwrap();

        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
             ('seasons', 'llm_models', 'leaderboard_snapshots', 'trades', 'model_chats')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(result.0, 5);
    }

    #[tokio::test]
    async fn test_migrations_are_repeatable() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        assert!(run_migrations(&pool).await.is_ok());
    }

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.url, "sqlite://data/nof1_tracker.db");
        assert_eq!(config.max_connections, 5);
        assert!(!config.is_in_memory());
    }
}
