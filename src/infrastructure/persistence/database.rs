use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared connection pool plus schema bootstrap.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// In-memory database for tests. A single pooled connection keeps
    /// every query on the same in-memory instance.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Initialize database schema. Decimals are stored as TEXT, enums
    /// as lowercase strings, timestamps as ISO-8601 text.
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // Idempotency ledger. Every externally-triggered write records
        // its op id here inside the same transaction; a second write
        // with the same op id conflicts and becomes a no-op.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS op_log (
                op_id TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create op_log table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                role TEXT NOT NULL,
                assigned_manager_id TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_chat_id ON users (chat_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create users table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                trade_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                order_type TEXT NOT NULL,
                limit_price TEXT,
                entry_price TEXT NOT NULL,
                entry_price_source TEXT NOT NULL,
                status TEXT NOT NULL,
                execution_id TEXT,
                fill_price TEXT,
                filled_quantity INTEGER,
                commission TEXT NOT NULL,
                venue TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_user_created ON trades (user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_trades_symbol_created ON trades (symbol, created_at);
            CREATE INDEX IF NOT EXISTS idx_trades_status_created ON trades (status, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trades table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                net_quantity INTEGER NOT NULL,
                cost_basis TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, symbol)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create positions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                alert_id TEXT PRIMARY KEY,
                owner_user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                trade_size_threshold TEXT NOT NULL,
                loss_pct_threshold TEXT NOT NULL,
                vix_threshold TEXT NOT NULL,
                monitor_new INTEGER NOT NULL,
                scan_existing_at_create INTEGER NOT NULL,
                status TEXT NOT NULL,
                trigger_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_owner_created ON alerts (owner_user_id, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create alerts table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alert_events (
                event_id TEXT PRIMARY KEY,
                alert_id TEXT NOT NULL,
                trade_id TEXT NOT NULL,
                owner_user_id TEXT NOT NULL,
                trade_size TEXT NOT NULL,
                loss_pct TEXT NOT NULL,
                vix_level TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                triggered_at TEXT NOT NULL,
                UNIQUE (alert_id, trade_id)
            );
            CREATE INDEX IF NOT EXISTS idx_alert_events_alert ON alert_events (alert_id, triggered_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create alert_events table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit (
                audit_id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                actor_user_id TEXT,
                action TEXT NOT NULL,
                severity TEXT NOT NULL,
                subject_kind TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                before_json TEXT,
                after_json TEXT,
                correlation_id TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit (timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_actor_timestamp ON audit (actor_user_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_correlation ON audit (correlation_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create audit table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}

/// Transient SQLite errors worth retrying: lock contention under WAL.
pub fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => {
            let message = db.message().to_ascii_lowercase();
            message.contains("locked") || message.contains("busy")
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        _ => false,
    }
}

/// Unique-constraint conflicts signal an idempotent duplicate; they
/// are never retried.
pub fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}
