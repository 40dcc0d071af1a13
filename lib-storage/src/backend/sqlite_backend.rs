//! SQLite storage backend for the savings ledger
//!
//! Holds the connection pool and the embedded schema for:
//! - Plans, members, investment accounts
//! - Subscriptions, payments, gold holdings
//! - Wallets and the activity log
//! - Referral edges, level config, commission records
//! - Published gold rates and consumed gateway captures
//!
//! # Features
//!
//! - WAL mode enabled for better concurrent performance
//! - Foreign keys enforced
//! - Idempotent migrations run on open
//! - Ledger invariants backed by CHECK and partial UNIQUE indexes

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{StorageError, StorageResult};

/// Open transaction handed to row operations
pub type LedgerTx = Transaction<'static, Sqlite>;

/// Default pool size for on-disk databases
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long a writer waits on a locked database before reporting busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// SqliteBackend Implementation
// ============================================================================

/// SQLite-based storage backend for the ledger
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open or create a SQLite database at the given path
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open_with(path, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Open or create a SQLite database with an explicit pool size
    pub async fn open_with(path: impl AsRef<Path>, max_connections: u32) -> StorageResult<Self> {
        let path = path.as_ref();
        let url = format!("sqlite:{}?mode=rwc", path.display());

        info!("Opening SQLite ledger at: {}", path.display());

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StorageError::OpenFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::OpenFailed(format!("Failed to connect to SQLite: {}", e)))?;

        Self::run_migrations(&pool).await?;

        info!("SQLite ledger initialized successfully");

        Ok(Self { pool })
    }

    /// Open an in-memory SQLite database (for testing)
    ///
    /// The pool holds exactly one connection: every connection to `:memory:`
    /// is a separate database.
    pub async fn open_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::OpenFailed(e.to_string()))?
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::OpenFailed(format!("Failed to create in-memory SQLite: {}", e)))?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    async fn run_migrations(pool: &SqlitePool) -> StorageResult<()> {
        debug!("Running SQLite migrations...");

        const MIGRATION_V1: &str = r#"
-- Savings plan templates
CREATE TABLE IF NOT EXISTS plans (
    plan_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    monthly_amount INTEGER NOT NULL CHECK (monthly_amount > 0),
    duration_months INTEGER NOT NULL CHECK (duration_months > 0),
    payment_months INTEGER NOT NULL CHECK (payment_months > 0 AND payment_months <= duration_months),
    bonus_percentage TEXT,
    bonus_amount INTEGER CHECK (bonus_amount IS NULL OR bonus_amount >= 0),
    active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL
);

-- Registered members
CREATE TABLE IF NOT EXISTS members (
    user_id TEXT PRIMARY KEY,
    full_name TEXT NOT NULL,
    phone TEXT NOT NULL UNIQUE,
    referral_code TEXT NOT NULL UNIQUE,
    referred_by TEXT REFERENCES members(user_id),
    created_at INTEGER NOT NULL,
    CHECK (referred_by IS NULL OR referred_by <> user_id)
);

CREATE INDEX IF NOT EXISTS idx_members_referred_by ON members(referred_by);

-- Investment accounts (several per member)
CREATE TABLE IF NOT EXISTS investment_accounts (
    account_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES members(user_id),
    account_number TEXT NOT NULL UNIQUE,
    account_name TEXT NOT NULL,
    is_primary INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_accounts_user ON investment_accounts(user_id);

-- Plan enrollments
CREATE TABLE IF NOT EXISTS subscriptions (
    subscription_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES members(user_id),
    account_id TEXT REFERENCES investment_accounts(account_id),
    plan_id TEXT NOT NULL REFERENCES plans(plan_id),
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    status TEXT NOT NULL,
    total_paid INTEGER NOT NULL DEFAULT 0 CHECK (total_paid >= 0),
    bonus_amount INTEGER NOT NULL DEFAULT 0 CHECK (bonus_amount >= 0),
    final_amount INTEGER NOT NULL DEFAULT 0 CHECK (final_amount >= 0),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id);
CREATE INDEX IF NOT EXISTS idx_subscriptions_plan_status ON subscriptions(plan_id, status);
CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_one_active
    ON subscriptions(user_id, IFNULL(account_id, ''))
    WHERE status = 'active';

-- Installment and bonus payments
CREATE TABLE IF NOT EXISTS payments (
    payment_id TEXT PRIMARY KEY,
    subscription_id TEXT NOT NULL REFERENCES subscriptions(subscription_id),
    user_id TEXT NOT NULL REFERENCES members(user_id),
    kind TEXT NOT NULL,
    month_number INTEGER NOT NULL CHECK (month_number >= 1),
    amount INTEGER NOT NULL CHECK (amount >= 0),
    gold_rate INTEGER NOT NULL CHECK (gold_rate > 0),
    gold_milligrams REAL NOT NULL CHECK (gold_milligrams >= 0),
    status TEXT NOT NULL,
    gateway_order_id TEXT,
    gateway_payment_id TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_payments_subscription ON payments(subscription_id, month_number);
CREATE UNIQUE INDEX IF NOT EXISTS idx_payments_completed_month
    ON payments(subscription_id, kind, month_number)
    WHERE status = 'completed';

-- Gold credited per payment (audit trail)
CREATE TABLE IF NOT EXISTS gold_holdings (
    holding_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL REFERENCES members(user_id),
    subscription_id TEXT NOT NULL REFERENCES subscriptions(subscription_id),
    payment_id TEXT NOT NULL UNIQUE REFERENCES payments(payment_id),
    amount_paid INTEGER NOT NULL CHECK (amount_paid >= 0),
    gold_rate INTEGER NOT NULL CHECK (gold_rate > 0),
    gold_milligrams REAL NOT NULL CHECK (gold_milligrams >= 0),
    kind TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_holdings_user ON gold_holdings(user_id);

-- Aggregate balances
CREATE TABLE IF NOT EXISTS wallets (
    user_id TEXT PRIMARY KEY REFERENCES members(user_id),
    savings_balance INTEGER NOT NULL DEFAULT 0 CHECK (savings_balance >= 0),
    referral_balance INTEGER NOT NULL DEFAULT 0 CHECK (referral_balance >= 0),
    gold_balance_mg REAL NOT NULL DEFAULT 0 CHECK (gold_balance_mg >= 0),
    total_balance INTEGER NOT NULL DEFAULT 0,
    total_earnings INTEGER NOT NULL DEFAULT 0 CHECK (total_earnings >= 0),
    total_withdrawn INTEGER NOT NULL DEFAULT 0 CHECK (total_withdrawn >= 0),
    updated_at INTEGER NOT NULL,
    CHECK (total_balance = savings_balance + referral_balance)
);

-- Referral closure table
CREATE TABLE IF NOT EXISTS referral_edges (
    ancestor_id TEXT NOT NULL REFERENCES members(user_id),
    descendant_id TEXT NOT NULL REFERENCES members(user_id),
    level INTEGER NOT NULL CHECK (level >= 1),
    created_at INTEGER NOT NULL,
    PRIMARY KEY (ancestor_id, descendant_id),
    CHECK (ancestor_id <> descendant_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_edges_descendant_level ON referral_edges(descendant_id, level);
CREATE INDEX IF NOT EXISTS idx_edges_ancestor_level ON referral_edges(ancestor_id, level);

-- Commission percentage per referral level
CREATE TABLE IF NOT EXISTS level_config (
    level INTEGER PRIMARY KEY CHECK (level >= 1),
    percentage TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Source payments whose commissions were propagated
CREATE TABLE IF NOT EXISTS commission_sources (
    source_payment_id TEXT PRIMARY KEY,
    paying_user_id TEXT NOT NULL,
    payment_amount INTEGER NOT NULL CHECK (payment_amount >= 0),
    processed_at INTEGER NOT NULL
);

-- Commission audit records
CREATE TABLE IF NOT EXISTS commission_records (
    record_id INTEGER PRIMARY KEY AUTOINCREMENT,
    ancestor_id TEXT NOT NULL REFERENCES members(user_id),
    from_user_id TEXT NOT NULL,
    level INTEGER NOT NULL CHECK (level >= 1),
    amount INTEGER NOT NULL CHECK (amount >= 0),
    percentage TEXT NOT NULL,
    source_payment_id TEXT NOT NULL REFERENCES commission_sources(source_payment_id),
    created_at INTEGER NOT NULL,
    UNIQUE (source_payment_id, ancestor_id)
);

CREATE INDEX IF NOT EXISTS idx_commissions_ancestor ON commission_records(ancestor_id, created_at);

-- Published gold rates
CREATE TABLE IF NOT EXISTS gold_rates (
    rate_id INTEGER PRIMARY KEY AUTOINCREMENT,
    rate_per_gram INTEGER NOT NULL CHECK (rate_per_gram > 0),
    rate_date TEXT NOT NULL,
    published_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_gold_rates_published ON gold_rates(published_at);

-- Gateway captures already applied (replay guard)
CREATE TABLE IF NOT EXISTS gateway_captures (
    gateway_payment_id TEXT PRIMARY KEY,
    gateway_order_id TEXT NOT NULL,
    user_id TEXT NOT NULL REFERENCES members(user_id),
    purpose TEXT NOT NULL,
    amount INTEGER NOT NULL CHECK (amount >= 0),
    created_at INTEGER NOT NULL
);

-- Per-member activity log
CREATE TABLE IF NOT EXISTS ledger_transactions (
    tx_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL REFERENCES members(user_id),
    account_id TEXT,
    kind TEXT NOT NULL,
    amount INTEGER NOT NULL CHECK (amount >= 0),
    reference TEXT,
    description TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ledger_tx_user ON ledger_transactions(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_ledger_tx_kind ON ledger_transactions(kind);
"#;

        sqlx::raw_sql(MIGRATION_V1)
            .execute(pool)
            .await
            .map_err(|e| StorageError::OpenFailed(format!("Migration failed: {}", e)))?;

        debug!("Migrations completed successfully");
        Ok(())
    }

    /// Begin a transaction; dropping it without commit rolls back
    pub async fn begin(&self) -> StorageResult<LedgerTx> {
        Ok(self.pool.begin().await?)
    }

    /// Commit a transaction opened with [`begin`](Self::begin)
    pub async fn commit(tx: LedgerTx) -> StorageResult<()> {
        Ok(tx.commit().await?)
    }

    /// Check out a connection for reads or single-statement writes
    pub async fn acquire(&self) -> StorageResult<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    /// Shared pool for read-only queries outside a transaction
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// ============================================================================
// Tests
// ============================================================================
