//! Storage backend implementations
//!
//! SQLite is the system of record for the ledger: every ledger table lives in
//! one database so a payment, its gold credit, and its commissions commit in a
//! single transaction.

#[cfg(feature = "sqlite")]
pub mod sqlite_backend;

#[cfg(feature = "sqlite")]
pub use sqlite_backend::{LedgerTx, SqliteBackend, DEFAULT_MAX_CONNECTIONS};
