//! Gold savings ledger storage
//!
//! A single SQLite database holds every ledger table. Row operations in
//! [`ledger`] take a `&mut SqliteConnection`, so callers compose them inside one
//! transaction obtained from [`SqliteBackend::begin`] and commit once.
//!
//! Values are stored in their exact persisted form: currency as integer paise,
//! percentages as decimal text, gold mass as REAL milligrams, identifiers as
//! hyphenated UUID text and timestamps as unix seconds. Conversion into typed
//! records happens in the ledger engines.

// Storage backend (SQLite)
pub mod backend;

// Error classification
pub mod errors;

// Typed rows and parameterized row operations
pub mod ledger;

pub use backend::{LedgerTx, SqliteBackend, DEFAULT_MAX_CONNECTIONS};
pub use errors::{StorageError, StorageResult};

/// Re-exported so callers can name the connection type row operations take
pub use sqlx::SqliteConnection;
