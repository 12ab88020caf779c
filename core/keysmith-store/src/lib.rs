//! SQLite persistence for keysmith.
//!
//! [`SqliteCodeStore`] implements [`keysmith_license::CodeStore`]. Codes are
//! stored as JSON bodies next to the columns that are queried (hash, status,
//! expiry, version). Every transition runs in a `BEGIN IMMEDIATE`
//! transaction and writes back with a version compare-and-swap, so several
//! processes can share one database file.
//!
//! The schema is versioned with `PRAGMA user_version`; opening a store
//! applies any pending migrations.

mod error;
mod migrations;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use migrations::{MIGRATIONS, Migration, run_migrations, schema_version};
pub use sqlite::SqliteCodeStore;
