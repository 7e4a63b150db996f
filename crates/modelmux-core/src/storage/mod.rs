//! SQLite metrics database
//!
//! [`Database`] owns the pool that [`SqliteMetricsStore`] reads and writes;
//! the schema lives in [`migrations`].
//!
//! ```ignore
//! use modelmux_core::storage::{Database, default_database_path};
//!
//! let db = Database::open(default_database_path()).await?;
//! let store = SqliteMetricsStore::from_database(&db);
//! ```
//!
//! [`SqliteMetricsStore`]: crate::routing::SqliteMetricsStore

pub mod database;
pub mod migrations;

pub use database::{Database, DatabaseConfig, default_database_path};
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
