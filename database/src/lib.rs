//! SQLite persistence for the Maestro orchestration core.
//!
//! Implements the `maestro-core` store trait family over an embedded
//! SQLite database: WAL mode for file databases, connection pooling,
//! strict RFC 3339 timestamp handling, and a versioned forward-only
//! migration gate that must finish before the store serves traffic.
//!
//! # Usage
//!
//! ```rust,no_run
//! use maestro_database::SqliteStore;
//! use maestro_core::store::Store;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteStore::new(":memory:").await?;
//! store.migrate().await?;
//! store.health_check().await?;
//! # Ok(())
//! # }
//! ```

mod common;
mod migrations;
mod sqlite;

pub use migrations::{Migration, MigrationManager, MigrationStatus, PendingMigration};
pub use sqlite::SqliteStore;

// Re-export commonly used core types for convenience.
pub use maestro_core::{
    error::{Error, Result},
    models::{Task, TaskEvent, TaskStatus},
    store::Store,
};
