//! Time-series store and alert history log
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database file, survives restarts
//! - **In-Memory**: No persistence, for tests and alert-only deployments
//!
//! Both implement [`StorageBackend`] and are interchangeable behind an
//! `Arc<dyn StorageBackend>`.
//!
//! ## Usage
//!
//! ```no_run
//! use auto_monitor::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./metrics.db").await?;
//!     println!("{}", backend.get_stats().await?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod retry;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{AlertEventQuery, HealthStatus, QueryRange, StorageBackend, StorageStats};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use retry::{RetryPolicy, with_retries};
