//! Storage backends for monitor records
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database shared with the marketplace
//! - **In-Memory**: No persistence, for tests and dry runs
//!
//! ## Usage
//!
//! ```no_run
//! use beacon::storage::{MonitorStore, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./beacon.db").await?;
//!     let due = store.due_liveness_monitors(chrono::Utc::now()).await?;
//!     println!("{} monitors due", due.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use crate::config::StorageConfig;

pub use backend::{HealthStatus, MonitorStore};
pub use error::{StorageError, StorageResult};
pub use schema::{
    Account, AccountId, Capability, LivenessMonitor, MonitorId, NewLivenessMonitor, ProbeRecord,
    WeatherMonitor,
};

/// Open the backend selected by the configuration
pub async fn open(config: &StorageConfig) -> StorageResult<Arc<dyn MonitorStore>> {
    match config {
        StorageConfig::None => Ok(Arc::new(memory::MemoryStore::new())),
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => Ok(Arc::new(sqlite::SqliteStore::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::ConnectionFailed(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}
