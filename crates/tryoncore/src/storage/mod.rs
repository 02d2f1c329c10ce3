//! Database, object storage and analytics persistence

pub mod analytics;
pub mod db;
pub mod migrations;
pub mod objects;
pub mod sessions;
pub mod surveys;

// Re-exports for convenience
pub use analytics::{Analytics, DateFilter, FunnelStep};
pub use db::{create_pool, get_connection, DbConnection, DbPool};
pub use objects::{LocalObjectStore, ObjectStore, SupabaseObjectStore};
