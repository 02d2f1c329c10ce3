use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::core::error::{AppError, AppResult};
use crate::storage::migrations;

/// Type alias for a database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Type alias for a pooled database connection
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create a new database connection pool and bring the schema up to date
///
/// # Arguments
///
/// * `database_path` - Path to the SQLite database file
///
/// # Returns
///
/// Returns a `DbPool` on success or an `AppError` if the pool cannot be built
/// or a migration fails.
pub fn create_pool(database_path: &str) -> AppResult<DbPool> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
    });
    let pool = Pool::builder().max_size(10).build(manager)?;

    let mut conn = pool.get()?;
    migrations::run_migrations(&mut conn).map_err(AppError::Anyhow)?;

    log::info!("Database ready at {}", database_path);
    Ok(pool)
}

/// Get a connection from the pool
///
/// The connection is returned to the pool when dropped.
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}

/// Current UTC timestamp in the format SQLite's `datetime('now')` produces
pub fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
