// SQLite Connection Setup

use crate::error::map_sqlx_error;
use outpost_core::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::ConnectOptions;
use std::str::FromStr;
use std::time::Duration;

/// Open the single connection owned by the store's writer task
///
/// WAL mode, busy timeout, database file created if missing.
pub async fn create_connection(database_url: &str) -> Result<SqliteConnection> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(format!("invalid database url '{}': {}", database_url, e)))?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    options.connect().await.map_err(map_sqlx_error)
}

/// `sqlite://` url for a database file path
pub fn database_url(path: &std::path::Path) -> String {
    format!("sqlite://{}", path.display())
}
