// Outpost Infrastructure - SQLite Adapter
// Implements: OfflineStore (single-writer offline queue)

mod connection;
mod error;
mod migration;
mod offline_store;

pub use connection::{create_connection, database_url};
pub use migration::run_migrations;
pub use offline_store::SqliteOfflineStore;
