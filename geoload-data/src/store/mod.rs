//! Record store backends.

mod sqlite;

pub use sqlite::{SqliteConnection, SqliteStore, SqliteStoreError};
