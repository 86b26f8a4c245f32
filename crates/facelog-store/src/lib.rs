//! facelog-store: SQLite implementation of the facelog store contracts.

pub mod sqlite;

pub use sqlite::{SqliteStore, TIMESTAMP_FORMAT};
