//! # Keepsake Store
//! SQLite persistence backend for users, entries, and occasion claims.

pub mod sqlite;

pub use sqlite::SqliteStore;
