// Adapters layer: concrete destinations behind the domain ports.

pub mod sqlite;

pub use sqlite::{SqliteDestination, StoredSale, DEFAULT_BUSY_TIMEOUT, DEFAULT_TABLE};
