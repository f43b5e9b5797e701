pub mod database;
pub mod error;
pub mod kv;
pub mod schema;
pub mod sessions;

pub use database::Database;
pub use error::StoreError;
pub use kv::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};
pub use sessions::SessionStore;
