#![forbid(unsafe_code)]

pub mod repository;
pub mod sqlite;
pub mod user_data;

pub use repository::{InMemoryStore, KeyValueStore, Storage, StorageError};
pub use user_data::{CURRENT_SCHEMA_VERSION, RecordType, UserData, UserDataStore};
