mod database;
mod store;

pub use database::Database;
pub use store::{EngineDetail, SqliteStore};
