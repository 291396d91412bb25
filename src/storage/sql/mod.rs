mod storage;
mod util;

pub use storage::SqliteStorage;
