pub mod models;
pub mod sqlite_store;
pub mod trait_def;

pub use models::*;
pub use sqlite_store::SqliteCuratorStore;
pub use trait_def::CuratorStore;
