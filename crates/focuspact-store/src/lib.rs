pub mod error;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{load_or_default, save_state, FailingStore, JsonFileStore, MemoryStore, StateStore};
