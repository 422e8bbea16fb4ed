pub mod contract;
pub mod keys;
pub mod lock_manager;
pub mod sled_store;

pub use contract::{PrepareEdgeRequest, StorageContract};
pub use lock_manager::{LockKey, RowLockManager};
pub use sled_store::SledStorage;
