pub mod lock_store;
pub mod projection;

pub use lock_store::{LockKey, LockRecord, LockStore};
pub use projection::{Applied, ProjectionStore, ProjectionTxn};
