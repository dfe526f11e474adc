//! Persistence for scriptplay
//!
//! The engine saves execution snapshots through the [`PersistenceService`]
//! trait. Two implementations ship here:
//!
//! - [`Storage`] - JSON files in a `.storage/` directory, one per key,
//!   wrapped in a versioned envelope and written atomically
//! - [`MemoryStorage`] - an in-process map, for tests and embedding

mod error;
mod memory;
mod service;
mod storage;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorage;
pub use service::{load_as, save_as, PersistenceService, SharedPersistence};
pub use storage::{Storage, StorageFile, STORAGE_MINOR_VERSION, STORAGE_VERSION};
