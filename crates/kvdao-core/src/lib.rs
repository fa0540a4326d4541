//! kvdao engine contract
//!
//! This crate defines what a storage engine must provide to back the kvdao
//! data-access layer: asynchronous `open` with schema versioning, scoped
//! transactions, object stores with secondary indexes, and forward cursors
//! over key ranges. It also ships [`MemoryEngine`], an in-memory engine that
//! implements the whole contract.
//!
//! # Example
//!
//! ```rust
//! use kvdao_core::{Key, KeyRange};
//!
//! let range = KeyRange::lower_bound(5, true);
//! assert!(!range.contains(&Key::Int(5)));
//! assert!(range.contains(&Key::Int(6)));
//! ```

pub mod engine;
pub mod error;
pub mod key;
pub mod memory;
pub mod params;

// Re-export main types at crate root
pub use engine::{
    Cursor, Engine, ObjectStore, OpenEvent, OpenEventSender, OpenProtocol, OpenRequest, Session,
    Source, Transaction, TransactionMode, UpgradeTransaction,
};
pub use error::{EngineError, EngineResult};
pub use key::{Key, KeyRange};
pub use memory::{MemoryEngine, MemorySession};
pub use params::{IndexParameters, StoreParameters};
