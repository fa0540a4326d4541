//! kvdao: a data-access layer over transactional key-value engines
//!
//! [`StoreClient`] wraps any [`kvdao_core::Engine`] and exposes a small set of
//! operations: single-record CRUD, paged cursor scans, delete-while-scanning
//! sweeps, schema provisioning during version upgrades, and database removal.
//! The client opens the database on first use and keeps that one connection
//! for every later operation.
//!
//! # Schema and sentinel store
//!
//! When the open raises the schema version, the first caller of
//! [`StoreClient::create_object_stores`] applies its [`SchemaPlan`] inside the
//! version change. A database that is already at the target version but lacks
//! the configured sentinel store is treated as corrupted: it is deleted, the
//! caller gets [`DaoError::SchemaCorrupted`], and the host's [`Redirector`] is
//! called after a fixed delay.
//!
//! # Example
//!
//! ```rust
//! use kvdao::{DaoConfig, Scan, SchemaPlan, StoreClient, StoreDescriptor};
//! use kvdao_core::MemoryEngine;
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let client = StoreClient::new(MemoryEngine::new(), DaoConfig::default());
//!
//! let plan = SchemaPlan::new()
//!     .store(StoreDescriptor::new("inputIndex"))
//!     .store(StoreDescriptor::new("notes"));
//! client.create_object_stores(&plan).await?;
//!
//! client.put("notes", json!({"text": "hello"}), Some(1_i64.into())).await?;
//! let page = client.scan(Scan::new("notes")).await?;
//! assert_eq!(page, vec![json!({"text": "hello"})]);
//! # Ok::<(), kvdao::DaoError>(())
//! # }).unwrap();
//! ```

pub mod client;
pub mod config;
mod crud;
pub mod cursor;
pub mod error;
mod handshake;
pub mod redirect;
pub mod request;
pub mod schema;
pub mod session;
pub mod tracing;

// Re-export main types at crate root
pub use client::StoreClient;
pub use config::DaoConfig;
pub use cursor::{Limit, RangeDelete, Scan};
pub use error::{DaoError, Result};
pub use redirect::{LogRedirector, Redirector};
pub use schema::{IndexDescriptor, SchemaPlan, StoreDescriptor};
