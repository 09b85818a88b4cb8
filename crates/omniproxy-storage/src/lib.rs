//! Pluggable persistence for captured traffic.
//!
//! Two write backends satisfy the [`TrafficStore`] contract: an
//! append-only file store (ndjson or pretty JSON) and a database store
//! backed by SQLite or PostgreSQL, which additionally implements the
//! [`TrafficQuerier`] query contract. The [`AsyncTrafficStore`] wrapper
//! puts a bounded queue and batched workers in front of any store so the
//! proxy path never blocks on persistence.

mod async_store;
mod database;
mod dburl;
mod entities;
mod error;
mod file;
mod sampling;
mod store;

pub use async_store::{AsyncStoreConfig, AsyncTrafficStore};
pub use database::{DatabaseStoreConfig, DatabaseTrafficStore};
pub use dburl::{DbBackend, DbUrl};
pub use error::{Result, StorageError};
pub use file::{FileFormat, FileTrafficStore};
pub use sampling::{SamplingConfig, SamplingStore};
pub use store::{
    DiscardStore, TrafficDetail, TrafficFilter, TrafficQuerier, TrafficStats, TrafficStore,
    TrafficSummary,
};
