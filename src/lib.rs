//! Fixed-page heap file storage with a transaction-aware page cache.

pub mod buffer;
pub mod catalog;
pub mod common;
pub mod concurrency;
pub mod error;
pub mod storage;
pub mod tuple;
