//! Skillsmith Runtime — ingestion, search, recommendation, pre-install
//! safety, and the learning layer. Built on `skillsmith-core` (model, path
//! safety, rate limiting) and `skillsmith-catalog` (persistence).

pub mod coinstall;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod learning;
pub mod recommend;
pub mod safety;
pub mod search;
pub mod sync;
pub mod validate;

pub use error::{Result, RuntimeError};
