//! Skillsmith Catalog — the single owner of persistence (spec §3). Every
//! other component obtains read-only handles and explicit transactional
//! writers from [`CatalogStore`]; no other crate opens its own connection
//! to `skills.db`.
//!
//! A pooled `sqlx::SqlitePool`, idempotent `CREATE TABLE IF NOT EXISTS`
//! migrations, and hand-written `sqlx::query`/`query_as` (no compile-time
//! `query!` macro, since the schema is created at runtime). Repository
//! methods that query a table that hasn't been migrated yet return
//! empty/no-op rather than propagating an error — the documented
//! pre-migration contract tests rely on (spec §4.3).

mod audit;
mod authors_sources;
mod coinstall;
mod error;
mod installs;
mod patterns;
mod skills;
mod store;
mod sync;

pub use coinstall::CoInstallSummary;
pub use error::{CatalogError, CatalogResult};
pub use skills::{decode_embedding, encode_embedding};
pub use store::CatalogStore;
