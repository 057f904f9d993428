//! `CatalogStore`: connection pool plus idempotent schema migrations, using
//! a `CREATE TABLE IF NOT EXISTS` migration style throughout.

use skillsmith_core::model::DEFAULT_EMBEDDING_DIM;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

use crate::error::{CatalogError, CatalogResult};

pub struct CatalogStore {
    pub(crate) pool: SqlitePool,
    pub(crate) embedding_dim: usize,
}

impl CatalogStore {
    /// Opens (creating if necessary) the catalog database at `connection`,
    /// which must already have passed `skillsmith_core::pathsafe::validate`
    /// unless it is the literal `:memory:` sentinel. Runs migrations and
    /// creates the `sync_config`/`fisher_info` singleton rows.
    pub async fn open(connection: &str, embedding_dim: usize) -> CatalogResult<Self> {
        if connection != ":memory:" {
            if let Some(parent) = Path::new(connection).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CatalogError::Connection(format!("failed to create directory: {e}")))?;
            }
        }

        let url = if connection.starts_with("sqlite:") {
            connection.to_string()
        } else if connection == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{connection}?mode=rwc")
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CatalogError::Connection(e.to_string()))?;

        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await?;

        let store = Self { pool, embedding_dim };
        store.migrate().await?;
        store.check_embedding_dimension().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    async fn migrate(&self) -> CatalogResult<()> {
        let pool = &self.pool;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS skills (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                author_slug TEXT NOT NULL,
                name TEXT NOT NULL,
                display_name TEXT NOT NULL,
                description TEXT NOT NULL,
                repo_url TEXT NOT NULL UNIQUE,
                default_branch TEXT NOT NULL,
                categories TEXT NOT NULL DEFAULT '[]',
                technologies TEXT NOT NULL DEFAULT '[]',
                trust_tier TEXT NOT NULL,
                quality_score REAL NOT NULL DEFAULT 0,
                installable INTEGER NOT NULL DEFAULT 0,
                current_version TEXT NOT NULL DEFAULT '',
                character_budget INTEGER NOT NULL DEFAULT 0,
                security_scan_status TEXT NOT NULL DEFAULT 'pending',
                trigger_phrases TEXT NOT NULL DEFAULT '[]',
                output_file_patterns TEXT NOT NULL DEFAULT '[]',
                stars INTEGER NOT NULL DEFAULT 0,
                forks INTEGER NOT NULL DEFAULT 0,
                has_tests INTEGER NOT NULL DEFAULT 0,
                has_examples INTEGER NOT NULL DEFAULT 0,
                embedding BLOB,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_skills_trust_tier ON skills(trust_tier);")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_skills_updated_at ON skills(updated_at);")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS skills_fts USING fts5(
                id UNINDEXED,
                name,
                description,
                tags,
                tokenize = 'porter'
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authors (
                slug TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                reputation REAL NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                health TEXT NOT NULL DEFAULT 'healthy',
                last_success_at TEXT,
                last_error_at TEXT,
                last_error TEXT,
                consecutive_failures INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blocklist (
                skill_id TEXT PRIMARY KEY,
                reason TEXT NOT NULL,
                added_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS installed_skills (
                skill_id TEXT PRIMARY KEY,
                installed_version TEXT NOT NULL,
                path TEXT NOT NULL,
                installed_at TEXT NOT NULL,
                activation_count INTEGER NOT NULL DEFAULT 0,
                last_activated_at TEXT,
                character_budget_at_install INTEGER NOT NULL DEFAULT 0,
                priority TEXT,
                priority_locked INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS co_install_edges (
                skill_a TEXT NOT NULL,
                skill_b TEXT NOT NULL,
                install_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (skill_a, skill_b)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                enabled INTEGER NOT NULL DEFAULT 1,
                frequency TEXT NOT NULL DEFAULT 'daily',
                last_sync_at TEXT,
                next_sync_at TEXT,
                last_error TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "INSERT OR IGNORE INTO sync_config (id, enabled, frequency) VALUES (1, 1, 'daily')",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_runs (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                status TEXT NOT NULL,
                added INTEGER NOT NULL DEFAULT 0,
                updated INTEGER NOT NULL DEFAULT 0,
                unchanged INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER,
                error TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_runs_status ON sync_runs(status);")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS patterns (
                id TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                skill_features TEXT NOT NULL,
                outcome TEXT NOT NULL,
                reward REAL NOT NULL,
                original_score REAL NOT NULL,
                recommendation_source TEXT NOT NULL,
                importance REAL NOT NULL DEFAULT 0,
                access_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_accessed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_patterns_importance ON patterns(importance);")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fisher_info (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                dimension INTEGER NOT NULL,
                update_count INTEGER NOT NULL DEFAULT 0,
                blob BLOB NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        let initial = skillsmith_core::model::FisherInfo::new(self.embedding_dim);
        sqlx::query(
            "INSERT OR IGNORE INTO fisher_info (id, dimension, update_count, blob) VALUES (1, ?, 0, ?)",
        )
        .bind(self.embedding_dim as i64)
        .bind(initial.to_bytes())
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS consolidation_history (
                id TEXT PRIMARY KEY,
                processed INTEGER NOT NULL,
                preserved INTEGER NOT NULL,
                pruned INTEGER NOT NULL,
                preservation_rate REAL NOT NULL,
                ran_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                actor TEXT NOT NULL,
                result TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// The embedding dimension must match the configured model at open
    /// time, or the store refuses to open (spec §4.3).
    async fn check_embedding_dimension(&self) -> CatalogResult<()> {
        let row: (i64,) = sqlx::query_as("SELECT dimension FROM fisher_info WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        let stored = row.0 as usize;
        if stored != self.embedding_dim {
            return Err(CatalogError::EmbeddingDimensionMismatch {
                expected: stored,
                actual: self.embedding_dim,
            });
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
pub(crate) async fn test_store() -> CatalogStore {
    CatalogStore::open(":memory:", DEFAULT_EMBEDDING_DIM).await.unwrap()
}
