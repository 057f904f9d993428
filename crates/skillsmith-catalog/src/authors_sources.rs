//! Author and Source repositories. Both are soft-referenced from `Skill`
//! (spec §3): a skill may point to an author slug or source id with no row
//! of its own, so lookups here return `Option`, never an error, for a
//! missing reference.

use chrono::{DateTime, Utc};
use skillsmith_core::model::{Author, Source, SourceHealthState};
use sqlx::Row;

use crate::error::{is_missing_table_error, CatalogResult};
use crate::store::CatalogStore;

fn health_str(h: SourceHealthState) -> &'static str {
    match h {
        SourceHealthState::Healthy => "healthy",
        SourceHealthState::Degraded => "degraded",
        SourceHealthState::Down => "down",
    }
}

fn parse_health(s: &str) -> SourceHealthState {
    match s {
        "degraded" => SourceHealthState::Degraded,
        "down" => SourceHealthState::Down,
        _ => SourceHealthState::Healthy,
    }
}

fn row_to_source(row: &sqlx::sqlite::SqliteRow) -> CatalogResult<Source> {
    let parse_ts = |s: Option<String>| -> Option<DateTime<Utc>> {
        s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };
    Ok(Source {
        id: row.try_get("id")?,
        kind: row.try_get("kind")?,
        health: parse_health(row.try_get::<String, _>("health")?.as_str()),
        last_success_at: parse_ts(row.try_get("last_success_at")?),
        last_error_at: parse_ts(row.try_get("last_error_at")?),
        last_error: row.try_get("last_error")?,
        consecutive_failures: row.try_get::<i64, _>("consecutive_failures")? as u32,
    })
}

impl CatalogStore {
    pub async fn upsert_author(&self, author: &Author) -> CatalogResult<()> {
        sqlx::query(
            r#"
            INSERT INTO authors (slug, display_name, reputation) VALUES (?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET display_name = excluded.display_name, reputation = excluded.reputation
            "#,
        )
        .bind(&author.slug)
        .bind(&author.display_name)
        .bind(author.reputation)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_author(&self, slug: &str) -> CatalogResult<Option<Author>> {
        match sqlx::query("SELECT * FROM authors WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(row)) => Ok(Some(Author {
                slug: row.try_get("slug")?,
                display_name: row.try_get("display_name")?,
                reputation: row.try_get("reputation")?,
            })),
            Ok(None) => Ok(None),
            Err(e) if is_missing_table_error(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn upsert_source(&self, source: &Source) -> CatalogResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, kind, health, last_success_at, last_error_at, last_error, consecutive_failures)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                health = excluded.health,
                last_success_at = excluded.last_success_at,
                last_error_at = excluded.last_error_at,
                last_error = excluded.last_error,
                consecutive_failures = excluded.consecutive_failures
            "#,
        )
        .bind(&source.id)
        .bind(&source.kind)
        .bind(health_str(source.health))
        .bind(source.last_success_at.map(|t| t.to_rfc3339()))
        .bind(source.last_error_at.map(|t| t.to_rfc3339()))
        .bind(&source.last_error)
        .bind(source.consecutive_failures as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_source_success(&self, source_id: &str, at: DateTime<Utc>) -> CatalogResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, kind, health, last_success_at, consecutive_failures)
            VALUES (?, 'code-host', 'healthy', ?, 0)
            ON CONFLICT(id) DO UPDATE SET
                health = 'healthy',
                last_success_at = excluded.last_success_at,
                consecutive_failures = 0
            "#,
        )
        .bind(source_id)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marks a source degraded and bumps its consecutive-failure count
    /// (spec §4.4 failure semantics, §7 propagation policy).
    pub async fn mark_source_degraded(
        &self,
        source_id: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> CatalogResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, kind, health, last_error_at, last_error, consecutive_failures)
            VALUES (?, 'code-host', 'degraded', ?, ?, 1)
            ON CONFLICT(id) DO UPDATE SET
                health = 'degraded',
                last_error_at = excluded.last_error_at,
                last_error = excluded.last_error,
                consecutive_failures = consecutive_failures + 1
            "#,
        )
        .bind(source_id)
        .bind(at.to_rfc3339())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_source(&self, source_id: &str) -> CatalogResult<Option<Source>> {
        match sqlx::query("SELECT * FROM sources WHERE id = ?")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(row)) => Ok(Some(row_to_source(&row)?)),
            Ok(None) => Ok(None),
            Err(e) if is_missing_table_error(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_sources(&self) -> CatalogResult<Vec<Source>> {
        let rows = match sqlx::query("SELECT * FROM sources")
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) if is_missing_table_error(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        rows.iter().map(row_to_source).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn source_not_yet_seen_returns_none_not_error() {
        let store = test_store().await;
        assert!(store.get_source("gh").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_failures_increment_and_mark_degraded() {
        let store = test_store().await;
        let now = Utc::now();
        store.mark_source_degraded("gh", "timeout", now).await.unwrap();
        store.mark_source_degraded("gh", "timeout", now).await.unwrap();

        let source = store.get_source("gh").await.unwrap().unwrap();
        assert_eq!(source.health, SourceHealthState::Degraded);
        assert_eq!(source.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn success_after_failures_resets_counter() {
        let store = test_store().await;
        let now = Utc::now();
        store.mark_source_degraded("gh", "timeout", now).await.unwrap();
        store.mark_source_success("gh", now).await.unwrap();

        let source = store.get_source("gh").await.unwrap().unwrap();
        assert_eq!(source.health, SourceHealthState::Healthy);
        assert_eq!(source.consecutive_failures, 0);
    }
}
