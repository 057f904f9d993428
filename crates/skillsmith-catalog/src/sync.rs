//! Sync config and sync-run repositories (spec §4.5). `start_run` uses the
//! same atomic `UPDATE ... WHERE ... RETURNING` row-locking idiom as
//! `SqliteJobStorage::dequeue` to guarantee at most one run in `running`
//! state — here expressed as "insert a new run only if none is running",
//! checked and written in one statement rather than a separate queue row.

use chrono::{DateTime, Utc};
use skillsmith_core::model::{SyncConfig, SyncFrequency, SyncRun, SyncRunStatus};
use sqlx::Row;
use uuid::Uuid;

use crate::error::{is_missing_table_error, CatalogError, CatalogResult};
use crate::store::CatalogStore;

fn frequency_str(f: SyncFrequency) -> &'static str {
    match f {
        SyncFrequency::Daily => "daily",
        SyncFrequency::Weekly => "weekly",
    }
}

fn parse_frequency(s: &str) -> SyncFrequency {
    match s {
        "weekly" => SyncFrequency::Weekly,
        _ => SyncFrequency::Daily,
    }
}

fn status_str(s: SyncRunStatus) -> &'static str {
    match s {
        SyncRunStatus::Running => "running",
        SyncRunStatus::Success => "success",
        SyncRunStatus::Partial => "partial",
        SyncRunStatus::Failed => "failed",
    }
}

fn parse_status(s: &str) -> SyncRunStatus {
    match s {
        "success" => SyncRunStatus::Success,
        "partial" => SyncRunStatus::Partial,
        "failed" => SyncRunStatus::Failed,
        _ => SyncRunStatus::Running,
    }
}

fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> CatalogResult<SyncRun> {
    let started_at: String = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    Ok(SyncRun {
        id: row.try_get("id")?,
        started_at: DateTime::parse_from_rfc3339(&started_at)
            .map_err(|e| CatalogError::InvalidRow(e.to_string()))?
            .with_timezone(&Utc),
        completed_at: completed_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        status: parse_status(row.try_get::<String, _>("status")?.as_str()),
        added: row.try_get::<i64, _>("added")? as u64,
        updated: row.try_get::<i64, _>("updated")? as u64,
        unchanged: row.try_get::<i64, _>("unchanged")? as u64,
        duration_ms: row.try_get("duration_ms")?,
        error: row.try_get("error")?,
    })
}

impl CatalogStore {
    pub async fn get_sync_config(&self) -> CatalogResult<SyncConfig> {
        let row = sqlx::query("SELECT * FROM sync_config WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        let last_sync_at: Option<String> = row.try_get("last_sync_at")?;
        let next_sync_at: Option<String> = row.try_get("next_sync_at")?;
        Ok(SyncConfig {
            enabled: row.try_get::<i64, _>("enabled")? != 0,
            frequency: parse_frequency(row.try_get::<String, _>("frequency")?.as_str()),
            last_sync_at: last_sync_at
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            next_sync_at: next_sync_at
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            last_error: row.try_get("last_error")?,
        })
    }

    pub async fn update_sync_config(&self, config: &SyncConfig) -> CatalogResult<()> {
        sqlx::query(
            r#"
            UPDATE sync_config SET
                enabled = ?, frequency = ?, last_sync_at = ?, next_sync_at = ?, last_error = ?
            WHERE id = 1
            "#,
        )
        .bind(config.enabled as i64)
        .bind(frequency_str(config.frequency))
        .bind(config.last_sync_at.map(|t| t.to_rfc3339()))
        .bind(config.next_sync_at.map(|t| t.to_rfc3339()))
        .bind(&config.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fails with a sentinel `None` (mapped by callers to `SYNC_IN_PROGRESS`)
    /// if a run is already `running`; otherwise atomically inserts a new
    /// `running` row and returns its id.
    pub async fn start_sync_run(&self, now: DateTime<Utc>) -> CatalogResult<Option<String>> {
        let mut tx = self.pool.begin().await?;
        let (already_running,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sync_runs WHERE status = 'running'")
                .fetch_one(&mut *tx)
                .await?;
        if already_running > 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO sync_runs (id, started_at, status, added, updated, unchanged) VALUES (?, ?, 'running', 0, 0, 0)",
        )
        .bind(&id)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(id))
    }

    pub async fn complete_sync_run(
        &self,
        run_id: &str,
        status: SyncRunStatus,
        added: u64,
        updated: u64,
        unchanged: u64,
        error: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> CatalogResult<()> {
        let run = sqlx::query("SELECT started_at FROM sync_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        let duration_ms = run.and_then(|row| {
            row.try_get::<String, _>("started_at")
                .ok()
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|started: DateTime<chrono::FixedOffset>| {
                    (completed_at - started.with_timezone(&Utc)).num_milliseconds()
                })
        });

        sqlx::query(
            r#"
            UPDATE sync_runs SET
                status = ?, added = ?, updated = ?, unchanged = ?, error = ?,
                completed_at = ?, duration_ms = ?
            WHERE id = ?
            "#,
        )
        .bind(status_str(status))
        .bind(added as i64)
        .bind(updated as i64)
        .bind(unchanged as i64)
        .bind(error)
        .bind(completed_at.to_rfc3339())
        .bind(duration_ms)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_sync_run(&self, run_id: &str) -> CatalogResult<Option<SyncRun>> {
        match sqlx::query("SELECT * FROM sync_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(row)) => Ok(Some(row_to_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) if is_missing_table_error(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn current_running_sync_run(&self) -> CatalogResult<Option<SyncRun>> {
        match sqlx::query("SELECT * FROM sync_runs WHERE status = 'running' LIMIT 1")
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(row)) => Ok(Some(row_to_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) if is_missing_table_error(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_sync_history(&self, limit: u32) -> CatalogResult<Vec<SyncRun>> {
        let rows = match sqlx::query("SELECT * FROM sync_runs ORDER BY started_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) if is_missing_table_error(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        rows.iter().map(row_to_run).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn only_one_run_may_be_running_at_a_time() {
        let store = test_store().await;
        let now = Utc::now();
        let first = store.start_sync_run(now).await.unwrap();
        assert!(first.is_some());

        let second = store.start_sync_run(now).await.unwrap();
        assert!(second.is_none(), "a second concurrent run must be refused");
    }

    #[tokio::test]
    async fn completing_a_run_frees_the_single_writer_slot() {
        let store = test_store().await;
        let now = Utc::now();
        let run_id = store.start_sync_run(now).await.unwrap().unwrap();
        store
            .complete_sync_run(&run_id, SyncRunStatus::Success, 1, 0, 0, None, now)
            .await
            .unwrap();

        let next = store.start_sync_run(now).await.unwrap();
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn default_sync_config_is_daily_and_enabled() {
        let store = test_store().await;
        let config = store.get_sync_config().await.unwrap();
        assert!(config.enabled);
        assert_eq!(config.frequency, SyncFrequency::Daily);
    }
}
