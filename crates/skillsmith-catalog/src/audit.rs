//! Audit log repository. Every mutating operation in ingestion, install
//! decisions, and signal recording appends one row here.

use chrono::{DateTime, Utc};
use skillsmith_core::model::AuditEntry;
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{is_missing_table_error, CatalogResult};
use crate::store::CatalogStore;

impl CatalogStore {
    pub async fn append_audit_entry(
        &self,
        event_type: &str,
        actor: &str,
        result: &str,
        metadata: &HashMap<String, String>,
    ) -> CatalogResult<AuditEntry> {
        let entry = AuditEntry {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            actor: actor.to_string(),
            result: result.to_string(),
            metadata: metadata.clone(),
            timestamp: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO audit_log (id, event_type, actor, result, metadata, timestamp) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.event_type)
        .bind(&entry.actor)
        .bind(&entry.result)
        .bind(serde_json::to_string(&entry.metadata)?)
        .bind(entry.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(entry)
    }

    pub async fn recent_audit_entries(&self, limit: u32) -> CatalogResult<Vec<AuditEntry>> {
        let rows = match sqlx::query("SELECT * FROM audit_log ORDER BY timestamp DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) if is_missing_table_error(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        rows.into_iter()
            .map(|row| {
                let metadata_json: String = row.try_get("metadata")?;
                let timestamp: String = row.try_get("timestamp")?;
                Ok(AuditEntry {
                    id: row.try_get("id")?,
                    event_type: row.try_get("event_type")?,
                    actor: row.try_get("actor")?,
                    result: row.try_get("result")?,
                    metadata: serde_json::from_str(&metadata_json)?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .map_err(|e| crate::error::CatalogError::InvalidRow(e.to_string()))?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn appended_entries_come_back_newest_first() {
        let store = test_store().await;
        store
            .append_audit_entry("skill.ingest", "system", "ok", &HashMap::new())
            .await
            .unwrap();
        store
            .append_audit_entry("skill.install", "system", "ok", &HashMap::new())
            .await
            .unwrap();

        let entries = store.recent_audit_entries(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_type, "skill.install");
    }
}
