//! Blocklist and installed-skills repositories (spec §3/§4.8).

use chrono::{DateTime, Utc};
use skillsmith_core::model::{BlocklistEntry, InstallPriority, InstalledSkill};
use sqlx::Row;

use crate::error::{is_missing_table_error, CatalogResult};
use crate::store::CatalogStore;

fn priority_str(p: InstallPriority) -> &'static str {
    match p {
        InstallPriority::Essential => "essential",
        InstallPriority::Recommended => "recommended",
        InstallPriority::Optional => "optional",
    }
}

fn parse_priority(s: &str) -> InstallPriority {
    match s {
        "essential" => InstallPriority::Essential,
        "optional" => InstallPriority::Optional,
        _ => InstallPriority::Recommended,
    }
}

fn row_to_installed(row: &sqlx::sqlite::SqliteRow) -> CatalogResult<InstalledSkill> {
    let installed_at: String = row.try_get("installed_at")?;
    let last_activated_at: Option<String> = row.try_get("last_activated_at")?;
    let priority: Option<String> = row.try_get("priority")?;
    Ok(InstalledSkill {
        skill_id: row.try_get("skill_id")?,
        installed_version: row.try_get("installed_version")?,
        path: row.try_get("path")?,
        installed_at: DateTime::parse_from_rfc3339(&installed_at)
            .map_err(|e| crate::error::CatalogError::InvalidRow(e.to_string()))?
            .with_timezone(&Utc),
        activation_count: row.try_get::<i64, _>("activation_count")? as u64,
        last_activated_at: last_activated_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        character_budget_at_install: row.try_get::<i64, _>("character_budget_at_install")? as u32,
        priority: priority.map(|p| parse_priority(&p)),
        priority_locked: row.try_get::<i64, _>("priority_locked")? != 0,
    })
}

impl CatalogStore {
    pub async fn add_blocklist_entry(&self, entry: &BlocklistEntry) -> CatalogResult<()> {
        sqlx::query(
            "INSERT INTO blocklist (skill_id, reason, added_at) VALUES (?, ?, ?) \
             ON CONFLICT(skill_id) DO UPDATE SET reason = excluded.reason, added_at = excluded.added_at",
        )
        .bind(&entry.skill_id)
        .bind(&entry.reason)
        .bind(entry.added_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_blocklist_entry(&self, skill_id: &str) -> CatalogResult<()> {
        sqlx::query("DELETE FROM blocklist WHERE skill_id = ?")
            .bind(skill_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn is_blocklisted(&self, skill_id: &str) -> CatalogResult<bool> {
        match sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM blocklist WHERE skill_id = ?")
            .bind(skill_id)
            .fetch_one(&self.pool)
            .await
        {
            Ok((n,)) => Ok(n > 0),
            Err(e) if is_missing_table_error(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_blocklist_entry(&self, skill_id: &str) -> CatalogResult<Option<BlocklistEntry>> {
        match sqlx::query("SELECT * FROM blocklist WHERE skill_id = ?")
            .bind(skill_id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(row)) => {
                let added_at: String = row.try_get("added_at")?;
                Ok(Some(BlocklistEntry {
                    skill_id: row.try_get("skill_id")?,
                    reason: row.try_get("reason")?,
                    added_at: DateTime::parse_from_rfc3339(&added_at)
                        .map_err(|e| crate::error::CatalogError::InvalidRow(e.to_string()))?
                        .with_timezone(&Utc),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) if is_missing_table_error(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn install_skill(&self, installed: &InstalledSkill) -> CatalogResult<()> {
        sqlx::query(
            r#"
            INSERT INTO installed_skills (
                skill_id, installed_version, path, installed_at, activation_count,
                last_activated_at, character_budget_at_install, priority, priority_locked
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(skill_id) DO UPDATE SET
                installed_version = excluded.installed_version,
                path = excluded.path,
                installed_at = excluded.installed_at,
                character_budget_at_install = excluded.character_budget_at_install
            "#,
        )
        .bind(&installed.skill_id)
        .bind(&installed.installed_version)
        .bind(&installed.path)
        .bind(installed.installed_at.to_rfc3339())
        .bind(installed.activation_count as i64)
        .bind(installed.last_activated_at.map(|t| t.to_rfc3339()))
        .bind(installed.character_budget_at_install as i64)
        .bind(installed.priority.map(priority_str))
        .bind(installed.priority_locked as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn uninstall_skill(&self, skill_id: &str) -> CatalogResult<bool> {
        let result = sqlx::query("DELETE FROM installed_skills WHERE skill_id = ?")
            .bind(skill_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_installed_skill(&self, skill_id: &str) -> CatalogResult<Option<InstalledSkill>> {
        match sqlx::query("SELECT * FROM installed_skills WHERE skill_id = ?")
            .bind(skill_id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(row)) => Ok(Some(row_to_installed(&row)?)),
            Ok(None) => Ok(None),
            Err(e) if is_missing_table_error(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_installed_skills(&self) -> CatalogResult<Vec<InstalledSkill>> {
        let rows = match sqlx::query("SELECT * FROM installed_skills")
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) if is_missing_table_error(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        rows.iter().map(row_to_installed).collect()
    }

    pub async fn record_activation(&self, skill_id: &str, at: DateTime<Utc>) -> CatalogResult<()> {
        sqlx::query(
            "UPDATE installed_skills SET activation_count = activation_count + 1, last_activated_at = ? WHERE skill_id = ?",
        )
        .bind(at.to_rfc3339())
        .bind(skill_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_priority(&self, skill_id: &str, priority: InstallPriority, lock: bool) -> CatalogResult<bool> {
        let result = sqlx::query("UPDATE installed_skills SET priority = ?, priority_locked = ? WHERE skill_id = ?")
            .bind(priority_str(priority))
            .bind(lock as i64)
            .bind(skill_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn blocklist_add_then_query() {
        let store = test_store().await;
        store
            .add_blocklist_entry(&BlocklistEntry {
                skill_id: "gh/suspicious/malware-skill".into(),
                reason: "obfuscated code".into(),
                added_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(store.is_blocklisted("gh/suspicious/malware-skill").await.unwrap());
        assert!(!store.is_blocklisted("gh/acme/react-testing").await.unwrap());
    }

    #[tokio::test]
    async fn install_then_uninstall_round_trips() {
        let store = test_store().await;
        let now = Utc::now();
        store
            .install_skill(&InstalledSkill {
                skill_id: "gh/acme/react-testing".into(),
                installed_version: "1.0.0".into(),
                path: "/data/skillsmith/skills/react-testing".into(),
                installed_at: now,
                activation_count: 0,
                last_activated_at: None,
                character_budget_at_install: 2000,
                priority: None,
                priority_locked: false,
            })
            .await
            .unwrap();

        assert!(store.get_installed_skill("gh/acme/react-testing").await.unwrap().is_some());
        assert!(store.uninstall_skill("gh/acme/react-testing").await.unwrap());
        assert!(store.get_installed_skill("gh/acme/react-testing").await.unwrap().is_none());
    }
}
