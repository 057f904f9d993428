//! Pattern store persistence (spec §4.9). The EWC++ math itself (gradient,
//! importance, consolidation policy) lives in `skillsmith-runtime::learning`;
//! this module only provides the durable rows it reads and writes, under
//! the exclusive-writer contract spec §4.9/§5 describe for consolidation.

use chrono::{DateTime, Utc};
use skillsmith_core::model::{FisherInfo, Pattern, RecommendationSource, SignalType, SkillFeatures};
use sqlx::Row;
use uuid::Uuid;

use crate::error::{is_missing_table_error, CatalogError, CatalogResult};
use crate::skills::{decode_embedding, encode_embedding};
use crate::store::CatalogStore;

fn outcome_str(o: SignalType) -> &'static str {
    match o {
        SignalType::Accept => "accept",
        SignalType::Dismiss => "dismiss",
        SignalType::Usage => "usage",
        SignalType::Abandonment => "abandonment",
        SignalType::Uninstall => "uninstall",
    }
}

fn parse_outcome(s: &str) -> SignalType {
    match s {
        "dismiss" => SignalType::Dismiss,
        "usage" => SignalType::Usage,
        "abandonment" => SignalType::Abandonment,
        "uninstall" => SignalType::Uninstall,
        _ => SignalType::Accept,
    }
}

fn source_str(s: RecommendationSource) -> &'static str {
    match s {
        RecommendationSource::Search => "search",
        RecommendationSource::Recommend => "recommend",
        RecommendationSource::Install => "install",
        RecommendationSource::Compare => "compare",
    }
}

fn parse_source(s: &str) -> RecommendationSource {
    match s {
        "search" => RecommendationSource::Search,
        "install" => RecommendationSource::Install,
        "compare" => RecommendationSource::Compare,
        _ => RecommendationSource::Recommend,
    }
}

fn row_to_pattern(row: &sqlx::sqlite::SqliteRow) -> CatalogResult<Pattern> {
    let embedding_blob: Vec<u8> = row.try_get("embedding")?;
    let skill_features_json: String = row.try_get("skill_features")?;
    let created_at: String = row.try_get("created_at")?;
    let last_accessed_at: String = row.try_get("last_accessed_at")?;

    Ok(Pattern {
        id: row.try_get("id")?,
        embedding: decode_embedding(&embedding_blob),
        skill_features: serde_json::from_str::<SkillFeatures>(&skill_features_json)?,
        outcome: parse_outcome(row.try_get::<String, _>("outcome")?.as_str()),
        reward: row.try_get("reward")?,
        original_score: row.try_get("original_score")?,
        recommendation_source: parse_source(row.try_get::<String, _>("recommendation_source")?.as_str()),
        importance: row.try_get("importance")?,
        access_count: row.try_get::<i64, _>("access_count")? as u64,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| CatalogError::InvalidRow(e.to_string()))?
            .with_timezone(&Utc),
        last_accessed_at: DateTime::parse_from_rfc3339(&last_accessed_at)
            .map_err(|e| CatalogError::InvalidRow(e.to_string()))?
            .with_timezone(&Utc),
    })
}

impl CatalogStore {
    pub async fn insert_pattern(&self, pattern: &Pattern) -> CatalogResult<()> {
        sqlx::query(
            r#"
            INSERT INTO patterns (
                id, embedding, skill_features, outcome, reward, original_score,
                recommendation_source, importance, access_count, created_at, last_accessed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&pattern.id)
        .bind(encode_embedding(&pattern.embedding))
        .bind(serde_json::to_string(&pattern.skill_features)?)
        .bind(outcome_str(pattern.outcome))
        .bind(pattern.reward)
        .bind(pattern.original_score)
        .bind(source_str(pattern.recommendation_source))
        .bind(pattern.importance)
        .bind(pattern.access_count as i64)
        .bind(pattern.created_at.to_rfc3339())
        .bind(pattern.last_accessed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn touch_pattern(&self, pattern_id: &str, at: DateTime<Utc>) -> CatalogResult<()> {
        sqlx::query("UPDATE patterns SET access_count = access_count + 1, last_accessed_at = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(pattern_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_pattern_importance(&self, pattern_id: &str, importance: f64) -> CatalogResult<()> {
        sqlx::query("UPDATE patterns SET importance = ? WHERE id = ?")
            .bind(importance)
            .bind(pattern_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bounded scan used by verdict queries (`top_by_confidence` scans up to
    /// 1000 patterns, spec §4.9) and by consolidation (which scans all).
    pub async fn list_patterns(&self, limit: u32) -> CatalogResult<Vec<Pattern>> {
        let rows = match sqlx::query("SELECT * FROM patterns ORDER BY created_at ASC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) if is_missing_table_error(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        rows.iter().map(row_to_pattern).collect()
    }

    pub async fn patterns_for_skill(&self, skill_id: &str, limit: u32) -> CatalogResult<Vec<Pattern>> {
        let pattern = format!("%\"skill_id\":\"{skill_id}\"%");
        let rows = match sqlx::query(
            "SELECT * FROM patterns WHERE skill_features LIKE ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) if is_missing_table_error(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        rows.iter().map(row_to_pattern).collect()
    }

    pub async fn count_patterns(&self) -> CatalogResult<u64> {
        match sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM patterns")
            .fetch_one(&self.pool)
            .await
        {
            Ok((n,)) => Ok(n as u64),
            Err(e) if is_missing_table_error(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_patterns(&self, ids: &[String]) -> CatalogResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0u64;
        for id in ids {
            let result = sqlx::query("DELETE FROM patterns WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(deleted)
    }

    pub async fn get_fisher_info(&self) -> CatalogResult<FisherInfo> {
        let row: (i64, i64, Vec<u8>) =
            sqlx::query_as("SELECT dimension, update_count, blob FROM fisher_info WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;
        let dimension = row.0 as usize;
        FisherInfo::from_bytes(dimension, &row.2).ok_or_else(|| {
            CatalogError::InvalidRow("corrupt fisher_info blob".to_string())
        })
    }

    /// Snapshot-under-transaction write used by the consolidation pass
    /// (spec §4.9 concurrency rules): the blob is replaced atomically, never
    /// merged field-by-field.
    pub async fn save_fisher_info(&self, info: &FisherInfo) -> CatalogResult<()> {
        sqlx::query("UPDATE fisher_info SET update_count = ?, blob = ? WHERE id = 1")
            .bind(info.update_count as i64)
            .bind(info.to_bytes())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_consolidation(
        &self,
        processed: u64,
        preserved: u64,
        pruned: u64,
        preservation_rate: f64,
        ran_at: DateTime<Utc>,
    ) -> CatalogResult<()> {
        sqlx::query(
            "INSERT INTO consolidation_history (id, processed, preserved, pruned, preservation_rate, ran_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(processed as i64)
        .bind(preserved as i64)
        .bind(pruned as i64)
        .bind(preservation_rate)
        .bind(ran_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;
    use skillsmith_core::model::{DEFAULT_EMBEDDING_DIM, TrustTier};

    fn sample_pattern(id: &str, reward: f64) -> Pattern {
        let now = Utc::now();
        Pattern {
            id: id.to_string(),
            embedding: vec![0.1; DEFAULT_EMBEDDING_DIM],
            skill_features: SkillFeatures {
                skill_id: "gh/acme/react-testing".into(),
                trust_tier: TrustTier::Community,
                categories: vec!["testing".into()],
                technologies: vec!["react".into()],
            },
            outcome: SignalType::Accept,
            reward,
            original_score: 0.5,
            recommendation_source: RecommendationSource::Search,
            importance: 0.0,
            access_count: 0,
            created_at: now,
            last_accessed_at: now,
        }
    }

    #[tokio::test]
    async fn insert_then_list_round_trips() {
        let store = test_store().await;
        store.insert_pattern(&sample_pattern("p1", 1.0)).await.unwrap();
        let patterns = store.list_patterns(10).await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].id, "p1");
    }

    #[tokio::test]
    async fn fisher_info_round_trips_through_the_blob() {
        let store = test_store().await;
        let mut info = store.get_fisher_info().await.unwrap();
        info.update_count = 5;
        info.importance[0] = 0.42;
        store.save_fisher_info(&info).await.unwrap();

        let reloaded = store.get_fisher_info().await.unwrap();
        assert_eq!(reloaded.update_count, 5);
        assert!((reloaded.importance[0] - 0.42).abs() < 1e-6);
    }

    #[tokio::test]
    async fn deleting_patterns_by_id_prunes_only_those_ids() {
        let store = test_store().await;
        store.insert_pattern(&sample_pattern("keep", 1.0)).await.unwrap();
        store.insert_pattern(&sample_pattern("drop", -0.5)).await.unwrap();

        let deleted = store.delete_patterns(&["drop".to_string()]).await.unwrap();
        assert_eq!(deleted, 1);

        let remaining = store.list_patterns(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "keep");
    }
}
