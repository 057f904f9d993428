//! Skill repository: upsert-by-URL, lookups, and the synchronous FTS5 index
//! maintenance (spec §4.3 — kept in sync by the writing method, not a
//! trigger, mirroring `SqliteJobStorage::enqueue`'s one-function-does-the-
//! whole-write style).

use chrono::{DateTime, Utc};
use skillsmith_core::model::{SecurityScanStatus, Skill, TrustTier};
use sqlx::Row;

use crate::error::{is_missing_table_error, CatalogError, CatalogResult};
use crate::store::CatalogStore;

fn trust_tier_str(t: TrustTier) -> &'static str {
    match t {
        TrustTier::Unverified => "unverified",
        TrustTier::Experimental => "experimental",
        TrustTier::Community => "community",
        TrustTier::Verified => "verified",
        TrustTier::Official => "official",
    }
}

fn parse_trust_tier(s: &str) -> TrustTier {
    match s {
        "experimental" => TrustTier::Experimental,
        "community" => TrustTier::Community,
        "verified" => TrustTier::Verified,
        "official" => TrustTier::Official,
        _ => TrustTier::Unverified,
    }
}

fn scan_status_str(s: SecurityScanStatus) -> &'static str {
    match s {
        SecurityScanStatus::Pending => "pending",
        SecurityScanStatus::Passed => "passed",
        SecurityScanStatus::Warning => "warning",
        SecurityScanStatus::Failed => "failed",
    }
}

fn parse_scan_status(s: &str) -> SecurityScanStatus {
    match s {
        "passed" => SecurityScanStatus::Passed,
        "warning" => SecurityScanStatus::Warning,
        "failed" => SecurityScanStatus::Failed,
        _ => SecurityScanStatus::Pending,
    }
}

/// Little-endian `4 x D` byte embedding blob (spec §3).
pub fn encode_embedding(values: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(values.len() * 4);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn row_to_skill(row: &sqlx::sqlite::SqliteRow) -> CatalogResult<Skill> {
    let categories: Vec<String> = serde_json::from_str(row.try_get::<String, _>("categories")?.as_str())?;
    let technologies: Vec<String> = serde_json::from_str(row.try_get::<String, _>("technologies")?.as_str())?;
    let trigger_phrases: Vec<String> =
        serde_json::from_str(row.try_get::<String, _>("trigger_phrases")?.as_str())?;
    let output_file_patterns: Vec<String> =
        serde_json::from_str(row.try_get::<String, _>("output_file_patterns")?.as_str())?;

    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Skill {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        author_slug: row.try_get("author_slug")?,
        name: row.try_get("name")?,
        display_name: row.try_get("display_name")?,
        description: row.try_get("description")?,
        repo_url: row.try_get("repo_url")?,
        default_branch: row.try_get("default_branch")?,
        categories,
        technologies,
        trust_tier: parse_trust_tier(row.try_get::<String, _>("trust_tier")?.as_str()),
        quality_score: row.try_get("quality_score")?,
        installable: row.try_get::<i64, _>("installable")? != 0,
        current_version: row.try_get("current_version")?,
        character_budget: row.try_get::<i64, _>("character_budget")? as u32,
        security_scan_status: parse_scan_status(row.try_get::<String, _>("security_scan_status")?.as_str()),
        trigger_phrases,
        output_file_patterns,
        stars: row.try_get::<i64, _>("stars")? as u64,
        forks: row.try_get::<i64, _>("forks")? as u64,
        has_tests: row.try_get::<i64, _>("has_tests")? != 0,
        has_examples: row.try_get::<i64, _>("has_examples")? != 0,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| CatalogError::InvalidRow(e.to_string()))?
            .with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| CatalogError::InvalidRow(e.to_string()))?
            .with_timezone(&Utc),
    })
}

impl CatalogStore {
    /// Upsert by URL in a single transaction; the FTS row is written in the
    /// same transaction as the skill row (spec §5 ordering guarantee).
    pub async fn upsert_skill(&self, skill: &Skill) -> CatalogResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO skills (
                id, source, author_slug, name, display_name, description, repo_url,
                default_branch, categories, technologies, trust_tier, quality_score,
                installable, current_version, character_budget, security_scan_status,
                trigger_phrases, output_file_patterns, stars, forks, has_tests, has_examples,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(repo_url) DO UPDATE SET
                name = excluded.name,
                display_name = excluded.display_name,
                description = excluded.description,
                default_branch = excluded.default_branch,
                categories = excluded.categories,
                technologies = excluded.technologies,
                trust_tier = excluded.trust_tier,
                quality_score = excluded.quality_score,
                installable = excluded.installable,
                current_version = excluded.current_version,
                character_budget = excluded.character_budget,
                security_scan_status = excluded.security_scan_status,
                trigger_phrases = excluded.trigger_phrases,
                output_file_patterns = excluded.output_file_patterns,
                stars = excluded.stars,
                forks = excluded.forks,
                has_tests = excluded.has_tests,
                has_examples = excluded.has_examples,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&skill.id)
        .bind(&skill.source)
        .bind(&skill.author_slug)
        .bind(&skill.name)
        .bind(&skill.display_name)
        .bind(&skill.description)
        .bind(&skill.repo_url)
        .bind(&skill.default_branch)
        .bind(serde_json::to_string(&skill.categories)?)
        .bind(serde_json::to_string(&skill.technologies)?)
        .bind(trust_tier_str(skill.trust_tier))
        .bind(skill.quality_score)
        .bind(skill.installable as i64)
        .bind(&skill.current_version)
        .bind(skill.character_budget as i64)
        .bind(scan_status_str(skill.security_scan_status))
        .bind(serde_json::to_string(&skill.trigger_phrases)?)
        .bind(serde_json::to_string(&skill.output_file_patterns)?)
        .bind(skill.stars as i64)
        .bind(skill.forks as i64)
        .bind(skill.has_tests as i64)
        .bind(skill.has_examples as i64)
        .bind(skill.created_at.to_rfc3339())
        .bind(skill.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM skills_fts WHERE id = ?")
            .bind(&skill.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO skills_fts (id, name, description, tags) VALUES (?, ?, ?, ?)")
            .bind(&skill.id)
            .bind(&skill.display_name)
            .bind(&skill.description)
            .bind(skill.categories.iter().chain(skill.technologies.iter()).cloned().collect::<Vec<_>>().join(" "))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn set_skill_embedding(&self, skill_id: &str, embedding: &[f32]) -> CatalogResult<()> {
        sqlx::query("UPDATE skills SET embedding = ? WHERE id = ?")
            .bind(encode_embedding(embedding))
            .bind(skill_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_skill(&self, skill_id: &str) -> CatalogResult<Option<Skill>> {
        match sqlx::query("SELECT * FROM skills WHERE id = ?")
            .bind(skill_id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(row)) => Ok(Some(row_to_skill(&row)?)),
            Ok(None) => Ok(None),
            Err(e) if is_missing_table_error(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_skill_by_url(&self, repo_url: &str) -> CatalogResult<Option<Skill>> {
        match sqlx::query("SELECT * FROM skills WHERE repo_url = ?")
            .bind(repo_url)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(row)) => Ok(Some(row_to_skill(&row)?)),
            Ok(None) => Ok(None),
            Err(e) if is_missing_table_error(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_skill_embedding(&self, skill_id: &str) -> CatalogResult<Option<Vec<f32>>> {
        let row: Option<(Option<Vec<u8>>,)> =
            sqlx::query_as("SELECT embedding FROM skills WHERE id = ?")
                .bind(skill_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(b,)| b).map(|b| decode_embedding(&b)))
    }

    /// Every stored embedding, for the brute-force cosine scan used by C6's
    /// semantic candidate set and C9's similarity query.
    pub async fn all_skill_embeddings(&self) -> CatalogResult<Vec<(String, Vec<f32>)>> {
        let rows: Vec<(String, Option<Vec<u8>>)> =
            match sqlx::query_as("SELECT id, embedding FROM skills WHERE embedding IS NOT NULL")
                .fetch_all(&self.pool)
                .await
            {
                Ok(rows) => rows,
                Err(e) if is_missing_table_error(&e) => Vec::new(),
                Err(e) => return Err(e.into()),
            };
        Ok(rows
            .into_iter()
            .filter_map(|(id, blob)| blob.map(|b| (id, decode_embedding(&b))))
            .collect())
    }

    /// FTS candidate ids with SQLite's `bm25()` rank (more negative = more
    /// relevant, per FTS5 convention).
    pub async fn search_fts(&self, query: &str, limit: u32) -> CatalogResult<Vec<(String, f64)>> {
        let rows = match sqlx::query(
            "SELECT id, bm25(skills_fts) as rank FROM skills_fts WHERE skills_fts MATCH ? ORDER BY rank LIMIT ?",
        )
        .bind(query)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) if is_missing_table_error(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        rows.into_iter()
            .map(|row| Ok((row.try_get::<String, _>("id")?, row.try_get::<f64, _>("rank")?)))
            .collect()
    }

    pub async fn list_skills_by_technology(&self, technology: &str, limit: u32) -> CatalogResult<Vec<Skill>> {
        let pattern = format!("%\"{technology}\"%");
        let rows = match sqlx::query(
            "SELECT * FROM skills WHERE technologies LIKE ? ORDER BY quality_score DESC LIMIT ?",
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
        rows.iter().map(row_to_skill).collect()
    }

    pub async fn list_all_skills(&self, limit: u32, offset: u32) -> CatalogResult<Vec<Skill>> {
        let rows = match sqlx::query("SELECT * FROM skills ORDER BY id ASC LIMIT ? OFFSET ?")
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) if is_missing_table_error(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        rows.iter().map(row_to_skill).collect()
    }

    pub async fn count_skills(&self) -> CatalogResult<u64> {
        match sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM skills")
            .fetch_one(&self.pool)
            .await
        {
            Ok((n,)) => Ok(n as u64),
            Err(e) if is_missing_table_error(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;
    use skillsmith_core::model::{SecurityScanStatus, Skill, TrustTier};

    fn sample_skill() -> Skill {
        let now = Utc::now();
        Skill {
            id: "gh/acme/react-testing".into(),
            source: "gh".into(),
            author_slug: "acme".into(),
            name: "react-testing".into(),
            display_name: "React Testing".into(),
            description: "Write great React tests".into(),
            repo_url: "https://github.com/acme/react-testing".into(),
            default_branch: "main".into(),
            categories: vec!["testing".into()],
            technologies: vec!["react".into(), "jest".into()],
            trust_tier: TrustTier::Community,
            quality_score: 0.7,
            installable: true,
            current_version: "1.0.0".into(),
            character_budget: 2000,
            security_scan_status: SecurityScanStatus::Passed,
            trigger_phrases: vec!["test".into(), "unit test".into()],
            output_file_patterns: vec!["*.test.tsx".into()],
            stars: 1500,
            forks: 20,
            has_tests: true,
            has_examples: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = test_store().await;
        store.upsert_skill(&sample_skill()).await.unwrap();

        let fetched = store.get_skill("gh/acme/react-testing").await.unwrap().unwrap();
        assert_eq!(fetched.trust_tier, TrustTier::Community);
        assert_eq!(fetched.stars, 1500);
        assert_eq!(fetched.technologies, vec!["react", "jest"]);
    }

    #[tokio::test]
    async fn upsert_by_url_twice_updates_rather_than_duplicates() {
        let store = test_store().await;
        let mut skill = sample_skill();
        store.upsert_skill(&skill).await.unwrap();

        skill.stars = 2000;
        skill.quality_score = 0.8;
        store.upsert_skill(&skill).await.unwrap();

        assert_eq!(store.count_skills().await.unwrap(), 1);
        let fetched = store.get_skill(&skill.id).await.unwrap().unwrap();
        assert_eq!(fetched.stars, 2000);
    }

    #[tokio::test]
    async fn fts_finds_skill_by_description_terms() {
        let store = test_store().await;
        store.upsert_skill(&sample_skill()).await.unwrap();

        let hits = store.search_fts("react testing", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "gh/acme/react-testing");
    }

    #[tokio::test]
    async fn empty_catalog_search_returns_no_rows() {
        let store = test_store().await;
        let hits = store.search_fts("react", 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn embedding_round_trips_through_the_blob_column() {
        let store = test_store().await;
        store.upsert_skill(&sample_skill()).await.unwrap();

        let embedding: Vec<f32> = (0..384).map(|i| i as f32 / 384.0).collect();
        store.set_skill_embedding("gh/acme/react-testing", &embedding).await.unwrap();

        let fetched = store.get_skill_embedding("gh/acme/react-testing").await.unwrap().unwrap();
        assert_eq!(fetched.len(), 384);
        assert!((fetched[10] - embedding[10]).abs() < 1e-6);
    }
}
