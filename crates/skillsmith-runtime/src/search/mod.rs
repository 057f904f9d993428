//! Hybrid search service (C6, spec §4.6). Reuses `skillsmith-catalog`'s
//! FTS5 `search_fts` for the text side and a brute-force cosine scan over
//! `all_skill_embeddings` for the semantic side, merged with
//! [`fusion::weighted_merge`] — no separate vector-store abstraction, since
//! the single SQLite-backed catalog already holds both sides (see
//! DESIGN.md).

mod cache;
mod fusion;

pub use cache::SearchCache;

use serde::{Deserialize, Serialize};
use skillsmith_core::model::{Skill, TrustTier};
use skillsmith_core::collaborators::Clock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::embeddings::EmbeddingProvider;
use crate::error::{Result, RuntimeError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub technologies: Vec<String>,
    pub trust_tier: Option<TrustTier>,
    pub min_score: Option<f64>,
    pub source: Option<String>,
    pub updated_after: Option<chrono::DateTime<chrono::Utc>>,
    pub has_tests: Option<bool>,
    pub has_examples: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    Relevance,
    Score,
    Stars,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for SearchSort {
    fn default() -> Self {
        Self {
            field: SortField::Relevance,
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RankingWeights {
    pub w_fts: f64,
    pub w_quality: f64,
    pub w_recency: f64,
    pub recency_tau_days: f64,
    pub alpha: f64,
    pub semantic_top_k: usize,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            w_fts: 0.6,
            w_quality: 0.3,
            w_recency: 0.1,
            recency_tau_days: 30.0,
            alpha: 0.6,
            semantic_top_k: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub skill: Skill,
    pub score: f64,
    pub text_score: f64,
    pub semantic_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub normalized_query: String,
    pub used_semantic: bool,
    pub candidate_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    pub total: usize,
    pub has_more: bool,
    pub query_analysis: QueryAnalysis,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub struct SearchService {
    catalog: Arc<skillsmith_catalog::CatalogStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    clock: Arc<dyn Clock>,
    weights: RankingWeights,
    cache: SearchCache,
}

impl SearchService {
    pub fn new(
        catalog: Arc<skillsmith_catalog::CatalogStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            embedder,
            clock,
            weights: RankingWeights::default(),
            cache: SearchCache::default(),
        }
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all();
    }

    pub async fn search(
        &self,
        query: &str,
        filters: SearchFilters,
        sort: SearchSort,
        limit: u32,
        offset: u32,
    ) -> Result<SearchResponse> {
        let normalized = query.trim().to_string();
        if normalized.is_empty() {
            return Err(RuntimeError::InvalidQuery("query must not be empty".into()));
        }
        if normalized.chars().count() > 500 {
            return Err(RuntimeError::InvalidQuery("query exceeds 500 characters".into()));
        }
        let limit = limit.clamp(1, 50);

        let filters_json = serde_json::to_string(&filters).unwrap_or_default();
        let sort_json = serde_json::to_string(&sort).unwrap_or_default();
        let cache_key = SearchCache::normalize_key(&normalized, &filters_json, &sort_json);
        let now_ms = self.clock.now().timestamp_millis();
        if let Some(cached) = self.cache.get(&cache_key, now_ms) {
            return Ok(cached);
        }

        let mut text_scores: HashMap<String, f64> = HashMap::new();
        for (id, rank) in self.catalog.search_fts(&normalized, 200).await? {
            text_scores.insert(id, fusion::fts_rank_to_score(rank));
        }

        let mut semantic_scores: HashMap<String, f64> = HashMap::new();
        let mut used_semantic = false;
        if let Some(embedder) = &self.embedder {
            if let Ok(query_embedding) = embedder.embed_query(&normalized).await {
                used_semantic = true;
                let mut scored: Vec<(String, f32)> = self
                    .catalog
                    .all_skill_embeddings()
                    .await?
                    .into_iter()
                    .map(|(id, emb)| (id, cosine_similarity(&query_embedding, &emb)))
                    .collect();
                scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                scored.truncate(self.weights.semantic_top_k);
                for (id, sim) in scored {
                    semantic_scores.insert(id, sim as f64);
                }
            }
        }

        let mut candidate_ids: Vec<String> = text_scores.keys().cloned().collect();
        for id in semantic_scores.keys() {
            if !text_scores.contains_key(id) {
                candidate_ids.push(id.clone());
            }
        }
        let candidate_count = candidate_ids.len();

        let mut items = Vec::with_capacity(candidate_ids.len());
        for id in candidate_ids {
            let Some(skill) = self.catalog.get_skill(&id).await? else {
                continue;
            };
            let age_days = (now_ms - skill.updated_at.timestamp_millis()).max(0) as f64
                / (1000.0 * 60.0 * 60.0 * 24.0);
            let text_score = text_scores.get(&id).copied().unwrap_or(0.0) * self.weights.w_fts
                + skill.quality_score * self.weights.w_quality
                + fusion::recency_decay(age_days, self.weights.recency_tau_days) * self.weights.w_recency;
            let semantic_score = semantic_scores.get(&id).copied();
            let score = match semantic_score {
                Some(sem) => fusion::weighted_merge(text_score, sem, self.weights.alpha),
                None => text_score,
            };
            if !passes_filters(&skill, &filters) {
                continue;
            }
            items.push(SearchResultItem {
                skill,
                score,
                text_score,
                semantic_score,
            });
        }

        sort_results(&mut items, sort);

        let total = items.len();
        let has_more = (offset as usize + limit as usize) < total;
        let page: Vec<SearchResultItem> = items
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();

        let response = SearchResponse {
            results: page,
            total,
            has_more,
            query_analysis: QueryAnalysis {
                normalized_query: normalized,
                used_semantic,
                candidate_count,
            },
        };

        self.cache.put(cache_key, response.clone(), now_ms);
        Ok(response)
    }
}

fn passes_filters(skill: &Skill, filters: &SearchFilters) -> bool {
    if !filters.categories.is_empty()
        && !filters.categories.iter().any(|c| skill.categories.contains(c))
    {
        return false;
    }
    if !filters.technologies.is_empty()
        && !filters.technologies.iter().any(|t| skill.technologies.contains(t))
    {
        return false;
    }
    if let Some(tier) = filters.trust_tier {
        if skill.trust_tier < tier {
            return false;
        }
    }
    if let Some(min) = filters.min_score {
        if skill.quality_score < min {
            return false;
        }
    }
    if let Some(source) = &filters.source {
        if &skill.source != source {
            return false;
        }
    }
    if let Some(after) = filters.updated_after {
        if skill.updated_at < after {
            return false;
        }
    }
    if let Some(has_tests) = filters.has_tests {
        if skill.has_tests != has_tests {
            return false;
        }
    }
    if let Some(has_examples) = filters.has_examples {
        if skill.has_examples != has_examples {
            return false;
        }
    }
    true
}

fn sort_results(items: &mut [SearchResultItem], sort: SearchSort) {
    items.sort_by(|a, b| {
        let primary = match sort.field {
            SortField::Relevance => a.score.partial_cmp(&b.score),
            SortField::Score => a.skill.quality_score.partial_cmp(&b.skill.quality_score),
            SortField::Stars => a.skill.stars.partial_cmp(&b.skill.stars),
            SortField::Updated => a.skill.updated_at.partial_cmp(&b.skill.updated_at),
        }
        .unwrap_or(std::cmp::Ordering::Equal);
        let primary = match sort.direction {
            SortDirection::Desc => primary.reverse(),
            SortDirection::Asc => primary,
        };
        primary
            .then_with(|| b.skill.quality_score.partial_cmp(&a.skill.quality_score).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| b.skill.updated_at.cmp(&a.skill.updated_at))
            .then_with(|| a.skill.id.cmp(&b.skill.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillsmith_core::collaborators::test_support::FixedClock;
    use skillsmith_core::model::SecurityScanStatus;
    use skillsmith_catalog::CatalogStore;

    async fn test_service() -> (SearchService, Arc<CatalogStore>) {
        let catalog = Arc::new(CatalogStore::open(":memory:", 384).await.unwrap());
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let service = SearchService::new(Arc::clone(&catalog), None, clock);
        (service, catalog)
    }

    fn sample(id: &str, stars: u64) -> Skill {
        let now = chrono::Utc::now();
        Skill {
            id: id.into(),
            source: "gh".into(),
            author_slug: "acme".into(),
            name: "react-testing".into(),
            display_name: "React Testing".into(),
            description: "Write great React tests with jest".into(),
            repo_url: format!("https://github.com/acme/{id}"),
            default_branch: "main".into(),
            categories: vec!["testing".into()],
            technologies: vec!["react".into()],
            trust_tier: TrustTier::Community,
            quality_score: 0.7,
            installable: true,
            current_version: "1.0.0".into(),
            character_budget: 2000,
            security_scan_status: SecurityScanStatus::Passed,
            trigger_phrases: vec![],
            output_file_patterns: vec![],
            stars,
            forks: 10,
            has_tests: true,
            has_examples: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn empty_catalog_search_returns_no_results() {
        let (service, _catalog) = test_service().await;
        let resp = service
            .search("react", SearchFilters::default(), SearchSort::default(), 10, 0)
            .await
            .unwrap();
        assert_eq!(resp.total, 0);
        assert!(resp.results.is_empty());
        assert!(!resp.has_more);
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let (service, _catalog) = test_service().await;
        let err = service
            .search("   ", SearchFilters::default(), SearchSort::default(), 10, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn ingested_skill_is_found_with_expected_trust_tier() {
        let (service, catalog) = test_service().await;
        catalog.upsert_skill(&sample("gh/acme/react-testing", 1500)).await.unwrap();

        let resp = service
            .search("react testing", SearchFilters::default(), SearchSort::default(), 10, 0)
            .await
            .unwrap();
        assert_eq!(resp.total, 1);
        assert_eq!(resp.results[0].skill.trust_tier, TrustTier::Community);
        assert!(resp.results[0].skill.quality_score > 0.0);
    }

    #[tokio::test]
    async fn cache_hit_returns_same_result_without_recomputation() {
        let (service, catalog) = test_service().await;
        catalog.upsert_skill(&sample("gh/acme/react-testing", 1500)).await.unwrap();

        let first = service
            .search("react", SearchFilters::default(), SearchSort::default(), 10, 0)
            .await
            .unwrap();
        let second = service
            .search("react", SearchFilters::default(), SearchSort::default(), 10, 0)
            .await
            .unwrap();
        assert_eq!(first.total, second.total);
        assert_eq!(first.results[0].skill.id, second.results[0].skill.id);
    }

    #[tokio::test]
    async fn trust_tier_floor_filters_out_lower_tiers() {
        let (service, catalog) = test_service().await;
        catalog.upsert_skill(&sample("gh/acme/react-testing", 1500)).await.unwrap();

        let filters = SearchFilters {
            trust_tier: Some(TrustTier::Verified),
            ..Default::default()
        };
        let resp = service
            .search("react", filters, SearchSort::default(), 10, 0)
            .await
            .unwrap();
        assert_eq!(resp.total, 0);
    }

    #[tokio::test]
    async fn has_tests_filter_excludes_skills_without_tests() {
        let (service, catalog) = test_service().await;
        let mut untested = sample("gh/acme/react-testing", 1500);
        untested.has_tests = false;
        untested.has_examples = false;
        catalog.upsert_skill(&untested).await.unwrap();

        let filters = SearchFilters { has_tests: Some(true), ..Default::default() };
        let resp = service
            .search("react", filters, SearchSort::default(), 10, 0)
            .await
            .unwrap();
        assert_eq!(resp.total, 0);

        let filters = SearchFilters { has_tests: Some(false), has_examples: Some(false), ..Default::default() };
        let resp = service
            .search("react", filters, SearchSort::default(), 10, 0)
            .await
            .unwrap();
        assert_eq!(resp.total, 1);
    }
}
