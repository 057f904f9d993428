//! Learning layer (C9, spec §4.9): signal collector, trajectory converter,
//! and the EWC++ pattern store that is the heart of this component. The
//! durable rows (patterns, the Fisher blob, consolidation history) live in
//! `skillsmith_catalog::patterns`; this module owns the math — gradients,
//! importance, consolidation policy, weighted-cosine retrieval — the way
//! the catalog's own doc comment describes the split.
//!
//! Similarity and verdict queries follow an embed-then-score shape; the
//! EWC++ formulas themselves are implemented directly from the named
//! constants in spec §4.9.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use skillsmith_catalog::CatalogStore;
use skillsmith_core::model::{
    ContextV1, FisherInfo, Pattern, RecommendationSource, SignalType, SkillFeatures, Trajectory, Verdict,
};
use uuid::Uuid;

use crate::embeddings::EmbeddingProvider;
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct LearningConfig {
    pub fisher_decay: f64,
    pub lambda: f64,
    pub consolidation_threshold: f64,
    pub max_patterns: u64,
    pub importance_threshold: f64,
    pub recency_tau_days: f64,
    pub verdict_similarity_threshold: f64,
    pub verdict_top_limit: usize,
    pub min_patterns_for_verdict: u64,
    pub scan_limit: u32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            fisher_decay: 0.95,
            lambda: 5.0,
            consolidation_threshold: 0.1,
            max_patterns: 10_000,
            importance_threshold: 0.01,
            recency_tau_days: 30.0,
            verdict_similarity_threshold: 0.6,
            verdict_top_limit: 50,
            min_patterns_for_verdict: 3,
            scan_limit: 1_000,
        }
    }
}

fn outcome_action(signal_type: SignalType) -> &'static str {
    match signal_type {
        SignalType::Accept => "skill:accept",
        SignalType::Dismiss => "skill:dismiss",
        SignalType::Usage => "skill:usage",
        SignalType::Abandonment => "skill:abandonment",
        SignalType::Uninstall => "skill:uninstall",
    }
}

fn build_trajectory(signal_type: SignalType, skill_id: &str, context: &ContextV1, now: DateTime<Utc>) -> Result<Trajectory> {
    let reward = signal_type.reward();
    let mut metadata = HashMap::new();
    metadata.insert("skill_id".to_string(), skill_id.to_string());
    metadata.insert("timestamp".to_string(), now.to_rfc3339());
    Ok(Trajectory {
        id: Uuid::new_v4().to_string(),
        action: outcome_action(signal_type).to_string(),
        observation: serde_json::to_string(context)?,
        reward,
        metadata,
        verdict: Verdict { success: reward > 0.0, confidence: reward.abs().min(1.0) },
    })
}

/// `weighted_cosine(a, b, importance) = Σ (1+importance[i])·a[i]·b[i] /
/// sqrt(Σ(1+importance[i])·a[i]² · Σ(1+importance[i])·b[i]²)`. Zero norms
/// yield `0.0`, never `NaN` (spec §4.9).
fn weighted_cosine(a: &[f32], b: &[f32], importance: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for i in 0..a.len().min(b.len()).min(importance.len()) {
        let w = 1.0 + importance[i] as f64;
        let x = a[i] as f64;
        let y = b[i] as f64;
        dot += w * x * y;
        norm_a += w * x * x;
        norm_b += w * y * y;
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

fn apply_gradient(fisher: &mut FisherInfo, gradient: &[f32]) {
    fisher.update_count += 1;
    for i in 0..fisher.dimension.min(gradient.len()) {
        fisher.running_sum[i] += gradient[i] * gradient[i];
        fisher.importance[i] = fisher.running_sum[i] / fisher.update_count as f32;
    }
}

fn decay_fisher(fisher: &mut FisherInfo, decay: f64) {
    for i in 0..fisher.dimension {
        fisher.running_sum[i] *= decay as f32;
        fisher.importance[i] = if fisher.update_count > 0 {
            fisher.running_sum[i] / fisher.update_count as f32
        } else {
            0.0
        };
    }
}

/// Scalar retention importance for one pattern (spec §4.9): reward
/// magnitude, a bonus for positive outcomes, recency and access-frequency
/// factors, and a Fisher-derived scale term.
fn retention_importance(pattern: &Pattern, fisher: &FisherInfo, now: DateTime<Utc>, config: &LearningConfig) -> f64 {
    let age_days = (now - pattern.last_accessed_at).num_seconds().max(0) as f64 / 86_400.0;
    let recency_factor = (-age_days / config.recency_tau_days).exp();
    let access_factor = 1.0 + (1.0 + pattern.access_count as f64).ln();
    let reward_bonus = if pattern.reward > 0.0 { 1.5 } else { 1.0 };
    let base = pattern.reward.abs() * reward_bonus * recency_factor * access_factor;

    let n = pattern.embedding.len().min(fisher.importance.len());
    let mean_weighted = if n == 0 {
        0.0
    } else {
        pattern
            .embedding
            .iter()
            .zip(fisher.importance.iter())
            .take(n)
            .map(|(e, imp)| (*imp as f64) * (*e as f64).abs())
            .sum::<f64>()
            / n as f64
    };
    let lambda_scale = 1.0 + config.lambda * mean_weighted / 10.0;
    base * lambda_scale
}

#[derive(Debug, Clone)]
pub struct ConsolidationOutcome {
    pub processed: u64,
    pub preserved: u64,
    pub pruned: u64,
    pub preservation_rate: f64,
}

#[derive(Debug, Clone)]
pub struct SkillVerdict {
    pub skill_id: String,
    pub confidence: f64,
    pub pattern_count: u64,
    pub has_enough_data: bool,
    pub breakdown: HashMap<String, f64>,
}

pub struct LearningLayer {
    catalog: Arc<CatalogStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: LearningConfig,
    patterns_since_consolidation: AtomicU64,
}

impl LearningLayer {
    pub fn new(catalog: Arc<CatalogStore>, embedder: Arc<dyn EmbeddingProvider>, config: LearningConfig) -> Self {
        Self { catalog, embedder, config, patterns_since_consolidation: AtomicU64::new(0) }
    }

    /// Signal collector + trajectory converter + pattern write, in one
    /// durable operation (spec §4.9: "each [signal] is durable before
    /// returning").
    #[allow(clippy::too_many_arguments)]
    pub async fn record_signal(
        &self,
        signal_type: SignalType,
        skill_id: &str,
        context: ContextV1,
        skill_features: SkillFeatures,
        recommendation_source: RecommendationSource,
        original_score: f64,
        now: DateTime<Utc>,
    ) -> Result<Trajectory> {
        let trajectory = build_trajectory(signal_type, skill_id, &context, now)?;

        let embedding = self
            .embedder
            .embed_query(&context.to_embedding_text())
            .await
            .map_err(|e| crate::error::RuntimeError::Internal(e.to_string()))?;

        let mut fisher = self.catalog.get_fisher_info().await?;
        let existing = self.catalog.list_patterns(self.config.scan_limit).await?;
        if let Some(nearest) = existing
            .iter()
            .map(|p| (p, weighted_cosine(&embedding, &p.embedding, &fisher.importance)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(p, _)| p)
        {
            let gradient: Vec<f32> = embedding
                .iter()
                .zip(nearest.embedding.iter())
                .map(|(a, b)| a - b)
                .collect();
            apply_gradient(&mut fisher, &gradient);
            self.catalog.save_fisher_info(&fisher).await?;
        }

        let pattern = Pattern {
            id: Uuid::new_v4().to_string(),
            embedding,
            skill_features,
            outcome: signal_type,
            reward: trajectory.reward,
            original_score,
            recommendation_source,
            importance: trajectory.reward.abs(),
            access_count: 0,
            created_at: now,
            last_accessed_at: now,
        };
        self.catalog.insert_pattern(&pattern).await?;

        let mut metadata = HashMap::new();
        metadata.insert("skill_id".to_string(), skill_id.to_string());
        metadata.insert("signal".to_string(), format!("{signal_type:?}"));
        self.catalog.append_audit_entry("signal.recorded", "system", "ok", &metadata).await?;

        self.patterns_since_consolidation.fetch_add(1, Ordering::SeqCst);
        if self.should_consolidate().await? {
            self.consolidate(now).await?;
        }

        Ok(trajectory)
    }

    async fn should_consolidate(&self) -> Result<bool> {
        let total = self.catalog.count_patterns().await?;
        if total == 0 {
            return Ok(false);
        }
        if total > self.config.max_patterns {
            return Ok(true);
        }
        let since = self.patterns_since_consolidation.load(Ordering::SeqCst);
        Ok(since as f64 / total as f64 >= self.config.consolidation_threshold)
    }

    /// Sorts by retention importance ascending and prunes from the bottom
    /// until every survivor clears `importance_threshold`, or the count
    /// drops to `max_patterns * 0.9` — whichever happens first (spec
    /// §4.9). Also applies periodic Fisher decay.
    pub async fn consolidate(&self, now: DateTime<Utc>) -> Result<ConsolidationOutcome> {
        let mut fisher = self.catalog.get_fisher_info().await?;
        decay_fisher(&mut fisher, self.config.fisher_decay);
        self.catalog.save_fisher_info(&fisher).await?;

        let mut patterns = self.catalog.list_patterns(u32::MAX).await?;
        let processed = patterns.len() as u64;
        let floor = ((self.config.max_patterns as f64) * 0.9) as usize;

        let mut scored: Vec<(String, f64)> = patterns
            .drain(..)
            .map(|p| {
                let importance = retention_importance(&p, &fisher, now, &self.config);
                (p.id, importance)
            })
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut pruned_ids = Vec::new();
        let mut idx = 0;
        while scored.len() - pruned_ids.len() > floor
            && idx < scored.len()
            && scored[idx].1 < self.config.importance_threshold
        {
            pruned_ids.push(scored[idx].0.clone());
            idx += 1;
        }

        let pruned = self.catalog.delete_patterns(&pruned_ids).await?;
        let preserved = processed - pruned;
        let preservation_rate = if processed == 0 { 1.0 } else { preserved as f64 / processed as f64 };

        self.catalog.record_consolidation(processed, preserved, pruned, preservation_rate, now).await?;
        self.patterns_since_consolidation.store(0, Ordering::SeqCst);

        Ok(ConsolidationOutcome { processed, preserved, pruned, preservation_rate })
    }

    /// Top-N patterns most similar to `context` by weighted cosine.
    pub async fn similar_patterns(&self, context: &ContextV1, top_n: usize) -> Result<Vec<(Pattern, f64)>> {
        let embedding = self
            .embedder
            .embed_query(&context.to_embedding_text())
            .await
            .map_err(|e| crate::error::RuntimeError::Internal(e.to_string()))?;
        let fisher = self.catalog.get_fisher_info().await?;
        let mut scored: Vec<(Pattern, f64)> = self
            .catalog
            .list_patterns(self.config.scan_limit)
            .await?
            .into_iter()
            .map(|p| {
                let sim = weighted_cosine(&embedding, &p.embedding, &fisher.importance);
                (p, sim)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_n);
        Ok(scored)
    }

    /// Aggregated confidence for one skill across its related patterns
    /// (spec §4.9 verdict query).
    pub async fn verdict_for_skill(&self, skill_id: &str) -> Result<SkillVerdict> {
        let patterns = self.catalog.patterns_for_skill(skill_id, self.config.verdict_top_limit as u32).await?;
        let fisher = self.catalog.get_fisher_info().await?;
        Ok(aggregate_verdict(
            skill_id,
            &patterns,
            &fisher.importance,
            self.config.verdict_similarity_threshold,
            self.config.min_patterns_for_verdict,
        ))
    }

    /// Scans up to `scan_limit` patterns (capped at 1000 per spec),
    /// groups by skill id, and returns the top `n` by confidence among
    /// skills with enough data.
    pub async fn top_by_confidence(&self, n: usize) -> Result<Vec<SkillVerdict>> {
        let patterns = self.catalog.list_patterns(self.config.scan_limit.min(1_000)).await?;
        let fisher = self.catalog.get_fisher_info().await?;
        let mut by_skill: HashMap<String, Vec<Pattern>> = HashMap::new();
        for pattern in patterns {
            by_skill.entry(pattern.skill_features.skill_id.clone()).or_default().push(pattern);
        }
        let mut verdicts: Vec<SkillVerdict> = by_skill
            .iter()
            .map(|(skill_id, patterns)| {
                aggregate_verdict(
                    skill_id,
                    patterns,
                    &fisher.importance,
                    self.config.verdict_similarity_threshold,
                    self.config.min_patterns_for_verdict,
                )
            })
            .filter(|v| v.has_enough_data)
            .collect();
        verdicts.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        verdicts.truncate(n);
        Ok(verdicts)
    }
}

/// Mean embedding across `patterns`, used as the skill's representative
/// vector for the "related patterns" similarity gate below.
fn centroid(patterns: &[Pattern]) -> Vec<f32> {
    let dim = patterns.iter().map(|p| p.embedding.len()).max().unwrap_or(0);
    let mut sum = vec![0.0f32; dim];
    for pattern in patterns {
        for (i, v) in pattern.embedding.iter().enumerate() {
            sum[i] += v;
        }
    }
    let n = patterns.len().max(1) as f32;
    for v in &mut sum {
        *v /= n;
    }
    sum
}

/// `confidence = (Σ positive_weight − Σ negative_weight) / total_weight`
/// where `weight = similarity × verdict.confidence × |reward|` (spec
/// §4.9). "Related" is judged by weighted-cosine similarity of each
/// pattern's embedding against the centroid of the skill's own patterns,
/// not merely by the skill-id match that selected the candidate set -
/// that's what the threshold actually gates.
fn aggregate_verdict(
    skill_id: &str,
    patterns: &[Pattern],
    importance: &[f32],
    similarity_threshold: f64,
    min_patterns: u64,
) -> SkillVerdict {
    let reference = centroid(patterns);
    let mut positive = 0.0;
    let mut negative = 0.0;
    let mut total = 0.0;
    let mut breakdown: HashMap<String, f64> = HashMap::new();
    let mut counted = 0u64;

    for pattern in patterns {
        let similarity = weighted_cosine(&pattern.embedding, &reference, importance);
        if similarity < similarity_threshold {
            continue;
        }
        let confidence = pattern.reward.abs().min(1.0);
        let weight = similarity * confidence * pattern.reward.abs();
        total += weight;
        if pattern.reward > 0.0 {
            positive += weight;
        } else if pattern.reward < 0.0 {
            negative += weight;
        }
        counted += 1;
        *breakdown.entry(outcome_action(pattern.outcome).to_string()).or_insert(0.0) += weight;
    }

    let confidence = if total == 0.0 { 0.0 } else { (positive - negative) / total };
    SkillVerdict {
        skill_id: skill_id.to_string(),
        confidence: confidence.clamp(-1.0, 1.0),
        pattern_count: counted,
        has_enough_data: counted >= min_patterns,
        breakdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::test_support::HashEmbedProvider;
    use skillsmith_core::model::{TrustTier, DEFAULT_EMBEDDING_DIM};

    fn layer(catalog: Arc<CatalogStore>) -> LearningLayer {
        LearningLayer::new(catalog, Arc::new(HashEmbedProvider { dims: DEFAULT_EMBEDDING_DIM }), LearningConfig::default())
    }

    fn context(query: &str) -> ContextV1 {
        ContextV1 { query: Some(query.to_string()), detected_technologies: vec!["rust".to_string()], recommendation_source: None, extra: HashMap::new() }
    }

    fn features(skill_id: &str) -> SkillFeatures {
        SkillFeatures { skill_id: skill_id.to_string(), trust_tier: TrustTier::Community, categories: vec![], technologies: vec![] }
    }

    #[tokio::test]
    async fn recording_a_signal_yields_the_spec_reward_and_is_durable() {
        let catalog = Arc::new(CatalogStore::open(":memory:", DEFAULT_EMBEDDING_DIM).await.unwrap());
        let layer = layer(Arc::clone(&catalog));
        let trajectory = layer
            .record_signal(SignalType::Accept, "gh/a/b", context("deploy helper"), features("gh/a/b"), RecommendationSource::Search, 0.5, Utc::now())
            .await
            .unwrap();
        assert_eq!(trajectory.reward, 1.0);
        assert!(trajectory.verdict.success);
        assert_eq!(catalog.count_patterns().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn verdict_needs_minimum_pattern_count() {
        let catalog = Arc::new(CatalogStore::open(":memory:", DEFAULT_EMBEDDING_DIM).await.unwrap());
        let layer = layer(Arc::clone(&catalog));
        layer
            .record_signal(SignalType::Accept, "gh/a/b", context("a"), features("gh/a/b"), RecommendationSource::Search, 0.5, Utc::now())
            .await
            .unwrap();

        let verdict = layer.verdict_for_skill("gh/a/b").await.unwrap();
        assert!(!verdict.has_enough_data, "one pattern is below min_patterns_for_verdict=3");
    }

    #[tokio::test]
    async fn repeated_positive_signals_build_a_positive_verdict() {
        let catalog = Arc::new(CatalogStore::open(":memory:", DEFAULT_EMBEDDING_DIM).await.unwrap());
        let layer = layer(Arc::clone(&catalog));
        for i in 0..4 {
            layer
                .record_signal(SignalType::Accept, "gh/a/b", context(&format!("query {i}")), features("gh/a/b"), RecommendationSource::Search, 0.5, Utc::now())
                .await
                .unwrap();
        }
        let verdict = layer.verdict_for_skill("gh/a/b").await.unwrap();
        assert!(verdict.has_enough_data);
        assert!(verdict.confidence > 0.0);
    }

    #[tokio::test]
    async fn negative_signals_build_a_negative_verdict() {
        let catalog = Arc::new(CatalogStore::open(":memory:", DEFAULT_EMBEDDING_DIM).await.unwrap());
        let layer = layer(Arc::clone(&catalog));
        for i in 0..4 {
            layer
                .record_signal(SignalType::Uninstall, "gh/a/b", context(&format!("query {i}")), features("gh/a/b"), RecommendationSource::Search, 0.5, Utc::now())
                .await
                .unwrap();
        }
        let verdict = layer.verdict_for_skill("gh/a/b").await.unwrap();
        assert!(verdict.confidence < 0.0);
    }

    #[test]
    fn weighted_cosine_of_zero_vectors_is_zero_not_nan() {
        let zeros = vec![0.0f32; 4];
        let importance = vec![0.0f32; 4];
        let result = weighted_cosine(&zeros, &zeros, &importance);
        assert_eq!(result, 0.0);
        assert!(!result.is_nan());
    }

    #[test]
    fn weighted_cosine_of_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        let importance = vec![0.0f32; 3];
        let result = weighted_cosine(&v, &v, &importance);
        assert!((result - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn consolidation_prunes_low_importance_patterns_and_preserves_the_rest() {
        let catalog = Arc::new(CatalogStore::open(":memory:", DEFAULT_EMBEDDING_DIM).await.unwrap());
        let mut config = LearningConfig::default();
        config.max_patterns = 2;
        config.importance_threshold = 10.0; // force pruning down to the floor
        let layer = LearningLayer::new(Arc::clone(&catalog), Arc::new(HashEmbedProvider { dims: DEFAULT_EMBEDDING_DIM }), config);

        for i in 0..5 {
            layer
                .record_signal(SignalType::Dismiss, "gh/a/b", context(&format!("q{i}")), features("gh/a/b"), RecommendationSource::Search, 0.1, Utc::now())
                .await
                .unwrap();
        }

        let outcome = layer.consolidate(Utc::now()).await.unwrap();
        assert!(outcome.pruned > 0);
        assert!(catalog.count_patterns().await.unwrap() <= 5);
    }
}
