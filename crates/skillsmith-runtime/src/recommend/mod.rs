//! Recommendation engine (C7, spec §4.7): stack detection, candidate
//! retrieval through C6, ranking with optional C9 personalization, gap
//! analysis, and installed/trust-tier filtering.
//!
//! Stack detection walks the target directory with `WalkDir`, checking
//! manifest files first (`Cargo.toml`, `package.json`, ...) and falling
//! back to file-extension tallies when no manifest is present.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use skillsmith_catalog::CatalogStore;
use skillsmith_core::collaborators::Random;
use skillsmith_core::model::{Skill, TechnologyKind, TrustTier};
use walkdir::WalkDir;

use crate::error::Result;
use crate::learning::LearningLayer;
use crate::search::{SearchFilters, SearchService};

const DEFAULT_DEPTH: usize = 3;
const MAX_DEPTH: usize = 10;
/// Manifest filename -> (technology slug, display name, kind).
const MANIFEST_RULES: &[(&str, &str, &str, TechnologyKind)] = &[
    ("package.json", "node", "Node.js", TechnologyKind::Platform),
    ("Cargo.toml", "rust", "Rust", TechnologyKind::Language),
    ("go.mod", "go", "Go", TechnologyKind::Language),
    ("pyproject.toml", "python", "Python", TechnologyKind::Language),
    ("requirements.txt", "python", "Python", TechnologyKind::Language),
    ("pom.xml", "java", "Java", TechnologyKind::Language),
    ("build.gradle", "java", "Java", TechnologyKind::Language),
];
/// Extension -> (technology slug, display name, kind), used as a
/// lower-confidence fallback when no manifest is present.
const EXTENSION_RULES: &[(&str, &str, &str, TechnologyKind)] = &[
    ("rs", "rust", "Rust", TechnologyKind::Language),
    ("go", "go", "Go", TechnologyKind::Language),
    ("py", "python", "Python", TechnologyKind::Language),
    ("ts", "typescript", "TypeScript", TechnologyKind::Language),
    ("tsx", "typescript", "TypeScript", TechnologyKind::Language),
    ("java", "java", "Java", TechnologyKind::Language),
];
const MANIFEST_CONFIDENCE: f64 = 0.9;
const EXTENSION_BASE_CONFIDENCE: f64 = 0.4;
const MANIFEST_QUALITY_WEIGHT: f64 = 0.3;
const AUTHOR_REPUTATION_WEIGHT: f64 = 0.1;
const LEARNED_BIAS_WEIGHT: f64 = 0.3;
const EXPLORATORY_JITTER: f64 = 0.1;
const EXPLORATORY_POPULARITY_PENALTY: f64 = 0.05;
const POPULAR_STAR_THRESHOLD: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct DetectedTechnology {
    pub technology_id: String,
    pub name: String,
    pub kind: TechnologyKind,
    pub version: Option<String>,
    pub confidence: f64,
    pub source: String,
}

/// Walks up to `depth` directories (default 3, capped at 10), preferring a
/// dependency manifest over raw file-extension frequency (spec §4.7 step
/// 1).
pub fn detect_stack(root: &Path, depth: usize) -> Vec<DetectedTechnology> {
    let depth = depth.clamp(1, MAX_DEPTH);
    let mut manifest_hits: HashMap<&str, (String, TechnologyKind, String)> = HashMap::new();
    let mut extension_counts: HashMap<&str, usize> = HashMap::new();

    for entry in WalkDir::new(root).max_depth(depth).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_string();
        if let Some((_, slug, name, kind)) = MANIFEST_RULES.iter().find(|(f, ..)| *f == file_name) {
            manifest_hits.entry(slug).or_insert_with(|| (name.to_string(), *kind, file_name.clone()));
        }
        if let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) {
            *extension_counts.entry(ext).or_insert(0) += 1;
        }
    }

    let mut found = Vec::new();
    for (slug, (name, kind, source)) in &manifest_hits {
        found.push(DetectedTechnology {
            technology_id: slug.to_string(),
            name: name.clone(),
            kind: *kind,
            version: None,
            confidence: MANIFEST_CONFIDENCE,
            source: source.clone(),
        });
    }

    let total_files: usize = extension_counts.values().sum();
    if total_files > 0 {
        for (ext, slug, name, kind) in EXTENSION_RULES {
            if manifest_hits.contains_key(slug) {
                continue;
            }
            if let Some(count) = extension_counts.get(ext) {
                let frequency = *count as f64 / total_files as f64;
                found.push(DetectedTechnology {
                    technology_id: slug.to_string(),
                    name: name.to_string(),
                    kind: *kind,
                    version: None,
                    confidence: (EXTENSION_BASE_CONFIDENCE * (1.0 + frequency)).min(0.8),
                    source: format!("*.{ext} frequency"),
                });
            }
        }
    }

    found
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendMode {
    Conservative,
    Exploratory,
}

#[derive(Debug, Clone)]
pub struct RecommendOptions {
    pub max_results: u32,
    pub mode: RecommendMode,
    pub exclude_installed: bool,
    pub trust_tier_floor: TrustTier,
}

impl Default for RecommendOptions {
    fn default() -> Self {
        Self { max_results: 10, mode: RecommendMode::Conservative, exclude_installed: true, trust_tier_floor: TrustTier::Unverified }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Essential,
    Recommended,
    Optional,
}

#[derive(Debug, Clone)]
pub struct Recommendation {
    pub skill: Skill,
    pub score: f64,
    pub reasons: Vec<String>,
    pub impact_areas: Vec<String>,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapSeverity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone)]
pub struct Gap {
    pub technology: String,
    pub severity: GapSeverity,
    pub suggested_skill_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RecommendationResponse {
    pub recommendations: Vec<Recommendation>,
    pub gaps: Vec<Gap>,
    pub coverage: f64,
}

pub struct RecommendationEngine {
    catalog: Arc<CatalogStore>,
    search: Arc<SearchService>,
    learning: Option<Arc<LearningLayer>>,
    random: Arc<dyn Random>,
}

impl RecommendationEngine {
    pub fn new(catalog: Arc<CatalogStore>, search: Arc<SearchService>, learning: Option<Arc<LearningLayer>>, random: Arc<dyn Random>) -> Self {
        Self { catalog, search, learning, random }
    }

    pub async fn recommend_for_path(&self, root: &Path, depth: usize, options: RecommendOptions) -> Result<RecommendationResponse> {
        let stack = detect_stack(root, depth);
        self.recommend_for_stack(stack, options).await
    }

    pub async fn recommend_for_stack(&self, stack: Vec<DetectedTechnology>, options: RecommendOptions) -> Result<RecommendationResponse> {
        let installed = self.catalog.list_installed_skills().await?;
        let installed_ids: HashSet<String> = installed.iter().map(|i| i.skill_id.clone()).collect();

        let mut candidates: HashMap<String, (Skill, Vec<f64>)> = HashMap::new();
        for tech in &stack {
            let response = self
                .search
                .search(&tech.name, SearchFilters { technologies: vec![tech.technology_id.clone()], ..Default::default() }, Default::default(), 25, 0)
                .await?;
            for item in response.results {
                candidates
                    .entry(item.skill.id.clone())
                    .and_modify(|(_, confidences)| confidences.push(tech.confidence))
                    .or_insert_with(|| (item.skill.clone(), vec![tech.confidence]));
            }
        }

        let mut recommendations = Vec::new();
        for (skill_id, (skill, confidences)) in candidates {
            if skill.trust_tier < options.trust_tier_floor {
                continue;
            }
            if options.exclude_installed && installed_ids.contains(&skill_id) {
                continue;
            }

            let avg_confidence = confidences.iter().sum::<f64>() / confidences.len() as f64;
            let author_reputation = self.catalog.get_author(&skill.author_slug).await?.map(|a| a.reputation).unwrap_or(0.0);
            let mut score = avg_confidence + skill.quality_score * MANIFEST_QUALITY_WEIGHT + author_reputation * AUTHOR_REPUTATION_WEIGHT;

            let mut reasons = vec![format!("matches {} detected technolog{}", confidences.len(), if confidences.len() == 1 { "y" } else { "ies" })];

            if let Some(learning) = &self.learning {
                let verdict = learning.verdict_for_skill(&skill_id).await?;
                if verdict.has_enough_data {
                    let learned_bias = verdict.confidence.clamp(-1.0, 1.0) * LEARNED_BIAS_WEIGHT;
                    score += learned_bias;
                    reasons.push(format!("prior feedback confidence {:.2}", verdict.confidence));
                }
            }

            if options.mode == RecommendMode::Exploratory {
                let jitter = (self.random.unit_f64() - 0.5) * 2.0 * EXPLORATORY_JITTER;
                score += jitter;
                if skill.stars >= POPULAR_STAR_THRESHOLD {
                    score -= EXPLORATORY_POPULARITY_PENALTY;
                }
            }

            let priority = if avg_confidence >= 0.85 {
                Priority::Essential
            } else if avg_confidence >= 0.5 {
                Priority::Recommended
            } else {
                Priority::Optional
            };

            recommendations.push(Recommendation { skill, score, reasons, impact_areas: vec![], priority });
        }

        recommendations.sort_by(|a, b| b.score.total_cmp(&a.score));
        recommendations.truncate(options.max_results.clamp(1, 25) as usize);

        let gaps = self.gap_analysis(&stack, &installed_ids).await?;
        let coverage = if stack.is_empty() {
            1.0
        } else {
            (stack.len() - gaps.len()) as f64 / stack.len() as f64
        };

        Ok(RecommendationResponse { recommendations, gaps, coverage })
    }

    /// Compares detected technologies against installed skills' technology
    /// coverage; each uncovered tech becomes a gap with suggested skills
    /// (spec §4.7 step 4).
    async fn gap_analysis(&self, stack: &[DetectedTechnology], installed_ids: &HashSet<String>) -> Result<Vec<Gap>> {
        let mut covered: HashSet<String> = HashSet::new();
        for skill_id in installed_ids {
            if let Some(skill) = self.catalog.get_skill(skill_id).await? {
                covered.extend(skill.technologies);
            }
        }

        let mut gaps = Vec::new();
        for tech in stack {
            if covered.contains(&tech.technology_id) {
                continue;
            }
            let suggestions = self.catalog.list_skills_by_technology(&tech.technology_id, 3).await?;
            let severity = if tech.confidence >= MANIFEST_CONFIDENCE {
                GapSeverity::High
            } else if tech.confidence >= EXTENSION_BASE_CONFIDENCE {
                GapSeverity::Medium
            } else {
                GapSeverity::Low
            };
            gaps.push(Gap {
                technology: tech.technology_id.clone(),
                severity,
                suggested_skill_ids: suggestions.into_iter().map(|s| s.id).collect(),
            });
        }
        Ok(gaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillsmith_core::collaborators::test_support::FixedClock;
    use skillsmith_core::model::{SecurityScanStatus, DEFAULT_EMBEDDING_DIM};
    use tempfile::TempDir;

    fn sample_skill(id: &str, technologies: &[&str], stars: u64) -> Skill {
        let now = chrono::Utc::now();
        Skill {
            id: id.to_string(),
            source: "github".to_string(),
            author_slug: "acme".to_string(),
            name: id.to_string(),
            display_name: id.to_string(),
            description: "a rust testing helper skill for automating common workflows".to_string(),
            repo_url: format!("https://github.com/acme/{id}"),
            default_branch: "main".to_string(),
            categories: vec!["testing".to_string()],
            technologies: technologies.iter().map(|t| t.to_string()).collect(),
            trust_tier: TrustTier::Community,
            quality_score: 0.8,
            installable: true,
            current_version: "1.0.0".to_string(),
            character_budget: 400,
            security_scan_status: SecurityScanStatus::Passed,
            trigger_phrases: vec![],
            output_file_patterns: vec![],
            stars,
            forks: 0,
            has_tests: false,
            has_examples: false,
            created_at: now,
            updated_at: now,
        }
    }

    async fn engine(catalog: Arc<CatalogStore>) -> RecommendationEngine {
        let clock: Arc<dyn skillsmith_core::collaborators::Clock> = Arc::new(FixedClock::new(chrono::Utc::now()));
        let search = Arc::new(SearchService::new(Arc::clone(&catalog), None, clock));
        let random: Arc<dyn Random> = Arc::new(skillsmith_core::collaborators::test_support::ScriptedRandom::new(0.5));
        RecommendationEngine::new(catalog, search, None, random)
    }

    #[test]
    fn detect_stack_finds_a_rust_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"x\"").unwrap();
        let stack = detect_stack(dir.path(), DEFAULT_DEPTH);
        assert!(stack.iter().any(|t| t.technology_id == "rust" && t.confidence >= MANIFEST_CONFIDENCE));
    }

    #[test]
    fn extension_fallback_has_lower_confidence_than_a_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.go"), "package main").unwrap();
        let stack = detect_stack(dir.path(), DEFAULT_DEPTH);
        let go = stack.iter().find(|t| t.technology_id == "go").unwrap();
        assert!(go.confidence < MANIFEST_CONFIDENCE);
    }

    #[tokio::test]
    async fn candidates_are_ranked_and_deduplicated_across_technologies() {
        let catalog = Arc::new(CatalogStore::open(":memory:", DEFAULT_EMBEDDING_DIM).await.unwrap());
        catalog.upsert_skill(&sample_skill("gh/acme/rust-tester", &["rust"], 10)).await.unwrap();
        let engine = engine(Arc::clone(&catalog)).await;

        let stack = vec![DetectedTechnology { technology_id: "rust".into(), name: "rust".into(), kind: TechnologyKind::Language, version: None, confidence: 0.9, source: "Cargo.toml".into() }];
        let response = engine.recommend_for_stack(stack, RecommendOptions::default()).await.unwrap();
        assert_eq!(response.recommendations.len(), 1);
    }

    #[tokio::test]
    async fn installed_skills_are_excluded_when_requested() {
        let catalog = Arc::new(CatalogStore::open(":memory:", DEFAULT_EMBEDDING_DIM).await.unwrap());
        let skill = sample_skill("gh/acme/rust-tester", &["rust"], 10);
        catalog.upsert_skill(&skill).await.unwrap();
        catalog
            .install_skill(&skillsmith_core::model::InstalledSkill {
                skill_id: skill.id.clone(),
                installed_version: "1.0.0".to_string(),
                path: "/skills/a".to_string(),
                installed_at: chrono::Utc::now(),
                activation_count: 0,
                last_activated_at: None,
                character_budget_at_install: 400,
                priority: None,
                priority_locked: false,
            })
            .await
            .unwrap();
        let engine = engine(Arc::clone(&catalog)).await;

        let stack = vec![DetectedTechnology { technology_id: "rust".into(), name: "rust".into(), kind: TechnologyKind::Language, version: None, confidence: 0.9, source: "Cargo.toml".into() }];
        let response = engine.recommend_for_stack(stack, RecommendOptions::default()).await.unwrap();
        assert!(response.recommendations.is_empty());
    }

    #[tokio::test]
    async fn an_uncovered_technology_becomes_a_gap() {
        let catalog = Arc::new(CatalogStore::open(":memory:", DEFAULT_EMBEDDING_DIM).await.unwrap());
        catalog.upsert_skill(&sample_skill("gh/acme/rust-tester", &["rust"], 10)).await.unwrap();
        let engine = engine(Arc::clone(&catalog)).await;

        let stack = vec![DetectedTechnology { technology_id: "rust".into(), name: "rust".into(), kind: TechnologyKind::Language, version: None, confidence: 0.9, source: "Cargo.toml".into() }];
        let response = engine.recommend_for_stack(stack, RecommendOptions::default()).await.unwrap();
        assert_eq!(response.gaps.len(), 1);
        assert_eq!(response.gaps[0].technology, "rust");
        assert!(response.coverage < 1.0);
    }
}
