//! Ingestion pipeline (C4, spec §4.4): turns configured sources into
//! validated skill rows in the catalog, walking one source at a time and
//! assigning trust tier from each source's own configuration.

pub mod auth;
pub mod github;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use skillsmith_catalog::CatalogStore;
use skillsmith_core::model::{Author, Skill, Source, SourceHealthState, TrustTier};

use crate::error::Result;
use crate::sync::RunCounts;
use crate::validate::{self, ValidateOptions};
use auth::AuthHeader;
use github::CodeHostClient;

const DESCRIPTOR_FILENAMES: &[&str] = &["SKILL.md", "skill.md"];
const HARD_SKIP_LIST: &[&str] = &[".git", ".github", "node_modules", "target", "dist", "vendor"];
const DEFAULT_MAX_PAGES: u32 = 5;
const MAX_PAGES_CAP: u32 = 10;
const SEARCH_PAGE_SIZE: u32 = 30;
const PAGE_THROTTLE: Duration = Duration::from_millis(150);
const PROBE_THROTTLE: Duration = Duration::from_millis(50);
const WELL_KNOWN_OFFICIAL_TOPIC: &str = "official-skill";

/// One high-trust repo to ingest wholesale (spec §4.4 step 2).
#[derive(Debug, Clone)]
pub struct HighTrustRepo {
    pub owner: String,
    pub repo: String,
    pub license: String,
    pub base_quality: f64,
    pub exclude_list: Vec<String>,
    pub include_list: Option<Vec<String>>,
}

/// One topic to sweep for community skills (spec §4.4 step 3).
#[derive(Debug, Clone)]
pub struct TopicSource {
    pub topic: String,
    pub max_pages: u32,
}

impl TopicSource {
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into(), max_pages: DEFAULT_MAX_PAGES }
    }

    fn pages(&self) -> u32 {
        self.max_pages.clamp(1, MAX_PAGES_CAP)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceConfig {
    pub high_trust: Vec<HighTrustRepo>,
    pub topics: Vec<TopicSource>,
    pub app_installation_id: Option<String>,
    pub static_bearer_token: Option<String>,
}

/// A candidate descriptor located during either phase, before the quality
/// gate and upsert.
struct Candidate {
    repo_url: String,
    owner: String,
    repo: String,
    default_branch: String,
    descriptor: String,
    trust_tier: TrustTier,
    quality_score: f64,
    stars: u64,
    forks: u64,
    description: String,
    has_tests: bool,
    has_examples: bool,
}

pub struct IngestionPipeline {
    catalog: Arc<CatalogStore>,
    authenticator: Option<Arc<auth::AppAuthenticator>>,
    client: Arc<dyn CodeHostClient>,
    source_id: String,
}

impl IngestionPipeline {
    pub fn new(
        catalog: Arc<CatalogStore>,
        client: Arc<dyn CodeHostClient>,
        authenticator: Option<Arc<auth::AppAuthenticator>>,
        source_id: impl Into<String>,
    ) -> Self {
        Self { catalog, client, authenticator, source_id: source_id.into() }
    }

    /// Step 1: prefer an app-installation token, fall back to a static
    /// bearer, fall back to anonymous (spec §4.4).
    async fn resolve_auth(&self, config: &SourceConfig) -> AuthHeader {
        if let (Some(authenticator), Some(installation_id)) =
            (&self.authenticator, &config.app_installation_id)
        {
            if let Ok(token) = authenticator.installation_token(installation_id).await {
                return AuthHeader::AppInstallation(token);
            }
        }
        if let Some(token) = &config.static_bearer_token {
            return AuthHeader::StaticBearer(token.clone());
        }
        AuthHeader::Anonymous
    }

    pub async fn run(&self, config: &SourceConfig) -> Result<RunCounts> {
        let auth = self.resolve_auth(config).await;
        let mut counts = RunCounts::default();
        let mut seen_urls: HashSet<String> = HashSet::new();

        let mut candidates = Vec::new();
        for repo in &config.high_trust {
            match self.high_trust_candidates(&auth, repo).await {
                Ok(found) => candidates.extend(found),
                Err(e) => {
                    counts.errors.push(format!("{}/{}: {e}", repo.owner, repo.repo));
                    self.mark_degraded(&e.to_string()).await;
                }
            }
        }

        for topic in &config.topics {
            match self.topic_candidates(&auth, topic).await {
                Ok(found) => candidates.extend(found),
                Err(e) => {
                    counts.errors.push(format!("topic {}: {e}", topic.topic));
                    self.mark_degraded(&e.to_string()).await;
                }
            }
        }

        for candidate in candidates {
            if !seen_urls.insert(candidate.repo_url.clone()) {
                continue;
            }
            match self.ingest_candidate(candidate).await {
                Ok(Some(true)) => counts.added += 1,
                Ok(Some(false)) => counts.updated += 1,
                Ok(None) => counts.unchanged += 1,
                Err(e) => counts.errors.push(e.to_string()),
            }
        }

        if counts.errors.is_empty() {
            self.catalog.mark_source_success(&self.source_id, Utc::now()).await?;
        }

        Ok(counts)
    }

    async fn mark_degraded(&self, error: &str) {
        let _ = self.catalog.mark_source_degraded(&self.source_id, error, Utc::now()).await;
    }

    /// Step 2: probe a single high-trust repo's root and `skills/`
    /// subdirectory for descriptors.
    async fn high_trust_candidates(
        &self,
        auth: &AuthHeader,
        repo_cfg: &HighTrustRepo,
    ) -> Result<Vec<Candidate>> {
        let metadata = self.client.get_repo(auth, &repo_cfg.owner, &repo_cfg.repo).await?;
        let mut found = Vec::new();

        if let Some(candidate) = self
            .probe_descriptor(auth, &metadata, "", TrustTier::Verified, repo_cfg.base_quality)
            .await?
        {
            found.push(candidate);
        }

        let subdirs = self
            .client
            .list_dir(auth, &metadata.owner, &metadata.name, "skills", &metadata.default_branch)
            .await
            .unwrap_or_default();

        for subdir in subdirs {
            if HARD_SKIP_LIST.contains(&subdir.as_str())
                || repo_cfg.exclude_list.iter().any(|e| e == &subdir)
            {
                continue;
            }
            if let Some(include) = &repo_cfg.include_list {
                if !include.iter().any(|i| i == &subdir) {
                    continue;
                }
            }
            tokio::time::sleep(PROBE_THROTTLE).await;
            let path = format!("skills/{subdir}");
            if let Some(candidate) = self
                .probe_descriptor(auth, &metadata, &path, TrustTier::Verified, repo_cfg.base_quality)
                .await?
            {
                found.push(candidate);
            }
        }

        Ok(found)
    }

    /// Step 3: sweep a topic's search results, paginated, tagging trust
    /// tier by a stars-based heuristic.
    async fn topic_candidates(&self, auth: &AuthHeader, topic: &TopicSource) -> Result<Vec<Candidate>> {
        let mut found = Vec::new();
        for page in 1..=topic.pages() {
            if page > 1 {
                tokio::time::sleep(PAGE_THROTTLE).await;
            }
            let repos = match self.client.search_by_topic(auth, &topic.topic, page, SEARCH_PAGE_SIZE).await {
                Ok(repos) => repos,
                Err(crate::error::RuntimeError::UpstreamRateLimited { .. }) => break,
                Err(e) => return Err(e),
            };
            if repos.is_empty() {
                break;
            }
            for metadata in repos {
                tokio::time::sleep(PROBE_THROTTLE).await;
                let tier = trust_tier_heuristic(&metadata);
                if let Some(candidate) =
                    self.probe_descriptor(auth, &metadata, "", tier, base_quality_for(tier)).await?
                {
                    found.push(candidate);
                }
            }
        }
        Ok(found)
    }

    async fn probe_descriptor(
        &self,
        auth: &AuthHeader,
        metadata: &github::RepoMetadata,
        dir: &str,
        trust_tier: TrustTier,
        quality_score: f64,
    ) -> Result<Option<Candidate>> {
        for filename in DESCRIPTOR_FILENAMES {
            let path = if dir.is_empty() { filename.to_string() } else { format!("{dir}/{filename}") };
            if let Some(content) = self
                .client
                .get_file(auth, &metadata.owner, &metadata.name, &path, &metadata.default_branch)
                .await?
            {
                let (has_tests, has_examples) = self.probe_tests_and_examples(auth, &metadata, dir).await;
                return Ok(Some(Candidate {
                    repo_url: metadata.html_url(),
                    owner: metadata.owner.clone(),
                    repo: metadata.name.clone(),
                    default_branch: metadata.default_branch.clone(),
                    descriptor: content,
                    trust_tier,
                    quality_score,
                    stars: metadata.stars,
                    forks: metadata.forks,
                    description: metadata.description.clone(),
                    has_tests,
                    has_examples,
                }));
            }
        }
        Ok(None)
    }

    /// Whether a `tests/` or `examples/` directory sits alongside the
    /// descriptor, populating `SearchFilters::has_tests`/`has_examples`
    /// (spec.md §4.6). Best-effort: a listing failure just means "no", not
    /// an ingestion error.
    async fn probe_tests_and_examples(
        &self,
        auth: &AuthHeader,
        metadata: &github::RepoMetadata,
        dir: &str,
    ) -> (bool, bool) {
        let entries = self
            .client
            .list_dir(auth, &metadata.owner, &metadata.name, dir, &metadata.default_branch)
            .await
            .unwrap_or_default();
        let has_tests = entries.iter().any(|e| e == "tests" || e == "test");
        let has_examples = entries.iter().any(|e| e == "examples" || e == "example");
        (has_tests, has_examples)
    }

    /// Steps 5-6: validate, then upsert by URL in a single transaction.
    /// Returns `Some(true)` for a new skill, `Some(false)` for an updated
    /// one, `None` if the candidate fails the quality gate.
    async fn ingest_candidate(&self, candidate: Candidate) -> Result<Option<bool>> {
        let result = validate::validate(&candidate.descriptor, ValidateOptions::default());
        if !result.passes_quality_gate(false) {
            return Ok(None);
        }

        let existing = self.catalog.get_skill_by_url(&candidate.repo_url).await?;
        let is_new = existing.is_none();
        let now = Utc::now();
        let author_slug = slugify(&candidate.owner);

        self.catalog
            .upsert_author(&Author { slug: author_slug.clone(), display_name: candidate.owner.clone(), reputation: 0.0 })
            .await?;

        let name = slugify(&result.name(&candidate.repo));
        let skill = Skill {
            id: existing.as_ref().map(|s| s.id.clone()).unwrap_or_else(|| Skill::identity(&self.source_id, &author_slug, &name)),
            source: self.source_id.clone(),
            author_slug,
            name,
            display_name: result.name(&candidate.repo),
            description: if result.description().is_empty() { candidate.description.clone() } else { result.description() },
            repo_url: candidate.repo_url,
            default_branch: candidate.default_branch,
            categories: validate::categorize(&result),
            technologies: Vec::new(),
            trust_tier: candidate.trust_tier,
            quality_score: candidate.quality_score,
            installable: true,
            current_version: existing.as_ref().map(|s| s.current_version.clone()).unwrap_or_else(|| "0.1.0".to_string()),
            character_budget: result.content_length as u32,
            security_scan_status: existing.as_ref().map(|s| s.security_scan_status).unwrap_or(skillsmith_core::model::SecurityScanStatus::Pending),
            trigger_phrases: Vec::new(),
            output_file_patterns: Vec::new(),
            stars: candidate.stars,
            forks: candidate.forks,
            has_tests: candidate.has_tests,
            has_examples: candidate.has_examples,
            created_at: existing.as_ref().map(|s| s.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.catalog.upsert_skill(&skill).await?;

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("skill_id".to_string(), skill.id.clone());
        metadata.insert("repo".to_string(), format!("{}/{}", candidate.owner, candidate.repo));
        self.catalog
            .append_audit_entry("skill.ingested", "system", if is_new { "added" } else { "updated" }, &metadata)
            .await?;

        Ok(Some(is_new))
    }
}

fn trust_tier_heuristic(metadata: &github::RepoMetadata) -> TrustTier {
    if metadata.topics.iter().any(|t| t == WELL_KNOWN_OFFICIAL_TOPIC) {
        TrustTier::Official
    } else if metadata.stars >= 50 {
        TrustTier::Community
    } else if metadata.stars >= 5 {
        TrustTier::Experimental
    } else {
        TrustTier::Unverified
    }
}

fn base_quality_for(tier: TrustTier) -> f64 {
    match tier {
        TrustTier::Official => 0.95,
        TrustTier::Verified => 0.9,
        TrustTier::Community => 0.7,
        TrustTier::Experimental => 0.5,
        TrustTier::Unverified => 0.3,
    }
}

fn slugify(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Ensures a `sources` row exists for `source_id` before a run starts, so
/// `mark_source_degraded`/`mark_source_success` always have a target.
pub async fn ensure_source_registered(catalog: &CatalogStore, source_id: &str, kind: &str) -> Result<()> {
    if catalog.get_source(source_id).await?.is_none() {
        catalog
            .upsert_source(&Source {
                id: source_id.to_string(),
                kind: kind.to_string(),
                health: SourceHealthState::Healthy,
                last_success_at: None,
                last_error_at: None,
                last_error: None,
                consecutive_failures: 0,
            })
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::Mutex as AsyncMutex;

    struct ScriptedClient {
        repos: std::collections::HashMap<String, github::RepoMetadata>,
        files: std::collections::HashMap<String, String>,
        dirs: std::collections::HashMap<String, Vec<String>>,
        topic_results: AsyncMutex<Vec<Vec<github::RepoMetadata>>>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl CodeHostClient for ScriptedClient {
        async fn get_repo(&self, _auth: &AuthHeader, owner: &str, repo: &str) -> Result<github::RepoMetadata> {
            *self.calls.lock().unwrap() += 1;
            self.repos
                .get(&format!("{owner}/{repo}"))
                .cloned()
                .ok_or_else(|| crate::error::RuntimeError::Upstream("not found".into()))
        }

        async fn list_dir(
            &self,
            _auth: &AuthHeader,
            owner: &str,
            repo: &str,
            path: &str,
            _branch: &str,
        ) -> Result<Vec<String>> {
            Ok(self.dirs.get(&format!("{owner}/{repo}/{path}")).cloned().unwrap_or_default())
        }

        async fn get_file(
            &self,
            _auth: &AuthHeader,
            owner: &str,
            repo: &str,
            path: &str,
            _branch: &str,
        ) -> Result<Option<String>> {
            Ok(self.files.get(&format!("{owner}/{repo}/{path}")).cloned())
        }

        async fn search_by_topic(
            &self,
            _auth: &AuthHeader,
            _topic: &str,
            _page: u32,
            _per_page: u32,
        ) -> Result<Vec<github::RepoMetadata>> {
            let mut pages = self.topic_results.lock().await;
            if pages.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(pages.remove(0))
            }
        }
    }

    fn descriptor(name: &str) -> String {
        format!(
            "---\nname: {name}\ndescription: A thoroughly useful automation skill for testing purposes.\n---\n\n# {name}\n\nEnough body content to clear the minimum content length threshold easily.\n"
        )
    }

    fn repo(owner: &str, name: &str, stars: u64) -> github::RepoMetadata {
        github::RepoMetadata {
            owner: owner.to_string(),
            name: name.to_string(),
            default_branch: "main".to_string(),
            description: "a repo".to_string(),
            stars,
            forks: 0,
            topics: Vec::new(),
        }
    }

    #[tokio::test]
    async fn high_trust_root_descriptor_is_ingested_as_verified() {
        let catalog = Arc::new(CatalogStore::open(":memory:", 384).await.unwrap());
        let mut repos = std::collections::HashMap::new();
        repos.insert("acme/widgets".to_string(), repo("acme", "widgets", 1));
        let mut files = std::collections::HashMap::new();
        files.insert("acme/widgets/SKILL.md".to_string(), descriptor("widgets"));
        let client = Arc::new(ScriptedClient {
            repos,
            files,
            dirs: std::collections::HashMap::new(),
            topic_results: AsyncMutex::new(Vec::new()),
            calls: Mutex::new(0),
        });

        let pipeline = IngestionPipeline::new(catalog.clone(), client, None, "github");
        ensure_source_registered(&catalog, "github", "code-host").await.unwrap();
        let config = SourceConfig {
            high_trust: vec![HighTrustRepo {
                owner: "acme".into(),
                repo: "widgets".into(),
                license: "MIT".into(),
                base_quality: 0.9,
                exclude_list: Vec::new(),
                include_list: None,
            }],
            topics: Vec::new(),
            app_installation_id: None,
            static_bearer_token: None,
        };

        let counts = pipeline.run(&config).await.unwrap();
        assert_eq!(counts.added, 1);
        assert!(counts.errors.is_empty());

        let skill = catalog.get_skill_by_url("https://github.com/acme/widgets").await.unwrap().unwrap();
        assert_eq!(skill.trust_tier, TrustTier::Verified);
    }

    #[tokio::test]
    async fn duplicate_url_across_phases_is_deduped_first_writer_wins() {
        let catalog = Arc::new(CatalogStore::open(":memory:", 384).await.unwrap());
        let mut repos = std::collections::HashMap::new();
        repos.insert("acme/widgets".to_string(), repo("acme", "widgets", 1));
        let mut files = std::collections::HashMap::new();
        files.insert("acme/widgets/SKILL.md".to_string(), descriptor("widgets"));
        let client = Arc::new(ScriptedClient {
            repos: repos.clone(),
            files: files.clone(),
            dirs: std::collections::HashMap::new(),
            topic_results: AsyncMutex::new(vec![vec![repo("acme", "widgets", 60)]]),
            calls: Mutex::new(0),
        });

        let pipeline = IngestionPipeline::new(catalog.clone(), client, None, "github");
        ensure_source_registered(&catalog, "github", "code-host").await.unwrap();
        let config = SourceConfig {
            high_trust: vec![HighTrustRepo {
                owner: "acme".into(),
                repo: "widgets".into(),
                license: "MIT".into(),
                base_quality: 0.9,
                exclude_list: Vec::new(),
                include_list: None,
            }],
            topics: vec![TopicSource::new("automation")],
            app_installation_id: None,
            static_bearer_token: None,
        };

        let counts = pipeline.run(&config).await.unwrap();
        assert_eq!(counts.added, 1, "the same URL must only be ingested once");
        let skill = catalog.get_skill_by_url("https://github.com/acme/widgets").await.unwrap().unwrap();
        assert_eq!(skill.trust_tier, TrustTier::Verified, "high-trust phase result wins over the topic phase");
    }

    #[tokio::test]
    async fn malformed_descriptor_fails_the_quality_gate_and_is_skipped() {
        let catalog = Arc::new(CatalogStore::open(":memory:", 384).await.unwrap());
        let mut repos = std::collections::HashMap::new();
        repos.insert("acme/empty".to_string(), repo("acme", "empty", 1));
        let mut files = std::collections::HashMap::new();
        files.insert("acme/empty/SKILL.md".to_string(), "too short".to_string());
        let client = Arc::new(ScriptedClient {
            repos,
            files,
            dirs: std::collections::HashMap::new(),
            topic_results: AsyncMutex::new(Vec::new()),
            calls: Mutex::new(0),
        });

        let pipeline = IngestionPipeline::new(catalog.clone(), client, None, "github");
        ensure_source_registered(&catalog, "github", "code-host").await.unwrap();
        let config = SourceConfig {
            high_trust: vec![HighTrustRepo {
                owner: "acme".into(),
                repo: "empty".into(),
                license: "MIT".into(),
                base_quality: 0.9,
                exclude_list: Vec::new(),
                include_list: None,
            }],
            topics: Vec::new(),
            app_installation_id: None,
            static_bearer_token: None,
        };

        let counts = pipeline.run(&config).await.unwrap();
        assert_eq!(counts.added, 0);
        assert!(catalog.get_skill_by_url("https://github.com/acme/empty").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn a_source_error_is_reported_without_aborting_other_sources() {
        let catalog = Arc::new(CatalogStore::open(":memory:", 384).await.unwrap());
        let mut repos = std::collections::HashMap::new();
        repos.insert("acme/widgets".to_string(), repo("acme", "widgets", 1));
        let mut files = std::collections::HashMap::new();
        files.insert("acme/widgets/SKILL.md".to_string(), descriptor("widgets"));
        let client = Arc::new(ScriptedClient {
            repos,
            files,
            dirs: std::collections::HashMap::new(),
            topic_results: AsyncMutex::new(Vec::new()),
            calls: Mutex::new(0),
        });

        let pipeline = IngestionPipeline::new(catalog.clone(), client, None, "github");
        ensure_source_registered(&catalog, "github", "code-host").await.unwrap();
        let config = SourceConfig {
            high_trust: vec![
                HighTrustRepo {
                    owner: "ghost".into(),
                    repo: "missing".into(),
                    license: "MIT".into(),
                    base_quality: 0.9,
                    exclude_list: Vec::new(),
                    include_list: None,
                },
                HighTrustRepo {
                    owner: "acme".into(),
                    repo: "widgets".into(),
                    license: "MIT".into(),
                    base_quality: 0.9,
                    exclude_list: Vec::new(),
                    include_list: None,
                },
            ],
            topics: Vec::new(),
            app_installation_id: None,
            static_bearer_token: None,
        };

        let counts = pipeline.run(&config).await.unwrap();
        assert_eq!(counts.added, 1);
        assert_eq!(counts.errors.len(), 1);

        let source = catalog.get_source("github").await.unwrap().unwrap();
        assert_eq!(source.health, SourceHealthState::Degraded);
    }

    #[test]
    fn stars_heuristic_matches_named_thresholds() {
        assert_eq!(trust_tier_heuristic(&repo("a", "b", 51)), TrustTier::Community);
        assert_eq!(trust_tier_heuristic(&repo("a", "b", 5)), TrustTier::Experimental);
        assert_eq!(trust_tier_heuristic(&repo("a", "b", 1)), TrustTier::Unverified);
        let mut official = repo("a", "b", 1);
        official.topics.push(WELL_KNOWN_OFFICIAL_TOPIC.to_string());
        assert_eq!(trust_tier_heuristic(&official), TrustTier::Official);
    }
}
