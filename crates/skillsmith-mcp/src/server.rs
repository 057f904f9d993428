//! The Skillsmith MCP server: one inherent async method per spec §6
//! operation, each returning the uniform envelope, plus the `rmcp`
//! `ToolRoute` wiring in `tools.rs` that exposes them over stdio.
//!
//! Tool methods live on the server struct and the transport layer is a thin
//! adapter over them, so the business logic is testable without a running
//! MCP session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use skillsmith_catalog::CatalogStore;
use skillsmith_core::collaborators::{Clock, Random, SystemClock, SystemRandom};
use skillsmith_core::model::{BlocklistEntry, InstallPriority};
use skillsmith_runtime::embeddings::{EmbeddingProvider, FastEmbedProvider};
use skillsmith_runtime::ingest::{IngestionPipeline, SourceConfig};
use skillsmith_runtime::learning::LearningLayer;
use skillsmith_runtime::recommend::{detect_stack, RecommendOptions, RecommendationEngine};
use skillsmith_runtime::safety::PreInstallSafety;
use skillsmith_runtime::search::{SearchFilters, SearchService, SearchSort};
use skillsmith_runtime::sync::{FullSyncOutcome, SyncController};
use skillsmith_runtime::RuntimeError;

use crate::response::{to_api_error, ApiResponse};

/// Default total character budget a skill set is measured against when a
/// caller doesn't supply one — mirrors the character-budget field already
/// carried per skill in the catalog.
pub const DEFAULT_CHARACTER_BUDGET: u32 = 50_000;

pub struct SkillsmithMcpServer {
    catalog: Arc<CatalogStore>,
    search: Arc<SearchService>,
    recommend: Arc<RecommendationEngine>,
    safety: Arc<PreInstallSafety>,
    learning: Arc<LearningLayer>,
    sync: Arc<SyncController>,
    ingestion: Option<(Arc<IngestionPipeline>, SourceConfig)>,
    clock: Arc<dyn Clock>,
}

impl SkillsmithMcpServer {
    pub fn new(catalog: Arc<CatalogStore>) -> Self {
        Self::with_embedder(catalog, None)
    }

    pub fn with_embedder(catalog: Arc<CatalogStore>, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let random: Arc<dyn Random> = Arc::new(SystemRandom);
        let search = Arc::new(SearchService::new(Arc::clone(&catalog), embedder.clone(), Arc::clone(&clock)));

        // `LearningLayer` needs a concrete embedder to compute gradients
        // (spec §4.9); when the caller has none to inject, fall back to the
        // local FastEmbed model rather than leaving C9 unconstructible.
        let learning_embedder = embedder.unwrap_or_else(|| Arc::new(FastEmbedProvider::new()));
        let learning = Arc::new(LearningLayer::new(Arc::clone(&catalog), learning_embedder, Default::default()));

        let recommend = Arc::new(RecommendationEngine::new(Arc::clone(&catalog), Arc::clone(&search), Some(Arc::clone(&learning)), Arc::clone(&random)));
        let safety = Arc::new(PreInstallSafety::new(Arc::clone(&catalog)));
        let sync = Arc::new(SyncController::new(Arc::clone(&catalog), Arc::clone(&clock)));
        Self { catalog, search, recommend, safety, learning, sync, ingestion: None, clock }
    }

    pub fn with_ingestion(mut self, pipeline: Arc<IngestionPipeline>, config: SourceConfig) -> Self {
        self.ingestion = Some((pipeline, config));
        self
    }

    /// Applies sync settings read from `.skillsmith.toml` at startup. Not a
    /// spec §6 operation in its own right (there's no `configure_sync` tool
    /// route) - just how the CLI shell feeds its config file into C5.
    pub async fn apply_sync_config(&self, frequency: skillsmith_core::model::SyncFrequency, enabled: bool) -> Result<(), RuntimeError> {
        self.sync.set_frequency(frequency).await?;
        self.sync.set_enabled(enabled).await?;
        Ok(())
    }

    // -- search -----------------------------------------------------------

    pub async fn search(
        &self,
        query: &str,
        filters: SearchFilters,
        sort: SearchSort,
        limit: u32,
        offset: u32,
    ) -> ApiResponse<serde_json::Value> {
        match self.search.search(query, filters, sort, limit, offset).await {
            Ok(response) => ApiResponse::ok(serde_json::json!({
                "results": response.results.iter().map(|r| serde_json::json!({
                    "skill": r.skill,
                    "score": r.score,
                    "text_score": r.text_score,
                    "semantic_score": r.semantic_score,
                })).collect::<Vec<_>>(),
                "total": response.total,
                "has_more": response.has_more,
                "query_analysis": response.query_analysis,
            })),
            Err(e) => ApiResponse::err(to_api_error(&e)),
        }
    }

    // -- get_skill ----------------------------------------------------------

    pub async fn get_skill(&self, skill_id: &str) -> ApiResponse<serde_json::Value> {
        match self.catalog.get_skill(skill_id).await {
            Ok(Some(skill)) => ApiResponse::ok(serde_json::json!({ "skill": skill })),
            Ok(None) => ApiResponse::err(to_api_error(&RuntimeError::SkillNotFound(skill_id.to_string()))),
            Err(e) => ApiResponse::err(to_api_error(&RuntimeError::Catalog(e))),
        }
    }

    // -- analyze_codebase ---------------------------------------------------

    pub fn analyze_codebase(&self, path: &PathBuf, depth: usize) -> ApiResponse<serde_json::Value> {
        let detected = detect_stack(path, depth);
        ApiResponse::ok(serde_json::json!({
            "technologies": detected.iter().map(|t| serde_json::json!({
                "technology_id": t.technology_id,
                "name": t.name,
                "version": t.version,
                "confidence": t.confidence,
                "source": t.source,
            })).collect::<Vec<_>>(),
        }))
    }

    // -- recommend_skills -----------------------------------------------------

    pub async fn recommend_skills(&self, path: &PathBuf, options: RecommendOptions) -> ApiResponse<serde_json::Value> {
        match self.recommend.recommend_for_path(path, 3, options).await {
            Ok(response) => ApiResponse::ok(serde_json::json!({
                "recommendations": response.recommendations.iter().map(|r| serde_json::json!({
                    "skill": r.skill,
                    "score": r.score,
                    "reasons": r.reasons,
                    "priority": format!("{:?}", r.priority).to_lowercase(),
                })).collect::<Vec<_>>(),
                "gaps": response.gaps.iter().map(|g| serde_json::json!({
                    "technology": g.technology,
                    "severity": format!("{:?}", g.severity).to_lowercase(),
                    "suggested_skill_ids": g.suggested_skill_ids,
                })).collect::<Vec<_>>(),
                "coverage": response.coverage,
            })),
            Err(e) => ApiResponse::err(to_api_error(&e)),
        }
    }

    // -- install_skill / uninstall_skill -------------------------------------

    pub async fn install_skill(
        &self,
        skill_id: &str,
        force: bool,
        target_directory: &str,
    ) -> ApiResponse<serde_json::Value> {
        let installed = self.catalog.list_installed_skills().await.unwrap_or_default();
        let current_usage: u32 = installed.iter().map(|i| i.character_budget_at_install).sum();

        match self.safety.install(skill_id, target_directory, force, current_usage, DEFAULT_CHARACTER_BUDGET).await {
            Ok(report) => {
                let mut metadata = HashMap::new();
                metadata.insert("checks".to_string(), serde_json::json!(report.checks.iter().map(|c| serde_json::json!({
                    "check": format!("{:?}", c.check),
                    "passed": c.passed,
                    "severity": format!("{:?}", c.severity),
                    "message": c.message,
                })).collect::<Vec<_>>()));
                ApiResponse::ok_with_metadata(serde_json::json!({ "can_proceed": report.can_proceed }), metadata)
            }
            Err(e) => {
                let mut metadata = HashMap::new();
                if let Ok(report) = self.safety.evaluate(skill_id, current_usage, DEFAULT_CHARACTER_BUDGET).await {
                    metadata.insert("checks".to_string(), serde_json::json!(report.checks.iter().map(|c| serde_json::json!({
                        "check": format!("{:?}", c.check),
                        "passed": c.passed,
                        "severity": format!("{:?}", c.severity),
                        "message": c.message,
                    })).collect::<Vec<_>>()));
                }
                ApiResponse::err_with_metadata(to_api_error(&e), metadata)
            }
        }
    }

    pub async fn uninstall_skill(&self, skill_id: &str) -> ApiResponse<serde_json::Value> {
        match self.catalog.uninstall_skill(skill_id).await {
            Ok(true) => ApiResponse::ok(serde_json::json!({ "uninstalled": true })),
            Ok(false) => ApiResponse::err(to_api_error(&RuntimeError::SkillNotFound(skill_id.to_string()))),
            Err(e) => ApiResponse::err(to_api_error(&RuntimeError::Catalog(e))),
        }
    }

    // -- list_installed -------------------------------------------------------

    pub async fn list_installed(&self) -> ApiResponse<serde_json::Value> {
        match self.catalog.list_installed_skills().await {
            Ok(installed) => ApiResponse::ok(serde_json::json!({ "installed": installed })),
            Err(e) => ApiResponse::err(to_api_error(&RuntimeError::Catalog(e))),
        }
    }

    // -- check_conflicts ------------------------------------------------------

    pub async fn check_conflicts(&self, skill_id: &str, against_installed: bool, against_skills: &[String]) -> ApiResponse<serde_json::Value> {
        let mut candidates: Vec<String> = against_skills.to_vec();
        if against_installed {
            if let Ok(installed) = self.catalog.list_installed_skills().await {
                candidates.extend(installed.into_iter().map(|i| i.skill_id));
            }
        }
        match self.safety.check_conflicts(skill_id, &candidates).await {
            Ok(conflicts) => ApiResponse::ok(serde_json::json!({
                "conflicts": conflicts.iter().map(|c| serde_json::json!({
                    "with_skill_id": c.with_skill_id,
                    "overlap_fraction": c.overlap_fraction,
                    "shared_output_pattern": c.shared_output_pattern,
                })).collect::<Vec<_>>(),
            })),
            Err(e) => ApiResponse::err(to_api_error(&e)),
        }
    }

    // -- audit_activation -----------------------------------------------------

    pub async fn audit_activation(&self, skill_id: Option<&str>) -> ApiResponse<serde_json::Value> {
        if let Some(skill_id) = skill_id {
            if let Err(e) = self.catalog.record_activation(skill_id, self.clock.now()).await {
                return ApiResponse::err(to_api_error(&RuntimeError::Catalog(e)));
            }
        }
        match self.catalog.recent_audit_entries(50).await {
            Ok(entries) => ApiResponse::ok(serde_json::json!({ "entries": entries })),
            Err(e) => ApiResponse::err(to_api_error(&RuntimeError::Catalog(e))),
        }
    }

    // -- estimate_budget ------------------------------------------------------

    pub async fn estimate_budget(&self, skill_ids: &[String], include_current: bool) -> ApiResponse<serde_json::Value> {
        let mut requested = 0u64;
        for id in skill_ids {
            match self.catalog.get_skill(id).await {
                Ok(Some(skill)) => requested += skill.character_budget as u64,
                Ok(None) => return ApiResponse::err(to_api_error(&RuntimeError::SkillNotFound(id.clone()))),
                Err(e) => return ApiResponse::err(to_api_error(&RuntimeError::Catalog(e))),
            }
        }
        let current = if include_current {
            match self.catalog.list_installed_skills().await {
                Ok(installed) => installed.iter().map(|i| i.character_budget_at_install as u64).sum(),
                Err(e) => return ApiResponse::err(to_api_error(&RuntimeError::Catalog(e))),
            }
        } else {
            0
        };
        ApiResponse::ok(serde_json::json!({
            "current": current,
            "requested": requested,
            "projected": current + requested,
        }))
    }

    // -- get_priorities / set_priority -----------------------------------------

    pub async fn get_priorities(&self, skill_ids: Option<&[String]>) -> ApiResponse<serde_json::Value> {
        match self.catalog.list_installed_skills().await {
            Ok(installed) => {
                let filtered: Vec<_> = installed
                    .into_iter()
                    .filter(|i| skill_ids.map_or(true, |ids| ids.contains(&i.skill_id)))
                    .map(|i| serde_json::json!({
                        "skill_id": i.skill_id,
                        "priority": i.priority,
                        "priority_locked": i.priority_locked,
                    }))
                    .collect();
                ApiResponse::ok(serde_json::json!({ "priorities": filtered }))
            }
            Err(e) => ApiResponse::err(to_api_error(&RuntimeError::Catalog(e))),
        }
    }

    pub async fn set_priority(&self, skill_id: &str, priority: InstallPriority, lock: bool) -> ApiResponse<serde_json::Value> {
        match self.catalog.set_priority(skill_id, priority, lock).await {
            Ok(true) => ApiResponse::ok(serde_json::json!({ "updated": true })),
            Ok(false) => ApiResponse::err(to_api_error(&RuntimeError::SkillNotFound(skill_id.to_string()))),
            Err(e) => ApiResponse::err(to_api_error(&RuntimeError::Catalog(e))),
        }
    }

    // -- refresh_index / force_full_sync / get_sync_status / get_source_health --

    pub async fn refresh_index(&self) -> ApiResponse<serde_json::Value> {
        let Some((pipeline, config)) = &self.ingestion else {
            return ApiResponse::err(to_api_error(&RuntimeError::SyncFailed("no ingestion source configured".to_string())));
        };
        let run_id = match self.sync.start_run().await {
            Ok(id) => id,
            Err(e) => return ApiResponse::err(to_api_error(&e)),
        };
        match pipeline.run(config).await {
            Ok(counts) => match self.sync.complete_run(&run_id, counts).await {
                Ok(status) => ApiResponse::ok(serde_json::json!({ "run_id": run_id, "status": format!("{:?}", status).to_lowercase() })),
                Err(e) => ApiResponse::err(to_api_error(&e)),
            },
            Err(e) => {
                let _ = self.sync.fail_run(&run_id, &e.to_string()).await;
                ApiResponse::err(to_api_error(&e))
            }
        }
    }

    pub async fn force_full_sync(&self, estimated_skill_count: u64, confirm: bool) -> ApiResponse<serde_json::Value> {
        match self.sync.request_full_sync(estimated_skill_count, confirm).await {
            Ok(FullSyncOutcome::Preview { estimated_duration_ms }) => {
                ApiResponse::ok(serde_json::json!({ "preview": true, "estimated_duration_ms": estimated_duration_ms }))
            }
            Ok(FullSyncOutcome::Started { run_id }) => ApiResponse::ok(serde_json::json!({ "preview": false, "run_id": run_id })),
            Err(e) => ApiResponse::err(to_api_error(&e)),
        }
    }

    pub async fn get_sync_status(&self) -> ApiResponse<serde_json::Value> {
        match self.sync.get_status().await {
            Ok(status) => ApiResponse::ok(serde_json::json!({
                "config": status.config,
                "current_run": status.current_run,
                "last_run": status.last_run,
            })),
            Err(e) => ApiResponse::err(to_api_error(&e)),
        }
    }

    pub async fn get_source_health(&self, source_id: &str) -> ApiResponse<serde_json::Value> {
        match self.catalog.get_source(source_id).await {
            Ok(Some(source)) => ApiResponse::ok(serde_json::json!({ "source": source })),
            Ok(None) => ApiResponse::err(to_api_error(&RuntimeError::Internal(format!("unknown source: {source_id}")))),
            Err(e) => ApiResponse::err(to_api_error(&RuntimeError::Catalog(e))),
        }
    }

    // -- update_blocklist -----------------------------------------------------

    pub async fn update_blocklist(&self, action: &str, skill_id: Option<&str>, reason: Option<&str>) -> ApiResponse<serde_json::Value> {
        match action {
            "add" => {
                let Some(skill_id) = skill_id else {
                    return ApiResponse::err(to_api_error(&RuntimeError::ValidationFailed("skill_id is required for action=add".to_string())));
                };
                let entry = BlocklistEntry {
                    skill_id: skill_id.to_string(),
                    reason: reason.unwrap_or("blocked by operator").to_string(),
                    added_at: Utc::now(),
                };
                match self.catalog.add_blocklist_entry(&entry).await {
                    Ok(()) => ApiResponse::ok(serde_json::json!({ "added": skill_id })),
                    Err(e) => ApiResponse::err(to_api_error(&RuntimeError::Catalog(e))),
                }
            }
            "remove" => {
                let Some(skill_id) = skill_id else {
                    return ApiResponse::err(to_api_error(&RuntimeError::ValidationFailed("skill_id is required for action=remove".to_string())));
                };
                match self.catalog.remove_blocklist_entry(skill_id).await {
                    Ok(()) => ApiResponse::ok(serde_json::json!({ "removed": skill_id })),
                    Err(e) => ApiResponse::err(to_api_error(&RuntimeError::Catalog(e))),
                }
            }
            other => ApiResponse::err(to_api_error(&RuntimeError::ValidationFailed(format!("unknown blocklist action: {other}")))),
        }
    }
}
