//! `ToolRoute` definitions wiring each spec §6 operation onto
//! [`SkillsmithMcpServer`] via `ToolRoute::new_dyn` and a hand-written JSON
//! Schema per tool. Every route serializes its
//! [`crate::response::ApiResponse`] to JSON text and flags the MCP-level
//! error bit whenever `success` is false, so a caller can branch on either
//! layer.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use rmcp::handler::server::tool::ToolCallContext;
use rmcp::handler::server::router::tool::ToolRoute;
use rmcp::model::{CallToolResult, Content, Tool};
use rmcp::ErrorData as McpError;
use serde::{Deserialize, Serialize};
use skillsmith_core::model::InstallPriority;
use skillsmith_runtime::recommend::{RecommendMode, RecommendOptions};
use skillsmith_runtime::search::{SearchFilters, SearchSort, SortDirection, SortField};

use crate::server::SkillsmithMcpServer;

fn json_tool(name: &'static str, description: &'static str, schema: serde_json::Value) -> Tool {
    let schema_map: serde_json::Map<String, serde_json::Value> = serde_json::from_value(schema).unwrap();
    Tool {
        name: Cow::Borrowed(name),
        title: None,
        description: Some(Cow::Borrowed(description)),
        input_schema: Arc::new(schema_map),
        output_schema: None,
        annotations: None,
        icons: None,
        meta: None,
    }
}

/// Wraps a response's JSON rendering into a `CallToolResult`, setting the
/// MCP-level error flag whenever the envelope itself reports failure.
fn emit<T: Serialize>(response: crate::response::ApiResponse<T>) -> Result<CallToolResult, McpError> {
    let success = response.success;
    let text = serde_json::to_string_pretty(&response).unwrap_or_else(|_| "{}".to_string());
    Ok(if success {
        CallToolResult::success(vec![Content::text(text)])
    } else {
        CallToolResult::error(vec![Content::text(text)])
    })
}

fn parse_args<T: for<'de> Deserialize<'de> + Default>(ctx: &ToolCallContext<'_, SkillsmithMcpServer>) -> T {
    let args = ctx.arguments.clone().unwrap_or_default();
    serde_json::from_value(serde_json::Value::Object(args)).unwrap_or_default()
}

pub fn all_routes() -> Vec<ToolRoute<SkillsmithMcpServer>> {
    vec![
        search_route(),
        get_skill_route(),
        analyze_codebase_route(),
        recommend_skills_route(),
        install_skill_route(),
        uninstall_skill_route(),
        list_installed_route(),
        check_conflicts_route(),
        audit_activation_route(),
        estimate_budget_route(),
        get_priorities_route(),
        set_priority_route(),
        refresh_index_route(),
        force_full_sync_route(),
        get_sync_status_route(),
        get_source_health_route(),
        update_blocklist_route(),
    ]
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchRequest {
    query: String,
    categories: Vec<String>,
    technologies: Vec<String>,
    trust_tier: Option<String>,
    min_score: Option<f64>,
    source: Option<String>,
    updated_after: Option<chrono::DateTime<chrono::Utc>>,
    has_tests: Option<bool>,
    has_examples: Option<bool>,
    sort_field: Option<String>,
    sort_direction: Option<String>,
    limit: u32,
    offset: u32,
}

fn search_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "search",
        "Full-text and semantic search over the skill catalog.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query text"},
                "categories": {"type": "array", "items": {"type": "string"}},
                "technologies": {"type": "array", "items": {"type": "string"}},
                "trust_tier": {"type": "string", "enum": ["unverified", "experimental", "community", "verified", "official"]},
                "min_score": {"type": "number"},
                "source": {"type": "string"},
                "updated_after": {"type": "string", "format": "date-time"},
                "has_tests": {"type": "boolean"},
                "has_examples": {"type": "boolean"},
                "sort_field": {"type": "string", "enum": ["relevance", "score", "stars", "updated"]},
                "sort_direction": {"type": "string", "enum": ["asc", "desc"]},
                "limit": {"type": "integer", "minimum": 1, "maximum": 50},
                "offset": {"type": "integer", "minimum": 0}
            },
            "required": ["query"]
        }),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move {
            let req: SearchRequest = parse_args(&ctx);
            let filters = SearchFilters {
                categories: req.categories,
                technologies: req.technologies,
                trust_tier: req.trust_tier.and_then(|t| serde_json::from_value(serde_json::Value::String(t)).ok()),
                min_score: req.min_score,
                source: req.source,
                updated_after: req.updated_after,
                has_tests: req.has_tests,
                has_examples: req.has_examples,
            };
            let sort = SearchSort {
                field: req
                    .sort_field
                    .and_then(|f| serde_json::from_value(serde_json::Value::String(f)).ok())
                    .unwrap_or(SortField::Relevance),
                direction: req
                    .sort_direction
                    .and_then(|d| serde_json::from_value(serde_json::Value::String(d)).ok())
                    .unwrap_or(SortDirection::Desc),
            };
            let limit = if req.limit == 0 { 20 } else { req.limit };
            let response = ctx.service.search(&req.query, filters, sort, limit, req.offset).await;
            emit(response)
        }
        .boxed()
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SkillIdRequest {
    skill_id: String,
}

fn get_skill_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "get_skill",
        "Fetch full catalog detail for a single skill by id.",
        serde_json::json!({
            "type": "object",
            "properties": {"skill_id": {"type": "string"}},
            "required": ["skill_id"]
        }),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move {
            let req: SkillIdRequest = parse_args(&ctx);
            emit(ctx.service.get_skill(&req.skill_id).await)
        }
        .boxed()
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnalyzeCodebaseRequest {
    path: Option<String>,
    depth: Option<usize>,
}

fn analyze_codebase_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "analyze_codebase",
        "Detect the technology stack rooted at a directory.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to scan (default: current directory)"},
                "depth": {"type": "integer", "minimum": 1, "maximum": 10}
            }
        }),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move {
            let req: AnalyzeCodebaseRequest = parse_args(&ctx);
            let path = PathBuf::from(req.path.unwrap_or_else(|| ".".to_string()));
            emit(ctx.service.analyze_codebase(&path, req.depth.unwrap_or(3)))
        }
        .boxed()
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RecommendSkillsRequest {
    path: Option<String>,
    max_results: Option<u32>,
    exclude_installed: Option<bool>,
    discovery_mode: Option<bool>,
}

fn recommend_skills_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "recommend_skills",
        "Recommend catalog skills for the detected stack at a path, with gap analysis.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "max_results": {"type": "integer", "minimum": 1, "maximum": 25},
                "exclude_installed": {"type": "boolean"},
                "discovery_mode": {"type": "boolean", "description": "Exploratory ranking with bounded jitter and popularity down-weighting"}
            }
        }),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move {
            let req: RecommendSkillsRequest = parse_args(&ctx);
            let path = PathBuf::from(req.path.unwrap_or_else(|| ".".to_string()));
            let options = RecommendOptions {
                max_results: req.max_results.unwrap_or(10),
                mode: if req.discovery_mode.unwrap_or(false) { RecommendMode::Exploratory } else { RecommendMode::Conservative },
                exclude_installed: req.exclude_installed.unwrap_or(true),
                ..Default::default()
            };
            emit(ctx.service.recommend_skills(&path, options).await)
        }
        .boxed()
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InstallSkillRequest {
    skill_id: String,
    force: bool,
    target_directory: Option<String>,
}

fn install_skill_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "install_skill",
        "Run pre-install safety checks and install a skill if they pass.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "skill_id": {"type": "string"},
                "force": {"type": "boolean", "description": "Install despite a blocking check"},
                "target_directory": {"type": "string"}
            },
            "required": ["skill_id"]
        }),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move {
            let req: InstallSkillRequest = parse_args(&ctx);
            let target = req.target_directory.unwrap_or_else(|| format!("./skills/{}", req.skill_id));
            emit(ctx.service.install_skill(&req.skill_id, req.force, &target).await)
        }
        .boxed()
    })
}

fn uninstall_skill_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "uninstall_skill",
        "Remove an installed skill.",
        serde_json::json!({
            "type": "object",
            "properties": {"skill_id": {"type": "string"}},
            "required": ["skill_id"]
        }),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move {
            let req: SkillIdRequest = parse_args(&ctx);
            emit(ctx.service.uninstall_skill(&req.skill_id).await)
        }
        .boxed()
    })
}

fn list_installed_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "list_installed",
        "List every currently installed skill.",
        serde_json::json!({"type": "object", "properties": {}}),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move { emit(ctx.service.list_installed().await) }.boxed()
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CheckConflictsRequest {
    skill_id: String,
    against_installed: bool,
    against_skills: Vec<String>,
}

fn check_conflicts_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "check_conflicts",
        "Check a candidate skill for trigger/output-pattern overlap against installed or named skills.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "skill_id": {"type": "string"},
                "against_installed": {"type": "boolean"},
                "against_skills": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["skill_id"]
        }),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move {
            let req: CheckConflictsRequest = parse_args(&ctx);
            emit(ctx.service.check_conflicts(&req.skill_id, req.against_installed, &req.against_skills).await)
        }
        .boxed()
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuditActivationRequest {
    skill_id: Option<String>,
}

fn audit_activation_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "audit_activation",
        "Record a skill activation (if skill_id is given) and return recent audit entries.",
        serde_json::json!({
            "type": "object",
            "properties": {"skill_id": {"type": "string"}}
        }),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move {
            let req: AuditActivationRequest = parse_args(&ctx);
            emit(ctx.service.audit_activation(req.skill_id.as_deref()).await)
        }
        .boxed()
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EstimateBudgetRequest {
    skill_ids: Vec<String>,
    include_current: bool,
}

fn estimate_budget_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "estimate_budget",
        "Estimate the total character budget a set of skills would use.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "skill_ids": {"type": "array", "items": {"type": "string"}},
                "include_current": {"type": "boolean"}
            },
            "required": ["skill_ids"]
        }),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move {
            let req: EstimateBudgetRequest = parse_args(&ctx);
            emit(ctx.service.estimate_budget(&req.skill_ids, req.include_current).await)
        }
        .boxed()
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GetPrioritiesRequest {
    skill_ids: Option<Vec<String>>,
}

fn get_priorities_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "get_priorities",
        "List install priorities, optionally filtered to specific skill ids.",
        serde_json::json!({
            "type": "object",
            "properties": {"skill_ids": {"type": "array", "items": {"type": "string"}}}
        }),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move {
            let req: GetPrioritiesRequest = parse_args(&ctx);
            emit(ctx.service.get_priorities(req.skill_ids.as_deref()).await)
        }
        .boxed()
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SetPriorityRequest {
    skill_id: String,
    priority: String,
    lock: bool,
}

fn set_priority_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "set_priority",
        "Set (and optionally lock) an installed skill's priority.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "skill_id": {"type": "string"},
                "priority": {"type": "string", "enum": ["essential", "recommended", "optional"]},
                "lock": {"type": "boolean"}
            },
            "required": ["skill_id", "priority"]
        }),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move {
            let req: SetPriorityRequest = parse_args(&ctx);
            let priority = match req.priority.as_str() {
                "essential" => InstallPriority::Essential,
                "optional" => InstallPriority::Optional,
                _ => InstallPriority::Recommended,
            };
            emit(ctx.service.set_priority(&req.skill_id, priority, req.lock).await)
        }
        .boxed()
    })
}

fn refresh_index_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "refresh_index",
        "Run an incremental ingestion sweep across configured sources.",
        serde_json::json!({"type": "object", "properties": {}}),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move { emit(ctx.service.refresh_index().await) }.boxed()
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ForceFullSyncRequest {
    estimated_skill_count: u64,
    confirm: bool,
}

fn force_full_sync_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "force_full_sync",
        "Preview (or, with confirm=true, start) a full catalog resync.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "estimated_skill_count": {"type": "integer"},
                "confirm": {"type": "boolean"}
            }
        }),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move {
            let req: ForceFullSyncRequest = parse_args(&ctx);
            emit(ctx.service.force_full_sync(req.estimated_skill_count, req.confirm).await)
        }
        .boxed()
    })
}

fn get_sync_status_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "get_sync_status",
        "Get current sync configuration, any in-flight run, and the last completed run.",
        serde_json::json!({"type": "object", "properties": {}}),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move { emit(ctx.service.get_sync_status().await) }.boxed()
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SourceIdRequest {
    source_id: String,
}

fn get_source_health_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "get_source_health",
        "Report a catalog source's health state and recent error.",
        serde_json::json!({
            "type": "object",
            "properties": {"source_id": {"type": "string"}},
            "required": ["source_id"]
        }),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move {
            let req: SourceIdRequest = parse_args(&ctx);
            emit(ctx.service.get_source_health(&req.source_id).await)
        }
        .boxed()
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UpdateBlocklistRequest {
    action: String,
    skill_id: Option<String>,
    reason: Option<String>,
}

fn update_blocklist_route() -> ToolRoute<SkillsmithMcpServer> {
    let tool = json_tool(
        "update_blocklist",
        "Add or remove a skill from the install blocklist.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["add", "remove"]},
                "skill_id": {"type": "string"},
                "reason": {"type": "string"}
            },
            "required": ["action"]
        }),
    );
    ToolRoute::new_dyn(tool, |ctx: ToolCallContext<'_, SkillsmithMcpServer>| {
        async move {
            let req: UpdateBlocklistRequest = parse_args(&ctx);
            emit(ctx.service.update_blocklist(&req.action, req.skill_id.as_deref(), req.reason.as_deref()).await)
        }
        .boxed()
    })
}
