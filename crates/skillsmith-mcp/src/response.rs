//! The uniform `{success, data?, error?, metadata?}` envelope every tool
//! call returns (spec §6), plus the `RuntimeError -> ApiError` mapping that
//! assigns each failure its numbered band.

use std::collections::HashMap;

use serde::Serialize;
use skillsmith_core::errors::{ApiError, ErrorCode};
use skillsmith_runtime::RuntimeError;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None, metadata: HashMap::new() }
    }

    pub fn ok_with_metadata(data: T, metadata: HashMap<String, serde_json::Value>) -> Self {
        Self { success: true, data: Some(data), error: None, metadata }
    }

    pub fn err(error: ApiError) -> Self {
        Self { success: false, data: None, error: Some(error), metadata: HashMap::new() }
    }

    pub fn err_with_metadata(error: ApiError, metadata: HashMap<String, serde_json::Value>) -> Self {
        Self { success: false, data: None, error: Some(error), metadata }
    }
}

/// Translates a runtime failure into the numbered-band envelope callers can
/// branch on without parsing prose. Every install failure also carries the
/// checks that ran (spec §7 "every failed install returns ... the set of
/// checks that ran") via `details`, attached by the caller at the call site
/// where the `SafetyReport` is still in scope.
pub fn to_api_error(err: &RuntimeError) -> ApiError {
    let (code, suggestions): (ErrorCode, Vec<&'static str>) = match err {
        RuntimeError::SkillNotFound(_) => (ErrorCode::SkillNotFound, vec!["check the skill id with `search`"]),
        RuntimeError::SkillAlreadyInstalled(_) => (ErrorCode::SkillAlreadyInstalled, vec!["use `list_installed` to see the current installation"]),
        RuntimeError::SkillBlocked { .. } => (ErrorCode::SkillBlocked, vec!["review the blocklist reason, or pass force=true to override"]),
        RuntimeError::ConflictDetected { .. } => (ErrorCode::ConflictDetected, vec!["resolve the conflicting skill first, or pass skip_conflict_check=true"]),
        RuntimeError::SecurityScanFailed(_) => (ErrorCode::SecurityScanFailed, vec!["wait for a fresh scan or pass skip_security_scan=true"]),
        RuntimeError::BudgetExceeded { .. } => (ErrorCode::BudgetExceeded, vec!["free up character budget with `uninstall_skill`, or lower priority skills"]),
        RuntimeError::SyncInProgress => (ErrorCode::SyncInProgress, vec!["wait for the current sync to finish, then retry"]),
        RuntimeError::SyncFailed(_) => (ErrorCode::SyncFailed, vec!["check `get_source_health` for the failing source"]),
        RuntimeError::InvalidQuery(_) => (ErrorCode::InvalidInput, vec![]),
        RuntimeError::ValidationFailed(_) => (ErrorCode::InvalidInput, vec![]),
        RuntimeError::Upstream(_) => (ErrorCode::Internal, vec!["the upstream code host may be degraded, retry later"]),
        RuntimeError::UpstreamRateLimited { .. } => (ErrorCode::Internal, vec!["retry after the indicated backoff window"]),
        RuntimeError::Catalog(_) => (ErrorCode::Internal, vec![]),
        RuntimeError::Core(_) => (ErrorCode::Internal, vec![]),
        RuntimeError::Internal(_) => (ErrorCode::Internal, vec![]),
    };
    let mut api_err = ApiError::new(code, err.to_string());
    for suggestion in suggestions {
        api_err = api_err.with_suggestion(suggestion);
    }
    api_err
}
