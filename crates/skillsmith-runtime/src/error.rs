use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("skill already installed: {0}")]
    SkillAlreadyInstalled(String),

    #[error("skill is blocklisted: {skill_id}: {reason}")]
    SkillBlocked { skill_id: String, reason: String },

    #[error("conflict detected between {a} and {b} (overlap {overlap_pct:.0}%)")]
    ConflictDetected {
        a: String,
        b: String,
        overlap_pct: f64,
    },

    #[error("security scan failed for {0}")]
    SecurityScanFailed(String),

    #[error("character budget exceeded: {current} + {requested} > {limit}")]
    BudgetExceeded {
        current: u64,
        requested: u64,
        limit: u64,
    },

    #[error("sync already in progress")]
    SyncInProgress,

    #[error("sync failed: {0}")]
    SyncFailed(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] skillsmith_catalog::CatalogError),

    #[error("core error: {0}")]
    Core(#[from] skillsmith_core::CoreError),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("upstream rate-limited, retry after {retry_after_ms}ms")]
    UpstreamRateLimited { retry_after_ms: u64 },

    #[error("content validation failed: {0}")]
    ValidationFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
