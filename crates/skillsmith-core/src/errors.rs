use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("path rejected: {0}")]
    InvalidPath(#[from] crate::pathsafe::PathSafetyError),

    #[error("rate limit queue full for key {key}")]
    QueueFull { key: String },

    #[error("rate limit wait timed out after {0:?}")]
    WaitTimeout(std::time::Duration),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Numbered error bands from spec §6/§7: general (1xxx), skill (2xxx),
/// security (3xxx), conflict/budget (4xxx), sync (5xxx), learning (6xxx).
/// Every user-facing failure across the workspace is expressed as one of
/// these so callers get a stable code alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput = 1000,
    NotFound = 1001,
    Internal = 1002,
    Cancelled = 1003,
    Timeout = 1004,

    SkillNotFound = 2000,
    SkillAlreadyInstalled = 2001,

    SkillBlocked = 3000,
    SecurityScanFailed = 3001,

    ConflictDetected = 4000,
    BudgetExceeded = 4001,

    SyncInProgress = 5000,
    SyncFailed = 5001,

    LearningUnavailable = 6000,
}

impl ErrorCode {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Uniform error envelope carried alongside `{success, data?, error?,
/// metadata?}` tool responses (spec §6/§7). `recovery_suggestions` is
/// populated only where a concrete next step exists.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery_suggestions: Vec<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.recovery_suggestions.push(suggestion.into());
        self
    }
}
