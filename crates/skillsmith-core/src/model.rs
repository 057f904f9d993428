//! Shared data model (spec §3). These types are the row shapes persisted by
//! `skillsmith-catalog` and passed between every other crate; they carry no
//! storage-backend concerns of their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordinal trust classification used for filtering and ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    Unverified,
    Experimental,
    Community,
    Verified,
    Official,
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unverified => "unverified",
            Self::Experimental => "experimental",
            Self::Community => "community",
            Self::Verified => "verified",
            Self::Official => "official",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityScanStatus {
    Pending,
    Passed,
    Warning,
    Failed,
}

/// A discovered skill package. Identity is `source/author/name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub source: String,
    pub author_slug: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub repo_url: String,
    pub default_branch: String,
    pub categories: Vec<String>,
    pub technologies: Vec<String>,
    pub trust_tier: TrustTier,
    pub quality_score: f64,
    pub installable: bool,
    pub current_version: String,
    pub character_budget: u32,
    pub security_scan_status: SecurityScanStatus,
    pub trigger_phrases: Vec<String>,
    pub output_file_patterns: Vec<String>,
    pub stars: u64,
    pub forks: u64,
    pub has_tests: bool,
    pub has_examples: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Skill {
    pub fn identity(source: &str, author_slug: &str, name: &str) -> String {
        format!("{source}/{author_slug}/{name}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub slug: String,
    pub display_name: String,
    pub reputation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceHealthState {
    Healthy,
    Degraded,
    Down,
}

/// spec.md §3 mentions source health inline; the concrete row shape is a
/// SPEC_FULL.md supplement so `get_source_health` has something to return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub kind: String,
    pub health: SourceHealthState,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Technology {
    pub slug: String,
    pub name: String,
    pub kind: TechnologyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TechnologyKind {
    Language,
    Framework,
    Tool,
    Platform,
    Library,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledSkill {
    pub skill_id: String,
    pub installed_version: String,
    pub path: String,
    pub installed_at: DateTime<Utc>,
    pub activation_count: u64,
    pub last_activated_at: Option<DateTime<Utc>>,
    pub character_budget_at_install: u32,
    pub priority: Option<InstallPriority>,
    pub priority_locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallPriority {
    Essential,
    Recommended,
    Optional,
}

/// Symmetric pairwise counter. Writing always touches both orderings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoInstallEdge {
    pub skill_a: String,
    pub skill_b: String,
    pub install_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncFrequency {
    Daily,
    Weekly,
}

impl SyncFrequency {
    /// Frequency → interval mapping is fixed (spec §4.5).
    pub fn interval_ms(self) -> i64 {
        match self {
            Self::Daily => 86_400_000,
            Self::Weekly => 604_800_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub enabled: bool,
    pub frequency: SyncFrequency,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub next_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunStatus {
    Running,
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SyncRunStatus,
    pub added: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Accept,
    Dismiss,
    Usage,
    Abandonment,
    Uninstall,
}

impl SignalType {
    /// Reward mapping used by the trajectory converter (spec §4.9).
    pub fn reward(self) -> f64 {
        match self {
            Self::Accept => 1.0,
            Self::Dismiss => -0.5,
            Self::Usage => 0.3,
            Self::Abandonment => -0.3,
            Self::Uninstall => -0.7,
        }
    }
}

/// Immutable user-outcome event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub signal_type: SignalType,
    pub skill_id: String,
    pub context: ContextV1,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Versioned tagged-union context snapshot (spec §9 re-architecture note).
/// Serialization is byte-stable so embeddings can be regenerated
/// deterministically from the same bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextV1 {
    pub query: Option<String>,
    pub detected_technologies: Vec<String>,
    pub recommendation_source: Option<String>,
    pub extra: HashMap<String, String>,
}

impl ContextV1 {
    /// Deterministic byte encoding fed to the embedder: fields in a fixed
    /// order, `\n`-joined, so the same context always yields the same text.
    pub fn to_embedding_text(&self) -> String {
        let mut parts = vec![
            format!("query={}", self.query.clone().unwrap_or_default()),
            format!("techs={}", self.detected_technologies.join(",")),
            format!(
                "source={}",
                self.recommendation_source.clone().unwrap_or_default()
            ),
        ];
        let mut extra_keys: Vec<&String> = self.extra.keys().collect();
        extra_keys.sort();
        for k in extra_keys {
            parts.push(format!("{k}={}", self.extra[k]));
        }
        parts.join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub success: bool,
    pub confidence: f64,
}

/// One signal becomes one 1-step trajectory in this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: String,
    pub action: String,
    pub observation: String,
    pub reward: f64,
    pub metadata: HashMap<String, String>,
    pub verdict: Verdict,
}

/// Subset of `Skill` carried in a pattern row for later ranking without a
/// catalog round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillFeatures {
    pub skill_id: String,
    pub trust_tier: TrustTier,
    pub categories: Vec<String>,
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationSource {
    Search,
    Recommend,
    Install,
    Compare,
}

/// A stored trajectory plus its context embedding and importance metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub embedding: Vec<f32>,
    pub skill_features: SkillFeatures,
    pub outcome: SignalType,
    pub reward: f64,
    pub original_score: f64,
    pub recommendation_source: RecommendationSource,
    pub importance: f64,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// Diagonal Fisher-information approximation (spec §4.9, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FisherInfo {
    pub dimension: usize,
    pub update_count: u64,
    pub importance: Vec<f32>,
    pub running_sum: Vec<f32>,
}

impl FisherInfo {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            update_count: 0,
            importance: vec![0.0; dimension],
            running_sum: vec![0.0; dimension],
        }
    }

    /// `{u32 update_count, D x f32 importance, D x f32 running_sum}`,
    /// little-endian (spec §5).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.dimension * 8);
        buf.extend_from_slice(&(self.update_count as u32).to_le_bytes());
        for v in &self.importance {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        for v in &self.running_sum {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf
    }

    pub fn from_bytes(dimension: usize, bytes: &[u8]) -> Option<Self> {
        let expected = 4 + dimension * 8;
        if bytes.len() != expected {
            return None;
        }
        let update_count = u32::from_le_bytes(bytes[0..4].try_into().ok()?) as u64;
        let mut importance = Vec::with_capacity(dimension);
        for i in 0..dimension {
            let off = 4 + i * 4;
            importance.push(f32::from_le_bytes(bytes[off..off + 4].try_into().ok()?));
        }
        let mut running_sum = Vec::with_capacity(dimension);
        let base = 4 + dimension * 4;
        for i in 0..dimension {
            let off = base + i * 4;
            running_sum.push(f32::from_le_bytes(bytes[off..off + 4].try_into().ok()?));
        }
        Some(Self {
            dimension,
            update_count,
            importance,
            running_sum,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocklistEntry {
    pub skill_id: String,
    pub reason: String,
    pub added_at: DateTime<Utc>,
}

/// Every mutating operation across ingestion, install decisions, and signal
/// recording appends one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub event_type: String,
    pub actor: String,
    pub result: String,
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Default embedding dimension (spec §3).
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
