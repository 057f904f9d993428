//! Pre-install safety gate (C8, spec §4.8): six ordered checks run before
//! every install, independent of each other so the caller always sees the
//! full picture rather than the first failure.

use std::sync::Arc;

use chrono::Utc;
use skillsmith_catalog::CatalogStore;
use skillsmith_core::model::{InstalledSkill, SecurityScanStatus, Skill};

use crate::error::{Result, RuntimeError};

/// Two skills conflict once their trigger phrases and output file patterns
/// overlap by at least this fraction (spec §4.8).
pub const CONFLICT_OVERLAP_THRESHOLD: f64 = 0.40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Blocking,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckName {
    Existence,
    Blocklist,
    AlreadyInstalled,
    Conflict,
    SecurityScan,
    Budget,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub check: CheckName,
    pub passed: bool,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ConflictDetail {
    pub with_skill_id: String,
    pub overlap_fraction: f64,
    pub shared_output_pattern: bool,
}

#[derive(Debug, Clone)]
pub struct SafetyReport {
    pub skill_id: String,
    pub checks: Vec<CheckResult>,
    pub conflicts: Vec<ConflictDetail>,
    pub can_proceed: bool,
    pub budget_current: u32,
    pub budget_requested: u32,
    pub budget_limit: u32,
}

impl SafetyReport {
    fn first_blocking_error(&self) -> Option<RuntimeError> {
        for check in &self.checks {
            if check.passed || check.severity != Severity::Blocking {
                continue;
            }
            let error = match check.check {
                CheckName::Blocklist => RuntimeError::SkillBlocked {
                    skill_id: self.skill_id.clone(),
                    reason: check.message.clone(),
                },
                CheckName::AlreadyInstalled => RuntimeError::SkillAlreadyInstalled(self.skill_id.clone()),
                CheckName::Conflict => self
                    .conflicts
                    .iter()
                    .find(|c| c.overlap_fraction >= CONFLICT_OVERLAP_THRESHOLD || c.shared_output_pattern)
                    .map(|c| RuntimeError::ConflictDetected {
                        a: self.skill_id.clone(),
                        b: c.with_skill_id.clone(),
                        overlap_pct: c.overlap_fraction * 100.0,
                    })
                    .unwrap_or_else(|| RuntimeError::Internal("conflict check failed without a conflict detail".into())),
                CheckName::SecurityScan => RuntimeError::SecurityScanFailed(self.skill_id.clone()),
                CheckName::Budget => RuntimeError::BudgetExceeded {
                    current: self.budget_current as u64,
                    requested: self.budget_requested as u64,
                    limit: self.budget_limit as u64,
                },
                CheckName::Existence => RuntimeError::SkillNotFound(self.skill_id.clone()),
            };
            return Some(error);
        }
        None
    }
}

fn overlap_fraction(a: &Skill, b: &Skill) -> (f64, bool) {
    let a_set: std::collections::HashSet<&str> = a
        .trigger_phrases
        .iter()
        .chain(a.output_file_patterns.iter())
        .map(String::as_str)
        .collect();
    let b_set: std::collections::HashSet<&str> = b
        .trigger_phrases
        .iter()
        .chain(b.output_file_patterns.iter())
        .map(String::as_str)
        .collect();
    if a_set.is_empty() || b_set.is_empty() {
        return (0.0, false);
    }
    let intersection = a_set.intersection(&b_set).count();
    let union = a_set.union(&b_set).count();
    let fraction = if union == 0 { 0.0 } else { intersection as f64 / union as f64 };
    let shared_output_pattern = a
        .output_file_patterns
        .iter()
        .any(|p| b.output_file_patterns.iter().any(|q| p == q));
    (fraction, shared_output_pattern)
}

pub struct PreInstallSafety {
    catalog: Arc<CatalogStore>,
}

impl PreInstallSafety {
    pub fn new(catalog: Arc<CatalogStore>) -> Self {
        Self { catalog }
    }

    /// Runs every check regardless of earlier failures (spec §4.8: "All
    /// checks and their results are recorded... regardless of whether
    /// install proceeds"). Only the existence check can short-circuit the
    /// rest, since nothing downstream has a skill record to check against.
    pub async fn evaluate(&self, skill_id: &str, current_usage: u32, budget_limit: u32) -> Result<SafetyReport> {
        let Some(skill) = self.catalog.get_skill(skill_id).await? else {
            return Err(RuntimeError::SkillNotFound(skill_id.to_string()));
        };

        let mut checks = Vec::new();
        checks.push(CheckResult {
            check: CheckName::Existence,
            passed: true,
            severity: Severity::Info,
            message: format!("{skill_id} is in the catalog"),
        });

        let blocklisted = self.catalog.is_blocklisted(skill_id).await?;
        let blocklist_reason = if blocklisted {
            self.catalog
                .get_blocklist_entry(skill_id)
                .await?
                .map(|e| e.reason)
                .unwrap_or_else(|| "blocklisted".to_string())
        } else {
            String::new()
        };
        checks.push(CheckResult {
            check: CheckName::Blocklist,
            passed: !blocklisted,
            severity: Severity::Blocking,
            message: if blocklisted { blocklist_reason } else { "not blocklisted".to_string() },
        });

        let already_installed = self.catalog.get_installed_skill(skill_id).await?.is_some();
        checks.push(CheckResult {
            check: CheckName::AlreadyInstalled,
            passed: !already_installed,
            severity: Severity::Blocking,
            message: if already_installed {
                format!("{skill_id} is already installed")
            } else {
                "not currently installed".to_string()
            },
        });

        let installed = self.catalog.list_installed_skills().await?;
        let mut conflicts = Vec::new();
        for other in &installed {
            if other.skill_id == skill_id {
                continue;
            }
            let Some(other_skill) = self.catalog.get_skill(&other.skill_id).await? else {
                continue;
            };
            let (fraction, shared_output_pattern) = overlap_fraction(&skill, &other_skill);
            if fraction >= CONFLICT_OVERLAP_THRESHOLD || shared_output_pattern {
                conflicts.push(ConflictDetail { with_skill_id: other.skill_id.clone(), overlap_fraction: fraction, shared_output_pattern });
            }
        }
        checks.push(CheckResult {
            check: CheckName::Conflict,
            passed: conflicts.is_empty(),
            severity: Severity::Blocking,
            message: if conflicts.is_empty() {
                "no conflicting installed skills".to_string()
            } else {
                format!("conflicts with {} installed skill(s)", conflicts.len())
            },
        });

        let (scan_passed, scan_severity, scan_message) = match skill.security_scan_status {
            SecurityScanStatus::Failed => (false, Severity::Blocking, "security scan failed".to_string()),
            SecurityScanStatus::Warning => (true, Severity::Warning, "security scan raised warnings".to_string()),
            SecurityScanStatus::Passed => (true, Severity::Info, "security scan passed".to_string()),
            SecurityScanStatus::Pending => (true, Severity::Info, "security scan pending".to_string()),
        };
        checks.push(CheckResult { check: CheckName::SecurityScan, passed: scan_passed, severity: scan_severity, message: scan_message });

        let projected_usage = current_usage as u64 + skill.character_budget as u64;
        let budget_ok = projected_usage <= budget_limit as u64;
        checks.push(CheckResult {
            check: CheckName::Budget,
            passed: budget_ok,
            severity: Severity::Blocking,
            message: if budget_ok {
                format!("{projected_usage}/{budget_limit} characters")
            } else {
                format!("installing would use {projected_usage} of {budget_limit} available characters")
            },
        });

        let can_proceed = !checks.iter().any(|c| !c.passed && c.severity == Severity::Blocking);
        Ok(SafetyReport {
            skill_id: skill_id.to_string(),
            checks,
            conflicts,
            can_proceed,
            budget_current: current_usage,
            budget_requested: skill.character_budget,
            budget_limit,
        })
    }

    /// Standalone conflict check (spec §6 `check_conflicts`), independent of
    /// a full install evaluation: compares `skill_id` against either the
    /// currently installed set or an explicit candidate list.
    pub async fn check_conflicts(&self, skill_id: &str, against: &[String]) -> Result<Vec<ConflictDetail>> {
        let skill = self.catalog.get_skill(skill_id).await?.ok_or_else(|| RuntimeError::SkillNotFound(skill_id.to_string()))?;
        let mut conflicts = Vec::new();
        for other_id in against {
            if other_id == skill_id {
                continue;
            }
            let Some(other_skill) = self.catalog.get_skill(other_id).await? else {
                continue;
            };
            let (fraction, shared_output_pattern) = overlap_fraction(&skill, &other_skill);
            if fraction >= CONFLICT_OVERLAP_THRESHOLD || shared_output_pattern {
                conflicts.push(ConflictDetail { with_skill_id: other_id.clone(), overlap_fraction: fraction, shared_output_pattern });
            }
        }
        Ok(conflicts)
    }

    /// Evaluates, then — unless `force` or every blocking check passed —
    /// refuses with the specific error for the first blocking failure.
    /// On success, records the install and an audit entry carrying the
    /// full report (so warnings survive even when the install proceeds).
    pub async fn install(
        &self,
        skill_id: &str,
        path: &str,
        force: bool,
        current_usage: u32,
        budget_limit: u32,
    ) -> Result<SafetyReport> {
        let report = self.evaluate(skill_id, current_usage, budget_limit).await?;
        if !report.can_proceed && !force {
            return Err(report.first_blocking_error().unwrap_or(RuntimeError::Internal("blocked install with no blocking check".into())));
        }

        let skill = self.catalog.get_skill(skill_id).await?.ok_or_else(|| RuntimeError::SkillNotFound(skill_id.to_string()))?;
        self.catalog
            .install_skill(&InstalledSkill {
                skill_id: skill_id.to_string(),
                installed_version: skill.current_version.clone(),
                path: path.to_string(),
                installed_at: Utc::now(),
                activation_count: 0,
                last_activated_at: None,
                character_budget_at_install: skill.character_budget,
                priority: None,
                priority_locked: false,
            })
            .await?;

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("skill_id".to_string(), skill_id.to_string());
        metadata.insert("forced".to_string(), force.to_string());
        metadata.insert("warnings".to_string(), report.checks.iter().filter(|c| c.severity == Severity::Warning).count().to_string());
        self.catalog.append_audit_entry("skill.installed", "system", "ok", &metadata).await?;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillsmith_core::model::TrustTier;

    fn skill(id: &str, triggers: &[&str], patterns: &[&str]) -> Skill {
        Skill {
            id: id.to_string(),
            source: "github".to_string(),
            author_slug: "acme".to_string(),
            name: id.to_string(),
            display_name: id.to_string(),
            description: "desc".to_string(),
            repo_url: format!("https://github.com/acme/{id}"),
            default_branch: "main".to_string(),
            categories: vec![],
            technologies: vec![],
            trust_tier: TrustTier::Verified,
            quality_score: 0.8,
            installable: true,
            current_version: "1.0.0".to_string(),
            character_budget: 500,
            security_scan_status: SecurityScanStatus::Passed,
            trigger_phrases: triggers.iter().map(|s| s.to_string()).collect(),
            output_file_patterns: patterns.iter().map(|s| s.to_string()).collect(),
            stars: 10,
            forks: 0,
            has_tests: false,
            has_examples: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn catalog() -> Arc<CatalogStore> {
        Arc::new(CatalogStore::open(":memory:", 384).await.unwrap())
    }

    #[tokio::test]
    async fn unknown_skill_fails_existence_immediately() {
        let catalog = catalog().await;
        let safety = PreInstallSafety::new(catalog);
        let err = safety.evaluate("ghost", 0, 1000).await.unwrap_err();
        assert!(matches!(err, RuntimeError::SkillNotFound(_)));
    }

    #[tokio::test]
    async fn clean_install_passes_every_check() {
        let catalog = catalog().await;
        catalog.upsert_skill(&skill("a", &["deploy"], &["*.yml"])).await.unwrap();
        let safety = PreInstallSafety::new(catalog);
        let report = safety.evaluate("a", 0, 10_000).await.unwrap();
        assert!(report.can_proceed);
        assert!(report.checks.iter().all(|c| c.passed));
    }

    #[tokio::test]
    async fn blocklisted_skill_blocks_unless_forced() {
        let catalog = catalog().await;
        catalog.upsert_skill(&skill("a", &[], &[])).await.unwrap();
        catalog
            .add_blocklist_entry(&skillsmith_core::model::BlocklistEntry {
                skill_id: "a".to_string(),
                reason: "known malicious payload".to_string(),
                added_at: Utc::now(),
            })
            .await
            .unwrap();
        let safety = PreInstallSafety::new(catalog);
        let report = safety.evaluate("a", 0, 10_000).await.unwrap();
        assert!(!report.can_proceed);

        let err = safety.install("a", "/skills/a", false, 0, 10_000).await.unwrap_err();
        assert!(matches!(err, RuntimeError::SkillBlocked { .. }));
    }

    #[tokio::test]
    async fn overlapping_triggers_are_reported_as_a_conflict() {
        let catalog = catalog().await;
        catalog.upsert_skill(&skill("a", &["deploy", "release"], &["*.yml"])).await.unwrap();
        catalog.upsert_skill(&skill("b", &["deploy"], &["*.yml"])).await.unwrap();
        catalog
            .install_skill(&InstalledSkill {
                skill_id: "b".to_string(),
                installed_version: "1.0.0".to_string(),
                path: "/skills/b".to_string(),
                installed_at: Utc::now(),
                activation_count: 0,
                last_activated_at: None,
                character_budget_at_install: 500,
                priority: None,
                priority_locked: false,
            })
            .await
            .unwrap();

        let safety = PreInstallSafety::new(catalog);
        let report = safety.evaluate("a", 0, 10_000).await.unwrap();
        assert!(!report.can_proceed);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].with_skill_id, "b");
    }

    #[tokio::test]
    async fn over_budget_install_is_rejected_unless_forced() {
        let catalog = catalog().await;
        catalog.upsert_skill(&skill("a", &[], &[])).await.unwrap();
        let safety = PreInstallSafety::new(Arc::clone(&catalog));
        let report = safety.evaluate("a", 900, 1000).await.unwrap();
        assert!(!report.can_proceed);

        let err = safety.install("a", "/skills/a", false, 900, 1000).await.unwrap_err();
        assert!(matches!(err, RuntimeError::BudgetExceeded { .. }));

        let forced = safety.install("a", "/skills/a", true, 900, 1000).await.unwrap();
        assert!(!forced.checks.iter().find(|c| c.check == CheckName::Budget).unwrap().passed);
        assert!(catalog.get_installed_skill("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn check_conflicts_reports_overlap_against_an_explicit_list() {
        let catalog = catalog().await;
        catalog.upsert_skill(&skill("a", &["deploy", "release"], &["*.yml"])).await.unwrap();
        catalog.upsert_skill(&skill("b", &["deploy"], &["*.yml"])).await.unwrap();
        catalog.upsert_skill(&skill("c", &["unrelated"], &["*.md"])).await.unwrap();

        let safety = PreInstallSafety::new(catalog);
        let conflicts = safety.check_conflicts("a", &["b".to_string(), "c".to_string()]).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].with_skill_id, "b");
    }

    #[tokio::test]
    async fn failed_security_scan_blocks_unless_forced() {
        let catalog = catalog().await;
        let mut s = skill("a", &[], &[]);
        s.security_scan_status = SecurityScanStatus::Failed;
        catalog.upsert_skill(&s).await.unwrap();
        let safety = PreInstallSafety::new(catalog);
        let err = safety.install("a", "/skills/a", false, 0, 10_000).await.unwrap_err();
        assert!(matches!(err, RuntimeError::SecurityScanFailed(_)));
    }
}
