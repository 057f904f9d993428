//! Sync controller (C5, spec §4.5): decides when a catalog refresh is due
//! and enforces the single-writer invariant around `skillsmith-catalog`'s
//! `sync_runs` table, with the actual "only one run at a time" enforcement
//! living in the catalog's atomic `start_sync_run`/`complete_sync_run`
//! pair.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use skillsmith_catalog::CatalogStore;
use skillsmith_core::collaborators::Clock;
use skillsmith_core::model::{SyncConfig, SyncFrequency, SyncRun, SyncRunStatus};

use crate::error::{Result, RuntimeError};

#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub config: SyncConfig,
    pub current_run: Option<SyncRun>,
    pub last_run: Option<SyncRun>,
}

#[derive(Debug, Clone, Default)]
pub struct RunCounts {
    pub added: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub errors: Vec<String>,
}

impl RunCounts {
    /// Status is derived from counts and errors (spec §4.5), never passed in
    /// directly: a run with no errors is `success`; a run with errors but
    /// some progress is `partial`; a run with errors and no progress at all
    /// is `failed`.
    fn status(&self) -> SyncRunStatus {
        if self.errors.is_empty() {
            SyncRunStatus::Success
        } else if self.added + self.updated + self.unchanged > 0 {
            SyncRunStatus::Partial
        } else {
            SyncRunStatus::Failed
        }
    }

    fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("; "))
        }
    }
}

/// Estimated duration per skill probed, used for the full-sync preview.
const ESTIMATED_MS_PER_SKILL: i64 = 200;

#[derive(Debug, Clone)]
pub enum FullSyncOutcome {
    Preview { estimated_duration_ms: i64 },
    Started { run_id: String },
}

pub struct SyncController {
    catalog: Arc<CatalogStore>,
    clock: Arc<dyn Clock>,
}

impl SyncController {
    pub fn new(catalog: Arc<CatalogStore>, clock: Arc<dyn Clock>) -> Self {
        Self { catalog, clock }
    }

    /// Due when enabled and either never synced or the configured interval
    /// has elapsed since `last_sync_at` (spec §4.5 frequency → interval
    /// mapping: daily = 86,400,000ms, weekly = 604,800,000ms).
    pub async fn is_due(&self) -> Result<bool> {
        let config = self.catalog.get_sync_config().await?;
        if !config.enabled {
            return Ok(false);
        }
        let Some(last_sync_at) = config.last_sync_at else {
            return Ok(true);
        };
        let elapsed = self.clock.now() - last_sync_at;
        Ok(elapsed.num_milliseconds() >= config.frequency.interval_ms())
    }

    /// Starts a new run, failing with [`RuntimeError::SyncInProgress`] if one
    /// is already running.
    pub async fn start_run(&self) -> Result<String> {
        self.catalog
            .start_sync_run(self.clock.now())
            .await?
            .ok_or(RuntimeError::SyncInProgress)
    }

    /// A forced full resync only actually starts when `confirm` is set;
    /// otherwise it returns an estimate and takes no action (spec §4.5).
    pub async fn request_full_sync(&self, estimated_skill_count: u64, confirm: bool) -> Result<FullSyncOutcome> {
        if !confirm {
            return Ok(FullSyncOutcome::Preview {
                estimated_duration_ms: estimated_skill_count as i64 * ESTIMATED_MS_PER_SKILL,
            });
        }
        Ok(FullSyncOutcome::Started { run_id: self.start_run().await? })
    }

    pub async fn complete_run(&self, run_id: &str, counts: RunCounts) -> Result<SyncRunStatus> {
        let now = self.clock.now();
        let status = counts.status();
        self.catalog
            .complete_sync_run(
                run_id,
                status,
                counts.added,
                counts.updated,
                counts.unchanged,
                counts.error_summary().as_deref(),
                now,
            )
            .await?;
        self.advance_schedule(now, counts.error_summary()).await?;
        Ok(status)
    }

    pub async fn fail_run(&self, run_id: &str, error: &str) -> Result<()> {
        let now = self.clock.now();
        self.catalog
            .complete_sync_run(run_id, SyncRunStatus::Failed, 0, 0, 0, Some(error), now)
            .await?;
        self.advance_schedule(now, Some(error.to_string())).await
    }

    /// A failed or partial run still advances `next_sync_at` by a full
    /// interval rather than retrying immediately — an upstream outage
    /// shouldn't turn into a tight poll loop. `last_sync_at` is only bumped
    /// when there were no errors at all, so `is_due` keeps reflecting "data
    /// as of the last fully clean sync."
    async fn advance_schedule(&self, now: DateTime<Utc>, error: Option<String>) -> Result<()> {
        let mut config = self.catalog.get_sync_config().await?;
        if error.is_none() {
            config.last_sync_at = Some(now);
        }
        config.next_sync_at = Some(now + chrono::Duration::milliseconds(config.frequency.interval_ms()));
        config.last_error = error;
        self.catalog.update_sync_config(&config).await?;
        Ok(())
    }

    /// If `last_sync_at` is already set, changing frequency recomputes
    /// `next_sync_at` immediately rather than waiting for the next run
    /// (spec §4.5).
    pub async fn set_frequency(&self, frequency: SyncFrequency) -> Result<()> {
        let mut config = self.catalog.get_sync_config().await?;
        config.frequency = frequency;
        if let Some(last_sync_at) = config.last_sync_at {
            config.next_sync_at = Some(last_sync_at + chrono::Duration::milliseconds(frequency.interval_ms()));
        }
        self.catalog.update_sync_config(&config).await?;
        Ok(())
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        let mut config = self.catalog.get_sync_config().await?;
        config.enabled = enabled;
        self.catalog.update_sync_config(&config).await?;
        Ok(())
    }

    pub async fn get_status(&self) -> Result<SyncStatus> {
        let config = self.catalog.get_sync_config().await?;
        let current_run = self.catalog.current_running_sync_run().await?;
        let last_run = self.catalog.list_sync_history(1).await?.into_iter().next();
        Ok(SyncStatus {
            config,
            current_run,
            last_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillsmith_core::collaborators::test_support::FixedClock;

    async fn controller() -> (SyncController, Arc<FixedClock>) {
        let catalog = Arc::new(CatalogStore::open(":memory:", 384).await.unwrap());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let clock_handle: Arc<dyn Clock> = Arc::clone(&clock);
        (SyncController::new(catalog, clock_handle), clock)
    }

    #[tokio::test]
    async fn never_synced_is_due_immediately() {
        let (controller, _clock) = controller().await;
        assert!(controller.is_due().await.unwrap());
    }

    #[tokio::test]
    async fn completing_a_clean_run_pushes_next_sync_into_the_future() {
        let (controller, clock) = controller().await;
        let run_id = controller.start_run().await.unwrap();
        let status = controller
            .complete_run(&run_id, RunCounts { added: 3, updated: 1, unchanged: 0, errors: vec![] })
            .await
            .unwrap();
        assert_eq!(status, SyncRunStatus::Success);
        assert!(!controller.is_due().await.unwrap());

        clock.advance(chrono::Duration::milliseconds(SyncFrequency::Daily.interval_ms()));
        assert!(controller.is_due().await.unwrap());
    }

    #[tokio::test]
    async fn errors_with_progress_yield_partial_status() {
        let (controller, _clock) = controller().await;
        let run_id = controller.start_run().await.unwrap();
        let status = controller
            .complete_run(
                &run_id,
                RunCounts { added: 2, updated: 0, unchanged: 0, errors: vec!["one source failed".into()] },
            )
            .await
            .unwrap();
        assert_eq!(status, SyncRunStatus::Partial);
    }

    #[tokio::test]
    async fn errors_with_no_progress_yield_failed_status() {
        let (controller, _clock) = controller().await;
        let run_id = controller.start_run().await.unwrap();
        let status = controller
            .complete_run(
                &run_id,
                RunCounts { added: 0, updated: 0, unchanged: 0, errors: vec!["every source failed".into()] },
            )
            .await
            .unwrap();
        assert_eq!(status, SyncRunStatus::Failed);
    }

    #[tokio::test]
    async fn a_second_concurrent_run_is_refused() {
        let (controller, _clock) = controller().await;
        let _run_id = controller.start_run().await.unwrap();
        let err = controller.start_run().await.unwrap_err();
        assert!(matches!(err, RuntimeError::SyncInProgress));
    }

    #[tokio::test]
    async fn unconfirmed_full_sync_is_a_preview_that_takes_no_action() {
        let (controller, _clock) = controller().await;
        let outcome = controller.request_full_sync(50, false).await.unwrap();
        assert!(matches!(outcome, FullSyncOutcome::Preview { estimated_duration_ms } if estimated_duration_ms == 10_000));
        // No run was started, so a normal start_run still succeeds.
        assert!(controller.start_run().await.is_ok());
    }

    #[tokio::test]
    async fn confirmed_full_sync_starts_a_run() {
        let (controller, _clock) = controller().await;
        let outcome = controller.request_full_sync(10, true).await.unwrap();
        assert!(matches!(outcome, FullSyncOutcome::Started { .. }));
    }

    #[tokio::test]
    async fn failed_run_advances_schedule_but_not_last_sync_at() {
        let (controller, _clock) = controller().await;
        let run_id = controller.start_run().await.unwrap();
        controller.fail_run(&run_id, "upstream timeout").await.unwrap();

        let status = controller.get_status().await.unwrap();
        assert!(status.config.last_sync_at.is_none());
        assert!(status.config.next_sync_at.is_some());
        assert_eq!(status.config.last_error.as_deref(), Some("upstream timeout"));
    }

    #[tokio::test]
    async fn disabled_sync_is_never_due() {
        let (controller, _clock) = controller().await;
        controller.set_enabled(false).await.unwrap();
        assert!(!controller.is_due().await.unwrap());
    }
}
