//! Co-install graph (C10, spec §4.10): a thin wrapper over
//! `skillsmith-catalog`'s already-symmetric edge repository. No ranking
//! logic lives here; `recommend` and `safety` call through this for the
//! "people who installed X also installed" signal.

use std::sync::Arc;

use skillsmith_catalog::{CatalogStore, CoInstallSummary};

use crate::error::Result;

pub struct CoInstallGraph {
    catalog: Arc<CatalogStore>,
}

impl CoInstallGraph {
    pub fn new(catalog: Arc<CatalogStore>) -> Self {
        Self { catalog }
    }

    pub async fn record_install(&self, skill_id: &str, already_installed: &[String]) -> Result<()> {
        for other in already_installed {
            self.catalog.record_co_install(skill_id, other).await?;
        }
        Ok(())
    }

    pub async fn record_session(&self, skill_ids: &[String]) -> Result<()> {
        self.catalog.record_co_install_session(skill_ids).await?;
        Ok(())
    }

    /// Default minimum co-install count before a pairing is surfaced; below
    /// this a single coincidental install would dominate the suggestion.
    pub const DEFAULT_MIN_COUNT: u64 = 2;

    pub async fn top_co_installs(&self, skill_id: &str, limit: u32) -> Result<Vec<CoInstallSummary>> {
        Ok(self
            .catalog
            .top_co_installs(skill_id, limit, Self::DEFAULT_MIN_COUNT)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillsmith_catalog::CatalogStore;

    async fn graph() -> CoInstallGraph {
        let catalog = Arc::new(CatalogStore::open(":memory:", 384).await.unwrap());
        CoInstallGraph::new(catalog)
    }

    #[tokio::test]
    async fn recording_an_install_links_it_to_every_existing_skill() {
        let graph = graph().await;
        graph
            .record_install("new-skill", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        // Single install, below DEFAULT_MIN_COUNT, is not yet surfaced.
        assert!(graph.top_co_installs("a", 5).await.unwrap().is_empty());

        graph
            .record_install("new-skill", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let top = graph.top_co_installs("a", 5).await.unwrap();
        assert_eq!(top[0].skill_id, "new-skill");
        assert_eq!(top[0].install_count, 2);
    }

    #[tokio::test]
    async fn recording_a_session_links_every_pair() {
        let graph = graph().await;
        graph
            .record_session(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        graph
            .record_session(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        let top = graph.top_co_installs("a", 5).await.unwrap();
        assert_eq!(top.len(), 2);
    }
}
