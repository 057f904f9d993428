//! Co-install graph repository (spec §4.10). Writing an edge always writes
//! both orderings in the same transaction, same "no-op on missing table"
//! contract as every other repository here.

use sqlx::Row;

use crate::error::{is_missing_table_error, CatalogResult};
use crate::store::CatalogStore;

pub struct CoInstallSummary {
    pub skill_id: String,
    pub install_count: u64,
}

impl CatalogStore {
    pub async fn record_co_install(&self, a: &str, b: &str) -> CatalogResult<()> {
        if a == b {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (x, y) in [(a, b), (b, a)] {
            sqlx::query(
                "INSERT INTO co_install_edges (skill_a, skill_b, install_count) VALUES (?, ?, 1) \
                 ON CONFLICT(skill_a, skill_b) DO UPDATE SET install_count = install_count + 1",
            )
            .bind(x)
            .bind(y)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Records every unordered pair exactly once per session.
    pub async fn record_co_install_session(&self, skill_ids: &[String]) -> CatalogResult<()> {
        for i in 0..skill_ids.len() {
            for j in (i + 1)..skill_ids.len() {
                self.record_co_install(&skill_ids[i], &skill_ids[j]).await?;
            }
        }
        Ok(())
    }

    pub async fn top_co_installs(
        &self,
        skill_id: &str,
        limit: u32,
        min_count: u64,
    ) -> CatalogResult<Vec<CoInstallSummary>> {
        let rows = match sqlx::query(
            "SELECT skill_b, install_count FROM co_install_edges \
             WHERE skill_a = ? AND install_count >= ? ORDER BY install_count DESC LIMIT ?",
        )
        .bind(skill_id)
        .bind(min_count as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) if is_missing_table_error(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        rows.into_iter()
            .map(|row| {
                Ok(CoInstallSummary {
                    skill_id: row.try_get("skill_b")?,
                    install_count: row.try_get::<i64, _>("install_count")? as u64,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn symmetric_after_single_record() {
        let store = test_store().await;
        store.record_co_install("a", "b").await.unwrap();

        let from_a = store.top_co_installs("a", 5, 1).await.unwrap();
        let from_b = store.top_co_installs("b", 5, 1).await.unwrap();
        assert_eq!(from_a[0].skill_id, "b");
        assert_eq!(from_b[0].skill_id, "a");
        assert_eq!(from_a[0].install_count, from_b[0].install_count);
    }

    #[tokio::test]
    async fn self_pair_is_a_no_op() {
        let store = test_store().await;
        store.record_co_install("a", "a").await.unwrap();
        assert!(store.top_co_installs("a", 5, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn below_min_count_is_not_surfaced() {
        let store = test_store().await;
        store.record_co_install("a", "b").await.unwrap();
        assert!(store.top_co_installs("a", 5, 5).await.unwrap().is_empty());
    }
}
