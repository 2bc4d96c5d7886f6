//! Leaderboards
//!
//! Ranked ordering of user scores per (category, season) partition.
//!
//! Every change rewrites the whole partition: read, sort, renumber 1..N, write
//! back in one commit. Callers serialize writers with the partition's lock key,
//! so two completions never interleave their renumbering.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::ids::UserId;
use crate::core::mode::{Category, ScoreOrder, Season};
use crate::error::DuelError;
use crate::store::{board_key, KeyLocks, PartitionRewrite, Store, WriteSet};

/// One ranked row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Owner.
    pub user_id: UserId,
    /// Category.
    pub category: Category,
    /// Season.
    pub season: Season,
    /// Seconds, moves or wins depending on category.
    pub score: f64,
    /// Owner's rating when the score was recorded.
    pub rating_snapshot: i32,
    /// Dense 1-based rank.
    pub rank_position: u32,
    /// Insertion order within the partition. Breaks score ties.
    pub seq: u64,
    /// Last improvement.
    pub updated_at: DateTime<Utc>,
}

/// Score offered for one user.
#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    /// Submitting user.
    pub user_id: UserId,
    /// Candidate score.
    pub score: f64,
    /// Rating at submission time.
    pub rating_snapshot: i32,
}

/// Result of planning an upsert against a partition.
#[derive(Clone, Debug)]
pub struct PartitionPlan {
    /// Full partition after the upsert, ordered by rank.
    pub rows: Vec<LeaderboardEntry>,
    /// False when the submission did not strictly improve an existing row.
    pub changed: bool,
    /// Submitter's rank after the upsert.
    pub rank: u32,
}

/// Sort a partition under `order` (ties by insertion) and renumber 1..N.
pub fn rerank(rows: &mut [LeaderboardEntry], order: ScoreOrder) {
    rows.sort_by(|a, b| order.compare(a.score, b.score).then(a.seq.cmp(&b.seq)));
    for (idx, row) in rows.iter_mut().enumerate() {
        row.rank_position = idx as u32 + 1;
    }
}

/// Plan an insert-or-improve of `submission` into `partition`.
pub fn plan_upsert(
    partition: &[LeaderboardEntry],
    category: &Category,
    season: &Season,
    submission: &Submission,
    now: DateTime<Utc>,
) -> PartitionPlan {
    let order = category.order();
    let mut rows = partition.to_vec();

    let changed = match rows.iter_mut().find(|r| r.user_id == submission.user_id) {
        Some(existing) => {
            if order.is_better(submission.score, existing.score) {
                existing.score = submission.score;
                existing.rating_snapshot = submission.rating_snapshot;
                existing.updated_at = now;
                true
            } else {
                false
            }
        }
        None => {
            let seq = rows.iter().map(|r| r.seq + 1).max().unwrap_or(0);
            rows.push(LeaderboardEntry {
                user_id: submission.user_id,
                category: category.clone(),
                season: season.clone(),
                score: submission.score,
                rating_snapshot: submission.rating_snapshot,
                rank_position: 0,
                seq,
                updated_at: now,
            });
            true
        }
    };

    if changed {
        rerank(&mut rows, order);
    }

    let rank = rows
        .iter()
        .find(|r| r.user_id == submission.user_id)
        .map(|r| r.rank_position)
        .unwrap_or(0);

    PartitionPlan { rows, changed, rank }
}

/// Leaderboard reads and standalone writes over the store.
pub struct LeaderboardIndex {
    store: Arc<dyn Store>,
    locks: Arc<KeyLocks>,
}

impl LeaderboardIndex {
    /// Create an index over `store`, sharing `locks` with the session registry.
    pub fn new(store: Arc<dyn Store>, locks: Arc<KeyLocks>) -> Self {
        Self { store, locks }
    }

    /// Plan an upsert against the stored partition.
    ///
    /// The caller must hold the partition's lock key until the plan is committed.
    pub async fn plan(
        &self,
        category: &Category,
        season: &Season,
        submission: &Submission,
    ) -> Result<PartitionPlan, DuelError> {
        let partition = self.store.leaderboard(category, season).await?;
        Ok(plan_upsert(&partition, category, season, submission, Utc::now()))
    }

    /// Insert or improve one user's score and renumber the partition atomically.
    ///
    /// Returns the user's rank afterwards.
    #[instrument(skip(self), fields(user = %user_id.short()))]
    pub async fn upsert_and_reorder(
        &self,
        user_id: UserId,
        category: &Category,
        season: &Season,
        score: f64,
        rating_snapshot: i32,
    ) -> Result<u32, DuelError> {
        if !score.is_finite() || score < 0.0 {
            return Err(DuelError::Validation(format!("score {score} out of range")));
        }

        let _guard = self.locks.acquire([board_key(category, season)]).await;
        let submission = Submission { user_id, score, rating_snapshot };
        let plan = self.plan(category, season, &submission).await?;

        if plan.changed {
            let writes = WriteSet::new().leaderboard(PartitionRewrite {
                category: category.clone(),
                season: season.clone(),
                rows: plan.rows,
            });
            self.store.commit(writes).await?;
            debug!("{}/{} reordered, user now rank {}", category, season, plan.rank);
        }

        Ok(plan.rank)
    }

    /// Best `limit` rows of a partition.
    pub async fn top(
        &self,
        category: &Category,
        season: &Season,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, DuelError> {
        let mut rows = self.store.leaderboard(category, season).await?;
        rows.truncate(limit);
        Ok(rows)
    }

    /// One user's row, if any.
    pub async fn entry(
        &self,
        user_id: UserId,
        category: &Category,
        season: &Season,
    ) -> Result<Option<LeaderboardEntry>, DuelError> {
        let rows = self.store.leaderboard(category, season).await?;
        Ok(rows.into_iter().find(|r| r.user_id == user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use proptest::prelude::*;

    fn submit(user: UserId, score: f64) -> Submission {
        Submission { user_id: user, score, rating_snapshot: 1000 }
    }

    fn assert_consistent(rows: &[LeaderboardEntry], order: ScoreOrder) {
        let ranks: Vec<u32> = rows.iter().map(|r| r.rank_position).collect();
        let expected: Vec<u32> = (1..=rows.len() as u32).collect();
        assert_eq!(ranks, expected);
        for pair in rows.windows(2) {
            assert_ne!(order.compare(pair[0].score, pair[1].score), std::cmp::Ordering::Greater);
        }
    }

    #[test]
    fn test_first_entry_is_rank_one() {
        let cat = Category::speed(4);
        let plan = plan_upsert(&[], &cat, &Season::default(), &submit(UserId::random(), 45.0), Utc::now());
        assert!(plan.changed);
        assert_eq!(plan.rank, 1);
        assert_eq!(plan.rows.len(), 1);
    }

    #[test]
    fn test_ascending_category_lower_wins() {
        let cat = Category::speed_overall();
        let season = Season::default();
        let (a, b) = (UserId::random(), UserId::random());
        let plan = plan_upsert(&[], &cat, &season, &submit(a, 60.0), Utc::now());
        let plan = plan_upsert(&plan.rows, &cat, &season, &submit(b, 45.0), Utc::now());
        assert_eq!(plan.rank, 1);
        assert_eq!(plan.rows[1].user_id, a);
        assert_eq!(plan.rows[1].rank_position, 2);
    }

    #[test]
    fn test_descending_category_higher_wins() {
        let cat = Category::wins_overall();
        let season = Season::default();
        let (a, b) = (UserId::random(), UserId::random());
        let plan = plan_upsert(&[], &cat, &season, &submit(a, 3.0), Utc::now());
        let plan = plan_upsert(&plan.rows, &cat, &season, &submit(b, 7.0), Utc::now());
        assert_eq!(plan.rows[0].user_id, b);
    }

    #[test]
    fn test_worse_score_does_not_overwrite() {
        let cat = Category::moves(3);
        let season = Season::default();
        let a = UserId::random();
        let plan = plan_upsert(&[], &cat, &season, &submit(a, 20.0), Utc::now());
        let again = plan_upsert(&plan.rows, &cat, &season, &submit(a, 25.0), Utc::now());
        assert!(!again.changed);
        assert_eq!(again.rows[0].score, 20.0);

        let tie = plan_upsert(&plan.rows, &cat, &season, &submit(a, 20.0), Utc::now());
        assert!(!tie.changed);
    }

    #[test]
    fn test_equal_scores_ranked_by_insertion() {
        let cat = Category::speed(4);
        let season = Season::default();
        let (a, b, c) = (UserId::random(), UserId::random(), UserId::random());
        let mut rows = Vec::new();
        for u in [a, b, c] {
            rows = plan_upsert(&rows, &cat, &season, &submit(u, 30.0), Utc::now()).rows;
        }
        let order: Vec<UserId> = rows.iter().map(|r| r.user_id).collect();
        assert_eq!(order, vec![a, b, c]);
        assert_consistent(&rows, cat.order());
    }

    #[tokio::test]
    async fn test_upsert_and_reorder_persists() {
        let store = Arc::new(InMemoryStore::new());
        let index = LeaderboardIndex::new(store, Arc::new(KeyLocks::new()));
        let cat = Category::speed(4);
        let season = Season::default();
        let user = UserId::random();

        let rank = index.upsert_and_reorder(user, &cat, &season, 45.0, 1016).await.unwrap();
        assert_eq!(rank, 1);

        let entry = index.entry(user, &cat, &season).await.unwrap().unwrap();
        assert_eq!(entry.score, 45.0);
        assert_eq!(entry.rating_snapshot, 1016);
    }

    #[tokio::test]
    async fn test_rejects_non_finite_score() {
        let index = LeaderboardIndex::new(Arc::new(InMemoryStore::new()), Arc::new(KeyLocks::new()));
        let result = index
            .upsert_and_reorder(UserId::random(), &Category::speed(4), &Season::default(), f64::NAN, 1000)
            .await;
        assert!(matches!(result, Err(DuelError::Validation(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_keep_dense_ranks() {
        let store = Arc::new(InMemoryStore::new());
        let index = Arc::new(LeaderboardIndex::new(store, Arc::new(KeyLocks::new())));
        let cat = Category::speed_overall();
        let season = Season::default();

        let mut handles = Vec::new();
        for i in 0..64u32 {
            let index = index.clone();
            let cat = cat.clone();
            let season = season.clone();
            handles.push(tokio::spawn(async move {
                let user = UserId::random();
                index
                    .upsert_and_reorder(user, &cat, &season, f64::from(100 - (i % 17)), 1000)
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let rows = index.top(&cat, &season, usize::MAX).await.unwrap();
        assert_eq!(rows.len(), 64);
        assert_consistent(&rows, cat.order());
    }

    proptest! {
        #[test]
        fn prop_ranks_dense_and_ordered(
            subs in proptest::collection::vec((0usize..12, 0u32..500), 1..60),
            descending in any::<bool>(),
        ) {
            let cat = if descending { Category::wins_overall() } else { Category::speed(4) };
            let season = Season::default();
            let users: Vec<UserId> = (0..12).map(|_| UserId::random()).collect();
            let mut rows: Vec<LeaderboardEntry> = Vec::new();
            for (u, score) in &subs {
                rows = plan_upsert(&rows, &cat, &season, &submit(users[*u], f64::from(*score)), Utc::now()).rows;
            }

            let distinct: std::collections::HashSet<usize> = subs.iter().map(|(u, _)| *u).collect();
            prop_assert_eq!(rows.len(), distinct.len());
            let ranks: Vec<u32> = rows.iter().map(|r| r.rank_position).collect();
            let expected: Vec<u32> = (1..=rows.len() as u32).collect();
            prop_assert_eq!(ranks, expected);
            for pair in rows.windows(2) {
                prop_assert_ne!(cat.order().compare(pair[0].score, pair[1].score), std::cmp::Ordering::Greater);
            }
        }
    }
}
