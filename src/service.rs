//! Duel Service
//!
//! The context object behind every inbound operation. One instance owns the
//! queue, the session registry and the leaderboard index for its lifetime;
//! nothing lives in process-wide state, so tests and multiple instances run
//! side by side.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::core::ids::{SessionId, UserId};
use crate::core::mode::{Category, GameMode, Season};
use crate::error::DuelError;
use crate::matchmaking::queue::{JoinOutcome, MatchmakingQueue, QueueKey};
use crate::network::channel::RealtimeChannel;
use crate::network::protocol::CompletionReport;
use crate::ranking::elo::RatingRecord;
use crate::ranking::leaderboard::{LeaderboardEntry, LeaderboardIndex};
use crate::ranking::stats::UserStats;
use crate::session::model::GameSession;
use crate::session::moves::MoveData;
use crate::session::registry::{CompletionSummary, SessionRegistry};
use crate::store::{KeyLocks, Store};

/// Matchmaking, sessions, ratings and leaderboards behind one handle.
pub struct DuelService {
    store: Arc<dyn Store>,
    leaderboard: Arc<LeaderboardIndex>,
    registry: Arc<SessionRegistry>,
    queue: MatchmakingQueue,
    config: ServiceConfig,
}

impl DuelService {
    /// Wire up a service over `store`, delivering events through `channel`.
    pub fn new(store: Arc<dyn Store>, channel: Arc<dyn RealtimeChannel>, config: ServiceConfig) -> Self {
        let locks = Arc::new(KeyLocks::new());
        let leaderboard = Arc::new(LeaderboardIndex::new(store.clone(), locks.clone()));
        let registry = Arc::new(SessionRegistry::new(
            store.clone(),
            channel.clone(),
            locks,
            leaderboard.clone(),
            config.clone(),
        ));
        let queue = MatchmakingQueue::new(registry.clone(), channel, config.clone());

        Self { store, leaderboard, registry, queue, config }
    }

    /// Service configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // =========================================================================
    // MATCHMAKING
    // =========================================================================

    /// Join the queue at an explicit rating within `[RATING_FLOOR, RATING_CEILING]`.
    pub async fn enqueue(
        &self,
        user: UserId,
        mode: GameMode,
        board_size: u8,
        rating: i32,
    ) -> Result<JoinOutcome, DuelError> {
        self.queue.join(user, mode, board_size, rating).await
    }

    /// Join the queue at the user's stored rating.
    pub async fn enqueue_rated(
        &self,
        user: UserId,
        mode: GameMode,
        board_size: u8,
    ) -> Result<JoinOutcome, DuelError> {
        let rating = self.store.rating(user).await?.elo_rating;
        self.queue.join(user, mode, board_size, rating).await
    }

    /// Leave the queue. False if the user was not waiting (or was already matched).
    pub fn dequeue(&self, user: UserId, mode: GameMode) -> bool {
        self.queue.leave(user, mode)
    }

    /// Waiting count per partition.
    pub fn queue_status(&self) -> Vec<(QueueKey, usize)> {
        self.queue.queue_status()
    }

    /// 1-based queue position, if waiting.
    pub fn queue_position(&self, user: UserId) -> Option<usize> {
        self.queue.position(user)
    }

    // =========================================================================
    // SESSIONS
    // =========================================================================

    /// Start a single-player session.
    pub async fn create_solo_session(
        &self,
        user: UserId,
        board_size: u8,
        mode: GameMode,
        puzzle_ref: String,
    ) -> Result<SessionId, DuelError> {
        self.queue.start_solo(user, mode, board_size, puzzle_ref).await
    }

    /// Log and relay a move.
    pub async fn relay_move(
        &self,
        session_id: SessionId,
        user: UserId,
        data: MoveData,
    ) -> Result<(), DuelError> {
        self.registry.record_move(session_id, user, data).await
    }

    /// Finish a session. Safe to retry with the same session id.
    pub async fn complete_session(
        &self,
        session_id: SessionId,
        reporter: UserId,
        report: CompletionReport,
    ) -> Result<CompletionSummary, DuelError> {
        self.registry.complete(session_id, reporter, report).await
    }

    /// Give up on a session.
    pub async fn quit_session(&self, session_id: SessionId, user: UserId) -> Result<(), DuelError> {
        self.registry.abandon(session_id, user, "quit").await
    }

    /// A connection dropped: leave every queue and abandon any live session.
    pub async fn on_disconnect(&self, user: UserId) {
        if self.queue.remove_everywhere(user) {
            debug!("Removed {} from matchmaking on disconnect", user.short());
        }

        let Some(session_id) = self.registry.active_session_of(user).await else {
            return;
        };
        match self.registry.abandon(session_id, user, "disconnected").await {
            Ok(()) => info!("Abandoned {} after {} disconnected", session_id.short(), user.short()),
            // Completion or the opponent's abandon got there first.
            Err(DuelError::Conflict(reason)) => {
                debug!("Session {} already final: {}", session_id.short(), reason)
            }
            Err(e) => warn!("Failed to abandon {}: {}", session_id.short(), e),
        }
    }

    /// Stored session row.
    pub async fn session(&self, session_id: SessionId) -> Result<Option<GameSession>, DuelError> {
        self.registry.session(session_id).await
    }

    /// Session `user` is currently playing.
    pub async fn active_session_of(&self, user: UserId) -> Option<SessionId> {
        self.registry.active_session_of(user).await
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Rating row (default 1000 for unknown users).
    pub async fn rating(&self, user: UserId) -> Result<RatingRecord, DuelError> {
        Ok(self.store.rating(user).await?)
    }

    /// Aggregate stats.
    pub async fn stats(&self, user: UserId) -> Result<UserStats, DuelError> {
        Ok(self.store.stats(user).await?)
    }

    /// Best `limit` rows. `season` defaults to the configured season.
    pub async fn leaderboard_top(
        &self,
        category: &Category,
        season: Option<&Season>,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, DuelError> {
        let season = season.unwrap_or(&self.config.season);
        self.leaderboard.top(category, season, limit).await
    }

    /// One user's leaderboard row.
    pub async fn leaderboard_entry(
        &self,
        user: UserId,
        category: &Category,
        season: Option<&Season>,
    ) -> Result<Option<LeaderboardEntry>, DuelError> {
        let season = season.unwrap_or(&self.config.season);
        self.leaderboard.entry(user, category, season).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::channel::RecordingChannel;
    use crate::network::protocol::ServerMessage;
    use crate::session::model::SessionStatus;
    use crate::session::moves::MoveKind;
    use crate::store::InMemoryStore;
    use std::collections::HashSet;

    fn service() -> (Arc<DuelService>, Arc<InMemoryStore>, Arc<RecordingChannel>) {
        let store = Arc::new(InMemoryStore::new());
        let channel = Arc::new(RecordingChannel::new());
        let service = Arc::new(DuelService::new(store.clone(), channel.clone(), ServiceConfig::default()));
        (service, store, channel)
    }

    fn win(winner: UserId, time: f64, moves: u32) -> CompletionReport {
        CompletionReport {
            winner_id: Some(winner),
            completion_time_secs: time,
            move_count: moves,
            perfect_game: false,
            speed_bonus: true,
        }
    }

    async fn matched(service: &DuelService, a: UserId, b: UserId) -> SessionId {
        service.enqueue(a, GameMode::Speed, 4, 1000).await.unwrap();
        match service.enqueue(b, GameMode::Speed, 4, 1000).await.unwrap() {
            JoinOutcome::Matched { session_id, .. } => session_id,
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_equal_ratings_speed_match() {
        let (service, _, channel) = service();
        let (a, b) = (UserId::random(), UserId::random());
        let session_id = matched(&service, a, b).await;

        let summary = service.complete_session(session_id, b, win(b, 45.0, 30)).await.unwrap();
        assert_eq!(summary.status, SessionStatus::Completed);

        assert_eq!(service.rating(b).await.unwrap().elo_rating, 1016);
        assert_eq!(service.rating(a).await.unwrap().elo_rating, 984);

        for category in [Category::speed(4), Category::speed_overall()] {
            let entry = service.leaderboard_entry(b, &category, None).await.unwrap().unwrap();
            assert_eq!(entry.rank_position, 1);
            assert_eq!(entry.score, 45.0);
            assert_eq!(entry.rating_snapshot, 1016);
        }
        assert!(service.leaderboard_entry(a, &Category::speed(4), None).await.unwrap().is_none());

        let stats = service.stats(b).await.unwrap();
        assert_eq!(stats.total_wins, 1);
        assert_eq!(stats.current_win_streak, 1);

        let ended: Vec<ServerMessage> = channel
            .sent_to(a)
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::SessionEnded(_)))
            .collect();
        assert_eq!(ended.len(), 1);
        let ServerMessage::SessionEnded(info) = &ended[0] else { unreachable!() };
        assert_eq!(info.winner_id, Some(b));
        assert_eq!(info.rating_deltas.len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_abandons_without_results() {
        let (service, _, channel) = service();
        let (a, b) = (UserId::random(), UserId::random());
        let session_id = matched(&service, a, b).await;
        service.relay_move(session_id, a, MoveData { move_number: 1, kind: MoveKind::Slide { tile: 3, from: 2, to: 3 } })
            .await
            .unwrap();
        channel.clear();

        service.on_disconnect(a).await;

        let session = service.session(session_id).await.unwrap().unwrap();
        assert_eq!(session.status(), SessionStatus::Abandoned);
        for user in [a, b] {
            assert_eq!(service.stats(user).await.unwrap().total_games, 0);
            let rating = service.rating(user).await.unwrap();
            assert_eq!(rating.elo_rating, 1000);
            assert_eq!(rating.rated_games, 0);
            assert!(service.active_session_of(user).await.is_none());
        }
        assert!(channel
            .sent_to(b)
            .iter()
            .any(|m| matches!(m, ServerMessage::OpponentDisconnected { user_id, .. } if *user_id == a)));

        // A second disconnect (the opponent) is a no-op.
        service.on_disconnect(b).await;
    }

    #[tokio::test]
    async fn test_wide_gap_stays_queued() {
        let (service, _, _) = service();
        let (a, b) = (UserId::random(), UserId::random());
        assert_eq!(service.enqueue(a, GameMode::Speed, 4, 1000).await.unwrap(), JoinOutcome::Queued { position: 1 });
        assert_eq!(service.enqueue(b, GameMode::Speed, 4, 1350).await.unwrap(), JoinOutcome::Queued { position: 2 });
        assert_eq!(service.queue_position(a), Some(1));
        assert_eq!(service.queue_position(b), Some(2));
        let key = QueueKey { mode: GameMode::Speed, board_size: 4 };
        assert_eq!(service.queue_status(), vec![(key, 2)]);
    }

    #[tokio::test]
    async fn test_second_completion_conflicts() {
        let (service, _, _) = service();
        let (a, b) = (UserId::random(), UserId::random());
        let session_id = matched(&service, a, b).await;

        service.complete_session(session_id, a, win(a, 40.0, 25)).await.unwrap();
        let again = service.complete_session(session_id, a, win(a, 40.0, 25)).await;
        assert!(matches!(again, Err(DuelError::Conflict(_))));
        let differing = service.complete_session(session_id, b, win(b, 10.0, 5)).await;
        assert!(matches!(differing, Err(DuelError::Conflict(_))));

        assert_eq!(service.stats(a).await.unwrap().total_games, 1);
        assert_eq!(service.rating(a).await.unwrap().rated_games, 1);
        assert_eq!(service.rating(a).await.unwrap().elo_rating, 1016);
    }

    #[tokio::test]
    async fn test_transient_failure_then_retry() {
        let (service, store, _) = service();
        let (a, b) = (UserId::random(), UserId::random());
        let session_id = matched(&service, a, b).await;

        store.fail_next_write();
        let err = service.complete_session(session_id, a, win(a, 40.0, 25)).await.unwrap_err();
        assert!(matches!(err, DuelError::TransientStore(_)));
        assert!(err.is_retryable());
        assert_eq!(service.stats(a).await.unwrap().total_games, 0);
        assert!(service.leaderboard_top(&Category::speed(4), None, 10).await.unwrap().is_empty());

        service.complete_session(session_id, a, win(a, 40.0, 25)).await.unwrap();
        assert_eq!(service.stats(a).await.unwrap().total_games, 1);
        assert_eq!(service.leaderboard_top(&Category::speed(4), None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_solo_requires_leaving_queue() {
        let (service, _, _) = service();
        let a = UserId::random();
        service.enqueue(a, GameMode::Speed, 4, 1000).await.unwrap();
        let blocked = service.create_solo_session(a, 4, GameMode::Speed, "p".into()).await;
        assert!(matches!(blocked, Err(DuelError::Conflict(_))));

        assert!(service.dequeue(a, GameMode::Speed));
        let session_id = service.create_solo_session(a, 4, GameMode::Speed, "p".into()).await.unwrap();
        let session = service.session(session_id).await.unwrap().unwrap();
        assert!(!session.is_competitive());
        assert_eq!(session.status(), SessionStatus::InProgress);
    }

    #[tokio::test]
    async fn test_quit_abandons() {
        let (service, _, _) = service();
        let (a, b) = (UserId::random(), UserId::random());
        let session_id = matched(&service, a, b).await;
        service.quit_session(session_id, b).await.unwrap();
        let session = service.session(session_id).await.unwrap().unwrap();
        assert_eq!(session.status(), SessionStatus::Abandoned);
        assert_eq!(session.end_reason(), Some("quit"));
    }

    #[tokio::test]
    async fn test_enqueue_rated_uses_stored_rating() {
        let (service, _, _) = service();
        let (a, b) = (UserId::random(), UserId::random());
        let session_id = matched(&service, a, b).await;
        service.complete_session(session_id, a, win(a, 30.0, 20)).await.unwrap();

        // 1016 vs 984: within the gap.
        service.enqueue_rated(a, GameMode::Speed, 4).await.unwrap();
        let outcome = service.enqueue_rated(b, GameMode::Speed, 4).await.unwrap();
        assert!(matches!(outcome, JoinOutcome::Matched { opponent, .. } if opponent == a));
    }

    #[tokio::test]
    async fn test_wins_overall_ranks_by_total_wins() {
        let (service, _, _) = service();
        let (a, b, c) = (UserId::random(), UserId::random(), UserId::random());

        let s1 = matched(&service, a, b).await;
        service.complete_session(s1, a, win(a, 30.0, 20)).await.unwrap();
        let s2 = matched(&service, b, c).await;
        service.complete_session(s2, b, win(b, 30.0, 20)).await.unwrap();
        let s3 = matched(&service, a, c).await;
        service.complete_session(s3, a, win(a, 30.0, 20)).await.unwrap();

        let rows = service.leaderboard_top(&Category::wins_overall(), None, 10).await.unwrap();
        assert_eq!(rows[0].user_id, a);
        assert_eq!(rows[0].score, 2.0);
        assert_eq!(rows[1].user_id, b);
        assert_eq!(rows.iter().map(|r| r.rank_position).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_enqueue_storm_exclusive() {
        use rand::seq::SliceRandom;
        use rand::Rng;

        let (service, _, _) = service();
        let users: Vec<UserId> = (0..120).map(|_| UserId::random()).collect();
        let mut rng = rand::thread_rng();
        let mut order = users.clone();
        order.shuffle(&mut rng);

        let mut handles = Vec::new();
        for user in order {
            let service = service.clone();
            let rating = rng.gen_range(950..1250);
            handles.push(tokio::spawn(async move {
                let outcome = service.enqueue(user, GameMode::Speed, 4, rating).await;
                // Disconnect some waiters mid-storm.
                if user.as_bytes()[0] % 5 == 0 {
                    service.on_disconnect(user).await;
                }
                outcome
            }));
        }
        for handle in handles {
            // A waiter that disconnects while being paired can void the pairing.
            match handle.await.unwrap() {
                Ok(_) | Err(DuelError::Conflict(_)) => {}
                Err(e) => panic!("unexpected {e}"),
            }
        }

        let mut bound = HashSet::new();
        for user in &users {
            if let Some(session_id) = service.active_session_of(*user).await {
                let session = service.session(session_id).await.unwrap().unwrap();
                assert_eq!(session.status(), SessionStatus::InProgress);
                assert!(session.is_participant(*user));
                assert!(bound.insert(*user));
                assert_eq!(service.queue_position(*user), None);
            }
        }
    }
}
