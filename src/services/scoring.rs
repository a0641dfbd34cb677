//! Qualifier leaderboards: ranking, supersession, attempt accounting and announcements.

use std::cmp::Ordering;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::models::ScoreEntity,
    dto::{packet::Packet, push::Push},
    error::ServiceError,
    services::messaging::leaderboard_summary,
    state::{
        AppState,
        connections::PacketSink,
        models::{ClientType, LeaderboardEntry, LeaderboardSort, Map, QualifierEvent, QualifierScore, ScoreStatus},
    },
};

/// Highlight of the submitter's own row in a submission answer.
pub const SUBMITTER_COLOR: &str = "#00ff00";
/// Color of every other row.
pub const DEFAULT_COLOR: &str = "#ffffff";

/// Value a row is ranked by under `sort`.
pub fn sort_value(score: &QualifierScore, sort: LeaderboardSort, target: i64) -> i64 {
    let metric = score.metric(sort.metric());
    if sort.uses_target() {
        (target - metric).abs()
    } else {
        metric
    }
}

/// Leaderboard order: best first, earlier submission first on ties.
pub fn compare_rows(a: &ScoreEntity, b: &ScoreEntity, sort: LeaderboardSort, target: i64) -> Ordering {
    let (left, right) = (sort_value(&a.score, sort, target), sort_value(&b.score, sort, target));
    let by_value = if sort.ascending() {
        left.cmp(&right)
    } else {
        right.cmp(&left)
    };
    by_value.then(a.seq.cmp(&b.seq))
}

/// Order used to elect the current row of a pair: real rows outrank placeholders.
fn compare_candidates(a: &ScoreEntity, b: &ScoreEntity, sort: LeaderboardSort, target: i64) -> Ordering {
    a.score
        .is_placeholder
        .cmp(&b.score.is_placeholder)
        .then_with(|| compare_rows(a, b, sort, target))
}

/// Current real rows of a map, ranked.
pub fn rank(rows: &[ScoreEntity], sort: LeaderboardSort, target: i64) -> Vec<ScoreEntity> {
    let mut ranked: Vec<ScoreEntity> = rows
        .iter()
        .filter(|row| row.is_current() && !row.score.is_placeholder)
        .cloned()
        .collect();
    ranked.sort_by(|a, b| compare_rows(a, b, sort, target));
    ranked
}

fn entries(rows: Vec<ScoreEntity>, highlight: Option<&str>) -> Vec<LeaderboardEntry> {
    rows.into_iter()
        .map(|row| {
            let color = match highlight {
                Some(platform_id) if platform_id == row.score.platform_id => SUBMITTER_COLOR,
                _ => DEFAULT_COLOR,
            };
            LeaderboardEntry {
                score: row.score,
                color: color.to_string(),
            }
        })
        .collect()
}

/// Event and map a score refers to. Maps removed from the event are not found.
async fn locate(
    state: &AppState,
    tournament_id: Uuid,
    qualifier_id: Uuid,
    map_id: Uuid,
) -> Result<(QualifierEvent, Map), ServiceError> {
    let event = state
        .manager()
        .qualifier(tournament_id, qualifier_id)
        .await
        .ok_or_else(|| ServiceError::NotFound(format!("qualifier {qualifier_id}")))?;
    let map = event
        .map(map_id)
        .cloned()
        .ok_or_else(|| ServiceError::NotFound(format!("map {map_id}")))?;
    Ok((event, map))
}

/// Map of a tournament, searched across all of its qualifiers.
async fn find_map(state: &AppState, tournament_id: Uuid, map_id: Uuid) -> Result<(QualifierEvent, Map), ServiceError> {
    state
        .manager()
        .qualifiers(tournament_id)
        .await
        .into_iter()
        .find_map(|event| event.map(map_id).cloned().map(|map| (event, map)))
        .ok_or_else(|| ServiceError::NotFound(format!("map {map_id}")))
}

/// Result of a submission, before visibility rules are applied.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    /// Ranked current rows of the map.
    pub leaderboard: Vec<LeaderboardEntry>,
    /// Whether the submission became the pair's current row.
    pub improved: bool,
    /// Whether the scores of this event are hidden from players.
    pub hidden: bool,
}

/// Record a qualifier score and return the refreshed leaderboard of its map.
///
/// At most one row stays current per (map, platform): a placeholder is replaced
/// in place by a real score, otherwise the best row of the pair wins and the
/// others become superseded.
pub async fn submit_score(
    state: &AppState,
    tournament_id: Uuid,
    score: QualifierScore,
) -> Result<SubmissionOutcome, ServiceError> {
    let (event, map) = locate(state, tournament_id, score.event_id, score.map_id).await?;
    let sort = event.sort;
    let target = map.gameplay_parameters.target;

    let lock = state.score_lock(map.guid);
    let _guard = lock.lock().await;

    let store = state.storage().store().await?;
    let rows = store.list_scores(map.guid).await?;
    let next_seq = rows.iter().map(|row| row.seq + 1).max().unwrap_or(0);

    let mut current: Vec<ScoreEntity> = rows
        .iter()
        .filter(|row| row.score.platform_id == score.platform_id && row.is_current())
        .cloned()
        .collect();
    current.sort_by(|a, b| compare_candidates(a, b, sort, target));

    let placeholder = current.iter().position(|row| row.score.is_placeholder);
    let improved;
    let mut changed = Vec::new();

    match placeholder {
        Some(position) if !score.is_placeholder => {
            let mut reused = current.remove(position);
            reused.score = score.clone();
            reused.seq = next_seq;
            reused.status = ScoreStatus::Current;
            reused.submitted_at = std::time::SystemTime::now();

            let reused_wins = current
                .iter()
                .all(|other| compare_candidates(&reused, other, sort, target) == Ordering::Less);
            if !reused_wins {
                reused.status = ScoreStatus::Superseded;
            }
            improved = reused_wins;
            if reused_wins {
                for mut other in current {
                    other.status = ScoreStatus::Superseded;
                    changed.push(other);
                }
            }
            changed.push(reused);
            store.update_scores(changed).await?;
        }
        _ => {
            let mut fresh = ScoreEntity::new(next_seq, score.clone());
            let best = current.first();
            let fresh_wins = best.is_none_or(|best| compare_candidates(&fresh, best, sort, target) == Ordering::Less);

            if fresh_wins {
                changed = current
                    .into_iter()
                    .map(|mut row| {
                        row.status = ScoreStatus::Superseded;
                        row
                    })
                    .collect();
            } else {
                fresh.status = ScoreStatus::Superseded;
                changed = current
                    .into_iter()
                    .skip(1)
                    .map(|mut row| {
                        row.status = ScoreStatus::Superseded;
                        row
                    })
                    .collect();
            }
            improved = fresh_wins;
            store.insert_score(fresh).await?;
            if !changed.is_empty() {
                store.update_scores(changed).await?;
            }
        }
    }

    let rows = store.list_scores(map.guid).await?;
    let leaderboard = entries(rank(&rows, sort, target), Some(&score.platform_id));
    debug!(
        tournament = %tournament_id,
        map = %map.guid,
        platform_id = %score.platform_id,
        improved,
        "qualifier score recorded"
    );

    notify_dashboards(state, tournament_id, &event, &map, &score, &leaderboard).await;
    if improved {
        announce(state, tournament_id, &event, &map, &score, &leaderboard).await;
    }

    Ok(SubmissionOutcome {
        leaderboard,
        improved,
        hidden: event.flags.hide_scores_from_players,
    })
}

/// Push the refreshed slice to the dashboards joined to the tournament.
async fn notify_dashboards(
    state: &AppState,
    tournament_id: Uuid,
    event: &QualifierEvent,
    map: &Map,
    score: &QualifierScore,
    leaderboard: &[LeaderboardEntry],
) {
    let recipients: Vec<Uuid> = state
        .manager()
        .users(tournament_id)
        .await
        .into_iter()
        .filter(|user| user.client_type == ClientType::WebsocketConnection)
        .map(|user| user.guid)
        .collect();
    if recipients.is_empty() {
        return;
    }

    let push = Push::QualifierScoreSubmitted {
        tournament_id,
        event: event.clone(),
        map: map.clone(),
        score: score.clone(),
        leaderboard: leaderboard.to_vec(),
    };
    state
        .connections()
        .send_to(&recipients, &Packet::push(state.server_id(), push));
}

/// Score feed line and edited-in-place summary, when the event enables them.
async fn announce(
    state: &AppState,
    tournament_id: Uuid,
    event: &QualifierEvent,
    map: &Map,
    score: &QualifierScore,
    leaderboard: &[LeaderboardEntry],
) {
    let Some(channel) = event.info_channel.as_ref().filter(|channel| !channel.id.is_empty()) else {
        return;
    };
    let messaging = state.messaging();
    let map_name = map.gameplay_parameters.beatmap.name.clone();

    if event.flags.enable_score_feed {
        if let Err(err) = messaging
            .send_score_event(channel.id.clone(), map_name.clone(), score.clone())
            .await
        {
            warn!(error = %err, qualifier = %event.guid, "failed to post score announcement");
        }
    }

    if !event.flags.enable_leaderboard_message {
        return;
    }

    let tournament_name = state
        .manager()
        .settings(tournament_id)
        .await
        .map(|settings| settings.tournament_name)
        .unwrap_or_default();
    let text = leaderboard_summary(&tournament_name, &map_name, leaderboard);

    let message_id = match messaging
        .send_leaderboard_update(channel.id.clone(), map.leaderboard_message_id.clone(), text)
        .await
    {
        Ok(id) => id,
        Err(err) => {
            warn!(error = %err, qualifier = %event.guid, "failed to update leaderboard message");
            return;
        }
    };
    if map.leaderboard_message_id.as_deref() == Some(message_id.as_str()) {
        return;
    }

    let map_id = map.guid;
    let stored = state
        .manager()
        .update_qualifier(tournament_id, event.guid, move |qualifier| {
            match qualifier.maps.iter_mut().find(|candidate| candidate.guid == map_id) {
                Some(map) => {
                    map.leaderboard_message_id = Some(message_id);
                    Ok(())
                }
                None => Err(ServiceError::NotFound(format!("map {map_id}"))),
            }
        })
        .await;
    if let Err(err) = stored {
        warn!(error = %err, qualifier = %event.guid, "failed to store leaderboard message id");
    }
}

/// Ranked rows of a qualifier, narrowed to one map when `map_id` is given.
///
/// Without a map, rows of every map are ranked together, ignoring targets.
pub async fn leaderboard(
    state: &AppState,
    tournament_id: Uuid,
    qualifier_id: Uuid,
    map_id: Option<Uuid>,
) -> Result<(Vec<LeaderboardEntry>, bool), ServiceError> {
    let event = state
        .manager()
        .qualifier(tournament_id, qualifier_id)
        .await
        .ok_or_else(|| ServiceError::NotFound(format!("qualifier {qualifier_id}")))?;
    let store = state.storage().store().await?;

    let ranked = match map_id {
        Some(map_id) => {
            let map = event
                .map(map_id)
                .ok_or_else(|| ServiceError::NotFound(format!("map {map_id}")))?;
            let rows = store.list_scores(map_id).await?;
            rank(&rows, event.sort, map.gameplay_parameters.target)
        }
        None => {
            let mut rows = Vec::new();
            for map in &event.maps {
                rows.extend(store.list_scores(map.guid).await?);
            }
            rank(&rows, event.sort, 0)
        }
    };

    Ok((entries(ranked, None), event.flags.hide_scores_from_players))
}

/// Attempts left for a player on a map: the limit minus every recorded row.
pub async fn remaining_attempts(
    state: &AppState,
    tournament_id: Uuid,
    map_id: Uuid,
    platform_id: &str,
) -> Result<i64, ServiceError> {
    let (_, map) = find_map(state, tournament_id, map_id).await?;
    let store = state.storage().store().await?;
    let recorded = store
        .list_scores(map_id)
        .await?
        .iter()
        .filter(|row| row.score.platform_id == platform_id)
        .count();
    Ok(i64::from(map.gameplay_parameters.attempts) - recorded as i64)
}

/// Physically delete the `count` most recent rows of a player on a map.
///
/// When the current row goes, the best remaining row of the pair takes its place.
pub async fn refund_attempts(
    state: &AppState,
    tournament_id: Uuid,
    map_id: Uuid,
    platform_id: &str,
    count: u32,
) -> Result<String, ServiceError> {
    let (event, map) = find_map(state, tournament_id, map_id).await?;

    let lock = state.score_lock(map_id);
    let _guard = lock.lock().await;

    let store = state.storage().store().await?;
    let mut pair: Vec<ScoreEntity> = store
        .list_scores(map_id)
        .await?
        .into_iter()
        .filter(|row| row.score.platform_id == platform_id)
        .collect();

    if pair.is_empty() {
        return Err(ServiceError::InvalidInput(
            "The user did not have any attempts on this map".into(),
        ));
    }
    if map.gameplay_parameters.attempts == 0 {
        return Err(ServiceError::InvalidInput(
            "This map does not have limited attempts enabled".into(),
        ));
    }

    pair.sort_by(|a, b| b.seq.cmp(&a.seq));
    let take = pair.len().min(count as usize);
    let removed: Vec<ScoreEntity> = pair.drain(..take).collect();
    let ids: Vec<Uuid> = removed.iter().map(|row| row.id).collect();
    let deleted = store.delete_scores(ids).await?;

    if removed.iter().any(ScoreEntity::is_current) && !pair.iter().any(ScoreEntity::is_current) {
        let target = map.gameplay_parameters.target;
        pair.sort_by(|a, b| compare_candidates(a, b, event.sort, target));
        if let Some(mut promoted) = pair.into_iter().next() {
            promoted.status = ScoreStatus::Current;
            store.update_scores(vec![promoted]).await?;
        }
    }

    debug!(map = %map_id, %platform_id, deleted, "attempts refunded");
    Ok(format!("Successfully refunded {deleted} attempts!"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::tournament_store::TournamentStore,
        state::{
            models::{Beatmap, Channel, GameplayParameters, QualifierFlags, User},
            tests::app_state,
        },
    };

    struct Fixture {
        state: crate::state::SharedState,
        store: crate::dao::tournament_store::memory::MemoryStore,
        tournament_id: Uuid,
        event_id: Uuid,
        map_id: Uuid,
    }

    async fn fixture(sort: LeaderboardSort, attempts: u32, target: i64) -> Fixture {
        let (state, store) = app_state();
        let tournament = crate::state::manager::tests::tournament("Cup");
        let tournament_id = tournament.guid;
        state.manager().create_tournament(tournament).await.unwrap();

        let map = Map::new(GameplayParameters {
            beatmap: Beatmap {
                level_id: "custom_level_1".into(),
                name: "Song".into(),
                ..Default::default()
            },
            attempts,
            target,
            ..Default::default()
        });
        let map_id = map.guid;
        let event = QualifierEvent {
            guid: Uuid::new_v4(),
            name: "Week 1".into(),
            image: None,
            info_channel: None,
            flags: QualifierFlags::default(),
            sort,
            maps: vec![map],
        };
        let event_id = event.guid;
        state.manager().create_qualifier(tournament_id, event).await.unwrap();

        Fixture {
            state,
            store,
            tournament_id,
            event_id,
            map_id,
        }
    }

    impl Fixture {
        fn score(&self, platform_id: &str, modified_score: i64) -> QualifierScore {
            QualifierScore {
                event_id: self.event_id,
                map_id: self.map_id,
                platform_id: platform_id.into(),
                username: platform_id.into(),
                modified_score,
                ..Default::default()
            }
        }

        async fn submit(&self, score: QualifierScore) -> SubmissionOutcome {
            submit_score(&self.state, self.tournament_id, score).await.unwrap()
        }

        async fn rows(&self) -> Vec<ScoreEntity> {
            self.store.list_scores(self.map_id).await.unwrap()
        }
    }

    #[tokio::test]
    async fn better_score_supersedes_previous() {
        let f = fixture(LeaderboardSort::ModifiedScore, 0, 0).await;
        f.submit(f.score("p1", 50)).await;
        let outcome = f.submit(f.score("p1", 100)).await;

        assert!(outcome.improved);
        assert_eq!(outcome.leaderboard.len(), 1);
        assert_eq!(outcome.leaderboard[0].score.modified_score, 100);
        assert_eq!(outcome.leaderboard[0].color, SUBMITTER_COLOR);
        let rows = f.rows().await;
        assert_eq!(rows.iter().filter(|row| row.is_current()).count(), 1);
    }

    #[tokio::test]
    async fn worse_score_is_kept_as_history() {
        let f = fixture(LeaderboardSort::ModifiedScore, 0, 0).await;
        f.submit(f.score("p1", 100)).await;
        let outcome = f.submit(f.score("p1", 50)).await;

        assert!(!outcome.improved);
        assert_eq!(outcome.leaderboard[0].score.modified_score, 100);
        let rows = f.rows().await;
        assert_eq!(rows.len(), 2);
        let old = rows.iter().find(|row| row.score.modified_score == 50).unwrap();
        assert_eq!(old.status, ScoreStatus::Superseded);
    }

    #[tokio::test]
    async fn placeholder_is_replaced_in_place() {
        let f = fixture(LeaderboardSort::ModifiedScore, 0, 0).await;
        let mut seed = f.score("p1", 0);
        seed.is_placeholder = true;
        f.submit(seed).await;
        let placeholder_id = f.rows().await[0].id;

        f.submit(f.score("p1", 500)).await;
        let rows = f.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, placeholder_id);
        assert!(!rows[0].score.is_placeholder);
        assert_eq!(rows[0].score.modified_score, 500);
        assert!(rows[0].is_current());
    }

    #[tokio::test]
    async fn placeholders_never_rank() {
        let f = fixture(LeaderboardSort::ModifiedScore, 0, 0).await;
        let mut seed = f.score("p2", 999);
        seed.is_placeholder = true;
        f.submit(seed).await;
        let outcome = f.submit(f.score("p1", 10)).await;
        assert_eq!(outcome.leaderboard.len(), 1);
        assert_eq!(outcome.leaderboard[0].score.platform_id, "p1");
    }

    #[tokio::test]
    async fn ascending_and_target_orders() {
        let f = fixture(LeaderboardSort::ModifiedScoreTarget, 0, 100).await;
        f.submit(f.score("far", 10)).await;
        f.submit(f.score("close", 95)).await;
        let outcome = f.submit(f.score("over", 104)).await;
        let order: Vec<_> = outcome
            .leaderboard
            .iter()
            .map(|entry| entry.score.platform_id.as_str())
            .collect();
        assert_eq!(order, vec!["over", "close", "far"]);

        let g = fixture(LeaderboardSort::ModifiedScoreAscending, 0, 0).await;
        g.submit(g.score("a", 30)).await;
        let outcome = g.submit(g.score("b", 20)).await;
        assert_eq!(outcome.leaderboard[0].score.platform_id, "b");
    }

    #[tokio::test]
    async fn ties_keep_submission_order() {
        let f = fixture(LeaderboardSort::ModifiedScore, 0, 0).await;
        f.submit(f.score("first", 70)).await;
        let outcome = f.submit(f.score("second", 70)).await;
        assert_eq!(outcome.leaderboard[0].score.platform_id, "first");

        let repeat = f.submit(f.score("first", 70)).await;
        assert!(!repeat.improved);
    }

    #[tokio::test]
    async fn attempts_count_every_row() {
        let f = fixture(LeaderboardSort::ModifiedScore, 3, 0).await;
        f.submit(f.score("p1", 10)).await;
        f.submit(f.score("p1", 5)).await;
        let left = remaining_attempts(&f.state, f.tournament_id, f.map_id, "p1").await.unwrap();
        assert_eq!(left, 1);
        let other = remaining_attempts(&f.state, f.tournament_id, f.map_id, "p2").await.unwrap();
        assert_eq!(other, 3);
    }

    #[tokio::test]
    async fn refund_deletes_latest_rows_and_promotes() {
        let f = fixture(LeaderboardSort::ModifiedScore, 3, 0).await;
        f.submit(f.score("p1", 10)).await;
        f.submit(f.score("p1", 80)).await;

        let message = refund_attempts(&f.state, f.tournament_id, f.map_id, "p1", 1).await.unwrap();
        assert_eq!(message, "Successfully refunded 1 attempts!");
        let rows = f.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score.modified_score, 10);
        assert!(rows[0].is_current());

        let left = remaining_attempts(&f.state, f.tournament_id, f.map_id, "p1").await.unwrap();
        assert_eq!(left, 2);
    }

    #[tokio::test]
    async fn refund_rejections() {
        let f = fixture(LeaderboardSort::ModifiedScore, 3, 0).await;
        let err = refund_attempts(&f.state, f.tournament_id, f.map_id, "p1", 1).await.unwrap_err();
        assert!(err.to_string().contains("did not have any attempts"));

        let g = fixture(LeaderboardSort::ModifiedScore, 0, 0).await;
        g.submit(g.score("p1", 10)).await;
        let err = refund_attempts(&g.state, g.tournament_id, g.map_id, "p1", 1).await.unwrap_err();
        assert!(err.to_string().contains("does not have limited attempts enabled"));
    }

    #[tokio::test]
    async fn unknown_map_is_rejected() {
        let f = fixture(LeaderboardSort::ModifiedScore, 0, 0).await;
        let mut score = f.score("p1", 10);
        score.map_id = Uuid::new_v4();
        let result = submit_score(&f.state, f.tournament_id, score).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn whole_event_leaderboard_spans_maps() {
        let f = fixture(LeaderboardSort::ModifiedScore, 0, 0).await;
        f.submit(f.score("p1", 10)).await;
        f.submit(f.score("p2", 20)).await;
        let (rows, hidden) = leaderboard(&f.state, f.tournament_id, f.event_id, None).await.unwrap();
        assert!(!hidden);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].score.platform_id, "p2");
        assert!(rows.iter().all(|row| row.color == DEFAULT_COLOR));
    }

    #[tokio::test]
    async fn dashboards_receive_push_and_summary_id_is_stored() {
        let f = fixture(LeaderboardSort::ModifiedScore, 0, 0).await;
        f.state
            .manager()
            .update_qualifier(f.tournament_id, f.event_id, |event| {
                event.info_channel = Some(Channel {
                    id: "123".into(),
                    name: "scores".into(),
                });
                event.flags.enable_leaderboard_message = true;
                event.flags.enable_score_feed = true;
                Ok(())
            })
            .await
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let dashboard = Uuid::new_v4();
        f.state
            .connections()
            .register(crate::state::connections::ConnectionHandle { id: dashboard, tx });
        f.state
            .manager()
            .add_user(
                f.tournament_id,
                User::new(dashboard, "dash", ClientType::WebsocketConnection),
            )
            .await
            .unwrap();

        f.submit(f.score("p1", 10)).await;

        let mut saw_push = false;
        while let Ok(axum::extract::ws::Message::Text(text)) = rx.try_recv() {
            if text.as_str().contains("qualifier_score_submitted") {
                saw_push = true;
            }
        }
        assert!(saw_push);

        let event = f.state.manager().qualifier(f.tournament_id, f.event_id).await.unwrap();
        assert!(event.maps[0].leaderboard_message_id.is_some());
    }

    #[tokio::test]
    async fn one_current_row_per_player_after_random_submissions() {
        use std::collections::HashMap;

        use rand::{Rng, SeedableRng, rngs::StdRng};

        let mut rng = StdRng::seed_from_u64(0x5c0e);
        for sort in [LeaderboardSort::ModifiedScore, LeaderboardSort::NotesMissedAscending] {
            let f = fixture(sort, 0, 0).await;
            let players = ["p1", "p2", "p3"];
            for _ in 0..30 {
                let player = players[rng.random_range(0..players.len())];
                let mut score = f.score(player, rng.random_range(0..1_000));
                score.notes_missed = rng.random_range(0..20);
                score.is_placeholder = rng.random_bool(0.2);
                f.submit(score).await;
            }

            let mut current: HashMap<String, usize> = HashMap::new();
            for row in f.rows().await.iter().filter(|row| row.is_current()) {
                *current.entry(row.score.platform_id.clone()).or_default() += 1;
            }
            assert!(current.values().all(|count| *count == 1), "{current:?}");
        }
    }
}
