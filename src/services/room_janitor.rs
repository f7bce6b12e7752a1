//! Periodic cleanup: presence loss detection and expired lobby removal.

use std::{sync::Arc, time::Duration};

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::room_store::RoomStore,
    error::ServiceError,
    services::{presence, room_controller},
    state::{AppState, SharedState, clock::TimestampMs, state_machine::PhaseStatus},
};

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Participants newly marked as disconnected.
    pub disconnected: usize,
    /// Expired lobbies deleted.
    pub deleted_rooms: usize,
}

/// Sweep every `janitor_interval_secs` until the task is dropped.
pub async fn run(state: SharedState) {
    let period = Duration::from_secs(state.config().janitor_interval_secs.max(1));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if state.is_degraded().await {
            continue;
        }

        match sweep(&state).await {
            Ok(report) if report != SweepReport::default() => info!(
                disconnected = report.disconnected,
                deleted_rooms = report.deleted_rooms,
                "room janitor sweep finished"
            ),
            Ok(_) => debug!("room janitor sweep found nothing to do"),
            Err(err) => warn!(error = %err, "room janitor sweep failed"),
        }
        state.rooms().prune();
    }
}

/// Run one sweep over running matches and expired lobbies.
pub async fn sweep(state: &AppState) -> Result<SweepReport, ServiceError> {
    let store = state.require_room_store().await?;
    let now = state.now();
    let mut report = SweepReport::default();

    // one broken room must not stall the sweep for the others
    for room in store.list_rooms_with_deadlines().await? {
        match mark_disconnected(state, &store, room.id).await {
            Ok(count) => report.disconnected += count,
            Err(err) => warn!(room_id = %room.id, error = %err, "presence sweep skipped room"),
        }
    }

    for room in store.list_expired_lobbies(now).await? {
        match mark_disconnected(state, &store, room.id).await {
            Ok(count) => report.disconnected += count,
            Err(err) => {
                warn!(room_id = %room.id, error = %err, "expired lobby skipped");
                continue;
            }
        }
        match delete_if_abandoned(state, &store, room.id).await {
            Ok(true) => {
                state.forget_room(room.id);
                report.deleted_rooms += 1;
            }
            Ok(false) => {}
            Err(err) => warn!(room_id = %room.id, error = %err, "expired lobby deletion failed"),
        }
    }

    Ok(report)
}

async fn mark_disconnected(
    state: &AppState,
    store: &Arc<dyn RoomStore>,
    room_id: Uuid,
) -> Result<usize, ServiceError> {
    let window_ms = state.config().presence_window_ms();
    state
        .with_room_gate(room_id, move || async move {
            let mut room = match room_controller::load_room(store, room_id).await {
                Ok(room) => room,
                Err(ServiceError::RoomNotFound) => return Ok(0),
                Err(err) => return Err(err),
            };
            let expected = room.version;
            let now = state.now();

            let stale: Vec<_> = store
                .list_participants(room_id)
                .await?
                .into_iter()
                .filter(|p| p.is_active() && p.disconnected_at.is_none())
                .filter(|p| !presence::is_online(p, window_ms, now))
                .map(|mut p| {
                    p.disconnected_at = Some(now);
                    p
                })
                .collect();

            if stale.is_empty() {
                return Ok(0);
            }

            let count = stale.len();
            store.save_participants(stale).await?;
            room.touch(now);
            room_controller::persist(state, store, &room, expected).await?;
            room_controller::publish_room(state, store, &room).await;
            debug!(room_id = %room_id, count, "participants marked disconnected");
            Ok(count)
        })
        .await
}

async fn delete_if_abandoned(
    state: &AppState,
    store: &Arc<dyn RoomStore>,
    room_id: Uuid,
) -> Result<bool, ServiceError> {
    state
        .with_room_gate(room_id, move || async move {
            let Some(room) = store.find_room(room_id).await? else {
                return Ok(false);
            };
            let now = state.now();
            if !is_expired_lobby(room.status, room.expires_at, now) {
                return Ok(false);
            }

            let window_ms = state.config().presence_window_ms();
            let anyone_online = store
                .list_participants(room_id)
                .await?
                .iter()
                .any(|p| p.is_active() && presence::is_online(p, window_ms, now));
            if anyone_online {
                return Ok(false);
            }

            store.delete_room(room_id).await?;
            info!(room_id = %room_id, code = %room.code, "expired lobby deleted");
            Ok(true)
        })
        .await
}

fn is_expired_lobby(status: PhaseStatus, expires_at: TimestampMs, now: TimestampMs) -> bool {
    status == PhaseStatus::Lobby && expires_at < now
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::{DeckEntity, QuestionEntity},
            room_store::memory::InMemoryRoomStore,
        },
        dto::room::CreateRoomRequest,
        services::room_controller::{Identity, create_room},
        state::clock::ManualClock,
    };

    async fn setup() -> (SharedState, Arc<ManualClock>, Uuid) {
        let clock = Arc::new(ManualClock::new(0));
        let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::new());
        let question = QuestionEntity {
            id: Uuid::new_v4(),
            prompt: "2 + 2?".into(),
            choices: vec!["3".into(), "4".into()],
            correct_index: 1,
        };
        let deck = DeckEntity {
            id: Uuid::new_v4(),
            name: "Math".into(),
            question_ids: vec![question.id],
        };
        let deck_id = deck.id;
        store
            .save_deck(deck, vec![question])
            .await
            .expect("seed deck");

        let config = AppConfig {
            lobby_ttl_secs: 60,
            ..AppConfig::default()
        };
        let state = AppState::with_store(config, clock.clone(), store);
        let session = create_room(
            &state,
            Identity::Guest("host-key-1".into()),
            CreateRoomRequest {
                deck_id,
                nickname: "Host".into(),
                guest_key: Some("host-key-1".into()),
                rules: None,
            },
        )
        .await
        .expect("create room");
        (state, clock, session.room_id)
    }

    /// Store a copy of `room_id` whose phase fields cannot be decoded.
    async fn insert_broken_room(state: &AppState, room_id: Uuid) -> Uuid {
        let store = state.require_room_store().await.expect("store");
        let mut entity = store.find_room(room_id).await.expect("find").expect("room");
        entity.id = Uuid::new_v4();
        entity.code = "BRKN42".into();
        entity.phase_ends_at = Some(1_000);
        entity.expires_at = TimestampMs::MAX;
        assert!(store.insert_room(entity.clone()).await.expect("insert"));
        entity.id
    }

    #[test]
    fn only_lobbies_past_their_ttl_expire() {
        assert!(is_expired_lobby(PhaseStatus::Lobby, 10, 11));
        assert!(!is_expired_lobby(PhaseStatus::Lobby, 10, 10));
        assert!(!is_expired_lobby(PhaseStatus::Question, 10, 11));
    }

    #[tokio::test]
    async fn fresh_lobby_is_left_alone() {
        let (state, clock, room_id) = setup().await;
        clock.advance(1_000);

        let report = sweep(&state).await.expect("sweep");
        assert_eq!(report, SweepReport::default());
        assert!(room_controller::view_room(&state, room_id).await.is_ok());
    }

    #[tokio::test]
    async fn abandoned_expired_lobby_is_deleted() {
        let (state, clock, room_id) = setup().await;
        clock.advance(61_000);

        let report = sweep(&state).await.expect("sweep");
        assert_eq!(
            report,
            SweepReport {
                disconnected: 1,
                deleted_rooms: 1,
            }
        );
        assert!(matches!(
            room_controller::view_room(&state, room_id).await,
            Err(ServiceError::RoomNotFound)
        ));
    }

    #[tokio::test]
    async fn broken_room_does_not_stop_the_sweep() {
        let (state, clock, room_id) = setup().await;
        let broken_id = insert_broken_room(&state, room_id).await;
        assert!(room_controller::view_room(&state, broken_id).await.is_err());
        clock.advance(61_000);

        let report = sweep(&state).await.expect("sweep");
        assert_eq!(
            report,
            SweepReport {
                disconnected: 1,
                deleted_rooms: 1,
            }
        );
        assert!(matches!(
            room_controller::view_room(&state, room_id).await,
            Err(ServiceError::RoomNotFound)
        ));
    }
}
