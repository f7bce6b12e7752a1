//! Presence computation and the client-facing room projection.

use std::{cmp::Ordering, collections::HashSet, sync::Arc};

use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{models::ParticipantEntity, room_store::RoomStore},
    dto::room::{LeaderboardEntry, ParticipantView, PendingActionView, QuestionView, RoomView},
    error::ServiceError,
    services::client_sync::countdown_text,
    state::{clock::TimestampMs, room::Room, state_machine::PhaseStatus},
};

/// Whether a participant heartbeated within the presence window.
pub fn is_online(participant: &ParticipantEntity, window_ms: i64, now: TimestampMs) -> bool {
    participant.disconnected_at.is_none() && now - participant.last_seen_at <= window_ms
}

/// Whether the correct answer may be shown in `status`.
fn reveals_answer(status: PhaseStatus) -> bool {
    matches!(status, PhaseStatus::Reveal | PhaseStatus::Leaderboard)
}

fn shows_leaderboard(status: PhaseStatus) -> bool {
    matches!(status, PhaseStatus::Leaderboard | PhaseStatus::Results)
}

/// Order by total score desc, then average response time asc, then join time.
fn standings_order(a: &ParticipantEntity, b: &ParticipantEntity) -> Ordering {
    b.total_score
        .cmp(&a.total_score)
        .then(a.avg_response_ms.cmp(&b.avg_response_ms))
        .then(a.joined_at.cmp(&b.joined_at))
}

/// Ranked leaderboard of the active participants.
pub fn leaderboard(participants: &[ParticipantEntity]) -> Vec<LeaderboardEntry> {
    let mut ranked: Vec<&ParticipantEntity> =
        participants.iter().filter(|p| p.is_active()).collect();
    ranked.sort_by(|a, b| standings_order(a, b));

    ranked
        .into_iter()
        .enumerate()
        .map(|(index, participant)| LeaderboardEntry {
            rank: index + 1,
            participant_id: participant.id,
            nickname: participant.nickname.clone(),
            total_score: participant.total_score,
            avg_response_ms: participant.avg_response_ms,
            answers: participant.answers,
            max_streak: participant.max_streak,
        })
        .collect()
}

/// Load everything a client needs to render `room` at `now`.
pub async fn build_room_view(
    store: &Arc<dyn RoomStore>,
    room: &Room,
    config: &AppConfig,
    now: TimestampMs,
) -> Result<RoomView, ServiceError> {
    let participants = store.list_participants(room.id).await?;

    let mut question = None;
    let mut answered: HashSet<Uuid> = HashSet::new();
    if let Some(index) = room.current_round() {
        if let Some(round) = store.find_round(room.id, index).await? {
            if let Some(found) = store.find_question(round.question_id).await? {
                question = Some(QuestionView {
                    question_id: found.id,
                    round_index: index,
                    prompt: found.prompt,
                    choices: found.choices,
                    correct_index: reveals_answer(room.status()).then_some(found.correct_index),
                });
            }
        }
        answered = store
            .list_answers(room.id, index)
            .await?
            .into_iter()
            .map(|answer| answer.participant_id)
            .collect();
    }

    let window_ms = config.presence_window_ms();
    let participant_views = participants
        .iter()
        .filter(|p| p.is_active())
        .map(|p| ParticipantView {
            participant_id: p.id,
            nickname: p.nickname.clone(),
            is_guest: p.is_guest,
            is_host: p.is_host,
            is_ready: p.is_ready,
            online: is_online(p, window_ms, now),
            total_score: p.total_score,
            current_streak: p.current_streak,
            has_answered: answered.contains(&p.id),
        })
        .collect();

    let pending_action = room.pending_action.as_ref().map(|action| {
        let remaining_ms = (action.execute_at - now).max(0);
        PendingActionView {
            id: action.id,
            kind: action.kind,
            label: action.label.clone(),
            execute_at: action.execute_at,
            delay_ms: action.delay_ms,
            remaining_ms,
            countdown_text: countdown_text(&action.label, remaining_ms),
            initiated_by: action.initiated_by,
        }
    });

    let paused = room.pause_state();

    Ok(RoomView {
        room_id: room.id,
        code: room.code.clone(),
        status: room.status(),
        paused_stage: paused.map(|p| p.stage.status()),
        paused_remaining_ms: paused.map(|p| p.remaining_ms),
        current_round: room.current_round(),
        round_count: room.round_count,
        phase_ends_at: room.phase_ends_at(),
        host_participant_id: room.host_participant_id,
        rules: room.rules.into(),
        participants: participant_views,
        pending_action,
        question,
        answered_count: answered.len(),
        leaderboard: shows_leaderboard(room.status()).then(|| leaderboard(&participants)),
        version: room.version,
        expires_at: room.expires_at,
        server_now: now,
    })
}
