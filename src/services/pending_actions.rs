//! Deferred host actions: scheduling, execution once due, and cancellation.
//!
//! Scheduling only records the action on the room. Side effects that must be
//! visible before the countdown ends (the rounds of a `start`) are written at
//! scheduling time and undone on cancel; destructive resets (`rematch`,
//! `toLobby`) run on execution.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{models::RoundEntity, room_store::RoomStore},
    error::ServiceError,
    state::{
        AppState, ApplyError, PlanError, PlanId,
        clock::TimestampMs,
        room::{PendingAction, PendingKind, Room},
    },
};

/// Schedule `kind` on behalf of `initiated_by`.
///
/// Retrying the same kind from the same initiator returns the stored action.
/// The caller persists the room.
pub async fn schedule(
    state: &AppState,
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
    kind: PendingKind,
    requested_delay_ms: Option<u64>,
    initiated_by: Uuid,
    now: TimestampMs,
) -> Result<(PendingAction, bool), ServiceError> {
    if let Some(existing) = room.pending_action.as_ref() {
        if existing.kind == kind && existing.initiated_by == initiated_by {
            return Ok((existing.clone(), false));
        }
        return Err(PlanError::AlreadyPending.into());
    }

    if !kind.allowed_from(room.status()) {
        return Err(ServiceError::PhaseViolation(format!(
            "{} cannot be scheduled while the room is in {}",
            kind.label(),
            room.status()
        )));
    }

    if kind == PendingKind::Start {
        prepare_rounds(store, room).await?;
    }

    let delay_ms = state.config().pending_delay(requested_delay_ms);
    let action = room.plan_pending(kind, delay_ms, initiated_by, now)?;
    info!(
        room_id = %room.id,
        kind = ?action.kind,
        execute_at = action.execute_at,
        "pending action scheduled"
    );
    Ok((action, true))
}

/// Cancel the pending action and undo its scheduling side effects.
///
/// The caller persists the room.
pub async fn cancel(
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
    expected: Option<PlanId>,
    now: TimestampMs,
) -> Result<PendingAction, ServiceError> {
    let action = room.abort_pending(expected, now)?;
    if action.kind == PendingKind::Start {
        store.replace_rounds(room.id, Vec::new()).await?;
        room.round_count = 0;
    }
    info!(room_id = %room.id, kind = ?action.kind, "pending action canceled");
    Ok(action)
}

/// Execute the pending action if it is due. Returns whether the room changed.
///
/// The caller persists the room when this returns `true`.
pub async fn execute_due(
    state: &AppState,
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
    now: TimestampMs,
) -> Result<bool, ServiceError> {
    let action = match room.take_due_pending(None, now) {
        Ok(action) => action,
        Err(ApplyError::NoPending | ApplyError::NotDue { .. }) => return Ok(false),
        Err(ApplyError::PhaseMismatch { expected, actual }) => {
            warn!(
                room_id = %room.id,
                %expected,
                %actual,
                "dropping pending action scheduled from a phase the room has left"
            );
            return Ok(true);
        }
        Err(err) => return Err(err.into()),
    };

    let outcome = match action.kind {
        PendingKind::Start => Ok(()),
        PendingKind::Rematch => match select_rounds(store, room).await {
            Ok(rounds) => {
                reset_match(store, room).await?;
                store_rounds(store, room, rounds).await.map(|_| ())
            }
            Err(err) => Err(err),
        },
        PendingKind::ToLobby => {
            reset_match(store, room).await?;
            room.expires_at = now + state.config().lobby_ttl_ms();
            Ok(())
        }
    };

    match outcome {
        Ok(()) => {}
        Err(ServiceError::NoQuestionsAvailable) => {
            warn!(room_id = %room.id, deck_id = %room.deck_id, "rematch dropped: deck is empty");
            room.touch(now);
            return Ok(true);
        }
        Err(err) => return Err(err),
    }

    room.apply(action.kind.event(), now)?;

    info!(
        room_id = %room.id,
        kind = ?action.kind,
        status = %room.status(),
        "pending action executed"
    );
    Ok(true)
}

/// Pick the questions of a match and store one round per question.
///
/// Plays `min(deck size, rules.rounds)` rounds.
pub async fn prepare_rounds(
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
) -> Result<usize, ServiceError> {
    let rounds = select_rounds(store, room).await?;
    store_rounds(store, room, rounds).await
}

/// Draw the rounds of the next match without writing anything.
async fn select_rounds(
    store: &Arc<dyn RoomStore>,
    room: &Room,
) -> Result<Vec<RoundEntity>, ServiceError> {
    let deck = store
        .find_deck(room.deck_id)
        .await?
        .ok_or(ServiceError::DeckNotFound)?;

    let selected = select_questions(deck.question_ids, room.rules.rounds as usize);
    if selected.is_empty() {
        return Err(ServiceError::NoQuestionsAvailable);
    }
    if selected.len() < room.rules.rounds as usize {
        warn!(
            room_id = %room.id,
            deck_id = %room.deck_id,
            requested = room.rules.rounds,
            available = selected.len(),
            "deck smaller than requested rounds; playing fewer rounds"
        );
    }

    Ok(selected
        .into_iter()
        .enumerate()
        .map(|(index, question_id)| RoundEntity {
            room_id: room.id,
            index,
            question_id,
            started_at: 0,
            closed_at: None,
            reveal_at: None,
        })
        .collect())
}

async fn store_rounds(
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
    rounds: Vec<RoundEntity>,
) -> Result<usize, ServiceError> {
    let count = rounds.len();
    store.replace_rounds(room.id, rounds).await?;
    room.round_count = count;
    Ok(count)
}

/// Uniform sample of up to `rounds` question ids, without replacement.
fn select_questions(mut question_ids: Vec<Uuid>, rounds: usize) -> Vec<Uuid> {
    question_ids.shuffle(&mut rand::rng());
    question_ids.truncate(rounds);
    question_ids
}

/// Clear scores, streaks, ready flags, answers and rounds of the room.
async fn reset_match(store: &Arc<dyn RoomStore>, room: &mut Room) -> Result<(), ServiceError> {
    let mut participants = store.list_participants(room.id).await?;
    for participant in &mut participants {
        participant.reset_stats();
    }
    store.save_participants(participants).await?;
    store.delete_answers(room.id).await?;
    store.replace_rounds(room.id, Vec::new()).await?;
    room.round_count = 0;
    Ok(())
}
