use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dto::{
        room::RoomView,
        sse::{AnswerReceivedEvent, ReactionSentEvent, ServerEvent},
    },
    state::AppState,
};

/// Full room view after a mutation.
pub const EVENT_ROOM_UPDATED: &str = "room.updated";
/// A participant answered the current round.
pub const EVENT_ANSWER_RECEIVED: &str = "answer.received";
/// A participant sent an emoji reaction.
pub const EVENT_REACTION_SENT: &str = "reaction.sent";
/// First event on every stream.
pub const EVENT_HANDSHAKE: &str = "handshake";

/// Broadcast the current room view to the room's subscribers.
pub fn broadcast_room_updated(state: &AppState, view: &RoomView) {
    send_room_event(state, view.room_id, EVENT_ROOM_UPDATED, view);
}

/// Broadcast that `participant_id` answered, together with the new answered count.
pub fn broadcast_answer_received(
    state: &AppState,
    room_id: Uuid,
    participant_id: Uuid,
    round_index: usize,
    answered_count: usize,
) {
    let payload = AnswerReceivedEvent {
        participant_id,
        round_index,
        answered_count,
        server_now: state.now(),
    };
    send_room_event(state, room_id, EVENT_ANSWER_RECEIVED, &payload);
}

/// Broadcast an accepted reaction.
pub fn broadcast_reaction_sent(
    state: &AppState,
    room_id: Uuid,
    participant_id: Uuid,
    emoji: &str,
    round_index: Option<usize>,
) {
    let payload = ReactionSentEvent {
        participant_id,
        emoji: emoji.to_owned(),
        round_index,
        server_now: state.now(),
    };
    send_room_event(state, room_id, EVENT_REACTION_SENT, &payload);
}

fn send_room_event<T: Serialize>(state: &AppState, room_id: Uuid, event: &str, payload: &T) {
    match ServerEvent::json(Some(event.to_owned()), payload) {
        Ok(message) => state.rooms().broadcast(room_id, message),
        Err(err) => warn!(room_id = %room_id, event, error = %err, "failed to serialize room event"),
    }
}
