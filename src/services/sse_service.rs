use std::{convert::Infallible, time::Duration};

use async_stream::stream;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        room::RoomView,
        sse::{Handshake, ServerEvent},
    },
    error::ServiceError,
    services::{room_controller, sse_events},
    state::SharedState,
};

/// Open the event stream of a room.
///
/// The stream starts with a handshake and the current room view, then
/// forwards every broadcast for the room.
pub async fn room_stream(
    state: &SharedState,
    room_id: Uuid,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + use<>>, ServiceError> {
    // subscribe first so nothing between the snapshot and the stream is lost
    let receiver = state.rooms().subscribe(room_id);
    let view = room_controller::view_room(state, room_id).await?;

    let handshake = Handshake {
        room_id,
        message: "subscribed to room events".into(),
        degraded: state.is_degraded().await,
        server_now: state.now(),
    };

    let initial = initial_events(&handshake, &view);
    info!(room_id = %room_id, "room SSE stream connected");
    Ok(to_sse_stream(room_id, initial, receiver))
}

fn initial_events(handshake: &Handshake, view: &RoomView) -> Vec<ServerEvent> {
    let mut events = Vec::with_capacity(2);
    match ServerEvent::json(Some(sse_events::EVENT_HANDSHAKE.to_owned()), handshake) {
        Ok(event) => events.push(event),
        Err(err) => warn!(error = %err, "failed to serialize SSE handshake"),
    }
    match ServerEvent::json(Some(sse_events::EVENT_ROOM_UPDATED.to_owned()), view) {
        Ok(event) => events.push(event),
        Err(err) => warn!(error = %err, "failed to serialize room snapshot"),
    }
    events
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Convert a room receiver into an SSE response, skipping lagged messages.
fn to_sse_stream(
    room_id: Uuid,
    initial: Vec<ServerEvent>,
    mut receiver: broadcast::Receiver<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = stream! {
        for payload in initial {
            yield Ok(to_event(payload));
        }

        loop {
            match receiver.recv().await {
                Ok(payload) => yield Ok(to_event(payload)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(room_id = %room_id, skipped, "room SSE subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            }
        }

        info!(room_id = %room_id, "room SSE stream closed");
    };

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
