use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use uuid::Uuid;

use crate::{error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/rooms/{roomId}/events",
    tag = "sse",
    params(("roomId" = Uuid, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Room event stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "Room not found", body = crate::error::ErrorBody)
    )
)]
/// Stream `room.updated`, `answer.received` and `reaction.sent` events of a room.
pub async fn room_events(
    State(state): State<SharedState>,
    Path(room_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    Ok(sse_service::room_stream(&state, room_id).await?)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/rooms/{roomId}/events", get(room_events))
}
