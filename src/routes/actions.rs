use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::HeaderMap,
    routing::post,
};

use crate::{
    dto::action::{ActionRequest, ActionResponse},
    error::{AppError, ErrorBody},
    routes::caller_user_id,
    services::room_controller,
    state::SharedState,
};

/// Single entry point for participant actions.
pub fn router() -> Router<SharedState> {
    Router::new().route("/actions", post(dispatch_action))
}

/// Run a participant action against a room.
///
/// The body carries `action`, `roomId`, `participantId`, an optional
/// `guestKey` and the action's parameters.
#[utoipa::path(
    post,
    path = "/actions",
    tag = "actions",
    request_body = ActionRequest,
    params(("x-user-id" = Option<String>, Header, description = "Registered user id")),
    responses(
        (status = 200, description = "Action applied", body = ActionResponse),
        (status = 400, description = "Unknown action or invalid input", body = ErrorBody),
        (status = 403, description = "Caller may not act for this participant", body = ErrorBody),
        (status = 409, description = "Rejected by the room rules or lost a concurrent write", body = ErrorBody),
        (status = 503, description = "Storage unavailable", body = ErrorBody)
    )
)]
pub async fn dispatch_action(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<ActionResponse>, AppError> {
    let Json(request) = payload?;
    let response = room_controller::dispatch(&state, caller_user_id(&headers), request).await?;
    Ok(Json(response))
}
