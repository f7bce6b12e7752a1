use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::HeaderMap,
    routing::{get, post},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        room::{CreateRoomRequest, JoinRoomRequest, RoomSessionResponse, RoomView},
        validation::validate_room_code,
    },
    error::{AppError, ErrorBody},
    routes::caller_user_id,
    services::room_controller::{self, Identity},
    state::SharedState,
};

/// Room creation, membership and read-only views.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/join", post(join_room))
        .route("/rooms/{roomId}", get(get_room))
        .route("/rooms/code/{code}", get(get_room_by_code))
}

/// Open a room on a deck; the caller becomes its host.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    request_body = CreateRoomRequest,
    params(("x-user-id" = Option<String>, Header, description = "Registered user id")),
    responses(
        (status = 200, description = "Room created", body = RoomSessionResponse),
        (status = 400, description = "Invalid payload", body = ErrorBody),
        (status = 401, description = "No identity supplied", body = ErrorBody),
        (status = 404, description = "Deck not found", body = ErrorBody)
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<CreateRoomRequest>, JsonRejection>,
) -> Result<Json<RoomSessionResponse>, AppError> {
    let Json(request) = payload?;
    request.validate()?;
    let identity = Identity::resolve(caller_user_id(&headers), request.guest_key.as_deref())?;
    let session = room_controller::create_room(&state, identity, request).await?;
    Ok(Json(session))
}

/// Join a room by its code, or refresh an existing membership.
#[utoipa::path(
    post,
    path = "/rooms/join",
    tag = "rooms",
    request_body = JoinRoomRequest,
    params(("x-user-id" = Option<String>, Header, description = "Registered user id")),
    responses(
        (status = 200, description = "Joined", body = RoomSessionResponse),
        (status = 404, description = "Room not found", body = ErrorBody),
        (status = 409, description = "Room started or full", body = ErrorBody)
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<JoinRoomRequest>, JsonRejection>,
) -> Result<Json<RoomSessionResponse>, AppError> {
    let Json(mut request) = payload?;
    request.code = request.code.trim().to_ascii_uppercase();
    request.validate()?;
    let identity = Identity::resolve(caller_user_id(&headers), request.guest_key.as_deref())?;
    let session = room_controller::join_room(&state, identity, request).await?;
    Ok(Json(session))
}

/// Current view of a room.
#[utoipa::path(
    get,
    path = "/rooms/{roomId}",
    tag = "rooms",
    params(("roomId" = Uuid, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Room view", body = RoomView),
        (status = 404, description = "Room not found", body = ErrorBody)
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomView>, AppError> {
    Ok(Json(room_controller::view_room(&state, room_id).await?))
}

/// Current view of the room with the given join code.
#[utoipa::path(
    get,
    path = "/rooms/code/{code}",
    tag = "rooms",
    params(("code" = String, Path, description = "Six character join code")),
    responses(
        (status = 200, description = "Room view", body = RoomView),
        (status = 400, description = "Malformed code", body = ErrorBody),
        (status = 404, description = "Room not found", body = ErrorBody)
    )
)]
pub async fn get_room_by_code(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<RoomView>, AppError> {
    let code = code.trim().to_ascii_uppercase();
    validate_room_code(&code).map_err(|err| AppError::invalid_input(err.to_string()))?;
    Ok(Json(room_controller::view_room_by_code(&state, &code).await?))
}
