use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::get,
};
use validator::Validate;

use crate::{
    dto::deck::{CreateDeckRequest, DeckSummary},
    error::{AppError, ErrorBody},
    services::deck_service,
    state::SharedState,
};

/// Deck seeding routes.
pub fn router() -> Router<SharedState> {
    Router::new().route("/decks", get(list_decks).post(create_deck))
}

/// Store a deck of multiple-choice questions.
#[utoipa::path(
    post,
    path = "/decks",
    tag = "decks",
    request_body = CreateDeckRequest,
    responses(
        (status = 200, description = "Deck created", body = DeckSummary),
        (status = 400, description = "Invalid deck", body = ErrorBody)
    )
)]
pub async fn create_deck(
    State(state): State<SharedState>,
    payload: Result<Json<CreateDeckRequest>, JsonRejection>,
) -> Result<Json<DeckSummary>, AppError> {
    let Json(request) = payload?;
    request.validate()?;
    Ok(Json(deck_service::create_deck(&state, request).await?))
}

/// List stored decks.
#[utoipa::path(
    get,
    path = "/decks",
    tag = "decks",
    responses((status = 200, description = "Deck summaries", body = [DeckSummary]))
)]
pub async fn list_decks(State(state): State<SharedState>) -> Result<Json<Vec<DeckSummary>>, AppError> {
    Ok(Json(deck_service::list_decks(&state).await?))
}
