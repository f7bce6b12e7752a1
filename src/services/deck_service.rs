use tracing::info;

use crate::{
    dto::deck::{CreateDeckRequest, DeckSummary},
    error::ServiceError,
    state::SharedState,
};

/// Store a validated deck and its questions.
pub async fn create_deck(
    state: &SharedState,
    request: CreateDeckRequest,
) -> Result<DeckSummary, ServiceError> {
    let store = state.require_room_store().await?;
    let (deck, questions) = request.into_entities();
    store.save_deck(deck.clone(), questions).await?;

    info!(deck_id = %deck.id, questions = deck.question_ids.len(), "deck created");
    Ok(deck.into())
}

/// Summaries of every stored deck.
pub async fn list_decks(state: &SharedState) -> Result<Vec<DeckSummary>, ServiceError> {
    let store = state.require_room_store().await?;
    let decks = store.list_decks().await?;
    Ok(decks.into_iter().map(DeckSummary::from).collect())
}
