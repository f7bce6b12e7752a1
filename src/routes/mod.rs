use axum::{Router, http::HeaderMap};

use crate::state::SharedState;

pub mod actions;
pub mod decks;
pub mod docs;
pub mod health;
pub mod rooms;
pub mod sse;

/// Header carrying the registered user id set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(decks::router())
        .merge(rooms::router())
        .merge(actions::router())
        .merge(sse::router())
        .merge(docs::router())
        .with_state(state)
}

fn caller_user_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
}
