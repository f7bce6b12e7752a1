/// Client-side clock offset handling and deadline triggers.
pub mod client_sync;
/// Server-side deadline driver.
pub mod deadline_scheduler;
/// Deck seeding and listing.
pub mod deck_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Deferred host actions.
pub mod pending_actions;
/// Presence and room view projection.
pub mod presence;
/// Room lifecycle and action dispatch.
pub mod room_controller;
/// Presence loss detection and expired lobby cleanup.
pub mod room_janitor;
/// Answer scoring.
pub mod scoring;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events streaming service.
pub mod sse_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
