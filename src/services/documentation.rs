use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the quiz room backend.
#[openapi(
    info(title = "quiz-room-back"),
    paths(
        crate::routes::health::healthcheck,
        crate::routes::decks::create_deck,
        crate::routes::decks::list_decks,
        crate::routes::rooms::create_room,
        crate::routes::rooms::join_room,
        crate::routes::rooms::get_room,
        crate::routes::rooms::get_room_by_code,
        crate::routes::actions::dispatch_action,
        crate::routes::sse::room_events,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::deck::CreateDeckRequest,
            crate::dto::deck::QuestionInput,
            crate::dto::deck::DeckSummary,
            crate::dto::room::RulesInput,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::JoinRoomRequest,
            crate::dto::room::RoomSessionResponse,
            crate::dto::room::RulesView,
            crate::dto::room::RoomView,
            crate::dto::room::ParticipantView,
            crate::dto::room::PendingActionView,
            crate::dto::room::QuestionView,
            crate::dto::room::LeaderboardEntry,
            crate::dto::action::ActionRequest,
            crate::dto::action::RoomAction,
            crate::dto::action::ActionResponse,
            crate::dto::action::ActionData,
            crate::dto::action::AckResult,
            crate::dto::action::ScheduledResult,
            crate::dto::action::ProgressResult,
            crate::dto::action::AnswerResult,
            crate::dto::action::ReactionResult,
            crate::dto::action::ReactionRejection,
            crate::dto::sse::Handshake,
            crate::dto::sse::AnswerReceivedEvent,
            crate::dto::sse::ReactionSentEvent,
            crate::error::ErrorBody,
            crate::state::state_machine::PhaseStatus,
            crate::state::room::PendingKind,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "decks", description = "Question deck seeding"),
        (name = "rooms", description = "Room creation, joining and views"),
        (name = "actions", description = "Participant actions driving a match"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
