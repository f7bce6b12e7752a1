use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::validation::{validate_guest_key, validate_nickname, validate_room_code},
    state::{
        room::{PendingKind, Rules},
        state_machine::PhaseStatus,
    },
};

/// Optional rule overrides supplied when creating a room.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RulesInput {
    #[validate(range(min = 1, max = 50))]
    pub rounds: Option<u32>,
    #[validate(range(min = 0, max = 30))]
    pub countdown_seconds: Option<u32>,
    #[validate(range(min = 1, max = 120))]
    pub answer_seconds: Option<u32>,
    #[validate(range(min = 0, max = 30))]
    pub grace_seconds: Option<u32>,
    #[validate(range(min = 0, max = 60))]
    pub reveal_seconds: Option<u32>,
    #[validate(range(min = 0, max = 60))]
    pub leaderboard_seconds: Option<u32>,
}

impl RulesInput {
    /// Overlay the provided fields on `base`.
    pub fn apply_to(&self, base: Rules) -> Rules {
        Rules {
            rounds: self.rounds.unwrap_or(base.rounds),
            countdown_seconds: self.countdown_seconds.unwrap_or(base.countdown_seconds),
            answer_seconds: self.answer_seconds.unwrap_or(base.answer_seconds),
            grace_seconds: self.grace_seconds.unwrap_or(base.grace_seconds),
            reveal_seconds: self.reveal_seconds.unwrap_or(base.reveal_seconds),
            leaderboard_seconds: self
                .leaderboard_seconds
                .unwrap_or(base.leaderboard_seconds),
        }
    }
}

/// Payload used to open a new room; the caller joins as host.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub deck_id: Uuid,
    #[validate(custom(function = "validate_nickname"))]
    pub nickname: String,
    /// Guest token used when no `x-user-id` header is present.
    #[validate(custom(function = "validate_guest_key"))]
    pub guest_key: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub rules: Option<RulesInput>,
}

/// Payload used to join a room by code.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    #[validate(custom(function = "validate_room_code"))]
    pub code: String,
    #[validate(custom(function = "validate_nickname"))]
    pub nickname: String,
    #[validate(custom(function = "validate_guest_key"))]
    pub guest_key: Option<String>,
}

/// Membership returned from create and join.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomSessionResponse {
    pub room_id: Uuid,
    pub participant_id: Uuid,
    pub code: String,
    pub is_host: bool,
    pub room: RoomView,
}

/// Rules as exposed to clients.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RulesView {
    pub rounds: u32,
    pub countdown_seconds: u32,
    pub answer_seconds: u32,
    pub grace_seconds: u32,
    pub reveal_seconds: u32,
    pub leaderboard_seconds: u32,
}

impl From<Rules> for RulesView {
    fn from(rules: Rules) -> Self {
        Self {
            rounds: rules.rounds,
            countdown_seconds: rules.countdown_seconds,
            answer_seconds: rules.answer_seconds,
            grace_seconds: rules.grace_seconds,
            reveal_seconds: rules.reveal_seconds,
            leaderboard_seconds: rules.leaderboard_seconds,
        }
    }
}

/// Read-only projection of a room for lobby and match screens.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub room_id: Uuid,
    pub code: String,
    pub status: PhaseStatus,
    /// Stage the room resumes into while paused.
    pub paused_stage: Option<PhaseStatus>,
    pub paused_remaining_ms: Option<i64>,
    pub current_round: Option<usize>,
    pub round_count: usize,
    pub phase_ends_at: Option<i64>,
    pub host_participant_id: Option<Uuid>,
    pub rules: RulesView,
    pub participants: Vec<ParticipantView>,
    pub pending_action: Option<PendingActionView>,
    pub question: Option<QuestionView>,
    pub answered_count: usize,
    pub leaderboard: Option<Vec<LeaderboardEntry>>,
    pub version: u64,
    pub expires_at: i64,
    pub server_now: i64,
}

/// One non-removed participant in join order.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub participant_id: Uuid,
    pub nickname: String,
    pub is_guest: bool,
    pub is_host: bool,
    pub is_ready: bool,
    pub online: bool,
    pub total_score: u64,
    pub current_streak: u32,
    pub has_answered: bool,
}

/// Pending action with its countdown derived from server time.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PendingActionView {
    pub id: Uuid,
    pub kind: PendingKind,
    pub label: String,
    pub execute_at: i64,
    pub delay_ms: u64,
    pub remaining_ms: i64,
    /// For instance `"Match starts in 3s"`.
    pub countdown_text: String,
    pub initiated_by: Uuid,
}

/// Question of the current round. The correct index is hidden until reveal.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub question_id: Uuid,
    pub round_index: usize,
    pub prompt: String,
    pub choices: Vec<String>,
    pub correct_index: Option<usize>,
}

/// One line of the leaderboard.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub participant_id: Uuid,
    pub nickname: String,
    pub total_score: u64,
    pub avg_response_ms: u64,
    pub answers: u32,
    pub max_streak: u32,
}
