use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::state_machine::PhaseStatus;

/// Body of `POST /actions`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub room_id: Uuid,
    pub participant_id: Uuid,
    /// Guest token when no `x-user-id` header is present.
    #[serde(default)]
    pub guest_key: Option<String>,
    #[serde(flatten)]
    pub action: RoomAction,
}

/// Action name plus its parameters.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum RoomAction {
    Heartbeat,
    #[serde(rename_all = "camelCase")]
    SetReady {
        ready: bool,
    },
    Leave,
    #[serde(rename_all = "camelCase")]
    Start {
        #[serde(default)]
        delay_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        /// Status the caller observed; a mismatch makes the call a no-op.
        #[serde(default)]
        expected_status: Option<PhaseStatus>,
    },
    #[serde(rename_all = "camelCase")]
    SubmitAnswer {
        choice_index: usize,
    },
    #[serde(rename_all = "camelCase")]
    SendReaction {
        emoji: String,
    },
    #[serde(rename_all = "camelCase")]
    Rematch {
        #[serde(default)]
        delay_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Cancel {
        #[serde(default)]
        pending_action_id: Option<Uuid>,
    },
    Pause,
    Resume,
    #[serde(rename_all = "camelCase")]
    ToLobby {
        #[serde(default)]
        delay_ms: Option<u64>,
    },
    /// Any other action name.
    #[serde(other)]
    Unknown,
}

impl RoomAction {
    /// Wire name of the action, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            RoomAction::Heartbeat => "heartbeat",
            RoomAction::SetReady { .. } => "setReady",
            RoomAction::Leave => "leave",
            RoomAction::Start { .. } => "start",
            RoomAction::Progress { .. } => "progress",
            RoomAction::SubmitAnswer { .. } => "submitAnswer",
            RoomAction::SendReaction { .. } => "sendReaction",
            RoomAction::Rematch { .. } => "rematch",
            RoomAction::Cancel { .. } => "cancel",
            RoomAction::Pause => "pause",
            RoomAction::Resume => "resume",
            RoomAction::ToLobby { .. } => "toLobby",
            RoomAction::Unknown => "unknown",
        }
    }
}

/// Successful dispatch envelope.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub data: ActionData,
    pub server_now: i64,
}

/// Payload of a successful action.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(untagged)]
pub enum ActionData {
    Scheduled(ScheduledResult),
    Progressed(ProgressResult),
    Answer(AnswerResult),
    Reaction(ReactionResult),
    Ack(AckResult),
}

/// `{ok: true}`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AckResult {
    pub ok: bool,
}

impl AckResult {
    /// Plain acknowledgement.
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

/// Result of scheduling a pending action.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledResult {
    pub ok: bool,
    pub pending_action_id: Uuid,
    pub execute_at: i64,
}

/// Result of a `progress` call.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResult {
    pub ok: bool,
    /// Whether this call moved the room forward.
    pub advanced: bool,
    pub status: PhaseStatus,
    pub phase_ends_at: Option<i64>,
}

/// Result of `submitAnswer`, also returned unchanged for duplicates.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResult {
    pub ok: bool,
    pub is_correct: bool,
    pub score_delta: u32,
    pub multiplier: f64,
    pub already_answered: Option<bool>,
}

/// Soft result of `sendReaction`.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ReactionResult {
    pub success: bool,
    pub reason: Option<ReactionRejection>,
}

/// Why a reaction was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReactionRejection {
    InvalidEmoji,
    Cooldown,
}
