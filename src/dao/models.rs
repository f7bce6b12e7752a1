use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dao::storage::StorageError,
    state::{
        clock::TimestampMs,
        room::{PendingAction, PendingKind, Room, Rules},
        state_machine::{ActivePhase, PausedPhase, PhaseStatus, RoomPhase, Stage},
    },
};

/// Persisted room row. Phase data is stored flat and rebuilt into a
/// [`RoomPhase`] on load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEntity {
    /// Room identifier.
    #[serde(with = "uuid_string")]
    pub id: Uuid,
    /// Join code.
    pub code: String,
    /// Current host participant.
    #[serde(with = "uuid_string::option", default)]
    pub host_participant_id: Option<Uuid>,
    /// Question pool.
    #[serde(with = "uuid_string")]
    pub deck_id: Uuid,
    /// Match rules.
    pub rules: Rules,
    /// Flat phase status.
    pub status: PhaseStatus,
    /// Round index while a round is running or paused.
    pub current_round: Option<usize>,
    /// Deadline of the running stage.
    pub phase_ends_at: Option<TimestampMs>,
    /// Pause snapshot.
    pub pause_state: Option<PauseStateEntity>,
    /// Deferred host action.
    pub pending_action: Option<PendingActionEntity>,
    /// Rounds selected for the current match.
    pub round_count: usize,
    /// Optimistic concurrency counter.
    pub version: u64,
    /// Creation time.
    pub created_at: TimestampMs,
    /// Last mutation time.
    pub updated_at: TimestampMs,
    /// Lobby expiry.
    pub expires_at: TimestampMs,
}

/// Persisted pause snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PauseStateEntity {
    /// Stage to resume into.
    pub resume_into: Stage,
    /// Time left on the stage.
    pub remaining_ms: i64,
    /// When the pause started.
    pub paused_at: TimestampMs,
}

/// Persisted pending action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingActionEntity {
    /// Action identifier.
    #[serde(with = "uuid_string")]
    pub id: Uuid,
    /// Action kind.
    pub kind: PendingKind,
    /// Absolute execution time.
    pub execute_at: TimestampMs,
    /// Requested delay.
    pub delay_ms: u64,
    /// Scheduling time.
    pub created_at: TimestampMs,
    /// Participant who scheduled it.
    #[serde(with = "uuid_string")]
    pub initiated_by: Uuid,
    /// Countdown label.
    pub label: String,
    /// Status when scheduled.
    pub scheduled_from: PhaseStatus,
}

/// One user's (or guest's) membership in a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantEntity {
    /// Participant identifier.
    #[serde(with = "uuid_string")]
    pub id: Uuid,
    /// Room the participant belongs to.
    #[serde(with = "uuid_string")]
    pub room_id: Uuid,
    /// Stable identity string (user id or guest key).
    pub identity: String,
    /// Whether the identity is a guest key.
    pub is_guest: bool,
    /// Display name.
    pub nickname: String,
    /// Host flag.
    pub is_host: bool,
    /// Ready flag, meaningful in the lobby.
    pub is_ready: bool,
    /// Join time.
    pub joined_at: TimestampMs,
    /// Last heartbeat.
    pub last_seen_at: TimestampMs,
    /// Set when the participant left.
    pub removed_at: Option<TimestampMs>,
    /// Set when presence was lost.
    pub disconnected_at: Option<TimestampMs>,
    /// Sum of score deltas.
    pub total_score: u64,
    /// Number of accepted answers.
    pub answers: u32,
    /// Running average response time.
    pub avg_response_ms: u64,
    /// Consecutive correct answers.
    pub current_streak: u32,
    /// Best streak of the match.
    pub max_streak: u32,
}

impl ParticipantEntity {
    /// Whether the participant is still part of the room.
    pub fn is_active(&self) -> bool {
        self.removed_at.is_none()
    }

    /// Clear match statistics and the ready flag.
    pub fn reset_stats(&mut self) {
        self.total_score = 0;
        self.answers = 0;
        self.avg_response_ms = 0;
        self.current_streak = 0;
        self.max_streak = 0;
        self.is_ready = false;
    }
}

/// One question instance within a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundEntity {
    /// Owning room.
    #[serde(with = "uuid_string")]
    pub room_id: Uuid,
    /// Zero-based round index.
    pub index: usize,
    /// Question asked in this round.
    #[serde(with = "uuid_string")]
    pub question_id: Uuid,
    /// When the question phase started, `0` until then.
    pub started_at: TimestampMs,
    /// When the question phase ended.
    pub closed_at: Option<TimestampMs>,
    /// When the answer was revealed.
    pub reveal_at: Option<TimestampMs>,
}

/// A participant's accepted submission for one round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerEntity {
    /// Owning room.
    #[serde(with = "uuid_string")]
    pub room_id: Uuid,
    /// Round the answer belongs to.
    pub round_index: usize,
    /// Submitting participant.
    #[serde(with = "uuid_string")]
    pub participant_id: Uuid,
    /// Chosen choice.
    pub choice_index: usize,
    /// Server receive time.
    pub received_at: TimestampMs,
    /// Correctness.
    pub is_correct: bool,
    /// Points awarded.
    pub score_delta: u32,
    /// Streak multiplier applied.
    pub multiplier: f64,
    /// Time since the round started.
    pub elapsed_ms: i64,
}

/// Ephemeral emoji reaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionEntity {
    /// Reaction identifier.
    #[serde(with = "uuid_string")]
    pub id: Uuid,
    /// Owning room.
    #[serde(with = "uuid_string")]
    pub room_id: Uuid,
    /// Sender.
    #[serde(with = "uuid_string")]
    pub participant_id: Uuid,
    /// Emoji.
    pub emoji: String,
    /// Round during which it was sent.
    pub round_index: Option<usize>,
    /// Send time.
    pub sent_at: TimestampMs,
}

/// Question pool a room draws from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeckEntity {
    /// Deck identifier.
    #[serde(with = "uuid_string")]
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Questions in the deck.
    #[serde(with = "uuid_string::vec")]
    pub question_ids: Vec<Uuid>,
}

/// Multiple choice question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    /// Question identifier.
    #[serde(with = "uuid_string")]
    pub id: Uuid,
    /// Question text.
    pub prompt: String,
    /// Answer choices.
    pub choices: Vec<String>,
    /// Index of the correct choice.
    pub correct_index: usize,
}

impl From<&Room> for RoomEntity {
    fn from(room: &Room) -> Self {
        let pause_state = room.pause_state().map(|paused| PauseStateEntity {
            resume_into: paused.stage,
            remaining_ms: paused.remaining_ms,
            paused_at: paused.paused_at,
        });

        Self {
            id: room.id,
            code: room.code.clone(),
            host_participant_id: room.host_participant_id,
            deck_id: room.deck_id,
            rules: room.rules,
            status: room.status(),
            current_round: room.current_round(),
            phase_ends_at: room.phase_ends_at(),
            pause_state,
            pending_action: room.pending_action.as_ref().map(Into::into),
            round_count: room.round_count,
            version: room.version,
            created_at: room.created_at,
            updated_at: room.updated_at,
            expires_at: room.expires_at,
        }
    }
}

impl From<&PendingAction> for PendingActionEntity {
    fn from(action: &PendingAction) -> Self {
        Self {
            id: action.id,
            kind: action.kind,
            execute_at: action.execute_at,
            delay_ms: action.delay_ms,
            created_at: action.created_at,
            initiated_by: action.initiated_by,
            label: action.label.clone(),
            scheduled_from: action.scheduled_from,
        }
    }
}

impl From<PendingActionEntity> for PendingAction {
    fn from(entity: PendingActionEntity) -> Self {
        Self {
            id: entity.id,
            kind: entity.kind,
            execute_at: entity.execute_at,
            delay_ms: entity.delay_ms,
            created_at: entity.created_at,
            initiated_by: entity.initiated_by,
            label: entity.label,
            scheduled_from: entity.scheduled_from,
        }
    }
}

impl TryFrom<RoomEntity> for Room {
    type Error = StorageError;

    fn try_from(entity: RoomEntity) -> Result<Self, Self::Error> {
        let phase = match (entity.status, entity.current_round, entity.phase_ends_at) {
            (PhaseStatus::Lobby, None, None) => RoomPhase::Lobby,
            (PhaseStatus::Results, None, None) => RoomPhase::Results,
            (PhaseStatus::Paused, Some(round), None) => {
                let pause = entity.pause_state.ok_or_else(|| {
                    StorageError::corrupt(entity.id, "paused room without pause state")
                })?;
                RoomPhase::Paused(PausedPhase {
                    stage: pause.resume_into,
                    round,
                    remaining_ms: pause.remaining_ms,
                    paused_at: pause.paused_at,
                })
            }
            (status, Some(round), Some(ends_at)) => {
                let stage = status.stage().ok_or_else(|| {
                    StorageError::corrupt(entity.id, format!("{status} room with a deadline"))
                })?;
                RoomPhase::Active(ActivePhase {
                    stage,
                    round,
                    ends_at,
                })
            }
            (status, round, ends_at) => {
                return Err(StorageError::corrupt(
                    entity.id,
                    format!("{status} room with round {round:?} and deadline {ends_at:?}"),
                ));
            }
        };

        if let Some(round) = phase.current_round() {
            if round >= entity.round_count {
                return Err(StorageError::corrupt(
                    entity.id,
                    format!("round {round} out of {} selected", entity.round_count),
                ));
            }
        }

        Ok(Self {
            id: entity.id,
            code: entity.code,
            host_participant_id: entity.host_participant_id,
            deck_id: entity.deck_id,
            rules: entity.rules,
            phase,
            round_count: entity.round_count,
            version: entity.version,
            pending_action: entity.pending_action.map(Into::into),
            created_at: entity.created_at,
            updated_at: entity.updated_at,
            expires_at: entity.expires_at,
        })
    }
}

/// Serialize [`Uuid`] values as hyphenated strings in every storage format.
pub mod uuid_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use uuid::Uuid;

    /// Serialize a single id.
    pub fn serialize<S: Serializer>(id: &Uuid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    /// Deserialize a single id.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Uuid, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Uuid::parse_str(&raw).map_err(D::Error::custom)
    }

    /// Optional ids.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer, de::Error};
        use uuid::Uuid;

        /// Serialize an optional id.
        pub fn serialize<S: Serializer>(
            id: &Option<Uuid>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match id {
                Some(id) => serializer.collect_str(id),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional id.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Uuid>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| Uuid::parse_str(&raw).map_err(D::Error::custom))
                .transpose()
        }
    }

    /// Lists of ids.
    pub mod vec {
        use serde::{Deserialize, Deserializer, Serializer, de::Error, ser::SerializeSeq};
        use uuid::Uuid;

        /// Serialize a list of ids.
        pub fn serialize<S: Serializer>(ids: &[Uuid], serializer: S) -> Result<S::Ok, S::Error> {
            let mut seq = serializer.serialize_seq(Some(ids.len()))?;
            for id in ids {
                seq.serialize_element(&id.to_string())?;
            }
            seq.end()
        }

        /// Deserialize a list of ids.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<Uuid>, D::Error> {
            Vec::<String>::deserialize(deserializer)?
                .iter()
                .map(|raw| Uuid::parse_str(raw).map_err(D::Error::custom))
                .collect()
        }
    }
}
