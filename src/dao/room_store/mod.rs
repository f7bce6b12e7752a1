pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            AnswerEntity, DeckEntity, ParticipantEntity, QuestionEntity, ReactionEntity,
            RoomEntity, RoundEntity,
        },
        storage::StorageResult,
    },
    state::clock::TimestampMs,
};

/// Result of a conditional room write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The stored version matched and the row was replaced.
    Applied,
    /// Another writer got there first.
    Conflict,
}

/// Result of recording an answer.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerInsert {
    /// The answer was stored together with the participant update.
    Inserted,
    /// An answer already existed for this participant and round; nothing changed.
    Duplicate(AnswerEntity),
}

/// Abstraction over the persistence layer for rooms and their child rows.
pub trait RoomStore: Send + Sync {
    /// Insert a new room. Returns `false` if its code is already taken.
    fn insert_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<bool>>;
    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    fn find_room_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    /// Replace the room only if the stored version equals `expected_version`.
    fn compare_and_swap_room(
        &self,
        room: RoomEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<WriteOutcome>>;
    /// Lobby rooms whose `expires_at` is before `now`.
    fn list_expired_lobbies(
        &self,
        now: TimestampMs,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>>;
    /// Delete a room with all of its participants, rounds, answers and reactions.
    fn delete_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<()>>;
    /// Rooms carrying a phase deadline or a pending action.
    fn list_rooms_with_deadlines(&self) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>>;

    fn save_participant(&self, participant: ParticipantEntity)
    -> BoxFuture<'static, StorageResult<()>>;
    fn save_participants(
        &self,
        participants: Vec<ParticipantEntity>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn find_participant(
        &self,
        room_id: Uuid,
        participant_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>>;
    fn find_participant_by_identity(
        &self,
        room_id: Uuid,
        identity: String,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>>;
    /// All participants of a room, removed ones included, in join order.
    fn list_participants(
        &self,
        room_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>>;

    /// Replace every round of a room.
    fn replace_rounds(
        &self,
        room_id: Uuid,
        rounds: Vec<RoundEntity>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn find_round(
        &self,
        room_id: Uuid,
        index: usize,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>>;
    fn save_round(&self, round: RoundEntity) -> BoxFuture<'static, StorageResult<()>>;

    fn find_answer(
        &self,
        room_id: Uuid,
        round_index: usize,
        participant_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<AnswerEntity>>>;
    fn list_answers(
        &self,
        room_id: Uuid,
        round_index: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>>;
    /// Insert the answer if none exists for its `(room, round, participant)`
    /// and store the updated participant alongside it.
    fn record_answer(
        &self,
        answer: AnswerEntity,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<AnswerInsert>>;
    fn delete_answers(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;

    fn insert_reaction(&self, reaction: ReactionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn latest_reaction(
        &self,
        room_id: Uuid,
        participant_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ReactionEntity>>>;

    /// Store a deck together with its questions.
    fn save_deck(
        &self,
        deck: DeckEntity,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn find_deck(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<DeckEntity>>>;
    fn list_decks(&self) -> BoxFuture<'static, StorageResult<Vec<DeckEntity>>>;
    fn find_question(&self, id: Uuid)
    -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
