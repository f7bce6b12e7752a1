//! Process-local [`RoomStore`] used when no database is configured and in tests.

use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{self, BoxFuture};
use indexmap::IndexMap;
use uuid::Uuid;

use super::{AnswerInsert, RoomStore, WriteOutcome};
use crate::{
    dao::{
        models::{
            AnswerEntity, DeckEntity, ParticipantEntity, QuestionEntity, ReactionEntity,
            RoomEntity, RoundEntity,
        },
        storage::{StorageError, StorageResult},
    },
    state::{clock::TimestampMs, state_machine::PhaseStatus},
};

/// Reactions kept per room; older ones are dropped.
const REACTION_HISTORY: usize = 64;

/// In-memory store backed by concurrent maps.
#[derive(Clone, Default)]
pub struct InMemoryRoomStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    rooms: DashMap<Uuid, RoomEntity>,
    codes: DashMap<String, Uuid>,
    participants: DashMap<Uuid, IndexMap<Uuid, ParticipantEntity>>,
    rounds: DashMap<Uuid, Vec<RoundEntity>>,
    answers: DashMap<Uuid, IndexMap<(usize, Uuid), AnswerEntity>>,
    reactions: DashMap<Uuid, VecDeque<ReactionEntity>>,
    decks: DashMap<Uuid, DeckEntity>,
    questions: DashMap<Uuid, QuestionEntity>,
    offline: AtomicBool,
}

impl InMemoryRoomStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make health checks and reconnects fail until switched back online.
    ///
    /// Reads and writes keep working.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    fn reachable(&self) -> BoxFuture<'static, StorageResult<()>> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Box::pin(future::ready(Err(StorageError::unavailable(
                "in-memory store is offline".into(),
                io::Error::other("offline"),
            ))));
        }
        ready(())
    }
}

fn ready<T: Send + 'static>(value: T) -> BoxFuture<'static, StorageResult<T>> {
    Box::pin(future::ready(Ok(value)))
}

impl RoomStore for InMemoryRoomStore {
    fn insert_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let inserted = match self.inner.codes.entry(room.code.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(room.id);
                self.inner.rooms.insert(room.id, room);
                true
            }
        };
        ready(inserted)
    }

    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        ready(self.inner.rooms.get(&id).map(|room| room.clone()))
    }

    fn find_room_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let id = self.inner.codes.get(&code).map(|id| *id);
        let room = id.and_then(|id| self.inner.rooms.get(&id).map(|room| room.clone()));
        ready(room)
    }

    fn compare_and_swap_room(
        &self,
        room: RoomEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<WriteOutcome>> {
        let outcome = match self.inner.rooms.get_mut(&room.id) {
            Some(mut stored) if stored.version == expected_version => {
                *stored = room;
                WriteOutcome::Applied
            }
            _ => WriteOutcome::Conflict,
        };
        ready(outcome)
    }

    fn list_expired_lobbies(
        &self,
        now: TimestampMs,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let rooms = self
            .inner
            .rooms
            .iter()
            .filter(|room| room.status == PhaseStatus::Lobby && room.expires_at < now)
            .map(|room| room.clone())
            .collect();
        ready(rooms)
    }

    fn delete_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        if let Some((_, room)) = self.inner.rooms.remove(&id) {
            self.inner.codes.remove(&room.code);
        }
        self.inner.participants.remove(&id);
        self.inner.rounds.remove(&id);
        self.inner.answers.remove(&id);
        self.inner.reactions.remove(&id);
        ready(())
    }

    fn list_rooms_with_deadlines(&self) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let rooms = self
            .inner
            .rooms
            .iter()
            .filter(|room| room.phase_ends_at.is_some() || room.pending_action.is_some())
            .map(|room| room.clone())
            .collect();
        ready(rooms)
    }

    fn save_participant(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.inner
            .participants
            .entry(participant.room_id)
            .or_default()
            .insert(participant.id, participant);
        ready(())
    }

    fn save_participants(
        &self,
        participants: Vec<ParticipantEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        for participant in participants {
            self.inner
                .participants
                .entry(participant.room_id)
                .or_default()
                .insert(participant.id, participant);
        }
        ready(())
    }

    fn find_participant(
        &self,
        room_id: Uuid,
        participant_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let participant = self
            .inner
            .participants
            .get(&room_id)
            .and_then(|members| members.get(&participant_id).cloned());
        ready(participant)
    }

    fn find_participant_by_identity(
        &self,
        room_id: Uuid,
        identity: String,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let participant = self.inner.participants.get(&room_id).and_then(|members| {
            members
                .values()
                .find(|member| member.identity == identity)
                .cloned()
        });
        ready(participant)
    }

    fn list_participants(
        &self,
        room_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        let mut participants: Vec<ParticipantEntity> = self
            .inner
            .participants
            .get(&room_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default();
        participants.sort_by_key(|member| member.joined_at);
        ready(participants)
    }

    fn replace_rounds(
        &self,
        room_id: Uuid,
        rounds: Vec<RoundEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        if rounds.is_empty() {
            self.inner.rounds.remove(&room_id);
        } else {
            self.inner.rounds.insert(room_id, rounds);
        }
        ready(())
    }

    fn find_round(
        &self,
        room_id: Uuid,
        index: usize,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let round = self.inner.rounds.get(&room_id).and_then(|rounds| {
            rounds
                .iter()
                .find(|round| round.index == index)
                .cloned()
        });
        ready(round)
    }

    fn save_round(&self, round: RoundEntity) -> BoxFuture<'static, StorageResult<()>> {
        let mut rounds = self.inner.rounds.entry(round.room_id).or_default();
        match rounds.iter().position(|stored| stored.index == round.index) {
            Some(position) => rounds[position] = round,
            None => rounds.push(round),
        }
        drop(rounds);
        ready(())
    }

    fn find_answer(
        &self,
        room_id: Uuid,
        round_index: usize,
        participant_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<AnswerEntity>>> {
        let answer = self
            .inner
            .answers
            .get(&room_id)
            .and_then(|answers| answers.get(&(round_index, participant_id)).cloned());
        ready(answer)
    }

    fn list_answers(
        &self,
        room_id: Uuid,
        round_index: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let answers = self
            .inner
            .answers
            .get(&room_id)
            .map(|answers| {
                answers
                    .values()
                    .filter(|answer| answer.round_index == round_index)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        ready(answers)
    }

    fn record_answer(
        &self,
        answer: AnswerEntity,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<AnswerInsert>> {
        let key = (answer.round_index, answer.participant_id);
        let mut answers = self.inner.answers.entry(answer.room_id).or_default();

        let existing = answers.get(&key).cloned();
        let outcome = if let Some(existing) = existing {
            AnswerInsert::Duplicate(existing)
        } else {
            answers.insert(key, answer);
            // The answer map entry stays locked until the participant is stored.
            self.inner
                .participants
                .entry(participant.room_id)
                .or_default()
                .insert(participant.id, participant);
            AnswerInsert::Inserted
        };
        drop(answers);

        ready(outcome)
    }

    fn delete_answers(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.answers.remove(&room_id);
        ready(())
    }

    fn insert_reaction(&self, reaction: ReactionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let mut history = self.inner.reactions.entry(reaction.room_id).or_default();
        history.push_back(reaction);
        while history.len() > REACTION_HISTORY {
            history.pop_front();
        }
        drop(history);
        ready(())
    }

    fn latest_reaction(
        &self,
        room_id: Uuid,
        participant_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ReactionEntity>>> {
        let reaction = self.inner.reactions.get(&room_id).and_then(|history| {
            history
                .iter()
                .filter(|reaction| reaction.participant_id == participant_id)
                .max_by_key(|reaction| reaction.sent_at)
                .cloned()
        });
        ready(reaction)
    }

    fn save_deck(
        &self,
        deck: DeckEntity,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        for question in questions {
            self.inner.questions.insert(question.id, question);
        }
        self.inner.decks.insert(deck.id, deck);
        ready(())
    }

    fn find_deck(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<DeckEntity>>> {
        ready(self.inner.decks.get(&id).map(|deck| deck.clone()))
    }

    fn list_decks(&self) -> BoxFuture<'static, StorageResult<Vec<DeckEntity>>> {
        let mut decks: Vec<DeckEntity> = self
            .inner
            .decks
            .iter()
            .map(|deck| deck.clone())
            .collect();
        decks.sort_by(|a, b| a.name.cmp(&b.name));
        ready(decks)
    }

    fn find_question(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>> {
        ready(self.inner.questions.get(&id).map(|question| question.clone()))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.reachable()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.reachable()
    }
}
