use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{Document, doc},
    options::IndexOptions,
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
};
use crate::{
    dao::{
        models::{
            AnswerEntity, DeckEntity, ParticipantEntity, QuestionEntity, ReactionEntity,
            RoomEntity, RoundEntity,
        },
        room_store::{AnswerInsert, RoomStore, WriteOutcome},
        storage::StorageResult,
    },
    state::clock::TimestampMs,
};

const ROOMS: &str = "rooms";
const PARTICIPANTS: &str = "participants";
const ROUNDS: &str = "rounds";
const ANSWERS: &str = "answers";
const REACTIONS: &str = "reactions";
const DECKS: &str = "decks";
const QUESTIONS: &str = "questions";

/// MongoDB-backed [`RoomStore`].
///
/// Ids are stored as hyphenated strings; every collection has a unique index
/// on its natural key so retried writes cannot duplicate rows.
#[derive(Clone)]
pub struct MongoRoomStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

fn id_filter(id: Uuid) -> Document {
    doc! { "id": id.to_string() }
}

fn room_filter(room_id: Uuid) -> Document {
    doc! { "room_id": room_id.to_string() }
}

/// Await `update`; when it fails run `roll_back` and return the update error.
async fn commit_or_roll_back<E, U, R, RFut>(update: U, roll_back: R) -> Result<(), E>
where
    E: std::fmt::Display,
    U: Future<Output = Result<(), E>>,
    R: FnOnce() -> RFut,
    RFut: Future<Output = Result<(), E>>,
{
    let err = match update.await {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    if let Err(rollback_err) = roll_back().await {
        warn!(
            error = %err,
            rollback_error = %rollback_err,
            "rollback after a failed write did not complete"
        );
    }
    Err(err)
}

impl MongoRoomStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let indexes: [(&'static str, &'static str, Document, bool); 10] = [
            (ROOMS, "id", doc! { "id": 1 }, true),
            (ROOMS, "code", doc! { "code": 1 }, true),
            (ROOMS, "status,expires_at", doc! { "status": 1, "expires_at": 1 }, false),
            (PARTICIPANTS, "id", doc! { "id": 1 }, true),
            (
                PARTICIPANTS,
                "room_id,identity",
                doc! { "room_id": 1, "identity": 1 },
                true,
            ),
            (ROUNDS, "room_id,index", doc! { "room_id": 1, "index": 1 }, true),
            (
                ANSWERS,
                "room_id,round_index,participant_id",
                doc! { "room_id": 1, "round_index": 1, "participant_id": 1 },
                true,
            ),
            (
                REACTIONS,
                "room_id,participant_id,sent_at",
                doc! { "room_id": 1, "participant_id": 1, "sent_at": -1 },
                false,
            ),
            (DECKS, "id", doc! { "id": 1 }, true),
            (QUESTIONS, "id", doc! { "id": 1 }, true),
        ];

        let database = self.database().await;
        for (collection, index, keys, unique) in indexes {
            let model = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(format!("{collection}_{}_idx", index.replace(',', "_"))))
                        .unique(Some(unique))
                        .build(),
                )
                .build();

            database
                .collection::<Document>(collection)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index,
                    source,
                })?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn collection<T>(&self, name: &str) -> Collection<T>
    where
        T: Send + Sync,
    {
        let guard = self.inner.state.read().await;
        guard.database.collection::<T>(name)
    }

    async fn find_one<T>(&self, name: &'static str, filter: Document) -> MongoResult<Option<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        self.collection::<T>(name)
            .await
            .find_one(filter)
            .await
            .map_err(MongoDaoError::operation(name, "find document"))
    }

    async fn find_many<T>(
        &self,
        name: &'static str,
        filter: Document,
        sort: Document,
    ) -> MongoResult<Vec<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        self.collection::<T>(name)
            .await
            .find(filter)
            .sort(sort)
            .await
            .map_err(MongoDaoError::operation(name, "query documents"))?
            .try_collect()
            .await
            .map_err(MongoDaoError::operation(name, "read cursor"))
    }

    async fn upsert<T>(&self, name: &'static str, filter: Document, value: &T) -> MongoResult<()>
    where
        T: Serialize + Send + Sync,
    {
        self.collection::<T>(name)
            .await
            .replace_one(filter, value)
            .upsert(true)
            .await
            .map_err(MongoDaoError::operation(name, "upsert document"))?;
        Ok(())
    }

    async fn delete_many(&self, name: &'static str, filter: Document) -> MongoResult<()> {
        self.collection::<Document>(name)
            .await
            .delete_many(filter)
            .await
            .map_err(MongoDaoError::operation(name, "delete documents"))?;
        Ok(())
    }

    async fn insert_room(&self, room: RoomEntity) -> MongoResult<bool> {
        match self
            .collection::<RoomEntity>(ROOMS)
            .await
            .insert_one(&room)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(source) => Err(MongoDaoError::operation(ROOMS, "insert room")(source)),
        }
    }

    async fn compare_and_swap_room(
        &self,
        room: RoomEntity,
        expected_version: u64,
    ) -> MongoResult<WriteOutcome> {
        let filter = doc! {
            "id": room.id.to_string(),
            "version": expected_version as i64,
        };
        let result = self
            .collection::<RoomEntity>(ROOMS)
            .await
            .replace_one(filter, &room)
            .await
            .map_err(MongoDaoError::operation(ROOMS, "replace room"))?;

        Ok(if result.matched_count == 0 {
            WriteOutcome::Conflict
        } else {
            WriteOutcome::Applied
        })
    }

    async fn delete_room(&self, id: Uuid) -> MongoResult<()> {
        for child in [PARTICIPANTS, ROUNDS, ANSWERS, REACTIONS] {
            self.delete_many(child, room_filter(id)).await?;
        }
        self.delete_many(ROOMS, id_filter(id)).await
    }

    async fn replace_rounds(&self, room_id: Uuid, rounds: Vec<RoundEntity>) -> MongoResult<()> {
        self.delete_many(ROUNDS, room_filter(room_id)).await?;
        if rounds.is_empty() {
            return Ok(());
        }

        self.collection::<RoundEntity>(ROUNDS)
            .await
            .insert_many(&rounds)
            .await
            .map_err(MongoDaoError::operation(ROUNDS, "insert rounds"))?;
        Ok(())
    }

    async fn record_answer(
        &self,
        answer: AnswerEntity,
        participant: ParticipantEntity,
    ) -> MongoResult<AnswerInsert> {
        let filter = doc! {
            "room_id": answer.room_id.to_string(),
            "round_index": answer.round_index as i64,
            "participant_id": answer.participant_id.to_string(),
        };

        match self
            .collection::<AnswerEntity>(ANSWERS)
            .await
            .insert_one(&answer)
            .await
        {
            Ok(_) => {}
            Err(err) if is_duplicate_key(&err) => {
                return match self.find_one::<AnswerEntity>(ANSWERS, filter).await? {
                    Some(existing) => Ok(AnswerInsert::Duplicate(existing)),
                    None => Err(MongoDaoError::operation(ANSWERS, "insert answer")(err)),
                };
            }
            Err(source) => return Err(MongoDaoError::operation(ANSWERS, "insert answer")(source)),
        }

        // the answer row only stays once the participant stats carry it
        commit_or_roll_back(
            self.upsert(PARTICIPANTS, id_filter(participant.id), &participant),
            || self.delete_many(ANSWERS, filter),
        )
        .await?;

        Ok(AnswerInsert::Inserted)
    }

    async fn save_deck(&self, deck: DeckEntity, questions: Vec<QuestionEntity>) -> MongoResult<()> {
        for question in &questions {
            self.upsert(QUESTIONS, id_filter(question.id), question).await?;
        }
        self.upsert(DECKS, id_filter(deck.id), &deck).await
    }
}

impl RoomStore for MongoRoomStore {
    fn insert_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.insert_room(room).await.map_err(Into::into) })
    }

    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_one(ROOMS, id_filter(id)).await.map_err(Into::into) })
    }

    fn find_room_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_one(ROOMS, doc! { "code": code })
                .await
                .map_err(Into::into)
        })
    }

    fn compare_and_swap_room(
        &self,
        room: RoomEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<WriteOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .compare_and_swap_room(room, expected_version)
                .await
                .map_err(Into::into)
        })
    }

    fn list_expired_lobbies(
        &self,
        now: TimestampMs,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_many(
                    ROOMS,
                    doc! { "status": "lobby", "expires_at": { "$lt": now } },
                    doc! { "expires_at": 1 },
                )
                .await
                .map_err(Into::into)
        })
    }

    fn delete_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.delete_room(id).await.map_err(Into::into) })
    }

    fn list_rooms_with_deadlines(&self) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_many(
                    ROOMS,
                    doc! { "$or": [
                        { "phase_ends_at": { "$ne": null } },
                        { "pending_action": { "$ne": null } },
                    ] },
                    doc! { "updated_at": 1 },
                )
                .await
                .map_err(Into::into)
        })
    }

    fn save_participant(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .upsert(PARTICIPANTS, id_filter(participant.id), &participant)
                .await
                .map_err(Into::into)
        })
    }

    fn save_participants(
        &self,
        participants: Vec<ParticipantEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            for participant in &participants {
                store
                    .upsert(PARTICIPANTS, id_filter(participant.id), participant)
                    .await?;
            }
            Ok(())
        })
    }

    fn find_participant(
        &self,
        room_id: Uuid,
        participant_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut filter = room_filter(room_id);
            filter.insert("id", participant_id.to_string());
            store
                .find_one(PARTICIPANTS, filter)
                .await
                .map_err(Into::into)
        })
    }

    fn find_participant_by_identity(
        &self,
        room_id: Uuid,
        identity: String,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut filter = room_filter(room_id);
            filter.insert("identity", identity);
            store
                .find_one(PARTICIPANTS, filter)
                .await
                .map_err(Into::into)
        })
    }

    fn list_participants(
        &self,
        room_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_many(PARTICIPANTS, room_filter(room_id), doc! { "joined_at": 1 })
                .await
                .map_err(Into::into)
        })
    }

    fn replace_rounds(
        &self,
        room_id: Uuid,
        rounds: Vec<RoundEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .replace_rounds(room_id, rounds)
                .await
                .map_err(Into::into)
        })
    }

    fn find_round(
        &self,
        room_id: Uuid,
        index: usize,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut filter = room_filter(room_id);
            filter.insert("index", index as i64);
            store.find_one(ROUNDS, filter).await.map_err(Into::into)
        })
    }

    fn save_round(&self, round: RoundEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut filter = room_filter(round.room_id);
            filter.insert("index", round.index as i64);
            store
                .upsert(ROUNDS, filter, &round)
                .await
                .map_err(Into::into)
        })
    }

    fn find_answer(
        &self,
        room_id: Uuid,
        round_index: usize,
        participant_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut filter = room_filter(room_id);
            filter.insert("round_index", round_index as i64);
            filter.insert("participant_id", participant_id.to_string());
            store.find_one(ANSWERS, filter).await.map_err(Into::into)
        })
    }

    fn list_answers(
        &self,
        room_id: Uuid,
        round_index: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut filter = room_filter(room_id);
            filter.insert("round_index", round_index as i64);
            store
                .find_many(ANSWERS, filter, doc! { "received_at": 1 })
                .await
                .map_err(Into::into)
        })
    }

    fn record_answer(
        &self,
        answer: AnswerEntity,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<AnswerInsert>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .record_answer(answer, participant)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_answers(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_many(ANSWERS, room_filter(room_id))
                .await
                .map_err(Into::into)
        })
    }

    fn insert_reaction(&self, reaction: ReactionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .collection::<ReactionEntity>(REACTIONS)
                .await
                .insert_one(&reaction)
                .await
                .map_err(MongoDaoError::operation(REACTIONS, "insert reaction"))?;
            Ok(())
        })
    }

    fn latest_reaction(
        &self,
        room_id: Uuid,
        participant_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ReactionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut filter = room_filter(room_id);
            filter.insert("participant_id", participant_id.to_string());
            let reaction = store
                .collection::<ReactionEntity>(REACTIONS)
                .await
                .find_one(filter)
                .sort(doc! { "sent_at": -1 })
                .await
                .map_err(MongoDaoError::operation(REACTIONS, "find latest reaction"))?;
            Ok(reaction)
        })
    }

    fn save_deck(
        &self,
        deck: DeckEntity,
        questions: Vec<QuestionEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_deck(deck, questions).await.map_err(Into::into) })
    }

    fn find_deck(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<DeckEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_one(DECKS, id_filter(id)).await.map_err(Into::into) })
    }

    fn list_decks(&self) -> BoxFuture<'static, StorageResult<Vec<DeckEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_many(DECKS, doc! {}, doc! { "name": 1 })
                .await
                .map_err(Into::into)
        })
    }

    fn find_question(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_one(QUESTIONS, id_filter(id))
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
