//! Room lifecycle: creation, membership, the action dispatcher and phase ticks.
//!
//! Every mutation runs under the room gate and persists the room with a
//! compare-and-swap on the version read at the start of the operation.

use std::{collections::HashSet, sync::Arc};

use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{AnswerEntity, ParticipantEntity, ReactionEntity, RoomEntity, RoundEntity},
        room_store::{AnswerInsert, RoomStore, WriteOutcome},
    },
    dto::{
        action::{
            AckResult, ActionData, ActionRequest, ActionResponse, AnswerResult, ProgressResult,
            ReactionRejection, ReactionResult, RoomAction, ScheduledResult,
        },
        room::{CreateRoomRequest, JoinRoomRequest, RoomSessionResponse, RoomView},
        validation::ROOM_CODE_LEN,
    },
    error::ServiceError,
    services::{pending_actions, presence, scoring, sse_events},
    state::{
        AppState, PlanId,
        clock::TimestampMs,
        room::{PendingAction, PendingKind, Room},
        state_machine::{ActivePhase, PhaseStatus, RoomEvent, RoomPhase, Stage},
    },
};

const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Caller identity as established by the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Registered user id from the upstream auth layer.
    User(String),
    /// Opaque guest token.
    Guest(String),
}

impl Identity {
    /// Prefer the `x-user-id` header, fall back to the guest key.
    pub fn resolve(user_id: Option<&str>, guest_key: Option<&str>) -> Result<Self, ServiceError> {
        if let Some(id) = user_id.map(str::trim).filter(|id| !id.is_empty()) {
            return Ok(Identity::User(id.to_owned()));
        }

        guest_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| Identity::Guest(key.to_owned()))
            .ok_or(ServiceError::Unauthenticated)
    }

    /// Stored identity string. Guests and users never collide.
    pub fn key(&self) -> String {
        match self {
            Identity::User(id) => format!("user:{id}"),
            Identity::Guest(key) => format!("guest:{key}"),
        }
    }

    /// Whether the caller is a guest.
    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest(_))
    }
}

/// Open a room on `deck_id`; the caller joins as host.
pub async fn create_room(
    state: &AppState,
    identity: Identity,
    request: CreateRoomRequest,
) -> Result<RoomSessionResponse, ServiceError> {
    let store = state.require_room_store().await?;
    let config = state.config();

    store
        .find_deck(request.deck_id)
        .await?
        .ok_or(ServiceError::DeckNotFound)?;

    let rules = request
        .rules
        .as_ref()
        .map_or(config.default_rules, |input| input.apply_to(config.default_rules));
    let now = state.now();
    let room_id = Uuid::new_v4();
    let mut host = new_participant(room_id, &identity, request.nickname.trim(), now);
    host.is_host = true;

    let mut created = None;
    for attempt in 0..config.room_code_attempts {
        let mut room = Room::new(
            room_id,
            generate_room_code(),
            request.deck_id,
            rules,
            now,
            config.lobby_ttl_ms(),
        );
        room.host_participant_id = Some(host.id);

        if store.insert_room(RoomEntity::from(&room)).await? {
            created = Some(room);
            break;
        }
        debug!(attempt, "room code collision; retrying");
    }

    let Some(room) = created else {
        warn!(
            attempts = config.room_code_attempts,
            "could not allocate a unique room code"
        );
        return Err(ServiceError::Conflict);
    };

    let participant_id = host.id;
    store.save_participant(host).await?;

    info!(room_id = %room.id, code = %room.code, deck_id = %room.deck_id, "room created");

    let view = presence::build_room_view(&store, &room, config, now).await?;
    Ok(RoomSessionResponse {
        room_id: room.id,
        participant_id,
        code: room.code,
        is_host: true,
        room: view,
    })
}

/// Join the room with `request.code`, or refresh an existing membership.
pub async fn join_room(
    state: &AppState,
    identity: Identity,
    request: JoinRoomRequest,
) -> Result<RoomSessionResponse, ServiceError> {
    let store = state.require_room_store().await?;
    let code = request.code.trim().to_ascii_uppercase();
    let room_id = store
        .find_room_by_code(code)
        .await?
        .ok_or(ServiceError::RoomNotFound)?
        .id;

    state
        .with_room_gate(room_id, move || async move {
            let mut room = load_room(&store, room_id).await?;
            let expected = room.version;
            let now = state.now();
            let nickname = request.nickname.trim().to_owned();

            let existing = store
                .find_participant_by_identity(room_id, identity.key())
                .await?;

            let mut participant = match existing {
                Some(mut known) if known.is_active() => {
                    known.nickname = nickname;
                    known.last_seen_at = now;
                    known.disconnected_at = None;
                    known
                }
                Some(mut removed) => {
                    ensure_joinable(state, &store, &room).await?;
                    removed.nickname = nickname;
                    removed.removed_at = None;
                    removed.disconnected_at = None;
                    removed.last_seen_at = now;
                    removed.is_ready = false;
                    removed.is_host = false;
                    removed
                }
                None => {
                    ensure_joinable(state, &store, &room).await?;
                    new_participant(room_id, &identity, &nickname, now)
                }
            };

            if room.host_participant_id.is_none() {
                participant.is_host = true;
                room.host_participant_id = Some(participant.id);
                info!(room_id = %room_id, participant_id = %participant.id, "hostless room got a new host");
            }

            let participant_id = participant.id;
            let is_host = participant.is_host;
            store.save_participant(participant).await?;
            room.touch(now);
            persist(state, &store, &room, expected).await?;

            info!(room_id = %room_id, participant_id = %participant_id, "participant joined");

            let view = presence::build_room_view(&store, &room, state.config(), state.now()).await?;
            sse_events::broadcast_room_updated(state, &view);

            Ok(RoomSessionResponse {
                room_id,
                participant_id,
                code: room.code.clone(),
                is_host,
                room: view,
            })
        })
        .await
}

/// Read-only view of a room.
pub async fn view_room(state: &AppState, room_id: Uuid) -> Result<RoomView, ServiceError> {
    let store = state.require_room_store().await?;
    let room = load_room(&store, room_id).await?;
    presence::build_room_view(&store, &room, state.config(), state.now()).await
}

/// Read-only view of the room with join code `code`.
pub async fn view_room_by_code(state: &AppState, code: &str) -> Result<RoomView, ServiceError> {
    let store = state.require_room_store().await?;
    let entity = store
        .find_room_by_code(code.trim().to_ascii_uppercase())
        .await?
        .ok_or(ServiceError::RoomNotFound)?;
    let room = Room::try_from(entity)?;
    presence::build_room_view(&store, &room, state.config(), state.now()).await
}

/// Authenticate the caller against the participant and run the action.
pub async fn dispatch(
    state: &AppState,
    user_id: Option<&str>,
    request: ActionRequest,
) -> Result<ActionResponse, ServiceError> {
    let ActionRequest {
        room_id,
        participant_id,
        guest_key,
        action,
    } = request;

    if matches!(action, RoomAction::Unknown) {
        return Err(ServiceError::InvalidAction("unknown action".into()));
    }

    let identity = Identity::resolve(user_id, guest_key.as_deref())?;
    let store = state.require_room_store().await?;
    let name = action.name();

    let result = state
        .with_room_gate(room_id, move || async move {
            let mut room = load_room(&store, room_id).await?;
            let expected = room.version;
            let now = state.now();

            let actor = store
                .find_participant(room_id, participant_id)
                .await?
                .ok_or(ServiceError::NotInRoom)?;
            if actor.identity != identity.key() {
                return Err(ServiceError::NotAuthorized(
                    "participant belongs to another identity".into(),
                ));
            }
            if !actor.is_active() {
                if matches!(action, RoomAction::Leave) {
                    return Ok(ActionData::Ack(AckResult::ok()));
                }
                return Err(ServiceError::NotInRoom);
            }

            let data = run_action(state, &store, &mut room, actor, action, now).await?;

            if room.version != expected {
                persist(state, &store, &room, expected).await?;
                publish_room(state, &store, &room).await;
            }
            Ok(data)
        })
        .await;

    match &result {
        Ok(_) => debug!(room_id = %room_id, participant_id = %participant_id, action = name, "action applied"),
        Err(err) => debug!(
            room_id = %room_id,
            participant_id = %participant_id,
            action = name,
            code = err.code(),
            error = %err,
            "action rejected"
        ),
    }

    Ok(ActionResponse {
        data: result?,
        server_now: state.now(),
    })
}

async fn run_action(
    state: &AppState,
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
    actor: ParticipantEntity,
    action: RoomAction,
    now: TimestampMs,
) -> Result<ActionData, ServiceError> {
    match action {
        RoomAction::Heartbeat => heartbeat(state, store, room, actor, now).await,
        RoomAction::SetReady { ready } => set_ready(store, room, actor, ready, now).await,
        RoomAction::Leave => leave(store, room, actor, now).await,
        RoomAction::Start { delay_ms } => start(state, store, room, &actor, delay_ms, now).await,
        RoomAction::Progress { expected_status } => {
            require_host(&actor, "progress the match")?;
            progress(state, store, room, expected_status, now).await
        }
        RoomAction::SubmitAnswer { choice_index } => {
            submit_answer(state, store, room, actor, choice_index, now).await
        }
        RoomAction::SendReaction { emoji } => {
            send_reaction(state, store, room, &actor, emoji, now).await
        }
        RoomAction::Rematch { delay_ms } => {
            require_host(&actor, "start a rematch")?;
            let (action, _) = pending_actions::schedule(
                state,
                store,
                room,
                PendingKind::Rematch,
                delay_ms,
                actor.id,
                now,
            )
            .await?;
            Ok(scheduled(&action))
        }
        RoomAction::ToLobby { delay_ms } => {
            require_host(&actor, "return to the lobby")?;
            let (action, _) = pending_actions::schedule(
                state,
                store,
                room,
                PendingKind::ToLobby,
                delay_ms,
                actor.id,
                now,
            )
            .await?;
            Ok(scheduled(&action))
        }
        RoomAction::Cancel { pending_action_id } => {
            require_host(&actor, "cancel a pending action")?;
            cancel(store, room, pending_action_id, now).await
        }
        RoomAction::Pause => {
            require_host(&actor, "pause the match")?;
            room.apply(RoomEvent::Pause, now)?;
            info!(room_id = %room.id, "match paused");
            Ok(ActionData::Ack(AckResult::ok()))
        }
        RoomAction::Resume => {
            require_host(&actor, "resume the match")?;
            resume(store, room, now).await
        }
        RoomAction::Unknown => Err(ServiceError::InvalidAction("unknown action".into())),
    }
}

async fn heartbeat(
    state: &AppState,
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
    mut actor: ParticipantEntity,
    now: TimestampMs,
) -> Result<ActionData, ServiceError> {
    let reconnected = actor.disconnected_at.is_some();
    actor.last_seen_at = now;
    actor.disconnected_at = None;
    store.save_participant(actor).await?;

    if reconnected {
        room.touch(now);
    }
    drive(state, store, room, now).await?;
    Ok(ActionData::Ack(AckResult::ok()))
}

async fn set_ready(
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
    mut actor: ParticipantEntity,
    ready: bool,
    now: TimestampMs,
) -> Result<ActionData, ServiceError> {
    if room.status() != PhaseStatus::Lobby {
        return Err(ServiceError::PhaseViolation(
            "ready flags can only change in the lobby".into(),
        ));
    }

    if actor.is_ready != ready {
        actor.is_ready = ready;
        actor.last_seen_at = now;
        store.save_participant(actor).await?;
        room.touch(now);
    }
    Ok(ActionData::Ack(AckResult::ok()))
}

async fn leave(
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
    mut actor: ParticipantEntity,
    now: TimestampMs,
) -> Result<ActionData, ServiceError> {
    let was_host = actor.is_host || room.host_participant_id == Some(actor.id);
    actor.removed_at = Some(now);
    actor.is_ready = false;
    actor.is_host = false;
    let leaver = actor.id;
    store.save_participant(actor).await?;

    if was_host {
        let successor = store
            .list_participants(room.id)
            .await?
            .into_iter()
            .filter(|p| p.is_active() && p.id != leaver)
            .min_by_key(|p| p.joined_at);

        match successor {
            Some(mut next) => {
                next.is_host = true;
                room.host_participant_id = Some(next.id);
                info!(room_id = %room.id, from = %leaver, to = %next.id, "host role handed over");
                store.save_participant(next).await?;
            }
            None => {
                room.host_participant_id = None;
                info!(room_id = %room.id, "last participant left; room has no host");
            }
        }
    }

    room.touch(now);
    info!(room_id = %room.id, participant_id = %leaver, "participant left");
    Ok(ActionData::Ack(AckResult::ok()))
}

async fn start(
    state: &AppState,
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
    actor: &ParticipantEntity,
    delay_ms: Option<u64>,
    now: TimestampMs,
) -> Result<ActionData, ServiceError> {
    require_host(actor, "start the match")?;

    if room.status() != PhaseStatus::Lobby {
        return Err(ServiceError::PhaseViolation(format!(
            "match can only start from the lobby (room is {})",
            room.status()
        )));
    }

    if room.pending_action.is_none() {
        let everyone_ready = store
            .list_participants(room.id)
            .await?
            .iter()
            .filter(|p| p.is_active() && !p.is_host)
            .all(|p| p.is_ready);
        if !everyone_ready {
            return Err(ServiceError::NotAllReady);
        }
    }

    let (action, _) = pending_actions::schedule(
        state,
        store,
        room,
        PendingKind::Start,
        delay_ms,
        actor.id,
        now,
    )
    .await?;
    Ok(scheduled(&action))
}

async fn progress(
    state: &AppState,
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
    expected_status: Option<PhaseStatus>,
    now: TimestampMs,
) -> Result<ActionData, ServiceError> {
    if pending_actions::execute_due(state, store, room, now).await? {
        return Ok(progressed(room, true));
    }

    let status = room.status();
    match status {
        PhaseStatus::Results => return Ok(progressed(room, false)),
        PhaseStatus::Lobby | PhaseStatus::Paused => {
            return Err(ServiceError::PhaseViolation(format!(
                "cannot progress while the room is in {status}"
            )));
        }
        _ => {}
    }

    let stale = match expected_status {
        Some(expected) => expected != status,
        None => room.phase_ends_at().is_some_and(|ends_at| now < ends_at),
    };
    if stale {
        return Ok(progressed(room, false));
    }

    advance_phase(store, room, now).await?;
    Ok(progressed(room, true))
}

async fn submit_answer(
    state: &AppState,
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
    actor: ParticipantEntity,
    choice_index: usize,
    now: TimestampMs,
) -> Result<ActionData, ServiceError> {
    let index = room
        .current_round()
        .filter(|_| room.phase.accepts_answers())
        .ok_or(ServiceError::RoundNotActive)?;

    // a room left in `question` past its deadline still closes at the end of grace
    let closes_at = match room.status() {
        PhaseStatus::Grace => room.phase_ends_at(),
        PhaseStatus::Question => room
            .phase_ends_at()
            .map(|ends_at| ends_at + Stage::Grace.duration_ms(&room.rules)),
        _ => None,
    };
    if closes_at.is_some_and(|closes_at| now > closes_at) {
        return Err(ServiceError::RoundNotActive);
    }

    if let Some(existing) = store.find_answer(room.id, index, actor.id).await? {
        return Ok(answered(&existing, true));
    }

    let round = store
        .find_round(room.id, index)
        .await?
        .ok_or(ServiceError::RoundNotFound)?;
    let question = store
        .find_question(round.question_id)
        .await?
        .ok_or(ServiceError::RoundNotFound)?;

    if choice_index >= question.choices.len() {
        return Err(ServiceError::InvalidInput(format!(
            "choice index {choice_index} is out of range ({} choices)",
            question.choices.len()
        )));
    }

    let elapsed_ms = (now - round_started_at(room, &round)).max(0);
    let is_correct = choice_index == question.correct_index;
    let delta = scoring::compute_score_delta(is_correct, elapsed_ms, &room.rules, actor.current_streak);

    let answer = AnswerEntity {
        room_id: room.id,
        round_index: index,
        participant_id: actor.id,
        choice_index,
        received_at: now,
        is_correct,
        score_delta: delta.score,
        multiplier: delta.multiplier,
        elapsed_ms,
    };

    let mut updated = actor;
    let previous_answers = u64::from(updated.answers);
    updated.avg_response_ms =
        (updated.avg_response_ms * previous_answers + elapsed_ms as u64) / (previous_answers + 1);
    updated.answers += 1;
    updated.total_score += u64::from(delta.score);
    if is_correct {
        updated.current_streak += 1;
        updated.max_streak = updated.max_streak.max(updated.current_streak);
    } else {
        updated.current_streak = 0;
    }
    updated.last_seen_at = now;
    updated.disconnected_at = None;

    if let AnswerInsert::Duplicate(existing) = store.record_answer(answer.clone(), updated).await? {
        return Ok(answered(&existing, true));
    }

    let answered_count = store.list_answers(room.id, index).await?.len();
    sse_events::broadcast_answer_received(state, room.id, answer.participant_id, index, answered_count);

    Ok(answered(&answer, false))
}

async fn send_reaction(
    state: &AppState,
    store: &Arc<dyn RoomStore>,
    room: &Room,
    actor: &ParticipantEntity,
    emoji: String,
    now: TimestampMs,
) -> Result<ActionData, ServiceError> {
    let config = state.config();
    if !config.is_allowed_emoji(&emoji) {
        return Ok(reaction_rejected(ReactionRejection::InvalidEmoji));
    }

    let cooldown = config.reaction_cooldown_ms as i64;
    let too_soon = store
        .latest_reaction(room.id, actor.id)
        .await?
        .is_some_and(|last| now - last.sent_at < cooldown);
    if too_soon {
        return Ok(reaction_rejected(ReactionRejection::Cooldown));
    }

    let round_index = room.current_round();
    store
        .insert_reaction(ReactionEntity {
            id: Uuid::new_v4(),
            room_id: room.id,
            participant_id: actor.id,
            emoji: emoji.clone(),
            round_index,
            sent_at: now,
        })
        .await?;

    sse_events::broadcast_reaction_sent(state, room.id, actor.id, &emoji, round_index);
    Ok(ActionData::Reaction(ReactionResult {
        success: true,
        reason: None,
    }))
}

async fn cancel(
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
    pending_action_id: Option<PlanId>,
    now: TimestampMs,
) -> Result<ActionData, ServiceError> {
    pending_actions::cancel(store, room, pending_action_id, now).await?;
    Ok(ActionData::Ack(AckResult::ok()))
}

async fn resume(
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
    now: TimestampMs,
) -> Result<ActionData, ServiceError> {
    let paused = room.pause_state().ok_or_else(|| {
        ServiceError::PhaseViolation(format!("cannot resume while the room is in {}", room.status()))
    })?;
    room.apply(RoomEvent::Resume, now)?;

    // keep elapsed answer time frozen across the pause
    if matches!(paused.stage, Stage::Question | Stage::Grace) {
        let paused_for = now - paused.paused_at;
        stamp_round(store, room.id, paused.round, |round| {
            if round.started_at > 0 {
                round.started_at += paused_for;
            }
        })
        .await?;
    }

    info!(room_id = %room.id, remaining_ms = paused.remaining_ms, "match resumed");
    Ok(ActionData::Ack(AckResult::ok()))
}

/// Move the room to the next stage and stamp the round bookkeeping.
pub async fn advance_phase(
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
    now: TimestampMs,
) -> Result<(), ServiceError> {
    let previous = room.phase;
    room.apply(RoomEvent::Advance, now)?;

    let left = previous.status();
    let entered = room.status();
    if let Some(index) = previous.current_round() {
        if left == PhaseStatus::Question {
            stamp_round(store, room.id, index, |round| round.closed_at = Some(now)).await?;
        }
        if entered == PhaseStatus::Reveal {
            stamp_round(store, room.id, index, |round| round.reveal_at = Some(now)).await?;
            reset_unanswered_streaks(store, room.id, index).await?;
        }
    }
    if let RoomPhase::Active(ActivePhase {
        stage: Stage::Question,
        round,
        ..
    }) = room.phase
    {
        stamp_round(store, room.id, round, |entry| entry.started_at = now).await?;
    }

    debug!(room_id = %room.id, from = %left, to = %entered, "phase advanced");
    Ok(())
}

/// Execute a due pending action or advance expired phases. Returns whether the room changed.
pub async fn drive(
    state: &AppState,
    store: &Arc<dyn RoomStore>,
    room: &mut Room,
    now: TimestampMs,
) -> Result<bool, ServiceError> {
    if pending_actions::execute_due(state, store, room, now).await? {
        return Ok(true);
    }

    if !state.config().auto_advance {
        return Ok(false);
    }

    let mut changed = false;
    while room.phase_ends_at().is_some_and(|ends_at| now >= ends_at) {
        advance_phase(store, room, now).await?;
        changed = true;
    }
    Ok(changed)
}

/// Re-validate `room_id` against the clock under its gate.
///
/// Deleted rooms are reported as unchanged.
pub async fn tick(state: &AppState, room_id: Uuid) -> Result<bool, ServiceError> {
    let store = state.require_room_store().await?;
    state
        .with_room_gate(room_id, move || async move {
            let mut room = match load_room(&store, room_id).await {
                Ok(room) => room,
                Err(ServiceError::RoomNotFound) => return Ok(false),
                Err(err) => return Err(err),
            };
            let expected = room.version;
            let now = state.now();

            drive(state, &store, &mut room, now).await?;
            if room.version == expected {
                return Ok(false);
            }

            persist(state, &store, &room, expected).await?;
            publish_room(state, &store, &room).await;
            Ok(true)
        })
        .await
}

/// Load a room row and rebuild its phase.
pub async fn load_room(store: &Arc<dyn RoomStore>, room_id: Uuid) -> Result<Room, ServiceError> {
    let entity = store
        .find_room(room_id)
        .await?
        .ok_or(ServiceError::RoomNotFound)?;
    Ok(Room::try_from(entity)?)
}

/// Compare-and-swap the room and register its new deadlines.
pub async fn persist(
    state: &AppState,
    store: &Arc<dyn RoomStore>,
    room: &Room,
    expected_version: u64,
) -> Result<(), ServiceError> {
    match store
        .compare_and_swap_room(RoomEntity::from(room), expected_version)
        .await?
    {
        WriteOutcome::Applied => {}
        WriteOutcome::Conflict => {
            warn!(room_id = %room.id, expected_version, "room changed concurrently");
            return Err(ServiceError::Conflict);
        }
    }

    if let Some(action) = room.pending_action.as_ref() {
        state.schedule_deadline(room.id, action.execute_at);
    }
    if let Some(ends_at) = room.phase_ends_at() {
        state.schedule_deadline(room.id, ends_at);
    }
    Ok(())
}

/// Broadcast the current view. Failures only affect subscribers and are logged.
pub async fn publish_room(state: &AppState, store: &Arc<dyn RoomStore>, room: &Room) {
    match presence::build_room_view(store, room, state.config(), state.now()).await {
        Ok(view) => sse_events::broadcast_room_updated(state, &view),
        Err(err) => warn!(room_id = %room.id, error = %err, "failed to build room view for broadcast"),
    }
}

async fn ensure_joinable(
    state: &AppState,
    store: &Arc<dyn RoomStore>,
    room: &Room,
) -> Result<(), ServiceError> {
    if room.status() != PhaseStatus::Lobby {
        return Err(ServiceError::RoomAlreadyStarted);
    }

    let active = store
        .list_participants(room.id)
        .await?
        .iter()
        .filter(|p| p.is_active())
        .count();
    if active >= state.config().max_participants {
        return Err(ServiceError::RoomFull);
    }
    Ok(())
}

async fn stamp_round<F>(
    store: &Arc<dyn RoomStore>,
    room_id: Uuid,
    index: usize,
    stamp: F,
) -> Result<(), ServiceError>
where
    F: FnOnce(&mut RoundEntity),
{
    let mut round = store
        .find_round(room_id, index)
        .await?
        .ok_or(ServiceError::RoundNotFound)?;
    stamp(&mut round);
    store.save_round(round).await?;
    Ok(())
}

/// A round closing without an answer breaks the streak.
async fn reset_unanswered_streaks(
    store: &Arc<dyn RoomStore>,
    room_id: Uuid,
    index: usize,
) -> Result<(), ServiceError> {
    let answered: HashSet<Uuid> = store
        .list_answers(room_id, index)
        .await?
        .into_iter()
        .map(|answer| answer.participant_id)
        .collect();

    let broken: Vec<ParticipantEntity> = store
        .list_participants(room_id)
        .await?
        .into_iter()
        .filter(|p| p.is_active() && p.current_streak > 0 && !answered.contains(&p.id))
        .map(|mut p| {
            p.current_streak = 0;
            p
        })
        .collect();

    if !broken.is_empty() {
        store.save_participants(broken).await?;
    }
    Ok(())
}

/// Start of the answer window, inferred from the deadline when the round was never stamped.
fn round_started_at(room: &Room, round: &RoundEntity) -> TimestampMs {
    if round.started_at > 0 {
        return round.started_at;
    }

    let answer_ms = Stage::Question.duration_ms(&room.rules);
    match room.phase {
        RoomPhase::Active(ActivePhase {
            stage: Stage::Question,
            ends_at,
            ..
        }) => ends_at - answer_ms,
        RoomPhase::Active(ActivePhase {
            stage: Stage::Grace,
            ends_at,
            ..
        }) => ends_at - Stage::Grace.duration_ms(&room.rules) - answer_ms,
        _ => room.updated_at,
    }
}

fn require_host(actor: &ParticipantEntity, what: &str) -> Result<(), ServiceError> {
    if actor.is_host {
        Ok(())
    } else {
        Err(ServiceError::NotAuthorized(format!("only the host can {what}")))
    }
}

fn new_participant(
    room_id: Uuid,
    identity: &Identity,
    nickname: &str,
    now: TimestampMs,
) -> ParticipantEntity {
    ParticipantEntity {
        id: Uuid::new_v4(),
        room_id,
        identity: identity.key(),
        is_guest: identity.is_guest(),
        nickname: nickname.to_owned(),
        is_host: false,
        is_ready: false,
        joined_at: now,
        last_seen_at: now,
        removed_at: None,
        disconnected_at: None,
        total_score: 0,
        answers: 0,
        avg_response_ms: 0,
        current_streak: 0,
        max_streak: 0,
    }
}

fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| char::from(ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())]))
        .collect()
}

fn scheduled(action: &PendingAction) -> ActionData {
    ActionData::Scheduled(ScheduledResult {
        ok: true,
        pending_action_id: action.id,
        execute_at: action.execute_at,
    })
}

fn progressed(room: &Room, advanced: bool) -> ActionData {
    ActionData::Progressed(ProgressResult {
        ok: true,
        advanced,
        status: room.status(),
        phase_ends_at: room.phase_ends_at(),
    })
}

fn answered(answer: &AnswerEntity, already_answered: bool) -> ActionData {
    ActionData::Answer(AnswerResult {
        ok: true,
        is_correct: answer.is_correct,
        score_delta: answer.score_delta,
        multiplier: answer.multiplier,
        already_answered: already_answered.then_some(true),
    })
}

fn reaction_rejected(reason: ReactionRejection) -> ActionData {
    ActionData::Reaction(ReactionResult {
        success: false,
        reason: Some(reason),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::{models::DeckEntity, models::QuestionEntity, room_store::memory::InMemoryRoomStore},
        dto::room::RulesInput,
        state::clock::ManualClock,
    };

    const T0: TimestampMs = 1_000_000;

    struct Fixture {
        state: Arc<AppState>,
        clock: Arc<ManualClock>,
        store: Arc<dyn RoomStore>,
        deck_id: Uuid,
        /// Correct choice of every question, by question id.
        answers: Vec<(Uuid, usize)>,
    }

    async fn fixture_with(config: AppConfig, questions: usize) -> Fixture {
        let clock = Arc::new(ManualClock::new(T0));
        let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::new());

        let questions: Vec<QuestionEntity> = (0..questions)
            .map(|i| QuestionEntity {
                id: Uuid::new_v4(),
                prompt: format!("Question {i}"),
                choices: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_index: i % 4,
            })
            .collect();
        let deck = DeckEntity {
            id: Uuid::new_v4(),
            name: "Trivia".into(),
            question_ids: questions.iter().map(|q| q.id).collect(),
        };
        let deck_id = deck.id;
        let answers = questions.iter().map(|q| (q.id, q.correct_index)).collect();
        store.save_deck(deck, questions).await.expect("seed deck");

        let state = AppState::with_store(config, clock.clone(), store.clone());
        Fixture {
            state,
            clock,
            store,
            deck_id,
            answers,
        }
    }

    async fn fixture() -> Fixture {
        let config = AppConfig {
            auto_advance: false,
            ..AppConfig::default()
        };
        fixture_with(config, 5).await
    }

    impl Fixture {
        async fn create(&self, key: &str, rounds: u32) -> RoomSessionResponse {
            create_room(
                &self.state,
                Identity::Guest(key.into()),
                CreateRoomRequest {
                    deck_id: self.deck_id,
                    nickname: "Host".into(),
                    guest_key: Some(key.into()),
                    rules: Some(RulesInput {
                        rounds: Some(rounds),
                        ..RulesInput::default()
                    }),
                },
            )
            .await
            .expect("create room")
        }

        async fn join(&self, code: &str, key: &str) -> Result<RoomSessionResponse, ServiceError> {
            join_room(
                &self.state,
                Identity::Guest(key.into()),
                JoinRoomRequest {
                    code: code.into(),
                    nickname: key.into(),
                    guest_key: Some(key.into()),
                },
            )
            .await
        }

        async fn act(
            &self,
            session: &RoomSessionResponse,
            key: &str,
            action: RoomAction,
        ) -> Result<ActionData, ServiceError> {
            dispatch(
                &self.state,
                None,
                ActionRequest {
                    room_id: session.room_id,
                    participant_id: session.participant_id,
                    guest_key: Some(key.into()),
                    action,
                },
            )
            .await
            .map(|response| response.data)
        }

        async fn room(&self, room_id: Uuid) -> Room {
            load_room(&self.store, room_id).await.expect("room")
        }

        async fn participant(&self, session: &RoomSessionResponse) -> ParticipantEntity {
            self.store
                .find_participant(session.room_id, session.participant_id)
                .await
                .expect("store")
                .expect("participant")
        }

        async fn correct_choice(&self, room_id: Uuid, index: usize) -> usize {
            let round = self
                .store
                .find_round(room_id, index)
                .await
                .expect("store")
                .expect("round");
            self.answers
                .iter()
                .find(|(id, _)| *id == round.question_id)
                .map(|(_, choice)| *choice)
                .expect("question")
        }

        /// Host `progress` calls naming each status the room is expected to be in.
        async fn progress_through(&self, host: &RoomSessionResponse, statuses: &[PhaseStatus]) {
            for &expected in statuses {
                let data = self
                    .act(
                        host,
                        "host-key-1",
                        RoomAction::Progress {
                            expected_status: Some(expected),
                        },
                    )
                    .await
                    .expect("progress");
                assert!(
                    matches!(data, ActionData::Progressed(ProgressResult { advanced: true, .. })),
                    "room did not leave {expected}"
                );
            }
        }

        /// Play a one-round match from the first question to the results.
        async fn finish_single_round(&self, host: &RoomSessionResponse) {
            self.progress_through(
                host,
                &[
                    PhaseStatus::Question,
                    PhaseStatus::Grace,
                    PhaseStatus::Reveal,
                    PhaseStatus::Leaderboard,
                ],
            )
            .await;
            assert_eq!(self.room(host.room_id).await.status(), PhaseStatus::Results);
        }

        /// Start the match and walk it into the first question.
        async fn into_question(&self, host: &RoomSessionResponse) {
            self.act(host, "host-key-1", RoomAction::Start { delay_ms: Some(0) })
                .await
                .expect("start");
            self.act(host, "host-key-1", RoomAction::Heartbeat)
                .await
                .expect("execute start");
            self.act(
                host,
                "host-key-1",
                RoomAction::Progress {
                    expected_status: Some(PhaseStatus::Countdown),
                },
            )
            .await
            .expect("to question");
        }
    }

    #[test]
    fn identity_prefers_registered_user() {
        assert_eq!(
            Identity::resolve(Some(" u-1 "), Some("guest-key")).unwrap(),
            Identity::User("u-1".into())
        );
        assert_eq!(
            Identity::resolve(Some(""), Some("guest-key")).unwrap().key(),
            "guest:guest-key"
        );
        assert!(matches!(
            Identity::resolve(None, None),
            Err(ServiceError::Unauthenticated)
        ));
    }

    #[test]
    fn room_codes_are_six_uppercase_alphanumerics() {
        for _ in 0..50 {
            let code = generate_room_code();
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(
                code.chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            );
        }
    }

    #[tokio::test]
    async fn create_room_requires_an_existing_deck() {
        let fx = fixture().await;
        let err = create_room(
            &fx.state,
            Identity::Guest("host-key-1".into()),
            CreateRoomRequest {
                deck_id: Uuid::new_v4(),
                nickname: "Host".into(),
                guest_key: Some("host-key-1".into()),
                rules: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::DeckNotFound));
    }

    #[tokio::test]
    async fn start_requires_everyone_ready() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 3).await;
        let guest = fx.join(&host.code, "guest-key-1").await.expect("join");

        let err = fx
            .act(&host, "host-key-1", RoomAction::Start { delay_ms: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotAllReady));

        fx.act(&guest, "guest-key-1", RoomAction::SetReady { ready: true })
            .await
            .expect("ready");
        let data = fx
            .act(&host, "host-key-1", RoomAction::Start { delay_ms: None })
            .await
            .expect("start");

        let ActionData::Scheduled(result) = data else {
            panic!("expected scheduled result");
        };
        assert_eq!(result.execute_at, T0 + 3_000);

        let room = fx.room(host.room_id).await;
        assert_eq!(room.status(), PhaseStatus::Lobby);
        assert_eq!(room.round_count, 3);
    }

    #[tokio::test]
    async fn only_the_host_may_start() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 3).await;
        let guest = fx.join(&host.code, "guest-key-1").await.expect("join");

        let err = fx
            .act(&guest, "guest-key-1", RoomAction::Start { delay_ms: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn callers_cannot_act_for_other_participants() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 3).await;

        let err = fx
            .act(&host, "someone-else", RoomAction::Heartbeat)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotAuthorized(_)));
    }

    #[tokio::test]
    async fn heartbeat_executes_due_start() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 2).await;
        fx.act(&host, "host-key-1", RoomAction::Start { delay_ms: Some(2_000) })
            .await
            .expect("start");

        fx.clock.advance(1_999);
        fx.act(&host, "host-key-1", RoomAction::Heartbeat)
            .await
            .expect("heartbeat");
        assert_eq!(fx.room(host.room_id).await.status(), PhaseStatus::Lobby);

        fx.clock.advance(1);
        fx.act(&host, "host-key-1", RoomAction::Heartbeat)
            .await
            .expect("heartbeat");
        let room = fx.room(host.room_id).await;
        assert_eq!(room.status(), PhaseStatus::Countdown);
        assert_eq!(room.current_round(), Some(0));
        assert!(room.pending_action.is_none());
    }

    #[tokio::test]
    async fn start_is_idempotent_for_the_same_host() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 2).await;
        let first = fx
            .act(&host, "host-key-1", RoomAction::Start { delay_ms: None })
            .await
            .expect("start");
        let second = fx
            .act(&host, "host-key-1", RoomAction::Start { delay_ms: None })
            .await
            .expect("retry");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cancel_start_deletes_prepared_rounds() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 3).await;
        fx.act(&host, "host-key-1", RoomAction::Start { delay_ms: None })
            .await
            .expect("start");
        assert!(fx.store.find_round(host.room_id, 0).await.unwrap().is_some());

        fx.act(
            &host,
            "host-key-1",
            RoomAction::Cancel {
                pending_action_id: None,
            },
        )
        .await
        .expect("cancel");

        let room = fx.room(host.room_id).await;
        assert!(room.pending_action.is_none());
        assert_eq!(room.round_count, 0);
        assert!(fx.store.find_round(host.room_id, 0).await.unwrap().is_none());

        fx.clock.advance(10_000);
        fx.act(&host, "host-key-1", RoomAction::Heartbeat)
            .await
            .expect("heartbeat");
        assert_eq!(fx.room(host.room_id).await.status(), PhaseStatus::Lobby);
    }

    #[tokio::test]
    async fn new_identities_cannot_join_a_running_match() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 2).await;
        let guest = fx.join(&host.code, "guest-key-1").await.expect("join");
        fx.act(&guest, "guest-key-1", RoomAction::SetReady { ready: true })
            .await
            .expect("ready");
        fx.into_question(&host).await;

        let err = fx.join(&host.code, "late-comer-1").await.unwrap_err();
        assert!(matches!(err, ServiceError::RoomAlreadyStarted));

        let again = fx.join(&host.code, "guest-key-1").await.expect("rejoin");
        assert_eq!(again.participant_id, guest.participant_id);
    }

    #[tokio::test]
    async fn room_is_capped_at_max_participants() {
        let config = AppConfig {
            max_participants: 2,
            ..AppConfig::default()
        };
        let fx = fixture_with(config, 3).await;
        let host = fx.create("host-key-1", 2).await;
        fx.join(&host.code, "guest-key-1").await.expect("join");

        let err = fx.join(&host.code, "guest-key-2").await.unwrap_err();
        assert!(matches!(err, ServiceError::RoomFull));
    }

    #[tokio::test]
    async fn host_leaving_hands_over_to_earliest_joined() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 2).await;
        fx.clock.advance(10);
        let first = fx.join(&host.code, "guest-key-1").await.expect("join");
        fx.clock.advance(10);
        fx.join(&host.code, "guest-key-2").await.expect("join");

        fx.act(&host, "host-key-1", RoomAction::Leave)
            .await
            .expect("leave");

        let room = fx.room(host.room_id).await;
        assert_eq!(room.host_participant_id, Some(first.participant_id));
        assert!(fx.participant(&first).await.is_host);
        assert!(!fx.participant(&host).await.is_host);

        // leaving twice is harmless
        fx.act(&host, "host-key-1", RoomAction::Leave)
            .await
            .expect("leave again");
        let err = fx
            .act(&host, "host-key-1", RoomAction::Heartbeat)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotInRoom));
    }

    #[tokio::test]
    async fn correct_answer_scores_and_duplicates_are_idempotent() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 2).await;
        fx.into_question(&host).await;
        assert_eq!(fx.room(host.room_id).await.status(), PhaseStatus::Question);

        let choice = fx.correct_choice(host.room_id, 0).await;
        fx.clock.advance(2_000);
        let data = fx
            .act(&host, "host-key-1", RoomAction::SubmitAnswer { choice_index: choice })
            .await
            .expect("answer");
        let ActionData::Answer(result) = data else {
            panic!("expected answer result");
        };
        assert!(result.is_correct);
        assert_eq!(result.score_delta, 140);
        assert_eq!(result.already_answered, None);

        let data = fx
            .act(
                &host,
                "host-key-1",
                RoomAction::SubmitAnswer {
                    choice_index: (choice + 1) % 4,
                },
            )
            .await
            .expect("duplicate");
        let ActionData::Answer(again) = data else {
            panic!("expected answer result");
        };
        assert_eq!(again.already_answered, Some(true));
        assert_eq!(again.score_delta, 140);
        assert!(again.is_correct);

        let me = fx.participant(&host).await;
        assert_eq!(me.total_score, 140);
        assert_eq!(me.answers, 1);
        assert_eq!(me.current_streak, 1);
        assert_eq!(me.avg_response_ms, 2_000);
    }

    #[tokio::test]
    async fn answers_are_rejected_outside_the_answer_window() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 2).await;

        let err = fx
            .act(&host, "host-key-1", RoomAction::SubmitAnswer { choice_index: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::RoundNotActive));

        fx.into_question(&host).await;
        let err = fx
            .act(&host, "host-key-1", RoomAction::SubmitAnswer { choice_index: 9 })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn late_answer_in_grace_gets_no_time_bonus() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 2).await;
        fx.into_question(&host).await;

        fx.clock.advance(10_000);
        fx.act(&host, "host-key-1", RoomAction::Progress { expected_status: None })
            .await
            .expect("to grace");
        assert_eq!(fx.room(host.room_id).await.status(), PhaseStatus::Grace);

        let choice = fx.correct_choice(host.room_id, 0).await;
        fx.clock.advance(1_000);
        let data = fx
            .act(&host, "host-key-1", RoomAction::SubmitAnswer { choice_index: choice })
            .await
            .expect("late answer");
        let ActionData::Answer(result) = data else {
            panic!("expected answer result");
        };
        assert_eq!(result.score_delta, 100);
    }

    #[tokio::test]
    async fn progress_without_expected_status_waits_for_the_deadline() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 2).await;
        fx.into_question(&host).await;

        let data = fx
            .act(&host, "host-key-1", RoomAction::Progress { expected_status: None })
            .await
            .expect("early progress");
        assert!(matches!(
            data,
            ActionData::Progressed(ProgressResult { advanced: false, .. })
        ));

        let data = fx
            .act(
                &host,
                "host-key-1",
                RoomAction::Progress {
                    expected_status: Some(PhaseStatus::Countdown),
                },
            )
            .await
            .expect("stale progress");
        assert!(matches!(
            data,
            ActionData::Progressed(ProgressResult {
                advanced: false,
                status: PhaseStatus::Question,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn unanswered_round_resets_streak_at_reveal() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 2).await;
        let mut host_row = fx.participant(&host).await;
        host_row.current_streak = 4;
        host_row.max_streak = 4;
        fx.store.save_participant(host_row).await.expect("seed streak");

        fx.into_question(&host).await;
        for expected in [PhaseStatus::Question, PhaseStatus::Grace] {
            fx.act(
                &host,
                "host-key-1",
                RoomAction::Progress {
                    expected_status: Some(expected),
                },
            )
            .await
            .expect("advance");
        }

        assert_eq!(fx.room(host.room_id).await.status(), PhaseStatus::Reveal);
        let me = fx.participant(&host).await;
        assert_eq!(me.current_streak, 0);
        assert_eq!(me.max_streak, 4);
    }

    #[tokio::test]
    async fn pause_and_resume_preserve_remaining_time() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 2).await;
        fx.into_question(&host).await;

        fx.clock.advance(4_000);
        fx.act(&host, "host-key-1", RoomAction::Pause)
            .await
            .expect("pause");
        let paused = fx.room(host.room_id).await;
        assert_eq!(paused.status(), PhaseStatus::Paused);
        assert_eq!(paused.pause_state().map(|p| p.remaining_ms), Some(6_000));

        let err = fx
            .act(&host, "host-key-1", RoomAction::Progress { expected_status: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PhaseViolation(_)));

        fx.clock.advance(30_000);
        fx.act(&host, "host-key-1", RoomAction::Resume)
            .await
            .expect("resume");
        let resumed = fx.room(host.room_id).await;
        assert_eq!(resumed.status(), PhaseStatus::Question);
        assert_eq!(resumed.phase_ends_at(), Some(fx.state.now() + 6_000));

        // four seconds of answer time were used before the pause
        let choice = fx.correct_choice(host.room_id, 0).await;
        let data = fx
            .act(&host, "host-key-1", RoomAction::SubmitAnswer { choice_index: choice })
            .await
            .expect("answer");
        let ActionData::Answer(result) = data else {
            panic!("expected answer result");
        };
        assert_eq!(result.score_delta, 130);
    }

    #[tokio::test]
    async fn reactions_respect_emoji_set_and_cooldown() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 2).await;
        let emoji = fx.state.config().allowed_emojis[0].clone();

        let data = fx
            .act(
                &host,
                "host-key-1",
                RoomAction::SendReaction {
                    emoji: "not-an-emoji".into(),
                },
            )
            .await
            .expect("reaction");
        assert_eq!(data, reaction_rejected(ReactionRejection::InvalidEmoji));

        let data = fx
            .act(&host, "host-key-1", RoomAction::SendReaction { emoji: emoji.clone() })
            .await
            .expect("reaction");
        assert!(matches!(
            data,
            ActionData::Reaction(ReactionResult { success: true, .. })
        ));

        fx.clock.advance(500);
        let data = fx
            .act(&host, "host-key-1", RoomAction::SendReaction { emoji: emoji.clone() })
            .await
            .expect("reaction");
        assert_eq!(data, reaction_rejected(ReactionRejection::Cooldown));

        fx.clock.advance(500);
        let data = fx
            .act(&host, "host-key-1", RoomAction::SendReaction { emoji })
            .await
            .expect("reaction");
        assert!(matches!(
            data,
            ActionData::Reaction(ReactionResult { success: true, .. })
        ));
    }

    #[tokio::test]
    async fn tick_auto_advances_expired_phases() {
        let fx = fixture_with(AppConfig::default(), 3).await;
        let host = fx.create("host-key-1", 1).await;
        fx.act(&host, "host-key-1", RoomAction::Start { delay_ms: Some(0) })
            .await
            .expect("start");

        assert!(tick(&fx.state, host.room_id).await.expect("tick"));
        assert_eq!(fx.room(host.room_id).await.status(), PhaseStatus::Countdown);

        fx.clock.advance(3_000);
        assert!(tick(&fx.state, host.room_id).await.expect("tick"));
        assert_eq!(fx.room(host.room_id).await.status(), PhaseStatus::Question);

        assert!(!tick(&fx.state, host.room_id).await.expect("tick"));
        assert!(!tick(&fx.state, Uuid::new_v4()).await.expect("tick missing room"));
    }

    #[tokio::test]
    async fn rematch_resets_scores_and_replays() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 1).await;
        fx.into_question(&host).await;
        let choice = fx.correct_choice(host.room_id, 0).await;
        fx.act(&host, "host-key-1", RoomAction::SubmitAnswer { choice_index: choice })
            .await
            .expect("answer");

        for expected in [
            PhaseStatus::Question,
            PhaseStatus::Grace,
            PhaseStatus::Reveal,
            PhaseStatus::Leaderboard,
        ] {
            fx.act(
                &host,
                "host-key-1",
                RoomAction::Progress {
                    expected_status: Some(expected),
                },
            )
            .await
            .expect("advance");
        }
        assert_eq!(fx.room(host.room_id).await.status(), PhaseStatus::Results);

        fx.act(&host, "host-key-1", RoomAction::Rematch { delay_ms: Some(0) })
            .await
            .expect("rematch");
        // scores survive until the rematch executes
        assert!(fx.participant(&host).await.total_score > 0);

        fx.act(&host, "host-key-1", RoomAction::Heartbeat)
            .await
            .expect("execute rematch");
        let room = fx.room(host.room_id).await;
        assert_eq!(room.status(), PhaseStatus::Countdown);
        assert_eq!(room.round_count, 1);
        let me = fx.participant(&host).await;
        assert_eq!(me.total_score, 0);
        assert_eq!(me.current_streak, 0);
        assert!(fx.store.find_answer(host.room_id, 0, host.participant_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn answers_close_at_the_end_of_grace_even_without_progress() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 2).await;
        let guest = fx.join(&host.code, "guest-key-1").await.expect("join");
        fx.act(&guest, "guest-key-1", RoomAction::SetReady { ready: true })
            .await
            .expect("ready");
        fx.into_question(&host).await;
        let choice = fx.correct_choice(host.room_id, 0).await;

        // 10 s answer window plus 2 s grace, room never advanced past `question`
        fx.clock.advance(11_999);
        fx.act(&guest, "guest-key-1", RoomAction::SubmitAnswer { choice_index: choice })
            .await
            .expect("answer inside grace");

        fx.clock.advance(2);
        let err = fx
            .act(&host, "host-key-1", RoomAction::SubmitAnswer { choice_index: choice })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::RoundNotActive));
        assert_eq!(fx.room(host.room_id).await.status(), PhaseStatus::Question);
        assert_eq!(fx.participant(&host).await.total_score, 0);
    }

    #[tokio::test]
    async fn set_ready_outside_the_lobby_is_a_phase_violation() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 2).await;
        fx.into_question(&host).await;

        let err = fx
            .act(&host, "host-key-1", RoomAction::SetReady { ready: true })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PhaseViolation(_)));
        assert_eq!(err.code(), "PHASE_VIOLATION");
    }

    #[tokio::test]
    async fn rematch_on_an_emptied_deck_keeps_the_results() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 1).await;
        fx.into_question(&host).await;
        let choice = fx.correct_choice(host.room_id, 0).await;
        fx.act(&host, "host-key-1", RoomAction::SubmitAnswer { choice_index: choice })
            .await
            .expect("answer");
        fx.finish_single_round(&host).await;
        let before = fx.participant(&host).await.total_score;
        assert!(before > 0);

        fx.store
            .save_deck(
                DeckEntity {
                    id: fx.deck_id,
                    name: "Trivia".into(),
                    question_ids: Vec::new(),
                },
                Vec::new(),
            )
            .await
            .expect("empty deck");

        fx.act(&host, "host-key-1", RoomAction::Rematch { delay_ms: Some(0) })
            .await
            .expect("rematch");
        fx.act(&host, "host-key-1", RoomAction::Heartbeat)
            .await
            .expect("heartbeat");

        let room = fx.room(host.room_id).await;
        assert_eq!(room.status(), PhaseStatus::Results);
        assert!(room.pending_action.is_none());
        assert_eq!(room.round_count, 1);
        assert!(fx.store.find_round(host.room_id, 0).await.unwrap().is_some());
        assert!(fx.store.find_answer(host.room_id, 0, host.participant_id).await.unwrap().is_some());
        assert_eq!(fx.participant(&host).await.total_score, before);
    }

    #[tokio::test]
    async fn to_lobby_is_only_offered_from_results() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 1).await;

        let err = fx
            .act(&host, "host-key-1", RoomAction::ToLobby { delay_ms: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PhaseViolation(_)));

        fx.into_question(&host).await;
        let err = fx
            .act(&host, "host-key-1", RoomAction::ToLobby { delay_ms: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PhaseViolation(_)));
        assert!(fx.room(host.room_id).await.pending_action.is_none());
    }

    #[tokio::test]
    async fn to_lobby_resets_the_match_when_it_executes() {
        let fx = fixture().await;
        let host = fx.create("host-key-1", 1).await;
        let guest = fx.join(&host.code, "guest-key-1").await.expect("join");
        fx.act(&guest, "guest-key-1", RoomAction::SetReady { ready: true })
            .await
            .expect("ready");
        fx.into_question(&host).await;
        let choice = fx.correct_choice(host.room_id, 0).await;
        fx.act(&guest, "guest-key-1", RoomAction::SubmitAnswer { choice_index: choice })
            .await
            .expect("answer");
        fx.finish_single_round(&host).await;

        let data = fx
            .act(&host, "host-key-1", RoomAction::ToLobby { delay_ms: Some(1_000) })
            .await
            .expect("to lobby");
        let ActionData::Scheduled(scheduled) = data else {
            panic!("expected scheduled result");
        };
        assert_eq!(scheduled.execute_at, fx.state.now() + 1_000);
        // nothing changes before the action runs
        assert_eq!(fx.room(host.room_id).await.status(), PhaseStatus::Results);
        assert!(fx.participant(&guest).await.total_score > 0);

        fx.clock.advance(1_000);
        fx.act(&guest, "guest-key-1", RoomAction::Heartbeat)
            .await
            .expect("execute to lobby");

        let room = fx.room(host.room_id).await;
        assert_eq!(room.status(), PhaseStatus::Lobby);
        assert!(room.pending_action.is_none());
        assert_eq!(room.round_count, 0);
        assert_eq!(room.expires_at, fx.state.now() + fx.state.config().lobby_ttl_ms());
        assert!(fx.store.find_round(host.room_id, 0).await.unwrap().is_none());
        assert!(fx.store.find_answer(host.room_id, 0, guest.participant_id).await.unwrap().is_none());

        let me = fx.participant(&guest).await;
        assert_eq!(me.total_score, 0);
        assert_eq!(me.answers, 0);
        assert_eq!(me.current_streak, 0);
        assert!(!me.is_ready);

        // the lobby accepts newcomers again
        fx.join(&host.code, "guest-key-2").await.expect("join after reset");
    }

    #[tokio::test]
    async fn two_round_match_from_lobby_to_results() {
        let fx = fixture().await;
        let host = create_room(
            &fx.state,
            Identity::Guest("host-key-1".into()),
            CreateRoomRequest {
                deck_id: fx.deck_id,
                nickname: "Host".into(),
                guest_key: Some("host-key-1".into()),
                rules: Some(RulesInput {
                    rounds: Some(2),
                    answer_seconds: Some(10),
                    grace_seconds: Some(2),
                    reveal_seconds: Some(6),
                    leaderboard_seconds: Some(5),
                    ..RulesInput::default()
                }),
            },
        )
        .await
        .expect("create room");
        let guest = fx.join(&host.code, "guest-key-1").await.expect("join");
        fx.act(&guest, "guest-key-1", RoomAction::SetReady { ready: true })
            .await
            .expect("ready");

        let mut guest_row = fx.participant(&guest).await;
        guest_row.current_streak = 2;
        fx.store.save_participant(guest_row).await.expect("seed streak");

        let data = fx
            .act(&host, "host-key-1", RoomAction::Start { delay_ms: None })
            .await
            .expect("start");
        let ActionData::Scheduled(scheduled) = data else {
            panic!("expected scheduled result");
        };
        assert_eq!(scheduled.execute_at, T0 + 3_000);

        fx.clock.advance(3_000);
        fx.act(&guest, "guest-key-1", RoomAction::Heartbeat)
            .await
            .expect("execute start");
        assert_eq!(fx.room(host.room_id).await.status(), PhaseStatus::Countdown);

        fx.progress_through(&host, &[PhaseStatus::Countdown]).await;
        let room = fx.room(host.room_id).await;
        assert_eq!(room.status(), PhaseStatus::Question);
        assert_eq!(room.phase_ends_at(), Some(fx.state.now() + 10_000));

        let choice = fx.correct_choice(host.room_id, 0).await;
        fx.clock.advance(2_000);
        let data = fx
            .act(&host, "host-key-1", RoomAction::SubmitAnswer { choice_index: choice })
            .await
            .expect("answer");
        let ActionData::Answer(result) = data else {
            panic!("expected answer result");
        };
        assert_eq!(result.score_delta, 140);
        assert_eq!(result.multiplier, 1.0);

        // the guest never answers
        fx.progress_through(&host, &[PhaseStatus::Question, PhaseStatus::Grace])
            .await;
        assert_eq!(fx.room(host.room_id).await.status(), PhaseStatus::Reveal);
        assert_eq!(fx.participant(&guest).await.current_streak, 0);

        fx.progress_through(&host, &[PhaseStatus::Reveal]).await;
        assert_eq!(fx.room(host.room_id).await.status(), PhaseStatus::Leaderboard);

        fx.clock.advance(5_000);
        fx.act(&host, "host-key-1", RoomAction::Progress { expected_status: None })
            .await
            .expect("next round");
        let room = fx.room(host.room_id).await;
        assert_eq!(room.status(), PhaseStatus::Countdown);
        assert_eq!(room.current_round(), Some(1));

        fx.progress_through(
            &host,
            &[
                PhaseStatus::Countdown,
                PhaseStatus::Question,
                PhaseStatus::Grace,
                PhaseStatus::Reveal,
                PhaseStatus::Leaderboard,
            ],
        )
        .await;
        assert_eq!(fx.room(host.room_id).await.status(), PhaseStatus::Results);

        // results is terminal for progress
        let data = fx
            .act(&host, "host-key-1", RoomAction::Progress { expected_status: None })
            .await
            .expect("progress in results");
        assert!(matches!(
            data,
            ActionData::Progressed(ProgressResult {
                advanced: false,
                status: PhaseStatus::Results,
                ..
            })
        ));
        assert_eq!(fx.participant(&host).await.total_score, 140);
        assert_eq!(fx.participant(&guest).await.total_score, 0);
    }
}
