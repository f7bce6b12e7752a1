use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{
    clock::TimestampMs,
    state_machine::{
        AbortError, ApplyError, InvalidTransition, PausedPhase, PhaseStatus, PlanError, PlanId,
        RoomEvent, RoomPhase, TransitionContext,
    },
};

/// Round count and per-stage durations of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rules {
    /// Number of rounds requested by the host.
    pub rounds: u32,
    /// Countdown before each question, in seconds.
    pub countdown_seconds: u32,
    /// Answer window, in seconds.
    pub answer_seconds: u32,
    /// Late-answer window after the deadline, in seconds.
    pub grace_seconds: u32,
    /// Reveal duration, in seconds.
    pub reveal_seconds: u32,
    /// Leaderboard duration, in seconds.
    pub leaderboard_seconds: u32,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            rounds: 10,
            countdown_seconds: 3,
            answer_seconds: 10,
            grace_seconds: 2,
            reveal_seconds: 6,
            leaderboard_seconds: 5,
        }
    }
}

/// Kind of deferred host action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum PendingKind {
    /// Start the match from the lobby.
    Start,
    /// Reset scores and play again.
    Rematch,
    /// Reset scores and return to the lobby.
    ToLobby,
}

impl PendingKind {
    /// Phase event applied when the action executes.
    pub fn event(self) -> RoomEvent {
        match self {
            PendingKind::Start | PendingKind::Rematch => RoomEvent::Begin,
            PendingKind::ToLobby => RoomEvent::Reset,
        }
    }

    /// Human readable label shown next to the countdown.
    pub fn label(self) -> &'static str {
        match self {
            PendingKind::Start => "Match starts",
            PendingKind::Rematch => "Rematch starts",
            PendingKind::ToLobby => "Back to lobby",
        }
    }

    /// Whether the action may be scheduled while the room is in `status`.
    pub fn allowed_from(self, status: PhaseStatus) -> bool {
        match self {
            PendingKind::Start => status == PhaseStatus::Lobby,
            PendingKind::Rematch => matches!(status, PhaseStatus::Lobby | PhaseStatus::Results),
            PendingKind::ToLobby => status == PhaseStatus::Results,
        }
    }
}

/// Host action waiting for its execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    /// Identifier used to match executions and cancellations.
    pub id: PlanId,
    /// What happens on execution.
    pub kind: PendingKind,
    /// Absolute execution time.
    pub execute_at: TimestampMs,
    /// Delay requested when scheduling.
    pub delay_ms: u64,
    /// When the action was scheduled.
    pub created_at: TimestampMs,
    /// Participant who scheduled it.
    pub initiated_by: Uuid,
    /// Countdown label.
    pub label: String,
    /// Status the room was in when the action was scheduled.
    pub scheduled_from: PhaseStatus,
}

/// A live match room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    /// Room identifier.
    pub id: Uuid,
    /// Six character join code.
    pub code: String,
    /// Current host, `None` once everybody left.
    pub host_participant_id: Option<Uuid>,
    /// Deck the questions are drawn from.
    pub deck_id: Uuid,
    /// Match rules.
    pub rules: Rules,
    /// Current phase.
    pub phase: RoomPhase,
    /// Number of rounds selected for the current match.
    pub round_count: usize,
    /// Incremented on every mutation of the room.
    pub version: u64,
    /// Deferred host action, if any.
    pub pending_action: Option<PendingAction>,
    /// Creation time.
    pub created_at: TimestampMs,
    /// Last mutation time.
    pub updated_at: TimestampMs,
    /// End of the lobby lifetime.
    pub expires_at: TimestampMs,
}

impl Room {
    /// Create a room in the lobby.
    pub fn new(
        id: Uuid,
        code: String,
        deck_id: Uuid,
        rules: Rules,
        now: TimestampMs,
        lobby_ttl_ms: i64,
    ) -> Self {
        Self {
            id,
            code,
            host_participant_id: None,
            deck_id,
            rules,
            phase: RoomPhase::Lobby,
            round_count: 0,
            version: 0,
            pending_action: None,
            created_at: now,
            updated_at: now,
            expires_at: now + lobby_ttl_ms,
        }
    }

    /// Flat status of the current phase.
    pub fn status(&self) -> PhaseStatus {
        self.phase.status()
    }

    /// Deadline of the running stage.
    pub fn phase_ends_at(&self) -> Option<TimestampMs> {
        self.phase.ends_at()
    }

    /// Round currently running or paused.
    pub fn current_round(&self) -> Option<usize> {
        self.phase.current_round()
    }

    /// Pause snapshot while paused.
    pub fn pause_state(&self) -> Option<PausedPhase> {
        match self.phase {
            RoomPhase::Paused(paused) => Some(paused),
            _ => None,
        }
    }

    /// Record a mutation.
    pub fn touch(&mut self, now: TimestampMs) {
        self.version += 1;
        self.updated_at = now;
    }

    fn context(&self, now: TimestampMs) -> TransitionContext<'_> {
        TransitionContext {
            rules: &self.rules,
            round_count: self.round_count,
            now,
        }
    }

    /// Apply a phase event. Clears any pending action.
    pub fn apply(
        &mut self,
        event: RoomEvent,
        now: TimestampMs,
    ) -> Result<RoomPhase, InvalidTransition> {
        let next = self.phase.next(event, self.context(now))?;
        self.phase = next;
        self.pending_action = None;
        self.touch(now);
        Ok(next)
    }

    /// Schedule a pending action, returning the stored action.
    pub fn plan_pending(
        &mut self,
        kind: PendingKind,
        delay_ms: u64,
        initiated_by: Uuid,
        now: TimestampMs,
    ) -> Result<PendingAction, PlanError> {
        if self.pending_action.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let status = self.status();
        if !kind.allowed_from(status) {
            return Err(PlanError::InvalidTransition(InvalidTransition {
                from: status,
                event: kind.event(),
            }));
        }

        let action = PendingAction {
            id: Uuid::new_v4(),
            kind,
            execute_at: now + delay_ms as i64,
            delay_ms,
            created_at: now,
            initiated_by,
            label: kind.label().to_owned(),
            scheduled_from: status,
        };

        self.pending_action = Some(action.clone());
        self.touch(now);
        Ok(action)
    }

    /// Remove and return the pending action once it is due.
    ///
    /// A pending action scheduled from a status the room has since left is
    /// dropped and reported as [`ApplyError::PhaseMismatch`].
    pub fn take_due_pending(
        &mut self,
        expected: Option<PlanId>,
        now: TimestampMs,
    ) -> Result<PendingAction, ApplyError> {
        let action = self.pending_action.as_ref().ok_or(ApplyError::NoPending)?;

        if let Some(got) = expected.filter(|got| *got != action.id) {
            return Err(ApplyError::IdMismatch {
                expected: action.id,
                got,
            });
        }

        if now < action.execute_at {
            return Err(ApplyError::NotDue {
                execute_at: action.execute_at,
            });
        }

        let status = self.status();
        if action.scheduled_from != status {
            let expected = action.scheduled_from;
            self.pending_action = None;
            self.touch(now);
            return Err(ApplyError::PhaseMismatch {
                expected,
                actual: status,
            });
        }

        self.pending_action.take().ok_or(ApplyError::NoPending)
    }

    /// Cancel the pending action before it executes.
    pub fn abort_pending(
        &mut self,
        expected: Option<PlanId>,
        now: TimestampMs,
    ) -> Result<PendingAction, AbortError> {
        let action = self.pending_action.as_ref().ok_or(AbortError::NoPending)?;

        if let Some(got) = expected.filter(|got| *got != action.id) {
            return Err(AbortError::IdMismatch {
                expected: action.id,
                got,
            });
        }

        let action = self.pending_action.take().ok_or(AbortError::NoPending)?;
        self.touch(now);
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::state_machine::Stage;

    const NOW: TimestampMs = 50_000;

    fn room() -> Room {
        let mut room = Room::new(
            Uuid::new_v4(),
            "ABC123".into(),
            Uuid::new_v4(),
            Rules {
                rounds: 2,
                ..Rules::default()
            },
            NOW,
            60_000,
        );
        room.round_count = 2;
        room
    }

    #[test]
    fn new_room_starts_in_lobby_without_deadline() {
        let room = room();
        assert_eq!(room.status(), PhaseStatus::Lobby);
        assert_eq!(room.phase_ends_at(), None);
        assert_eq!(room.version, 0);
        assert_eq!(room.expires_at, NOW + 60_000);
    }

    #[test]
    fn scheduling_start_does_not_change_status() {
        let mut room = room();
        let host = Uuid::new_v4();
        let action = room
            .plan_pending(PendingKind::Start, 3_000, host, NOW)
            .unwrap();

        assert_eq!(action.execute_at, NOW + 3_000);
        assert_eq!(action.initiated_by, host);
        assert_eq!(room.status(), PhaseStatus::Lobby);
        assert_eq!(room.version, 1);
        assert_eq!(
            room.plan_pending(PendingKind::Start, 3_000, host, NOW),
            Err(PlanError::AlreadyPending)
        );
    }

    #[test]
    fn pending_action_executes_only_when_due() {
        let mut room = room();
        let action = room
            .plan_pending(PendingKind::Start, 3_000, Uuid::new_v4(), NOW)
            .unwrap();

        assert_eq!(
            room.take_due_pending(None, NOW + 2_999),
            Err(ApplyError::NotDue {
                execute_at: NOW + 3_000
            })
        );

        let taken = room.take_due_pending(Some(action.id), NOW + 3_000).unwrap();
        assert_eq!(taken.id, action.id);
        assert!(room.pending_action.is_none());

        room.apply(taken.kind.event(), NOW + 3_000).unwrap();
        assert_eq!(room.status(), PhaseStatus::Countdown);
        assert_eq!(room.current_round(), Some(0));
    }

    #[test]
    fn cancel_reverts_to_lobby_and_clears_pending() {
        let mut room = room();
        let action = room
            .plan_pending(PendingKind::Start, 3_000, Uuid::new_v4(), NOW)
            .unwrap();

        let err = room.abort_pending(Some(Uuid::new_v4()), NOW).unwrap_err();
        assert!(matches!(err, AbortError::IdMismatch { .. }));

        room.abort_pending(Some(action.id), NOW + 1_000).unwrap();
        assert_eq!(room.status(), PhaseStatus::Lobby);
        assert!(room.pending_action.is_none());
        assert_eq!(room.take_due_pending(None, NOW + 10_000), Err(ApplyError::NoPending));
        assert_eq!(room.abort_pending(None, NOW), Err(AbortError::NoPending));
    }

    #[test]
    fn pending_kinds_respect_their_source_phase() {
        let mut room = room();
        let host = Uuid::new_v4();
        assert!(matches!(
            room.plan_pending(PendingKind::ToLobby, 0, host, NOW),
            Err(PlanError::InvalidTransition(_))
        ));

        room.apply(RoomEvent::Begin, NOW).unwrap();
        assert!(matches!(
            room.plan_pending(PendingKind::Start, 0, host, NOW),
            Err(PlanError::InvalidTransition(_))
        ));
        assert!(matches!(
            room.plan_pending(PendingKind::Rematch, 0, host, NOW),
            Err(PlanError::InvalidTransition(_))
        ));
    }

    #[test]
    fn transitions_bump_version_and_clear_pending() {
        let mut room = room();
        room.plan_pending(PendingKind::Rematch, 1_000, Uuid::new_v4(), NOW)
            .unwrap();
        let before = room.version;

        room.apply(RoomEvent::Begin, NOW).unwrap();
        assert_eq!(room.version, before + 1);
        assert!(room.pending_action.is_none());
    }

    #[test]
    fn pause_state_is_derived_from_phase() {
        let mut room = room();
        room.apply(RoomEvent::Begin, NOW).unwrap();
        room.apply(RoomEvent::Advance, NOW).unwrap();
        room.apply(RoomEvent::Pause, NOW + 4_000).unwrap();

        let paused = room.pause_state().unwrap();
        assert_eq!(paused.stage, Stage::Question);
        assert_eq!(paused.remaining_ms, 6_000);
        assert_eq!(room.phase_ends_at(), None);
    }
}
