use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{clock::TimestampMs, room::Rules};

/// Timed stages a room cycles through once per round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Short countdown before the question is shown.
    Countdown,
    /// Question is open for answers.
    Question,
    /// Late window: answers are still accepted after the nominal deadline.
    Grace,
    /// Correct answer is revealed.
    Reveal,
    /// Standings after the round.
    Leaderboard,
}

impl Stage {
    /// Length of this stage according to the room rules.
    pub fn duration_ms(self, rules: &Rules) -> i64 {
        let seconds = match self {
            Stage::Countdown => rules.countdown_seconds,
            Stage::Question => rules.answer_seconds,
            Stage::Grace => rules.grace_seconds,
            Stage::Reveal => rules.reveal_seconds,
            Stage::Leaderboard => rules.leaderboard_seconds,
        };
        i64::from(seconds) * 1_000
    }

    /// Status reported to clients for this stage.
    pub fn status(self) -> PhaseStatus {
        match self {
            Stage::Countdown => PhaseStatus::Countdown,
            Stage::Question => PhaseStatus::Question,
            Stage::Grace => PhaseStatus::Grace,
            Stage::Reveal => PhaseStatus::Reveal,
            Stage::Leaderboard => PhaseStatus::Leaderboard,
        }
    }
}

/// A running stage with its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivePhase {
    /// Stage being played.
    pub stage: Stage,
    /// Zero-based round index.
    pub round: usize,
    /// Absolute deadline of the stage.
    pub ends_at: TimestampMs,
}

/// Snapshot of an active stage frozen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PausedPhase {
    /// Stage to resume into.
    pub stage: Stage,
    /// Round to resume into.
    pub round: usize,
    /// Time that was left on the stage when it was paused.
    pub remaining_ms: i64,
    /// When the pause started.
    pub paused_at: TimestampMs,
}

/// Phase of a room. Deadlines only exist on [`RoomPhase::Active`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// Waiting for players; the initial phase.
    Lobby,
    /// A round stage is running.
    Active(ActivePhase),
    /// An active stage is frozen.
    Paused(PausedPhase),
    /// Match finished.
    Results,
}

/// Flat status name of a [`RoomPhase`].
///
/// Declaration order is the forward order of a match; `Paused` sits outside it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// See [`RoomPhase::Lobby`].
    Lobby,
    /// See [`Stage::Countdown`].
    Countdown,
    /// See [`Stage::Question`].
    Question,
    /// See [`Stage::Grace`].
    Grace,
    /// See [`Stage::Reveal`].
    Reveal,
    /// See [`Stage::Leaderboard`].
    Leaderboard,
    /// See [`RoomPhase::Results`].
    Results,
    /// See [`RoomPhase::Paused`].
    Paused,
}

impl PhaseStatus {
    /// Position in the forward ordering, `None` for `Paused`.
    pub fn rank(self) -> Option<u8> {
        match self {
            PhaseStatus::Paused => None,
            other => Some(other as u8),
        }
    }

    /// Stable lowercase name used in logs and persistence.
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::Lobby => "lobby",
            PhaseStatus::Countdown => "countdown",
            PhaseStatus::Question => "question",
            PhaseStatus::Grace => "grace",
            PhaseStatus::Reveal => "reveal",
            PhaseStatus::Leaderboard => "leaderboard",
            PhaseStatus::Results => "results",
            PhaseStatus::Paused => "paused",
        }
    }

    /// Stage matching this status, if it names one.
    pub fn stage(self) -> Option<Stage> {
        match self {
            PhaseStatus::Countdown => Some(Stage::Countdown),
            PhaseStatus::Question => Some(Stage::Question),
            PhaseStatus::Grace => Some(Stage::Grace),
            PhaseStatus::Reveal => Some(Stage::Reveal),
            PhaseStatus::Leaderboard => Some(Stage::Leaderboard),
            _ => None,
        }
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that move a room between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomEvent {
    /// Enter the first countdown (start or rematch executed).
    Begin,
    /// Move one stage forward.
    Advance,
    /// Freeze the running stage.
    Pause,
    /// Unfreeze the paused stage.
    Resume,
    /// Return to the lobby.
    Reset,
}

/// Error returned when an event cannot be applied from the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from}")]
pub struct InvalidTransition {
    /// Status the room was in.
    pub from: PhaseStatus,
    /// Rejected event.
    pub event: RoomEvent,
}

/// Inputs a transition needs besides the phase itself.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    /// Room rules providing stage durations.
    pub rules: &'a Rules,
    /// Number of rounds actually selected for the match.
    pub round_count: usize,
    /// Time the transition happens.
    pub now: TimestampMs,
}

impl RoomPhase {
    /// Flat status of this phase.
    pub fn status(&self) -> PhaseStatus {
        match self {
            RoomPhase::Lobby => PhaseStatus::Lobby,
            RoomPhase::Active(active) => active.stage.status(),
            RoomPhase::Paused(_) => PhaseStatus::Paused,
            RoomPhase::Results => PhaseStatus::Results,
        }
    }

    /// Round index while a round is running or paused.
    pub fn current_round(&self) -> Option<usize> {
        match self {
            RoomPhase::Active(active) => Some(active.round),
            RoomPhase::Paused(paused) => Some(paused.round),
            RoomPhase::Lobby | RoomPhase::Results => None,
        }
    }

    /// Deadline of the running stage.
    pub fn ends_at(&self) -> Option<TimestampMs> {
        match self {
            RoomPhase::Active(active) => Some(active.ends_at),
            _ => None,
        }
    }

    /// Whether answers are accepted right now.
    pub fn accepts_answers(&self) -> bool {
        matches!(
            self,
            RoomPhase::Active(ActivePhase {
                stage: Stage::Question | Stage::Grace,
                ..
            })
        )
    }

    /// Compute the phase reached by applying `event`.
    pub fn next(
        &self,
        event: RoomEvent,
        ctx: TransitionContext<'_>,
    ) -> Result<RoomPhase, InvalidTransition> {
        let enter = |stage: Stage, round: usize| {
            RoomPhase::Active(ActivePhase {
                stage,
                round,
                ends_at: ctx.now + stage.duration_ms(ctx.rules),
            })
        };

        let next = match (*self, event) {
            (RoomPhase::Lobby | RoomPhase::Results, RoomEvent::Begin) if ctx.round_count > 0 => {
                enter(Stage::Countdown, 0)
            }
            (RoomPhase::Active(active), RoomEvent::Advance) => match active.stage {
                Stage::Countdown => enter(Stage::Question, active.round),
                Stage::Question => enter(Stage::Grace, active.round),
                Stage::Grace => enter(Stage::Reveal, active.round),
                Stage::Reveal => enter(Stage::Leaderboard, active.round),
                Stage::Leaderboard if active.round + 1 >= ctx.round_count => RoomPhase::Results,
                Stage::Leaderboard => enter(Stage::Countdown, active.round + 1),
            },
            (RoomPhase::Active(active), RoomEvent::Pause) => RoomPhase::Paused(PausedPhase {
                stage: active.stage,
                round: active.round,
                remaining_ms: (active.ends_at - ctx.now).max(0),
                paused_at: ctx.now,
            }),
            (RoomPhase::Paused(paused), RoomEvent::Resume) => RoomPhase::Active(ActivePhase {
                stage: paused.stage,
                round: paused.round,
                ends_at: ctx.now + paused.remaining_ms,
            }),
            (RoomPhase::Lobby | RoomPhase::Results, RoomEvent::Reset) => RoomPhase::Lobby,
            (from, event) => {
                return Err(InvalidTransition {
                    from: from.status(),
                    event,
                });
            }
        };

        Ok(next)
    }
}

/// Errors that can occur when scheduling a pending action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Another pending action must execute or be canceled first.
    AlreadyPending,
    /// The action's transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when executing a pending action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No action is pending.
    NoPending,
    /// The action's execution time has not been reached.
    NotDue {
        /// Scheduled execution time.
        execute_at: TimestampMs,
    },
    /// Action id does not match the pending action.
    IdMismatch {
        /// Pending action id.
        expected: PlanId,
        /// Provided id.
        got: PlanId,
    },
    /// The room left the phase the action was scheduled from.
    PhaseMismatch {
        /// Status recorded when scheduling.
        expected: PhaseStatus,
        /// Current status.
        actual: PhaseStatus,
    },
}

/// Errors that can occur when canceling a pending action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No action is pending.
    NoPending,
    /// Action id does not match the pending action.
    IdMismatch {
        /// Pending action id.
        expected: PlanId,
        /// Provided id.
        got: PlanId,
    },
}

/// Unique identifier of a pending action.
pub type PlanId = Uuid;
