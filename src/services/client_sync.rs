//! Client-side clock reconciliation against server-declared deadlines.
//!
//! Clients never trust their own wall clock for deadlines. Every response and
//! event carries `serverNow`; [`ClockSync`] keeps the offset to the local
//! clock and converts server deadlines into local countdowns.

use uuid::Uuid;

use crate::{dto::room::RoomView, state::clock::TimestampMs};

/// Call a client issues once a watched deadline is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCall {
    /// Any participant heartbeats to execute a due pending action.
    Heartbeat,
    /// The host asks the server to leave the expired phase.
    Progress,
}

/// Next deadline a client should watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    /// Server time of the deadline.
    pub at: TimestampMs,
    /// What to send when it is reached.
    pub call: TriggerCall,
}

/// Offset between a local clock and the server clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockSync {
    offset_ms: i64,
}

impl ClockSync {
    /// Record a server timestamp received at `local_now`.
    pub fn observe(&mut self, local_now: TimestampMs, server_now: TimestampMs) {
        self.offset_ms = local_now - server_now;
    }

    /// `local - server`, as of the last observation.
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    /// Estimated server time at `local_now`.
    pub fn server_time(&self, local_now: TimestampMs) -> TimestampMs {
        local_now - self.offset_ms
    }

    /// Milliseconds left until the server deadline `target`, never negative.
    pub fn remaining_ms(&self, target: TimestampMs, local_now: TimestampMs) -> i64 {
        (target - self.server_time(local_now)).max(0)
    }

    /// Whether `target` has been reached.
    pub fn is_due(&self, target: TimestampMs, local_now: TimestampMs) -> bool {
        self.remaining_ms(target, local_now) == 0
    }

    /// Deadline `participant_id` should act on, if any.
    ///
    /// A pending action takes precedence; phase deadlines only concern the host.
    pub fn next_trigger(&self, view: &RoomView, participant_id: Uuid) -> Option<Trigger> {
        if let Some(pending) = view.pending_action.as_ref() {
            return Some(Trigger {
                at: pending.execute_at,
                call: TriggerCall::Heartbeat,
            });
        }

        let ends_at = view.phase_ends_at?;
        (view.host_participant_id == Some(participant_id)).then_some(Trigger {
            at: ends_at,
            call: TriggerCall::Progress,
        })
    }
}

/// Countdown text shown next to a pending action, for instance `"Match starts in 3s"`.
pub fn countdown_text(label: &str, remaining_ms: i64) -> String {
    let seconds = (remaining_ms.max(0) + 999) / 1_000;
    format!("{label} in {seconds}s")
}
