//! Server-side deadline driver.
//!
//! Keeps a min-heap of room deadlines registered by the room controller and
//! ticks each room once its deadline passes, so matches progress even when
//! no client polls.

use std::{cmp::Reverse, collections::BinaryHeap, time::Duration};

use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::RoomEntity,
    services::room_controller,
    state::{Deadline, SharedState, clock::TimestampMs},
};

/// Upper bound on a single sleep so clock adjustments are picked up.
const MAX_SLEEP: Duration = Duration::from_secs(30);

/// Min-heap of `(deadline, room)` pairs. Duplicates and stale entries are allowed.
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    heap: BinaryHeap<Reverse<(TimestampMs, Uuid)>>,
}

impl DeadlineQueue {
    /// Build an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deadline.
    pub fn push(&mut self, deadline: Deadline) {
        self.heap.push(Reverse((deadline.at, deadline.room_id)));
    }

    /// Earliest registered deadline.
    pub fn next_at(&self) -> Option<TimestampMs> {
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Remove every entry due at `now`, returning each room once.
    pub fn pop_due(&mut self, now: TimestampMs) -> Vec<Uuid> {
        let mut due = Vec::new();
        while let Some(Reverse((at, room_id))) = self.heap.peek().copied() {
            if at > now {
                break;
            }
            self.heap.pop();
            if !due.contains(&room_id) {
                due.push(room_id);
            }
        }
        due
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Deadlines carried by a stored room.
fn room_deadlines(room: &RoomEntity) -> impl Iterator<Item = Deadline> + use<> {
    let room_id = room.id;
    room.phase_ends_at
        .into_iter()
        .chain(room.pending_action.as_ref().map(|action| action.execute_at))
        .map(move |at| Deadline { room_id, at })
}

/// Reload deadlines from storage after startup or a storage outage.
async fn rearm(state: &SharedState, queue: &mut DeadlineQueue) {
    let Some(store) = state.room_store().await else {
        return;
    };

    match store.list_rooms_with_deadlines().await {
        Ok(rooms) => {
            for room in &rooms {
                for deadline in room_deadlines(room) {
                    queue.push(deadline);
                }
            }
            info!(rooms = rooms.len(), queued = queue.len(), "deadline scheduler re-armed");
        }
        Err(err) => warn!(error = %err, "failed to load room deadlines"),
    }
}

fn spawn_tick(state: &SharedState, room_id: Uuid) {
    let state = state.clone();
    tokio::spawn(async move {
        match room_controller::tick(&state, room_id).await {
            Ok(true) => debug!(room_id = %room_id, "deadline tick advanced room"),
            Ok(false) => debug!(room_id = %room_id, "deadline tick was a no-op"),
            Err(err) => warn!(room_id = %room_id, error = %err, "deadline tick failed"),
        }
    });
}

/// Run the scheduler until the deadline channel closes.
pub async fn run(state: SharedState) {
    let Some(mut receiver) = state.take_deadline_receiver().await else {
        warn!("deadline scheduler already running");
        return;
    };

    let mut degraded = state.degraded_watcher();
    let mut queue = DeadlineQueue::new();
    rearm(&state, &mut queue).await;

    loop {
        let now = state.now();
        for room_id in queue.pop_due(now) {
            spawn_tick(&state, room_id);
        }

        let wait = queue
            .next_at()
            .map(|at| Duration::from_millis((at - now).max(0) as u64))
            .unwrap_or(MAX_SLEEP)
            .min(MAX_SLEEP);

        tokio::select! {
            received = receiver.recv() => match received {
                Some(deadline) => queue.push(deadline),
                None => {
                    info!("deadline channel closed; scheduler stopping");
                    break;
                }
            },
            changed = degraded.changed() => {
                if changed.is_err() {
                    break;
                }
                let is_degraded = *degraded.borrow_and_update();
                if !is_degraded {
                    rearm(&state, &mut queue).await;
                }
            }
            _ = sleep(wait) => {}
        }
    }
}
