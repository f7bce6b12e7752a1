pub mod clock;
pub mod room;
mod sse;
pub mod state_machine;

use std::{future::Future, sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

use crate::{config::AppConfig, dao::room_store::RoomStore, error::ServiceError};

pub use self::sse::{RoomHubs, SseHub};
pub use self::state_machine::{AbortError, ApplyError, PlanError, PlanId};
use self::clock::{Clock, TimestampMs};

pub type SharedState = Arc<AppState>;
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);
const ROOM_CHANNEL_CAPACITY: usize = 32;

/// A room deadline handed to the deadline scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// Room to tick.
    pub room_id: Uuid,
    /// When to tick it.
    pub at: TimestampMs,
}

/// Central application state storing room hubs, gates and the storage handle.
pub struct AppState {
    room_store: RwLock<Option<Arc<dyn RoomStore>>>,
    degraded: watch::Sender<bool>,
    rooms: RoomHubs,
    room_gates: DashMap<Uuid, Arc<Mutex<()>>>,
    clock: Arc<dyn Clock>,
    config: AppConfig,
    deadlines: mpsc::UnboundedSender<Deadline>,
    deadline_rx: Mutex<Option<mpsc::UnboundedReceiver<Deadline>>>,
    transition_timeout: Option<Duration>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig, clock: Arc<dyn Clock>) -> SharedState {
        Arc::new(Self::build(config, clock, None))
    }

    /// Construct a state with `store` already installed.
    pub fn with_store(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn RoomStore>,
    ) -> SharedState {
        Arc::new(Self::build(config, clock, Some(store)))
    }

    fn build(config: AppConfig, clock: Arc<dyn Clock>, store: Option<Arc<dyn RoomStore>>) -> Self {
        let (degraded_tx, _rx) = watch::channel(store.is_none());
        let (deadline_tx, deadline_rx) = mpsc::unbounded_channel();
        Self {
            room_store: RwLock::new(store),
            degraded: degraded_tx,
            rooms: RoomHubs::new(ROOM_CHANNEL_CAPACITY),
            room_gates: DashMap::new(),
            clock,
            config,
            deadlines: deadline_tx,
            deadline_rx: Mutex::new(Some(deadline_rx)),
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
        }
    }

    /// Obtain a handle to the current room store, if one is installed.
    pub async fn room_store(&self) -> Option<Arc<dyn RoomStore>> {
        let guard = self.room_store.read().await;
        guard.as_ref().cloned()
    }

    /// Obtain the room store or fail with [`ServiceError::Degraded`].
    pub async fn require_room_store(&self) -> Result<Arc<dyn RoomStore>, ServiceError> {
        self.room_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new room store implementation and leave degraded mode.
    pub async fn set_room_store(&self, store: Arc<dyn RoomStore>) {
        {
            let mut guard = self.room_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current room store and enter degraded mode.
    pub async fn clear_room_store(&self) {
        {
            let mut guard = self.room_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        if *self.degraded.borrow() == value {
            return;
        }

        self.degraded.send_replace(value);
    }

    /// Per-room broadcast hubs backing the SSE streams.
    pub fn rooms(&self) -> &RoomHubs {
        &self.rooms
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Current server time.
    pub fn now(&self) -> TimestampMs {
        self.clock.now_ms()
    }

    /// Register a deadline with the background scheduler.
    pub fn schedule_deadline(&self, room_id: Uuid, at: TimestampMs) {
        if self.deadlines.send(Deadline { room_id, at }).is_err() {
            debug!(room_id = %room_id, "deadline scheduler stopped; deadline dropped");
        }
    }

    /// Hand the deadline receiver to the scheduler task. Returns `None` once taken.
    pub async fn take_deadline_receiver(&self) -> Option<mpsc::UnboundedReceiver<Deadline>> {
        self.deadline_rx.lock().await.take()
    }

    /// Forget the gate of a deleted room.
    pub fn forget_room(&self, room_id: Uuid) {
        self.room_gates.remove(&room_id);
        self.rooms.remove(room_id);
    }

    /// Run `work` while holding the room's gate, bounded by the transition timeout.
    ///
    /// Mutations of one room never interleave inside this process; storage
    /// compare-and-swap covers other processes.
    pub async fn with_room_gate<F, Fut, T>(&self, room_id: Uuid, work: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let gate = self.room_gates.entry(room_id).or_default().clone();
        let guarded = async {
            let _guard = gate.lock().await;
            work().await
        };

        match self.transition_timeout {
            Some(limit) => timeout(limit, guarded)
                .await
                .map_err(|_| ServiceError::Timeout)?,
            None => guarded.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dao::room_store::memory::InMemoryRoomStore, state::clock::ManualClock};

    #[tokio::test]
    async fn degraded_until_store_installed() {
        let state = AppState::new(AppConfig::default(), Arc::new(ManualClock::new(0)));
        let mut watcher = state.degraded_watcher();
        assert!(state.is_degraded().await);
        assert!(matches!(
            state.require_room_store().await,
            Err(ServiceError::Degraded)
        ));

        state
            .set_room_store(Arc::new(InMemoryRoomStore::new()))
            .await;
        assert!(!state.is_degraded().await);
        assert!(watcher.has_changed().expect("sender alive"));
        assert!(!*watcher.borrow_and_update());
    }

    #[tokio::test]
    async fn room_gate_serializes_work() {
        let state = AppState::with_store(
            AppConfig::default(),
            Arc::new(ManualClock::new(0)),
            Arc::new(InMemoryRoomStore::new()),
        );
        let room_id = Uuid::new_v4();
        let counter = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let state = state.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                state
                    .with_room_gate(room_id, || async move {
                        counter.lock().await.push(i);
                        tokio::task::yield_now().await;
                        counter.lock().await.push(i);
                        Ok::<_, ServiceError>(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("gate work");
        }

        let seen = counter.lock().await;
        for pair in seen.chunks(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }

    #[tokio::test]
    async fn deadline_receiver_is_taken_once() {
        let state = AppState::new(AppConfig::default(), Arc::new(ManualClock::new(0)));
        let mut rx = state.take_deadline_receiver().await.expect("first take");
        assert!(state.take_deadline_receiver().await.is_none());

        let room_id = Uuid::new_v4();
        state.schedule_deadline(room_id, 42);
        assert_eq!(rx.recv().await, Some(Deadline { room_id, at: 42 }));
    }
}
