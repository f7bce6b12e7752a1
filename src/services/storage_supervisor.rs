//! Keeps a room store installed in [`AppState`](crate::state::AppState).

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{room_store::RoomStore, storage::StorageError},
    state::SharedState,
};

/// Timings of the connect, watch and reconnect cycle.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorPolicy {
    /// First backoff delay, doubled after each failure.
    pub initial_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Pause between health checks of a healthy store.
    pub health_poll: Duration,
    /// `try_reconnect` attempts before the store is dropped.
    pub reconnect_attempts: u32,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            health_poll: Duration::from_secs(5),
            reconnect_attempts: 3,
        }
    }
}

impl SupervisorPolicy {
    fn backoff(&self, delay: Duration) -> Duration {
        (delay * 2).min(self.max_delay)
    }
}

/// Run [`run_with`] with the default policy.
pub async fn run<F, Fut>(state: SharedState, connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RoomStore>, StorageError>> + Send,
{
    run_with(state, connect, SupervisorPolicy::default()).await
}

/// Connect, install the store and watch it forever.
///
/// A store that stays unreachable after every reconnect attempt is removed from
/// the state, so requests fail with `DEGRADED` until a fresh connection lands.
pub async fn run_with<F, Fut>(state: SharedState, mut connect: F, policy: SupervisorPolicy)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RoomStore>, StorageError>> + Send,
{
    let mut delay = policy.initial_delay;

    loop {
        let store = match connect().await {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = policy.backoff(delay);
                continue;
            }
        };

        state.set_room_store(store.clone()).await;
        info!("storage connection established; leaving degraded mode");
        delay = policy.initial_delay;

        watch_store(&state, store.as_ref(), &policy).await;

        state.clear_room_store().await;
        warn!("storage dropped after failed reconnects; connecting from scratch");
        sleep(delay).await;
    }
}

/// Poll `store` until it is lost for good.
async fn watch_store(state: &SharedState, store: &dyn RoomStore, policy: &SupervisorPolicy) {
    loop {
        match store.health_check().await {
            Ok(()) => sleep(policy.health_poll).await,
            Err(err) => {
                warn!(error = %err, "storage health check failed; entering degraded mode");
                state.update_degraded(true).await;
                if !revive(store, policy).await {
                    return;
                }
                info!("storage reconnected; leaving degraded mode");
                state.update_degraded(false).await;
            }
        }
    }
}

/// Try to reconnect with exponential backoff. Returns whether it worked.
async fn revive(store: &dyn RoomStore, policy: &SupervisorPolicy) -> bool {
    let mut delay = policy.initial_delay;
    for attempt in 1..=policy.reconnect_attempts {
        match store.try_reconnect().await {
            Ok(()) => return true,
            Err(err) => {
                warn!(attempt, error = %err, "storage reconnect attempt failed");
                sleep(delay).await;
                delay = policy.backoff(delay);
            }
        }
    }
    false
}
