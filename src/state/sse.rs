use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dto::sse::ServerEvent;

/// Per-room broadcast hubs, created on first use.
pub struct RoomHubs {
    hubs: DashMap<Uuid, SseHub>,
    capacity: usize,
}

impl RoomHubs {
    /// Build an empty registry whose hubs use `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            hubs: DashMap::new(),
            capacity,
        }
    }

    /// Subscribe to the events of `room_id`.
    pub fn subscribe(&self, room_id: Uuid) -> broadcast::Receiver<ServerEvent> {
        self.hubs
            .entry(room_id)
            .or_insert_with(|| SseHub::new(self.capacity))
            .subscribe()
    }

    /// Send an event to subscribers of `room_id`. Rooms nobody listens to are skipped.
    pub fn broadcast(&self, room_id: Uuid, event: ServerEvent) {
        if let Some(hub) = self.hubs.get(&room_id) {
            hub.broadcast(event);
        }
    }

    /// Drop the hub of a deleted room, closing its streams.
    pub fn remove(&self, room_id: Uuid) {
        self.hubs.remove(&room_id);
    }

    /// Drop hubs without subscribers.
    pub fn prune(&self) {
        self.hubs.retain(|_, hub| hub.receiver_count() > 0);
    }
}

/// Simple broadcast hub wrapper used by the SSE services.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }

    fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
