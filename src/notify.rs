use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::DomainEvent;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Receiver of appointment events. Delivery is fire-and-forget: the engine
/// logs a failed dispatch and keeps the committed change.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, event: &DomainEvent) -> Result<(), DispatchError>;
}

/// Broadcast hub: one channel per professional plus a firehose of everything.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<DomainEvent>>,
    all: broadcast::Sender<DomainEvent>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Events for one professional's calendar. Creates the channel if needed.
    pub fn subscribe(&self, professional_id: Ulid) -> broadcast::Receiver<DomainEvent> {
        self.channels
            .entry(professional_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<DomainEvent> {
        self.all.subscribe()
    }

    pub fn unsubscribe_all(&self, professional_id: &Ulid) {
        self.channels.remove(professional_id);
    }
}

impl NotificationDispatcher for NotifyHub {
    /// No-op if nobody is listening.
    fn dispatch(&self, event: &DomainEvent) -> Result<(), DispatchError> {
        if let Some(sender) = self.channels.get(&event.professional_id()) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event.clone());
        Ok(())
    }
}
