use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::debug;

use crate::entity::{FeedEntity, ListId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewedEvent {
    pub list_id: ListId,
    pub urn: String,
    pub medium: Option<String>,
    pub position: usize,
}

/// Remembers which entities of a list were already reported as viewed.
#[derive(Debug)]
pub struct Viewed {
    list_id: ListId,
    seen: Mutex<HashSet<String>>,
    tx: broadcast::Sender<ViewedEvent>,
}

impl Viewed {
    pub(crate) fn new(list_id: ListId) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            list_id,
            seen: Mutex::new(HashSet::new()),
            tx,
        }
    }

    /// Returns `false` when the entity had already been reported.
    pub fn add_viewed(
        &self,
        entity: &FeedEntity,
        medium: Option<&str>,
        position: Option<usize>,
    ) -> bool {
        let key = entity.key();
        let inserted = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        if !inserted {
            return false;
        }
        let event = ViewedEvent {
            list_id: self.list_id,
            urn: entity.urn.clone(),
            medium: medium.map(ToOwned::to_owned),
            position: position.unwrap_or(entity.position),
        };
        if self.tx.send(event).is_err() {
            debug!(urn = %entity.urn, "no viewed subscribers");
        }
        true
    }

    pub fn is_viewed(&self, key: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    pub fn clear_viewed(&self) {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewedEvent> {
        self.tx.subscribe()
    }
}
