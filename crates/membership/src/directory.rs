//! In-memory index of registered user names.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use common::AggregateId;
use domain::AggregateState;
use event_store::{EventStore, EventStoreError};
use futures_util::TryStreamExt;

use crate::user::{User, UserEvent};

/// Which user owns each name. Names compare case-insensitively.
///
/// Clones share the same index, so the copy held by the dispatcher and the
/// one held by the host always agree.
#[derive(Debug, Clone, Default)]
pub struct RegisteredNames {
    names: Arc<RwLock<HashMap<String, AggregateId>>>,
}

fn key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl RegisteredNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays every stored user event into a fresh index.
    #[tracing::instrument(skip(store))]
    pub async fn rebuild(store: &dyn EventStore) -> Result<Self, EventStoreError> {
        let names = Self::new();
        let mut events = store.stream_all().await?;
        while let Some(record) = events.try_next().await? {
            if record.aggregate_type != User::aggregate_type() {
                continue;
            }
            names.apply(&record.decode::<UserEvent>()?);
        }
        tracing::info!(names = names.len(), "name directory rebuilt");
        Ok(names)
    }

    /// True when any user holds `name`.
    pub fn is_taken(&self, name: &str) -> bool {
        self.owner(name).is_some()
    }

    /// The user holding `name`, if any.
    pub fn owner(&self, name: &str) -> Option<AggregateId> {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key(name))
            .copied()
    }

    /// Records `name` as held by `user_id`.
    pub fn claim(&self, name: &str, user_id: AggregateId) {
        self.names
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key(name), user_id);
    }

    /// Frees `name` if `user_id` holds it.
    pub fn release(&self, name: &str, user_id: AggregateId) {
        let mut names = self.names.write().unwrap_or_else(PoisonError::into_inner);
        if names.get(&key(name)) == Some(&user_id) {
            names.remove(&key(name));
        }
    }

    /// Follows a stored user event.
    pub fn apply(&self, event: &UserEvent) {
        match event {
            UserEvent::Registered { user_id, name } => self.claim(name, *user_id),
            UserEvent::Renamed { user_id, from, to } => {
                self.release(from, *user_id);
                self.claim(to, *user_id);
            }
            UserEvent::FriendAdded { .. } => {}
        }
    }

    pub fn len(&self) -> usize {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
