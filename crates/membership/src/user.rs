//! The user aggregate.

use std::collections::BTreeSet;

use common::AggregateId;
use domain::{AggregateState, ConfigurationError, DomainEvent, Message, SnapshotCapable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::directory::RegisteredNames;

/// Longest accepted user name, in characters.
pub const MAX_NAME_LEN: usize = 64;

/// Events of a user. Each carries the user id for event handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum UserEvent {
    Registered { user_id: AggregateId, name: String },
    Renamed {
        user_id: AggregateId,
        from: String,
        to: String,
    },
    FriendAdded {
        user_id: AggregateId,
        friend: AggregateId,
    },
}

impl Message for UserEvent {
    fn message_type(&self) -> &'static str {
        self.event_type()
    }
}

impl DomainEvent for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::Registered { .. } => "UserRegistered",
            UserEvent::Renamed { .. } => "UserRenamed",
            UserEvent::FriendAdded { .. } => "FriendAdded",
        }
    }
}

/// Rules a user operation can break.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserError {
    #[error("name {0:?} is already registered")]
    NameTaken(String),

    #[error("user is already named {0:?}")]
    SameName(String),

    #[error("user is not registered")]
    NotRegistered,

    #[error("{0} is already a friend")]
    AlreadyFriends(AggregateId),

    #[error("a user cannot befriend themselves")]
    SelfFriendship,
}

/// A registered member and their friends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    id: Option<AggregateId>,
    name: String,
    friends: BTreeSet<AggregateId>,
}

impl User {
    /// Current name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ids of the users this user is friends with.
    pub fn friends(&self) -> &BTreeSet<AggregateId> {
        &self.friends
    }

    pub fn is_registered(&self) -> bool {
        self.id.is_some()
    }

    /// Registers under `name` unless another user holds it.
    pub fn register(
        &self,
        user_id: AggregateId,
        name: &str,
        names: &RegisteredNames,
    ) -> Result<Vec<UserEvent>, UserError> {
        if names.is_taken(name) {
            return Err(UserError::NameTaken(name.to_string()));
        }
        Ok(vec![UserEvent::Registered {
            user_id,
            name: name.to_string(),
        }])
    }

    /// Renames to `name` unless another user holds it.
    pub fn rename(&self, name: &str, names: &RegisteredNames) -> Result<Vec<UserEvent>, UserError> {
        let user_id = self.id.ok_or(UserError::NotRegistered)?;
        if self.name == name {
            return Err(UserError::SameName(name.to_string()));
        }
        if names.owner(name).is_some_and(|owner| owner != user_id) {
            return Err(UserError::NameTaken(name.to_string()));
        }
        Ok(vec![UserEvent::Renamed {
            user_id,
            from: self.name.clone(),
            to: name.to_string(),
        }])
    }

    /// Adds `friend` unless already present.
    pub fn add_friend(&self, friend: AggregateId) -> Result<Vec<UserEvent>, UserError> {
        let user_id = self.id.ok_or(UserError::NotRegistered)?;
        if friend == user_id {
            return Err(UserError::SelfFriendship);
        }
        if self.friends.contains(&friend) {
            return Err(UserError::AlreadyFriends(friend));
        }
        Ok(vec![UserEvent::FriendAdded { user_id, friend }])
    }
}

impl AggregateState for User {
    type Event = UserEvent;
    type Error = UserError;

    fn aggregate_type() -> &'static str {
        "User"
    }

    fn apply(&mut self, event: &UserEvent) -> Result<(), ConfigurationError> {
        match event {
            UserEvent::Registered { user_id, name } => {
                self.id = Some(*user_id);
                self.name = name.clone();
            }
            UserEvent::Renamed { to, .. } => self.name = to.clone(),
            UserEvent::FriendAdded { friend, .. } => {
                self.friends.insert(*friend);
            }
        }
        Ok(())
    }
}

impl SnapshotCapable for User {
    fn snapshot_interval() -> i64 {
        50
    }
}
