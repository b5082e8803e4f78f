//! The friend request aggregate.
//!
//! A request is sent by one user to another and then either accepted or
//! declined by its receiver, exactly once.

use std::collections::BTreeSet;
use std::fmt;

use common::AggregateId;
use domain::{AggregateState, ConfigurationError, DomainEvent, Message, SnapshotCapable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Events of a friend request. Each carries both parties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FriendRequestEvent {
    Sent {
        sender: AggregateId,
        receiver: AggregateId,
    },
    Accepted {
        sender: AggregateId,
        receiver: AggregateId,
    },
    Declined {
        sender: AggregateId,
        receiver: AggregateId,
    },
}

impl Message for FriendRequestEvent {
    fn message_type(&self) -> &'static str {
        self.event_type()
    }
}

impl DomainEvent for FriendRequestEvent {
    fn event_type(&self) -> &'static str {
        match self {
            FriendRequestEvent::Sent { .. } => "FriendRequestSent",
            FriendRequestEvent::Accepted { .. } => "FriendRequestAccepted",
            FriendRequestEvent::Declined { .. } => "FriendRequestDeclined",
        }
    }
}

/// Where a request stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Accepted => write!(f, "accepted"),
            RequestStatus::Declined => write!(f, "declined"),
        }
    }
}

/// Rules a friend request operation can break.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FriendRequestError {
    #[error("a user cannot send a friend request to themselves")]
    SelfRequest,

    #[error("only the receiver may answer a friend request")]
    NotReceiver,

    #[error("friend request is already {0}")]
    NotPending(RequestStatus),

    #[error("friend request was never sent")]
    NotSent,

    #[error("{0} is already a friend")]
    AlreadyFriends(AggregateId),
}

/// A request from one user to another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequest {
    parties: Option<(AggregateId, AggregateId)>,
    status: RequestStatus,
}

impl FriendRequest {
    /// The requesting user, once sent.
    pub fn sender(&self) -> Option<AggregateId> {
        self.parties.map(|(sender, _)| sender)
    }

    /// The user asked to answer, once sent.
    pub fn receiver(&self) -> Option<AggregateId> {
        self.parties.map(|(_, receiver)| receiver)
    }

    /// Where the request stands.
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Opens a request from `sender`, whose current friends are
    /// `sender_friends`, to `receiver`.
    pub fn send(
        sender: AggregateId,
        receiver: AggregateId,
        sender_friends: &BTreeSet<AggregateId>,
    ) -> Result<Vec<FriendRequestEvent>, FriendRequestError> {
        if sender == receiver {
            return Err(FriendRequestError::SelfRequest);
        }
        if sender_friends.contains(&receiver) {
            return Err(FriendRequestError::AlreadyFriends(receiver));
        }
        Ok(vec![FriendRequestEvent::Sent { sender, receiver }])
    }

    /// Accepts the request on behalf of `by`, whose current friends are
    /// `receiver_friends`.
    ///
    /// A second request between the same pair may still be pending after the
    /// first was accepted; it is refused here rather than after the
    /// acceptance is stored.
    pub fn accept(
        &self,
        by: AggregateId,
        receiver_friends: &BTreeSet<AggregateId>,
    ) -> Result<Vec<FriendRequestEvent>, FriendRequestError> {
        let (sender, receiver) = self.answerable_by(by)?;
        if receiver_friends.contains(&sender) {
            return Err(FriendRequestError::AlreadyFriends(sender));
        }
        Ok(vec![FriendRequestEvent::Accepted { sender, receiver }])
    }

    /// Declines the request on behalf of `by`.
    pub fn decline(&self, by: AggregateId) -> Result<Vec<FriendRequestEvent>, FriendRequestError> {
        let (sender, receiver) = self.answerable_by(by)?;
        Ok(vec![FriendRequestEvent::Declined { sender, receiver }])
    }

    fn answerable_by(
        &self,
        by: AggregateId,
    ) -> Result<(AggregateId, AggregateId), FriendRequestError> {
        let (sender, receiver) = self.parties.ok_or(FriendRequestError::NotSent)?;
        if by != receiver {
            return Err(FriendRequestError::NotReceiver);
        }
        if self.status != RequestStatus::Pending {
            return Err(FriendRequestError::NotPending(self.status));
        }
        Ok((sender, receiver))
    }
}

impl AggregateState for FriendRequest {
    type Event = FriendRequestEvent;
    type Error = FriendRequestError;

    fn aggregate_type() -> &'static str {
        "FriendRequest"
    }

    fn apply(&mut self, event: &FriendRequestEvent) -> Result<(), ConfigurationError> {
        match event {
            FriendRequestEvent::Sent { sender, receiver } => {
                self.parties = Some((*sender, *receiver));
                self.status = RequestStatus::Pending;
            }
            FriendRequestEvent::Accepted { .. } => self.status = RequestStatus::Accepted,
            FriendRequestEvent::Declined { .. } => self.status = RequestStatus::Declined,
        }
        Ok(())
    }
}

impl SnapshotCapable for FriendRequest {}
