//! Commands and queries of the membership context.

use common::AggregateId;
use domain::{Message, Query, ValidationErrors};
use event_store::Version;

use crate::friend_request::RequestStatus;
use crate::user::MAX_NAME_LEN;

fn check_name(errors: &mut ValidationErrors, name: &str) {
    errors.check(!name.trim().is_empty(), "name", "must not be empty");
    errors.check(
        name.chars().count() <= MAX_NAME_LEN,
        "name",
        "must be at most 64 characters",
    );
}

/// Registers a new user under a unique name.
#[derive(Debug, Clone)]
pub struct RegisterUser {
    pub user_id: AggregateId,
    pub name: String,
}

impl RegisterUser {
    /// Registers `name` under `user_id`.
    pub fn new(user_id: AggregateId, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
        }
    }
}

impl Message for RegisterUser {
    fn message_type(&self) -> &'static str {
        "RegisterUser"
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_name(&mut errors, &self.name);
        errors.into_result()
    }
}

/// Renames the signed-in user.
#[derive(Debug, Clone)]
pub struct RenameUser {
    pub name: String,
}

impl RenameUser {
    /// Renames the signed-in user to `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Message for RenameUser {
    fn message_type(&self) -> &'static str {
        "RenameUser"
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_name(&mut errors, &self.name);
        errors.into_result()
    }
}

/// Sends a friend request from the signed-in user to `receiver`.
#[derive(Debug, Clone)]
pub struct SendFriendRequest {
    pub request_id: AggregateId,
    pub receiver: AggregateId,
}

impl SendFriendRequest {
    /// A request to `receiver` under a fresh id.
    pub fn to(receiver: AggregateId) -> Self {
        Self {
            request_id: AggregateId::new(),
            receiver,
        }
    }
}

impl Message for SendFriendRequest {
    fn message_type(&self) -> &'static str {
        "SendFriendRequest"
    }
}

/// Accepts a pending request. Only its receiver may.
#[derive(Debug, Clone)]
pub struct AcceptFriendRequest {
    pub request_id: AggregateId,
}

impl Message for AcceptFriendRequest {
    fn message_type(&self) -> &'static str {
        "AcceptFriendRequest"
    }
}

/// Declines a pending request. Only its receiver may.
#[derive(Debug, Clone)]
pub struct DeclineFriendRequest {
    pub request_id: AggregateId,
}

impl Message for DeclineFriendRequest {
    fn message_type(&self) -> &'static str {
        "DeclineFriendRequest"
    }
}

/// A user as seen by queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserView {
    pub user_id: AggregateId,
    pub name: String,
    pub friends: Vec<AggregateId>,
    pub version: Version,
}

/// Reads one user.
#[derive(Debug, Clone)]
pub struct GetUser {
    pub user_id: AggregateId,
}

impl Message for GetUser {
    fn message_type(&self) -> &'static str {
        "GetUser"
    }
}

impl Query for GetUser {
    type Output = UserView;
}

/// Looks a user up by name in the directory.
#[derive(Debug, Clone)]
pub struct FindUserByName {
    pub name: String,
}

impl Message for FindUserByName {
    fn message_type(&self) -> &'static str {
        "FindUserByName"
    }
}

impl Query for FindUserByName {
    type Output = Option<AggregateId>;
}

/// A friend request as seen by queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendRequestView {
    pub request_id: AggregateId,
    pub sender: AggregateId,
    pub receiver: AggregateId,
    pub status: RequestStatus,
    pub version: Version,
}

/// Reads one friend request.
#[derive(Debug, Clone)]
pub struct GetFriendRequest {
    pub request_id: AggregateId,
}

impl Message for GetFriendRequest {
    fn message_type(&self) -> &'static str {
        "GetFriendRequest"
    }
}

impl Query for GetFriendRequest {
    type Output = FriendRequestView;
}
