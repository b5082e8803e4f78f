//! Membership: users and the friend requests between them.
//!
//! A small bounded context built on the processor. Users register under a
//! unique name and may rename themselves; friend requests are sent by one
//! user and answered by the other. Accepting a request makes both users
//! friends in the same unit of work.
//!
//! ```ignore
//! let names = RegisteredNames::rebuild(store.as_ref()).await?;
//! let dispatcher = membership::install(Dispatcher::builder(store), names).build()?;
//! dispatcher.dispatch(RegisterUser::new(AggregateId::new(), "John")).await?;
//! ```

pub mod commands;
pub mod directory;
pub mod friend_request;
pub mod handlers;
pub mod user;

pub use commands::{
    AcceptFriendRequest, DeclineFriendRequest, FindUserByName, FriendRequestView,
    GetFriendRequest, GetUser, RegisterUser, RenameUser, SendFriendRequest, UserView,
};
pub use directory::RegisteredNames;
pub use friend_request::{FriendRequest, FriendRequestError, FriendRequestEvent, RequestStatus};
pub use user::{User, UserError, UserEvent};

use processor::{DispatcherBuilder, Lifetime};

use handlers::{
    AcceptFriendRequestHandler, Befriend, DeclineFriendRequestHandler, FindUserByNameHandler,
    GetFriendRequestHandler, GetUserHandler, NameIndexer, RegisterUserHandler, RenameUserHandler,
    SendFriendRequestHandler,
};

/// Registers every membership handler, with `names` as the shared name
/// directory.
pub fn install(builder: DispatcherBuilder, names: RegisteredNames) -> DispatcherBuilder {
    builder
        .register_dependency(Lifetime::Singleton, move || names.clone())
        .register_handler(RegisterUserHandler)
        .register_handler(RenameUserHandler)
        .register_handler(SendFriendRequestHandler)
        .register_handler(AcceptFriendRequestHandler)
        .register_handler(DeclineFriendRequestHandler)
        .register_query_handler(GetUserHandler)
        .register_query_handler(FindUserByNameHandler)
        .register_query_handler(GetFriendRequestHandler)
        .register_event_handler(NameIndexer)
        .register_event_handler(Befriend)
}
