//! Command, query and event handlers of the membership context.

use async_trait::async_trait;
use common::AggregateId;
use domain::AggregateRoot;
use processor::{
    Context, Handler, ProcessingError, QueryHandler, Requirements, Result, Unauthorized,
};

use crate::commands::{
    AcceptFriendRequest, DeclineFriendRequest, FindUserByName, FriendRequestView,
    GetFriendRequest, GetUser, RegisterUser, RenameUser, SendFriendRequest, UserView,
};
use crate::directory::RegisteredNames;
use crate::friend_request::{FriendRequest, FriendRequestEvent};
use crate::user::{User, UserEvent};

/// The user the principal is signed in as.
fn signed_in(ctx: &Context) -> Result<AggregateId> {
    ctx.principal().subject().ok_or_else(|| {
        Unauthorized::Denied("principal is not bound to a user".to_string()).into()
    })
}

/// Registers a user if the name is free.
pub struct RegisterUserHandler;

#[async_trait]
impl Handler<RegisterUser> for RegisterUserHandler {
    async fn handle(&self, cmd: &RegisterUser, ctx: &mut Context) -> Result<()> {
        let names = ctx.resolve::<RegisteredNames>()?;
        let name = cmd.name.trim();
        let user = AggregateRoot::create_with(cmd.user_id, |state: &User| {
            state.register(cmd.user_id, name, &names)
        })?;
        ctx.repository::<User>().add(user).await?;
        tracing::debug!(user_id = %cmd.user_id, name, "user registered");
        Ok(())
    }
}

/// Renames the signed-in user.
pub struct RenameUserHandler;

#[async_trait]
impl Handler<RenameUser> for RenameUserHandler {
    async fn handle(&self, cmd: &RenameUser, ctx: &mut Context) -> Result<()> {
        let user_id = signed_in(ctx)?;
        let names = ctx.resolve::<RegisteredNames>()?;
        let user = ctx.repository::<User>().load(user_id).await?;
        let name = cmd.name.trim();
        user.lock().await.execute(|state| state.rename(name, &names))?;
        Ok(())
    }

    fn requirements(&self) -> Requirements {
        Requirements::authenticated()
    }
}

/// Sends a request from the signed-in user.
pub struct SendFriendRequestHandler;

#[async_trait]
impl Handler<SendFriendRequest> for SendFriendRequestHandler {
    async fn handle(&self, cmd: &SendFriendRequest, ctx: &mut Context) -> Result<()> {
        let sender = signed_in(ctx)?;
        let users = ctx.repository::<User>();
        let friends = users.load(sender).await?.lock().await.state().friends().clone();
        users.load(cmd.receiver).await?;

        let request = AggregateRoot::create_with(cmd.request_id, |_: &FriendRequest| {
            FriendRequest::send(sender, cmd.receiver, &friends)
        })?;
        ctx.repository::<FriendRequest>().add(request).await?;
        Ok(())
    }

    fn requirements(&self) -> Requirements {
        Requirements::authenticated()
    }
}

/// Accepts a request as its receiver.
pub struct AcceptFriendRequestHandler;

#[async_trait]
impl Handler<AcceptFriendRequest> for AcceptFriendRequestHandler {
    async fn handle(&self, cmd: &AcceptFriendRequest, ctx: &mut Context) -> Result<()> {
        let by = signed_in(ctx)?;
        let friends = ctx
            .repository::<User>()
            .load(by)
            .await?
            .lock()
            .await
            .state()
            .friends()
            .clone();
        let request = ctx
            .repository::<FriendRequest>()
            .load(cmd.request_id)
            .await?;
        request
            .lock()
            .await
            .execute(|state| state.accept(by, &friends))?;
        Ok(())
    }

    fn requirements(&self) -> Requirements {
        Requirements::authenticated()
    }
}

/// Declines a request as its receiver.
pub struct DeclineFriendRequestHandler;

#[async_trait]
impl Handler<DeclineFriendRequest> for DeclineFriendRequestHandler {
    async fn handle(&self, cmd: &DeclineFriendRequest, ctx: &mut Context) -> Result<()> {
        let by = signed_in(ctx)?;
        let request = ctx
            .repository::<FriendRequest>()
            .load(cmd.request_id)
            .await?;
        request.lock().await.execute(|state| state.decline(by))?;
        Ok(())
    }

    fn requirements(&self) -> Requirements {
        Requirements::authenticated()
    }
}

/// Answers [`GetUser`].
pub struct GetUserHandler;

#[async_trait]
impl QueryHandler<GetUser> for GetUserHandler {
    async fn handle(&self, query: &GetUser, ctx: &mut Context) -> Result<UserView> {
        let user = ctx.repository::<User>().load(query.user_id).await?;
        let user = user.lock().await;
        Ok(UserView {
            user_id: user.id(),
            name: user.state().name().to_string(),
            friends: user.state().friends().iter().copied().collect(),
            version: user.version(),
        })
    }
}

/// Answers [`FindUserByName`] from the name directory.
pub struct FindUserByNameHandler;

#[async_trait]
impl QueryHandler<FindUserByName> for FindUserByNameHandler {
    async fn handle(
        &self,
        query: &FindUserByName,
        ctx: &mut Context,
    ) -> Result<Option<AggregateId>> {
        Ok(ctx.resolve::<RegisteredNames>()?.owner(&query.name))
    }
}

/// Answers [`GetFriendRequest`].
pub struct GetFriendRequestHandler;

#[async_trait]
impl QueryHandler<GetFriendRequest> for GetFriendRequestHandler {
    async fn handle(
        &self,
        query: &GetFriendRequest,
        ctx: &mut Context,
    ) -> Result<FriendRequestView> {
        let request = ctx
            .repository::<FriendRequest>()
            .load(query.request_id)
            .await?;
        let request = request.lock().await;
        let state = request.state();
        let (Some(sender), Some(receiver)) = (state.sender(), state.receiver()) else {
            return Err(ProcessingError::NotFound {
                aggregate_type: "FriendRequest",
                aggregate_id: query.request_id,
            });
        };
        Ok(FriendRequestView {
            request_id: request.id(),
            sender,
            receiver,
            status: state.status(),
            version: request.version(),
        })
    }
}

/// Keeps the name directory in step with stored user events.
pub struct NameIndexer;

#[async_trait]
impl Handler<UserEvent> for NameIndexer {
    async fn handle(&self, event: &UserEvent, ctx: &mut Context) -> Result<()> {
        ctx.resolve::<RegisteredNames>()?.apply(event);
        Ok(())
    }
}

/// Makes both parties of an accepted request friends of each other.
///
/// A side that already lists the other as a friend is left as it is.
pub struct Befriend;

#[async_trait]
impl Handler<FriendRequestEvent> for Befriend {
    async fn handle(&self, event: &FriendRequestEvent, ctx: &mut Context) -> Result<()> {
        let FriendRequestEvent::Accepted { sender, receiver } = *event else {
            return Ok(());
        };
        let users = ctx.repository::<User>();
        for (user_id, friend) in [(sender, receiver), (receiver, sender)] {
            let user = users.load(user_id).await?;
            let mut user = user.lock().await;
            if user.state().friends().contains(&friend) {
                continue;
            }
            user.execute(|state| state.add_friend(friend))?;
        }
        Ok(())
    }
}
