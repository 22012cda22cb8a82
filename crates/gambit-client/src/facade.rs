//! Typed game actions.
//!
//! Every method fails with [`ClientError::NotConnected`] and writes nothing
//! when the session is not connected. Nothing is queued or retried.

use gambit_core::game::GameId;
use gambit_core::net::messages::{
    AuthenticateMsg, AuthenticatedMsg, ClientMessage, GameInfoMsg, GameRefMsg, JoinGameMsg,
    JoinMatchmakingMsg, MakeMoveMsg, SendChatMsg, ServerMessage, TimestampMsg,
};
use gambit_core::player::PlayerIdentity;
use gambit_core::time::unix_millis;

use crate::error::ClientError;
use crate::manager::ConnectionManager;
use crate::requests::Expectation;

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ConnectionManager {
    pub fn authenticate(&self, identity: PlayerIdentity) -> Result<(), ClientError> {
        self.send(&ClientMessage::Authenticate(AuthenticateMsg {
            identity,
            request_id: None,
        }))
    }

    /// Authenticate and wait for the server's verdict.
    pub async fn authenticate_and_wait(
        &self,
        identity: PlayerIdentity,
    ) -> Result<AuthenticatedMsg, ClientError> {
        let request_id = new_request_id();
        let msg = ClientMessage::Authenticate(AuthenticateMsg {
            identity,
            request_id: Some(request_id.clone()),
        });
        match self
            .request(msg, request_id, Expectation::AUTHENTICATE, None)
            .await?
        {
            ServerMessage::Authenticated(reply) => Ok(reply),
            other => Err(ClientError::Rejected(other.event_name().to_string())),
        }
    }

    pub fn join_matchmaking(&self, request: JoinMatchmakingMsg) -> Result<(), ClientError> {
        self.send(&ClientMessage::JoinMatchmaking(request))
    }

    pub fn leave_matchmaking(&self) -> Result<(), ClientError> {
        self.send(&ClientMessage::LeaveMatchmaking)
    }

    pub fn make_move(&self, request: MakeMoveMsg) -> Result<(), ClientError> {
        self.send(&ClientMessage::MakeMove(request))
    }

    pub fn offer_draw(&self, game_id: impl Into<GameId>) -> Result<(), ClientError> {
        self.send(&ClientMessage::OfferDraw(GameRefMsg::new(game_id)))
    }

    pub fn accept_draw(&self, game_id: impl Into<GameId>) -> Result<(), ClientError> {
        self.send(&ClientMessage::AcceptDraw(GameRefMsg::new(game_id)))
    }

    pub fn decline_draw(&self, game_id: impl Into<GameId>) -> Result<(), ClientError> {
        self.send(&ClientMessage::DeclineDraw(GameRefMsg::new(game_id)))
    }

    /// Sent as `resign_game`, or `resign` when `protocol.resign_event` says so.
    pub fn resign_game(&self, game_id: impl Into<GameId>) -> Result<(), ClientError> {
        self.send(&ClientMessage::ResignGame(GameRefMsg::new(game_id)))
    }

    pub fn join_game_as_spectator(&self, game_id: impl Into<GameId>) -> Result<(), ClientError> {
        self.send(&ClientMessage::JoinGameAsSpectator(GameRefMsg::new(game_id)))
    }

    pub fn leave_game_as_spectator(&self, game_id: impl Into<GameId>) -> Result<(), ClientError> {
        self.send(&ClientMessage::LeaveGameAsSpectator(GameRefMsg::new(game_id)))
    }

    pub fn send_chat_message(
        &self,
        game_id: impl Into<GameId>,
        message: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send(&ClientMessage::SendChatMessage(SendChatMsg {
            game_id: game_id.into(),
            message: message.into(),
        }))
    }

    /// (Re)join a game in progress and wait for its `game_started` state.
    pub async fn join_game(&self, game_id: impl Into<GameId>) -> Result<GameInfoMsg, ClientError> {
        let game_id = game_id.into();
        let request_id = new_request_id();
        let msg = ClientMessage::JoinGame(JoinGameMsg {
            game_id: game_id.clone(),
            request_id: Some(request_id.clone()),
        });
        match self
            .request(msg, request_id, Expectation::JOIN_GAME, Some(game_id))
            .await?
        {
            ServerMessage::GameStarted(info) => Ok(info),
            other => Err(ClientError::Rejected(other.event_name().to_string())),
        }
    }

    /// Application-level ping; the `pong` reply updates measured latency.
    pub fn ping(&self) -> Result<(), ClientError> {
        self.send(&ClientMessage::Ping(TimestampMsg {
            timestamp: unix_millis(),
        }))
    }
}
