use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::game::{ColorPreference, GameId, MoveDescriptor, PieceColor, RatingRange, TimeControl};
use crate::player::{PlayerIdentity, PlayerSummary};

/// Server fields this client has no typed slot for.
pub type Extra = Map<String, Value>;

// ================================================================
// Client -> Server
// ================================================================

/// Every message the client may send. Serialized adjacently tagged so the
/// tag is the Socket.IO event name and the content is its argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate(AuthenticateMsg),
    JoinMatchmaking(JoinMatchmakingMsg),
    LeaveMatchmaking,
    MakeMove(MakeMoveMsg),
    OfferDraw(GameRefMsg),
    AcceptDraw(GameRefMsg),
    DeclineDraw(GameRefMsg),
    ResignGame(GameRefMsg),
    JoinGameAsSpectator(GameRefMsg),
    LeaveGameAsSpectator(GameRefMsg),
    SendChatMessage(SendChatMsg),
    JoinGame(JoinGameMsg),
    Ping(TimestampMsg),
    HeartbeatAck(TimestampMsg),
}

impl ClientMessage {
    /// Wire event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Authenticate(_) => "authenticate",
            Self::JoinMatchmaking(_) => "join_matchmaking",
            Self::LeaveMatchmaking => "leave_matchmaking",
            Self::MakeMove(_) => "make_move",
            Self::OfferDraw(_) => "offer_draw",
            Self::AcceptDraw(_) => "accept_draw",
            Self::DeclineDraw(_) => "decline_draw",
            Self::ResignGame(_) => "resign_game",
            Self::JoinGameAsSpectator(_) => "join_game_as_spectator",
            Self::LeaveGameAsSpectator(_) => "leave_game_as_spectator",
            Self::SendChatMessage(_) => "send_chat_message",
            Self::JoinGame(_) => "join_game",
            Self::Ping(_) => "ping",
            Self::HeartbeatAck(_) => "heartbeat_ack",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateMsg {
    #[serde(flatten)]
    pub identity: PlayerIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMatchmakingMsg {
    pub time_control: TimeControl,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_range: Option<RatingRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<ColorPreference>,
}

impl JoinMatchmakingMsg {
    pub fn new(time_control: TimeControl) -> Self {
        Self {
            time_control,
            rating_range: None,
            color: None,
        }
    }

    #[must_use]
    pub fn with_rating_range(mut self, range: RatingRange) -> Self {
        self.rating_range = Some(range);
        self
    }

    #[must_use]
    pub fn with_color(mut self, color: ColorPreference) -> Self {
        self.color = Some(color);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MakeMoveMsg {
    pub game_id: GameId,
    #[serde(rename = "move")]
    pub mv: MoveDescriptor,
    /// Mover's remaining clock in milliseconds.
    pub time_left: u64,
}

/// Payload for actions that only name a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRefMsg {
    pub game_id: GameId,
}

impl GameRefMsg {
    pub fn new(game_id: impl Into<GameId>) -> Self {
        Self {
            game_id: game_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChatMsg {
    pub game_id: GameId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGameMsg {
    pub game_id: GameId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimestampMsg {
    #[serde(default)]
    pub timestamp: u64,
}

// ================================================================
// Server -> Client
// ================================================================

/// Every event the server is known to send, one payload shape per name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Authenticated(AuthenticatedMsg),
    AuthenticationError(ErrorMsg),
    MatchmakingJoined(QueueStatusMsg),
    MatchmakingLeft(QueueStatusMsg),
    GameFound(GameInfoMsg),
    GameStarted(GameInfoMsg),
    GameNotFound(ErrorMsg),
    MoveMade(MoveMadeMsg),
    GameEnded(GameEndedMsg),
    ChatMessage(ChatMessageMsg),
    SpectatorJoined(SpectatorMsg),
    SpectatorLeft(SpectatorMsg),
    DrawOffered(DrawMsg),
    DrawDeclined(DrawMsg),
    Heartbeat(TimestampMsg),
    Pong(TimestampMsg),
    Error(ErrorMsg),
}

impl ServerMessage {
    /// Every event name `ServerMessage` has a variant for.
    pub const EVENT_NAMES: &[&str] = &[
        "authenticated",
        "authentication_error",
        "matchmaking_joined",
        "matchmaking_left",
        "game_found",
        "game_started",
        "game_not_found",
        "move_made",
        "game_ended",
        "chat_message",
        "spectator_joined",
        "spectator_left",
        "draw_offered",
        "draw_declined",
        "heartbeat",
        "pong",
        "error",
    ];

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Authenticated(_) => "authenticated",
            Self::AuthenticationError(_) => "authentication_error",
            Self::MatchmakingJoined(_) => "matchmaking_joined",
            Self::MatchmakingLeft(_) => "matchmaking_left",
            Self::GameFound(_) => "game_found",
            Self::GameStarted(_) => "game_started",
            Self::GameNotFound(_) => "game_not_found",
            Self::MoveMade(_) => "move_made",
            Self::GameEnded(_) => "game_ended",
            Self::ChatMessage(_) => "chat_message",
            Self::SpectatorJoined(_) => "spectator_joined",
            Self::SpectatorLeft(_) => "spectator_left",
            Self::DrawOffered(_) => "draw_offered",
            Self::DrawDeclined(_) => "draw_declined",
            Self::Heartbeat(_) => "heartbeat",
            Self::Pong(_) => "pong",
            Self::Error(_) => "error",
        }
    }

    /// Correlation id echoed by the server, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Authenticated(m) => m.request_id.as_deref(),
            Self::AuthenticationError(m) | Self::GameNotFound(m) | Self::Error(m) => {
                m.request_id.as_deref()
            },
            Self::GameFound(m) | Self::GameStarted(m) => m.request_id.as_deref(),
            _ => None,
        }
    }

    pub fn is_known_event(name: &str) -> bool {
        Self::EVENT_NAMES.contains(&name)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Rejections and generic errors. Servers disagree on `message` vs
/// `error`, so both are accepted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ErrorMsg {
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Human-readable reason, whichever field carried it.
    pub fn reason(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "unspecified".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_control: Option<TimeControl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Sent for `game_found` and `game_started`, and as the reply to `join_game`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfoMsg {
    pub game_id: GameId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<PieceColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_color: Option<PieceColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opponent: Option<PlayerSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_control: Option<TimeControl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl GameInfoMsg {
    /// Color assigned to this client. Older servers send `color`, newer
    /// ones `playerColor`.
    pub fn assigned_color(&self) -> Option<PieceColor> {
        self.player_color.or(self.color)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveMadeMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
    #[serde(rename = "move", default, skip_serializing_if = "Option::is_none")]
    pub mv: Option<MoveDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fen: Option<String>,
    /// Board position in whatever form the server reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_left: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEndedMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<PieceColor>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
    pub message: ChatBody,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Chat text, either bare or wrapped with sender metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatBody {
    Text(String),
    Entry {
        #[serde(default)]
        username: Option<String>,
        message: String,
        #[serde(default)]
        timestamp: Option<Value>,
    },
}

impl ChatBody {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(s) => s,
            Self::Entry { message, .. } => message,
        }
    }

    pub fn sender(&self) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::Entry { username, .. } => username.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectatorMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectator: Option<PlayerSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectator_count: Option<u32>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<PieceColor>,
    #[serde(flatten)]
    pub extra: Extra,
}
