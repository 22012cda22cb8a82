pub mod game;
pub mod net;
pub mod player;
pub mod time;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use serde_json::Value;

    use crate::game::{MoveDescriptor, PieceColor, TimeControl};
    use crate::net::messages::{GameInfoMsg, MakeMoveMsg, ServerMessage, TimestampMsg};
    use crate::net::protocol::{EnginePacket, SocketPacket, encode_server_message};
    use crate::player::PlayerIdentity;

    /// Create `n` identities with sequential ids starting at 1.
    pub fn make_identities(n: usize) -> Vec<PlayerIdentity> {
        (0..n)
            .map(|i| {
                PlayerIdentity::new(
                    format!("user-{}", i + 1),
                    format!("Player{}", i + 1),
                    PlayerIdentity::DEFAULT_RATING,
                )
            })
            .collect()
    }

    /// The opening move every test plays.
    pub fn e2e4(game_id: &str) -> MakeMoveMsg {
        MakeMoveMsg {
            game_id: game_id.to_string(),
            mv: MoveDescriptor::new("e2", "e4"),
            time_left: TimeControl::blitz().initial_millis(),
        }
    }

    /// A `game_started` reply for `game_id`.
    pub fn game_started(game_id: &str, color: PieceColor, request_id: Option<&str>) -> ServerMessage {
        ServerMessage::GameStarted(GameInfoMsg {
            game_id: game_id.to_string(),
            color: Some(color),
            time_control: Some(TimeControl::blitz()),
            request_id: request_id.map(str::to_string),
            ..GameInfoMsg::default()
        })
    }

    pub fn heartbeat(timestamp: u64) -> ServerMessage {
        ServerMessage::Heartbeat(TimestampMsg { timestamp })
    }

    /// Split a typed server message into the `(name, data)` pair a link delivers.
    pub fn server_event(msg: &ServerMessage) -> (String, Option<Value>) {
        match encode_server_message(msg) {
            Ok(SocketPacket::Event { name, data, .. }) => (name, data),
            other => panic!("server message did not encode as an event: {other:?}"),
        }
    }

    /// Encode a server message as a complete engine frame (`42[...]`).
    pub fn server_frame(msg: &ServerMessage) -> String {
        let packet = encode_server_message(msg).expect("encode server message");
        EnginePacket::Message(packet.encode().expect("encode socket packet"))
            .encode()
            .expect("encode engine packet")
    }
}
