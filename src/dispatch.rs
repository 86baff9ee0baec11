//! Routes JSON text messages of the game channel to typed callbacks.
//!
//! Every message is an object with a `type` tag. Handlers receive the whole object:
//!
//! ```json
//! {"type": "move", "from": "e7", "to": "e5"}
//! ```
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{connection::Handler, WebSocketError};

/// Fallback text for `error` events without a `message` field.
const UNKNOWN_ERROR: &str = "Unknown error";

/// A message of the game channel, carrying the complete JSON object it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// `game_update`: full game state.
    GameUpdate(Value),
    /// `move`: the opponent played a move.
    OpponentMove(Value),
    /// `player_joined`: a second player joined the session.
    PlayerJoined(Value),
    /// `resignation`: a player resigned.
    Resignation(Value),
    /// `error`: the server reported an error. Holds the `message` field.
    Error(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum EventKind {
    GameUpdate,
    #[serde(rename = "move")]
    OpponentMove,
    PlayerJoined,
    Resignation,
    Error,
}

impl GameEvent {
    /// Parses a text message.
    ///
    /// Returns `Ok(None)` for messages whose `type` is missing or unknown; those are dropped.
    /// Fails when `message` is not a JSON object.
    pub fn from_message(message: &str) -> Result<Option<Self>, serde_json::Error> {
        let object: Map<String, Value> = serde_json::from_str(message)?;

        let Some(kind) = object
            .get("type")
            .and_then(|kind| EventKind::deserialize(kind).ok())
        else {
            return Ok(None);
        };

        Ok(Some(match kind {
            EventKind::Error => Self::Error(
                object
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or(UNKNOWN_ERROR)
                    .to_string(),
            ),
            EventKind::GameUpdate => Self::GameUpdate(Value::Object(object)),
            EventKind::OpponentMove => Self::OpponentMove(Value::Object(object)),
            EventKind::PlayerJoined => Self::PlayerJoined(Value::Object(object)),
            EventKind::Resignation => Self::Resignation(Value::Object(object)),
        }))
    }
}

/// Callbacks for game events. Every method defaults to doing nothing.
///
/// Like [`Handler`], these run on the receive loop's task.
pub trait GameHandler: Send + Sync + 'static {
    fn on_game_update(&self, data: Value) {
        let _ = data;
    }

    fn on_opponent_move(&self, data: Value) {
        let _ = data;
    }

    fn on_player_joined(&self, data: Value) {
        let _ = data;
    }

    fn on_resignation(&self, data: Value) {
        let _ = data;
    }

    /// Server `error` events, unparsable messages and connection failures.
    fn on_error(&self, message: String) {
        let _ = message;
    }
}

/// Adapts a [`GameHandler`] to the connection's [`Handler`].
pub struct Dispatcher<H> {
    handler: H,
}

impl<H: GameHandler> Dispatcher<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Invokes the callback matching `event`.
    pub fn dispatch(&self, event: GameEvent) {
        match event {
            GameEvent::GameUpdate(data) => self.handler.on_game_update(data),
            GameEvent::OpponentMove(data) => self.handler.on_opponent_move(data),
            GameEvent::PlayerJoined(data) => self.handler.on_player_joined(data),
            GameEvent::Resignation(data) => self.handler.on_resignation(data),
            GameEvent::Error(message) => self.handler.on_error(message),
        }
    }
}

impl<H: GameHandler> Handler for Dispatcher<H> {
    fn on_message(&self, message: String) {
        match GameEvent::from_message(&message) {
            Ok(Some(event)) => self.dispatch(event),
            Ok(None) => {
                #[cfg(feature = "logging")]
                log::debug!("ignoring message: {message}");
            }
            Err(_) => self.handler.on_error(format!("Invalid message: {message}")),
        }
    }

    fn on_error(&self, error: WebSocketError) {
        self.handler.on_error(error.to_string());
    }
}
