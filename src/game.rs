//! The real-time channel of a single game session.
use std::sync::Arc;

use url::Url;

use crate::{
    connection::{Connection, ConnectionState},
    dispatch::{Dispatcher, GameHandler},
    Options, Result, WebSocketError,
};

/// A [`Connection`] to `/ws/games/{session_id}?playerId={player_id}` whose messages are
/// dispatched to a [`GameHandler`].
pub struct GameSocket {
    connection: Connection,
    url: Url,
}

impl GameSocket {
    /// Derives the game channel URL from the server's base URL.
    ///
    /// `http` becomes `ws` and `https` becomes `wss`; `ws` and `wss` are kept. The path of
    /// `server_url` is kept as a prefix.
    ///
    /// ```
    /// use chessmata_ws::GameSocket;
    ///
    /// let url = GameSocket::url("https://chessmata.example.com", "s1", "p1").unwrap();
    /// assert_eq!(url.as_str(), "wss://chessmata.example.com/ws/games/s1?playerId=p1");
    /// ```
    pub fn url(server_url: &str, session_id: &str, player_id: &str) -> Result<Url> {
        let mut url = Url::parse(server_url)?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            _ => return Err(WebSocketError::InvalidHttpScheme),
        };
        url.set_scheme(scheme)
            .map_err(|_| WebSocketError::InvalidHttpScheme)?;

        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(["ws", "games", session_id]);

        url.set_query(None);
        url.set_fragment(None);
        url.query_pairs_mut().append_pair("playerId", player_id);

        Ok(url)
    }

    /// Creates a disconnected socket for the given session and player.
    pub fn new(
        server_url: &str,
        session_id: &str,
        player_id: &str,
        handler: impl GameHandler,
        options: Options,
    ) -> Result<Self> {
        let url = Self::url(server_url, session_id, player_id)?;
        let connection = Connection::with_shared_handler(Arc::new(Dispatcher::new(handler)), options);

        Ok(Self { connection, url })
    }

    /// Connects and starts receiving game events.
    pub async fn connect(&self) -> Result<()> {
        #[cfg(feature = "logging")]
        log::debug!("connecting to game channel {}", self.url);

        self.connection.connect(&self.url).await
    }

    /// Closes the channel. Safe to call at any time.
    pub async fn disconnect(&self) {
        self.connection.close().await;
    }

    pub fn connected(&self) -> bool {
        self.connection.state() == ConnectionState::Open
    }

    /// The URL [`GameSocket::connect`] dials.
    pub fn endpoint(&self) -> &Url {
        &self.url
    }

    /// The underlying connection, e.g. to send messages or observe state changes.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}
