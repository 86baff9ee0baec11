//! # chessmata-ws
//! Minimal client side of the WebSocket protocol (RFC 6455), built directly on a raw
//! byte stream and used to receive real-time Chessmata game updates.
//!
//! The crate performs the HTTP upgrade handshake itself, encodes outgoing text as masked
//! frames, decodes incoming frames (including fragmented messages and several frames
//! delivered in one read) and answers ping and close control frames on its own.
//!
//! # Features
//! - `logging` (default): debug logging of the handshake, state transitions and control
//!   frames through the `log` crate.
//!
//! # Layers
//! - [`frame`] and [`codec`]: pure, I/O free frame encoding and decoding.
//! - [`handshake`]: the one-shot HTTP upgrade exchange.
//! - [`Connection`]: owns the stream, runs the background receive loop and serializes writes.
//! - [`dispatch`]: maps JSON text messages to [`GameEvent`]s.
//! - [`GameSocket`]: the game channel of a Chessmata server.
//!
//! # Example
//! ```no_run
//! use chessmata_ws::{GameHandler, GameSocket, Options};
//! use serde_json::Value;
//!
//! struct Printer;
//!
//! impl GameHandler for Printer {
//!     fn on_opponent_move(&self, data: Value) {
//!         println!("opponent moved: {data}");
//!     }
//!
//!     fn on_error(&self, message: String) {
//!         eprintln!("{message}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> chessmata_ws::Result<()> {
//!     let socket = GameSocket::new(
//!         "https://chessmata.example.com",
//!         "session-id",
//!         "player-id",
//!         Printer,
//!         Options::default(),
//!     )?;
//!     socket.connect().await?;
//!     Ok(())
//! }
//! ```

pub mod close;
pub mod codec;
pub mod dispatch;
pub mod frame;
pub mod game;
pub mod handshake;
mod mask;
pub mod options;

mod connection;
mod stream;

use thiserror::Error;

pub use close::CloseCode;
pub use connection::{Connection, ConnectionState, Handler};
pub use dispatch::{Dispatcher, GameEvent, GameHandler};
pub use frame::{Frame, OpCode};
pub use game::GameSocket;
pub use options::Options;
pub use stream::MaybeTlsStream;

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur while connecting, negotiating or exchanging frames.
///
/// Errors raised by [`Connection::connect`] are returned to the caller. Errors detected by the
/// background receive loop never cross the task boundary; they are reported once through
/// [`Handler::on_error`].
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// DNS resolution, TCP connect or TLS negotiation failed.
    #[error("Failed to connect: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// The server did not answer the upgrade request with `101 Switching Protocols`, the
    /// response was malformed, or the stream closed before the response headers ended.
    #[error("WebSocket handshake failed: {0}")]
    HandshakeFailed(String),

    /// A bounded wait expired. The payload names the phase (`connect` or `handshake`).
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// A message was sent while the connection was not open.
    #[error("Not connected")]
    NotConnected,

    /// `connect` was called while a connection is being established or is already open.
    #[error("Already connected")]
    AlreadyConnected,

    /// Indicates that a text message contains invalid UTF-8 data.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// A new data frame arrived before the previous fragmented message was completed.
    #[error("Invalid fragment")]
    InvalidFragment,

    /// A continuation frame arrived without a preceding initial frame.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// Reserved bits are set although no extension was negotiated.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// A control frame (ping, pong, or close) arrived with the FIN bit cleared.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A control frame payload exceeds 125 bytes.
    #[error("Control frame too large")]
    ControlFrameTooLarge,

    /// A frame or reassembled message exceeds the configured limits.
    #[error("Frame too large")]
    FrameTooLarge,

    /// A frame used an opcode outside the RFC 6455 set.
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// The server sent a masked frame. Servers must never mask.
    #[error("Server frames must not be masked")]
    InvalidMasking,

    /// Only `ws`, `wss`, `http` and `https` URLs can be connected to.
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// Read or write failure on an established stream, including the peer disconnecting.
    #[error("Stream failure: {0}")]
    StreamFatal(#[from] std::io::Error),

    /// Wraps errors from URL parsing.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// The TLS client configuration could not be built.
    #[error(transparent)]
    Tls(#[from] tokio_rustls::rustls::Error),

    /// Occurs when serialization of JSON data fails.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl WebSocketError {
    /// Returns `true` for errors caused by bytes on the wire that do not form a valid frame
    /// sequence. Stream alignment cannot be recovered after one of these.
    pub fn is_malformed_frame(&self) -> bool {
        self.close_code().is_some()
    }

    /// The close code sent to the server when the receive loop gives up because of `self`.
    pub(crate) fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::FrameTooLarge => Some(CloseCode::Size),
            Self::InvalidOpCode(_) => Some(CloseCode::Unsupported),
            Self::InvalidUTF8 => Some(CloseCode::Invalid),
            Self::ReservedBitsNotZero
            | Self::ControlFrameFragmented
            | Self::ControlFrameTooLarge
            | Self::InvalidFragment
            | Self::InvalidContinuationFrame
            | Self::InvalidMasking => Some(CloseCode::Protocol),
            _ => None,
        }
    }
}
