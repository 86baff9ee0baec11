//! Client connection: state machine, serialized writes and the background receive loop.

mod receiver;

use std::{pin::Pin, sync::Arc};

use bytes::BytesMut;
use futures::SinkExt;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{watch, Mutex},
    task::JoinHandle,
    time,
};
use tokio_rustls::TlsConnector;
use tokio_util::{codec::FramedWrite, sync::CancellationToken};
use url::Url;

use crate::{
    close::CloseCode,
    codec::{Encoder, Role},
    frame::Frame,
    handshake, stream, Options, Result, WebSocketError,
};

use receiver::Receiver;

/// Lifecycle of a [`Connection`].
///
/// ```text
/// Disconnected -> Handshaking -> Open -> Closing -> Closed
///                      |
///                      +-> Disconnected (connect failed)
///                      +-> Closed (closed mid-handshake)
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Open,
    Closing,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Handshaking => write!(f, "handshaking"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Receives what the background loop produces.
///
/// Callbacks run on the receive loop's task, in wire order. They must not block for long:
/// ping replies and further messages wait until they return.
pub trait Handler: Send + Sync + 'static {
    /// A complete text message arrived.
    fn on_message(&self, message: String);

    /// The loop stopped because of `error`. Called at most once per connection, after the
    /// state has become [`ConnectionState::Closed`].
    fn on_error(&self, error: WebSocketError) {
        let _ = error;
    }
}

impl<F> Handler for F
where
    F: Fn(String) + Send + Sync + 'static,
{
    fn on_message(&self, message: String) {
        self(message)
    }
}

type BoxedWrite = Pin<Box<dyn AsyncWrite + Send>>;

/// State shared between the caller and the receive loop.
struct Shared {
    state: watch::Sender<ConnectionState>,
    /// Write path. The lock is held for the whole write of a frame.
    writer: Mutex<Option<FramedWrite<BoxedWrite, Encoder>>>,
    handler: Arc<dyn Handler>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let _previous = self.state.send_replace(state);

        #[cfg(feature = "logging")]
        if _previous != state {
            log::debug!("connection state {_previous} -> {state}");
        }
    }

    /// Writes one frame. Fails with [`WebSocketError::NotConnected`] once the stream has been
    /// released.
    async fn send_frame(&self, frame: Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(WebSocketError::NotConnected)?;
        writer.send(frame).await
    }

    /// Drops the write half, optionally writing `farewell` first. Write errors are ignored.
    async fn release(&self, farewell: Option<Frame>) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Some(frame) = farewell {
                let _ = writer.send(frame).await;
            }
            let _ = writer.close().await;
        }
    }
}

/// Per-connect bookkeeping. Created when a connect attempt begins, so `close` can cancel a
/// handshake that is still in flight.
struct Session {
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// A client WebSocket connection.
///
/// Text messages and loop errors are delivered to the [`Handler`] given at construction.
/// `send` and `close` may be called from any task, concurrently with the receive loop.
///
/// ```no_run
/// use chessmata_ws::Connection;
///
/// #[tokio::main]
/// async fn main() -> chessmata_ws::Result<()> {
///     let conn = Connection::new(|message: String| println!("{message}"));
///     conn.connect(&"ws://localhost:9029/ws/games/abc?playerId=p1".parse()?).await?;
///     conn.send(r#"{"type":"ping"}"#).await?;
///     conn.close().await;
///     Ok(())
/// }
/// ```
pub struct Connection {
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
    options: Options,
    connector: Option<TlsConnector>,
}

impl Connection {
    /// Creates a disconnected connection with default [`Options`].
    pub fn new(handler: impl Handler) -> Self {
        Self::with_options(handler, Options::default())
    }

    /// Creates a disconnected connection.
    pub fn with_options(handler: impl Handler, options: Options) -> Self {
        Self::with_shared_handler(Arc::new(handler), options)
    }

    pub(crate) fn with_shared_handler(handler: Arc<dyn Handler>, options: Options) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                state,
                writer: Mutex::new(None),
                handler,
            }),
            session: Mutex::new(None),
            options,
            connector: None,
        }
    }

    /// Uses `connector` instead of the default webpki-backed one for `wss://` targets.
    pub fn with_connector(mut self, connector: TlsConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// A receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Connects to `url`, performs the handshake and starts the receive loop.
    ///
    /// `ws`/`http` URLs use plain TCP, `wss`/`https` use TLS. The TCP and TLS setup is bounded
    /// by [`Options::connect_timeout`], the handshake by [`Options::handshake_timeout`]. On
    /// failure the state returns to [`ConnectionState::Disconnected`].
    ///
    /// A [`Connection::close`] issued before the receive loop starts aborts the attempt with
    /// [`WebSocketError::NotConnected`] and the state stays [`ConnectionState::Closed`].
    pub async fn connect(&self, url: &Url) -> Result<()> {
        let stop = self.begin().await?;

        let result = async {
            let stream = tokio::select! {
                _ = stop.cancelled() => return Err(WebSocketError::NotConnected),
                stream = time::timeout(
                    self.options.connect_timeout,
                    stream::connect(url, &self.options, self.connector.clone()),
                ) => stream.map_err(|_| WebSocketError::Timeout("connect"))??,
            };

            self.negotiate(url, stream, &stop).await
        }
        .await;

        self.settle(result)
    }

    /// Performs the handshake over an already established stream and starts the receive loop.
    pub async fn handshake<S>(&self, url: &Url, io: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let stop = self.begin().await?;
        let result = self.negotiate(url, io, &stop).await;
        self.settle(result)
    }

    /// Sends `text` as a single text frame.
    ///
    /// Fails with [`WebSocketError::NotConnected`] unless the connection is open.
    pub async fn send(&self, text: impl AsRef<str>) -> Result<()> {
        if !self.is_open() {
            return Err(WebSocketError::NotConnected);
        }
        self.shared
            .send_frame(Frame::text(text.as_ref().as_bytes()))
            .await
    }

    /// Serializes `data` to JSON and sends it as a text frame.
    pub async fn send_json<T: serde::Serialize>(&self, data: &T) -> Result<()> {
        let text = serde_json::to_string(data)?;
        self.send(text).await
    }

    /// Closes the connection.
    ///
    /// Signals the receive loop to stop, sends a close frame if the connection is open (write
    /// failures are ignored) and releases the stream. The state ends up
    /// [`ConnectionState::Closed`] in every case, so calling this again is harmless. Does not
    /// wait for the loop; see [`Connection::join`].
    pub async fn close(&self) {
        // held until the state is Closed, so a handshake cannot start the loop in between
        let session = self.session.lock().await;
        if let Some(current) = session.as_ref() {
            current.stop.cancel();
        }

        let farewell = if self.state() == ConnectionState::Open {
            self.shared.set_state(ConnectionState::Closing);
            Some(Frame::close(CloseCode::Normal, b""))
        } else {
            None
        };

        self.shared.release(farewell).await;
        self.shared.set_state(ConnectionState::Closed);
    }

    /// Waits for the receive loop of the current session to exit.
    pub async fn join(&self) {
        let task = self
            .session
            .lock()
            .await
            .as_mut()
            .and_then(|session| session.task.take());

        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Moves `Disconnected`/`Closed` to `Handshaking` in one step and opens a new session.
    /// Returns the token that stops this attempt and, later, its receive loop.
    async fn begin(&self) -> Result<CancellationToken> {
        let mut session = self.session.lock().await;

        let began = self.shared.state.send_if_modified(|state| match state {
            ConnectionState::Disconnected | ConnectionState::Closed => {
                *state = ConnectionState::Handshaking;
                true
            }
            _ => false,
        });
        if !began {
            return Err(WebSocketError::AlreadyConnected);
        }

        #[cfg(feature = "logging")]
        log::debug!("connection state -> {}", ConnectionState::Handshaking);

        let stop = CancellationToken::new();
        let previous = session.replace(Session {
            stop: stop.clone(),
            task: None,
        });
        if let Some(previous) = previous {
            previous.stop.cancel();
        }

        Ok(stop)
    }

    fn settle(&self, result: Result<()>) -> Result<()> {
        if let Err(_err) = &result {
            #[cfg(feature = "logging")]
            log::debug!("connect failed: {_err}");

            // a concurrent close() has already settled the state as Closed
            self.shared.state.send_if_modified(|state| {
                if *state == ConnectionState::Handshaking {
                    *state = ConnectionState::Disconnected;
                    true
                } else {
                    false
                }
            });
        }
        result
    }

    async fn negotiate<S>(&self, url: &Url, mut io: S, stop: &CancellationToken) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let leftover = tokio::select! {
            _ = stop.cancelled() => return Err(WebSocketError::NotConnected),
            leftover = time::timeout(
                self.options.handshake_timeout,
                handshake::negotiate(&mut io, url, &self.options),
            ) => leftover.map_err(|_| WebSocketError::Timeout("handshake"))??,
        };

        self.start(io, leftover).await
    }

    /// Splits the stream, installs the write half and spawns the receive loop.
    ///
    /// Fails with [`WebSocketError::NotConnected`], dropping `io`, when the session was closed
    /// while the handshake ran.
    async fn start<S>(&self, io: S, leftover: BytesMut) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut session = self.session.lock().await;
        let current = match session.as_mut() {
            Some(current) if !current.stop.is_cancelled() => current,
            _ => return Err(WebSocketError::NotConnected),
        };

        let (reader, writer) = tokio::io::split(io);
        let writer: BoxedWrite = Box::pin(writer);
        *self.shared.writer.lock().await = Some(FramedWrite::new(writer, Encoder::new(Role::Client)));

        let receiver = Receiver::new(
            reader,
            leftover,
            Arc::clone(&self.shared),
            current.stop.clone(),
            &self.options,
        );

        self.shared.set_state(ConnectionState::Open);
        current.task = Some(tokio::spawn(receiver.run()));

        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().as_ref() {
            session.stop.cancel();
        }
    }
}
