use std::time::Duration;

/// The maximum allowed payload size for reading, set to 1 MiB.
///
/// Frames with a payload size larger than this limit are rejected with
/// [`WebSocketError::FrameTooLarge`](crate::WebSocketError::FrameTooLarge).
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// The maximum size of a message reassembled from fragments, set to 2 MiB.
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// Connection settings.
///
/// ```
/// use std::time::Duration;
/// use chessmata_ws::Options;
///
/// let options = Options::default()
///     .with_connect_timeout(Duration::from_secs(5))
///     .with_max_payload_read(64 * 1024);
/// assert_eq!(options.max_read_buffer(), 128 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    /// Bound on TCP connect plus TLS negotiation.
    pub connect_timeout: Duration,
    /// Bound on sending the upgrade request and reading the response headers.
    pub handshake_timeout: Duration,
    /// How long a single read in the receive loop may block before the loop checks
    /// whether it was asked to stop. Not an application-level timeout.
    pub read_timeout: Duration,
    /// Maximum payload size of a single frame. Defaults to [`MAX_PAYLOAD_READ`].
    pub max_payload_read: Option<usize>,
    /// Maximum size of a reassembled message. Defaults to twice `max_payload_read`, or
    /// [`MAX_READ_BUFFER`].
    pub max_read_buffer: Option<usize>,
    /// Sets `TCP_NODELAY` on the socket.
    pub no_delay: bool,
    /// Checks the server's `Sec-WebSocket-Accept` header against the key that was sent.
    pub verify_accept: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(1),
            max_payload_read: None,
            max_read_buffer: None,
            no_delay: true,
            verify_accept: false,
        }
    }
}

impl Options {
    pub fn with_connect_timeout(self, connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ..self
        }
    }

    pub fn with_handshake_timeout(self, handshake_timeout: Duration) -> Self {
        Self {
            handshake_timeout,
            ..self
        }
    }

    pub fn with_read_timeout(self, read_timeout: Duration) -> Self {
        Self {
            read_timeout,
            ..self
        }
    }

    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: Some(size),
            ..self
        }
    }

    pub fn with_max_read_buffer(self, size: usize) -> Self {
        Self {
            max_read_buffer: Some(size),
            ..self
        }
    }

    pub fn with_no_delay(self, no_delay: bool) -> Self {
        Self { no_delay, ..self }
    }

    /// Enables `Sec-WebSocket-Accept` verification.
    pub fn with_accept_verification(self) -> Self {
        Self {
            verify_accept: true,
            ..self
        }
    }

    pub(crate) fn max_payload_read(&self) -> usize {
        self.max_payload_read.unwrap_or(MAX_PAYLOAD_READ)
    }

    /// Effective limit for reassembled messages.
    pub fn max_read_buffer(&self) -> usize {
        self.max_read_buffer.unwrap_or(
            self.max_payload_read
                .map(|payload_read| payload_read * 2)
                .unwrap_or(MAX_READ_BUFFER),
        )
    }
}
