use std::{io, ops::ControlFlow, sync::Arc, time::Duration};

use bytes::{Buf, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    time,
};
use tokio_util::sync::CancellationToken;

use super::{ConnectionState, Shared};
use crate::{
    codec::{Decoded, Decoder},
    frame::Frame,
    OpCode, Options, Result, WebSocketError,
};

/// Buffer growth per read.
const READ_CHUNK: usize = 4096;

/// Owns the read half of the stream and feeds complete messages to the handler.
pub(super) struct Receiver<R> {
    reader: R,
    buffer: BytesMut,
    decoder: Decoder,
    reassembly: Reassembly,
    shared: Arc<Shared>,
    stop: CancellationToken,
    read_timeout: Duration,
}

impl<R> Receiver<R>
where
    R: AsyncRead + Unpin,
{
    /// `leftover` holds the bytes that followed the handshake response in the same read.
    pub(super) fn new(
        reader: R,
        leftover: BytesMut,
        shared: Arc<Shared>,
        stop: CancellationToken,
        options: &Options,
    ) -> Self {
        let mut buffer = leftover;
        buffer.reserve(READ_CHUNK);

        Self {
            reader,
            buffer,
            decoder: Decoder::new(options.max_payload_read()).reject_masked(),
            reassembly: Reassembly::new(options.max_read_buffer()),
            shared,
            stop,
            read_timeout: options.read_timeout,
        }
    }

    /// Runs until the stream ends, a close frame arrives, an error occurs or the connection
    /// asks the loop to stop.
    pub(super) async fn run(mut self) {
        let result = self.drive().await;

        // `Connection::close` already released the stream
        if self.stop.is_cancelled() {
            #[cfg(feature = "logging")]
            log::debug!("receive loop stopped");
            return;
        }

        if let Err(err) = result {
            #[cfg(feature = "logging")]
            log::debug!("receive loop failed: {err}");

            let farewell = err
                .close_code()
                .map(|code| Frame::close(code, err.to_string()));
            self.shared.set_state(ConnectionState::Closing);
            self.shared.release(farewell).await;
            self.shared.set_state(ConnectionState::Closed);
            self.shared.handler.on_error(err);
        }
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            while let Decoded::Frame { frame, consumed } = self.decoder.decode_frame(&self.buffer)? {
                self.buffer.advance(consumed);

                if self.stop.is_cancelled() {
                    return Ok(());
                }
                if self.on_frame(frame).await?.is_break() {
                    return Ok(());
                }
            }

            self.buffer.reserve(READ_CHUNK);
            let read = tokio::select! {
                _ = self.stop.cancelled() => return Ok(()),
                read = time::timeout(self.read_timeout, self.reader.read_buf(&mut self.buffer)) => read,
            };

            match read {
                // only there to notice a stop request
                Err(_elapsed) => continue,
                Ok(Ok(0)) => {
                    return Err(WebSocketError::StreamFatal(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    )))
                }
                Ok(Ok(_)) => {}
                Ok(Err(err))
                    if matches!(
                        err.kind(),
                        io::ErrorKind::Interrupted
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                    ) =>
                {
                    continue
                }
                Ok(Err(err)) => return Err(err.into()),
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<ControlFlow<()>> {
        match frame.opcode {
            OpCode::Ping => {
                #[cfg(feature = "logging")]
                log::debug!("ping ({} bytes), answering", frame.payload.len());

                self.shared.send_frame(Frame::pong(&frame.payload)).await?;
            }
            OpCode::Pong => {}
            OpCode::Close => {
                #[cfg(feature = "logging")]
                log::debug!(
                    "close frame received (code={:?}, reason={:?})",
                    frame.close_code(),
                    frame.close_reason()
                );

                self.shared.set_state(ConnectionState::Closing);
                // a body shorter than a status code is echoed as an empty close
                let echo = frame.payload.get(..2).unwrap_or_default();
                self.shared.release(Some(Frame::close_raw(echo))).await;
                self.shared.set_state(ConnectionState::Closed);

                return Ok(ControlFlow::Break(()));
            }
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                if let Some((opcode, payload)) = self.reassembly.push(frame)? {
                    self.on_message(opcode, payload)?;
                }
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    fn on_message(&self, opcode: OpCode, payload: BytesMut) -> Result<()> {
        if opcode != OpCode::Text {
            #[cfg(feature = "logging")]
            log::debug!("dropping binary message ({} bytes)", payload.len());
            return Ok(());
        }

        let message = String::from_utf8(payload.to_vec()).map_err(|_| WebSocketError::InvalidUTF8)?;
        self.shared.handler.on_message(message);
        Ok(())
    }
}

/// Joins the frames of a fragmented message. Only one message is in flight at a time.
struct Reassembly {
    /// Opcode of the message being assembled.
    fragment: Option<OpCode>,
    accumulated: BytesMut,
    max_read_buffer: usize,
}

impl Reassembly {
    fn new(max_read_buffer: usize) -> Self {
        Self {
            fragment: None,
            accumulated: BytesMut::new(),
            max_read_buffer,
        }
    }

    /// Takes a data frame and returns the message it completes, if any.
    fn push(&mut self, frame: Frame) -> Result<Option<(OpCode, BytesMut)>> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.fragment.is_some() {
                    return Err(WebSocketError::InvalidFragment);
                }

                if frame.fin {
                    Ok(Some((frame.opcode, frame.payload)))
                } else {
                    self.fragment = Some(frame.opcode);
                    self.extend(&frame.payload)?;
                    Ok(None)
                }
            }
            OpCode::Continuation => {
                let opcode = self.fragment.ok_or(WebSocketError::InvalidContinuationFrame)?;
                self.extend(&frame.payload)?;

                if frame.fin {
                    self.fragment = None;
                    Ok(Some((opcode, std::mem::take(&mut self.accumulated))))
                } else {
                    Ok(None)
                }
            }
            // control frames never reach reassembly
            _ => Ok(None),
        }
    }

    fn extend(&mut self, payload: &[u8]) -> Result<()> {
        if self.accumulated.len() + payload.len() > self.max_read_buffer {
            return Err(WebSocketError::FrameTooLarge);
        }
        self.accumulated.extend_from_slice(payload);
        Ok(())
    }
}
