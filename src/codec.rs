//! Frame encoding and decoding.
//!
//! [`Decoder::decode_frame`] is pure: it looks at a byte slice, never mutates it, and reports
//! either a complete frame together with the number of bytes it occupies, or that more bytes
//! are needed. The receive loop calls it repeatedly against a growing buffer, so a frame split
//! across any number of reads is picked up once its last byte arrives.
//!
//! The [`tokio_util::codec`] implementations wrap the pure functions for use with
//! `FramedWrite`/`FramedRead`.
use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, MAX_HEAD_SIZE},
    options::MAX_PAYLOAD_READ,
    OpCode, Result, WebSocketError,
};

/// The side of the connection an encoder or decoder works for.
///
/// Client frames are masked, server frames are not.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Outcome of a single decode attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame, already unmasked, and the number of bytes it spans in the input.
    Frame { frame: Frame, consumed: usize },
    /// The input holds only a prefix of the next frame. Nothing was consumed.
    NeedMoreData,
}

/// A decoder for WebSocket frames.
#[derive(Debug, Clone)]
pub struct Decoder {
    /// Maximum allowed size for the frame payload.
    max_payload_read: usize,
    /// Reject masked frames, as a client must for anything a server sends.
    reject_masked: bool,
}

impl Decoder {
    /// Creates a decoder limiting payloads to `max_payload_read` bytes.
    ///
    /// The decoder accepts both masked and unmasked frames and unmasks the former.
    pub fn new(max_payload_read: usize) -> Self {
        Self {
            max_payload_read,
            reject_masked: false,
        }
    }

    /// Makes the decoder fail with [`WebSocketError::InvalidMasking`] on masked frames.
    pub fn reject_masked(mut self) -> Self {
        self.reject_masked = true;
        self
    }

    /// Attempts to decode one frame from the start of `src`.
    ///
    /// # Returns
    /// - `Ok(Decoded::Frame { .. })`: a complete frame and the exact byte count it used.
    /// - `Ok(Decoded::NeedMoreData)`: `src` ends before the frame does.
    /// - `Err(WebSocketError)`: the bytes cannot be a valid frame.
    pub fn decode_frame(&self, src: &[u8]) -> Result<Decoded> {
        if src.len() < 2 {
            return Ok(Decoded::NeedMoreData);
        }

        let fin = src[0] & 0b1000_0000 != 0;
        if src[0] & 0b0111_0000 != 0 {
            return Err(WebSocketError::ReservedBitsNotZero);
        }

        let opcode = OpCode::try_from(src[0] & 0b0000_1111)?;
        let masked = src[1] & 0b1000_0000 != 0;
        let length_code = src[1] & 0x7F;

        if masked && self.reject_masked {
            return Err(WebSocketError::InvalidMasking);
        }

        let extra = match length_code {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let header_size = 2 + extra + masked as usize * 4;
        if src.len() < header_size {
            return Ok(Decoded::NeedMoreData);
        }

        let mut head = &src[2..header_size];
        let payload_len = match extra {
            0 => u64::from(length_code),
            2 => u64::from(head.get_u16()),
            _ => head.get_u64(),
        };
        let mask = masked.then(|| head.get_u32().to_be_bytes());

        if opcode.is_control() {
            if !fin {
                return Err(WebSocketError::ControlFrameFragmented);
            }
            if payload_len > 125 {
                return Err(WebSocketError::ControlFrameTooLarge);
            }
        }

        let payload_len = usize::try_from(payload_len)
            .ok()
            .filter(|len| *len <= self.max_payload_read)
            .ok_or(WebSocketError::FrameTooLarge)?;

        let total = header_size + payload_len;
        if src.len() < total {
            return Ok(Decoded::NeedMoreData);
        }

        let mut frame = Frame::new(fin, opcode, mask, &src[header_size..total]);
        frame.unmask();

        Ok(Decoded::Frame {
            frame,
            consumed: total,
        })
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_READ)
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    /// Decodes the next frame and removes its bytes from `src`.
    ///
    /// `Ok(None)` leaves `src` untouched.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode_frame(src)? {
            Decoded::Frame { frame, consumed } => {
                src.advance(consumed);
                Ok(Some(frame))
            }
            Decoded::NeedMoreData => Ok(None),
        }
    }
}

/// WebSocket frame encoder.
///
/// A client encoder masks every frame with a fresh random key. A server encoder writes
/// frames as they are.
#[derive(Debug, Clone)]
pub struct Encoder {
    role: Role,
}

impl Encoder {
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    /// Appends the complete wire form of `frame` to `dst`.
    pub fn encode_frame(&self, mut frame: Frame, dst: &mut BytesMut) {
        if self.role == Role::Client {
            frame.mask();
        }

        let mut header = [0; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut header[..]);

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&header[..size]);
        dst.extend_from_slice(&frame.payload);
    }
}

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        self.encode_frame(frame, dst);
        Ok(())
    }
}

/// Encodes `payload` as a single masked client frame.
pub fn encode(payload: &[u8], opcode: OpCode, fin: bool) -> BytesMut {
    let mut dst = BytesMut::new();
    Encoder::new(Role::Client).encode_frame(Frame::new(fin, opcode, None, payload), &mut dst);
    dst
}

/// Decodes one frame from the start of `buf` with the default payload limit.
pub fn decode(buf: &[u8]) -> Result<Decoded> {
    Decoder::default().decode_frame(buf)
}
