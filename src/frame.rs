//! # Frame
//!
//! WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//!
//! ### Frame Binary Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! Frames sent by this client are always masked (the [`Encoder`](crate::codec::Encoder) takes
//! care of it); frames coming from the server never are.
use bytes::BytesMut;

use crate::{close::CloseCode, WebSocketError};

/// WebSocket operation code (OpCode) that determines the semantic meaning and handling of a frame.
///
/// The numeric values for each OpCode are defined in [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8):
/// - Continuation = 0x0
/// - Text = 0x1
/// - Binary = 0x2
/// - Close = 0x8
/// - Ping = 0x9
/// - Pong = 0xA
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` if the `OpCode` represents a control frame (`Close`, `Ping`, or `Pong`).
    ///
    /// Control frames cannot be fragmented and carry at most 125 bytes of payload.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    /// Invalid opcodes (0x3-0x7 and 0xB-0xF) result in [`WebSocketError::InvalidOpCode`].
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A single wire-level WebSocket unit.
///
/// # Fields
/// - `fin`: Final fragment flag. When `true`, indicates this frame completes a message.
/// - `opcode`: Defines the frame type.
/// - `mask`: Optional 32-bit XOR masking key, present on client-to-server frames.
/// - `payload`: Frame payload data. Holds plain bytes except between [`Frame::mask`] and
///   serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Indicates if this is the final frame in a message.
    pub fin: bool,
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    /// The masking key for the frame, if any.
    mask: Option<[u8; 4]>,
    /// The payload of the frame.
    pub payload: BytesMut,
}

/// Largest possible header: 2 fixed bytes, 8 extended length bytes and a 4 byte mask key.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

impl Frame {
    /// Creates a new WebSocket `Frame`.
    pub fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: impl AsRef<[u8]>) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: BytesMut::from(payload.as_ref()),
        }
    }

    /// Creates a final text frame.
    pub fn text(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Text, None, payload)
    }

    /// Creates a ping frame.
    pub fn ping(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Ping, None, payload)
    }

    /// Creates a pong frame, usually echoing the payload of a received ping.
    pub fn pong(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Pong, None, payload)
    }

    /// Creates a close frame whose payload is the big-endian `code` followed by `reason`.
    pub fn close(code: CloseCode, reason: impl AsRef<[u8]>) -> Self {
        let reason = reason.as_ref();
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.extend_from_slice(&u16::from(code).to_be_bytes());
        payload.extend_from_slice(reason);

        Self {
            fin: true,
            opcode: OpCode::Close,
            mask: None,
            payload,
        }
    }

    /// Creates a close frame with a raw payload.
    ///
    /// This method does not validate if `payload` is a valid close frame payload.
    pub fn close_raw(payload: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Close, None, payload)
    }

    /// Extracts the status code of a close frame, if the payload carries one.
    pub fn close_code(&self) -> Option<CloseCode> {
        let code = self.payload.get(0..2)?;
        Some(CloseCode::from(u16::from_be_bytes([code[0], code[1]])))
    }

    /// Extracts the UTF-8 reason of a close frame, if any.
    pub fn close_reason(&self) -> Option<&str> {
        self.payload
            .get(2..)
            .and_then(|reason| std::str::from_utf8(reason).ok())
    }

    /// Returns the masking key, if the frame has one.
    #[inline]
    pub fn mask_key(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Returns whether the frame is masked.
    #[inline(always)]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Masks the payload.
    ///
    /// If no masking key is set, a random key is generated and kept on the frame so that
    /// [`Frame::fmt_head`] writes it to the header.
    pub(crate) fn mask(&mut self) {
        let key = *self.mask.get_or_insert_with(rand::random);
        crate::mask::apply_mask(&mut self.payload, key);
    }

    /// Unmasks the payload and drops the masking key.
    pub(crate) fn unmask(&mut self) {
        if let Some(key) = self.mask.take() {
            crate::mask::apply_mask(&mut self.payload, key);
        }
    }

    /// Formats the frame header into `head` and returns the number of bytes written
    /// (2, 4 or 10 bytes, plus 4 when a masking key is present).
    ///
    /// # Panics
    /// Panics if `head` is shorter than [`MAX_HEAD_SIZE`].
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = (self.fin as u8) << 7 | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len < 126 {
            head[1] = len as u8;
            2
        } else if len < 65536 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = self.mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod opcode_tests {
        use super::*;

        #[test]
        fn test_is_control() {
            assert!(OpCode::Close.is_control());
            assert!(OpCode::Ping.is_control());
            assert!(OpCode::Pong.is_control());

            assert!(!OpCode::Continuation.is_control());
            assert!(!OpCode::Text.is_control());
            assert!(!OpCode::Binary.is_control());
        }

        #[test]
        fn test_byte_conversions() {
            for (byte, opcode) in [
                (0x0, OpCode::Continuation),
                (0x1, OpCode::Text),
                (0x2, OpCode::Binary),
                (0x8, OpCode::Close),
                (0x9, OpCode::Ping),
                (0xA, OpCode::Pong),
            ] {
                assert_eq!(OpCode::try_from(byte).unwrap(), opcode);
                assert_eq!(u8::from(opcode), byte);
            }
        }

        #[test]
        fn test_reserved_opcodes() {
            for code in [0x3, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
                assert!(matches!(
                    OpCode::try_from(code),
                    Err(WebSocketError::InvalidOpCode(c)) if c == code
                ));
            }
        }
    }

    mod frame_tests {
        use super::*;

        #[test]
        fn test_close_payload() {
            let frame = Frame::close(CloseCode::Normal, "bye");

            assert!(frame.fin);
            assert_eq!(frame.opcode, OpCode::Close);
            assert_eq!(&frame.payload[..], b"\x03\xE8bye");
            assert_eq!(frame.close_code(), Some(CloseCode::Normal));
            assert_eq!(frame.close_reason(), Some("bye"));
        }

        #[test]
        fn test_empty_close_has_no_code() {
            let frame = Frame::close_raw(b"");
            assert_eq!(frame.close_code(), None);
            assert_eq!(frame.close_reason(), None);
        }

        #[test]
        fn test_mask_generates_key() {
            let mut frame = Frame::text("Mask me");
            assert!(!frame.is_masked());

            frame.mask();
            let key = frame.mask_key().expect("key");
            let mut expected = BytesMut::from("Mask me");
            crate::mask::apply_mask(&mut expected, key);
            assert_eq!(frame.payload, expected);

            frame.unmask();
            assert!(!frame.is_masked());
            assert_eq!(&frame.payload[..], b"Mask me");
        }

        #[test]
        fn test_fmt_head_small() {
            let mask_key = [0xAA, 0xBB, 0xCC, 0xDD];
            let frame = Frame::new(true, OpCode::Text, Some(mask_key), "Header test");

            let mut head = [0u8; MAX_HEAD_SIZE];
            let size = frame.fmt_head(&mut head);

            assert_eq!(size, 2 + 4);
            assert_eq!(head[0], 0x81);
            assert_eq!(head[1], 0x80 | 11);
            assert_eq!(&head[2..6], &mask_key);
        }

        #[test]
        fn test_fmt_head_extended_lengths() {
            let mut head = [0u8; MAX_HEAD_SIZE];

            let frame = Frame::new(true, OpCode::Binary, None, vec![0u8; 126]);
            assert_eq!(frame.fmt_head(&mut head), 4);
            assert_eq!(head[1], 126);
            assert_eq!(&head[2..4], &126u16.to_be_bytes());

            let frame = Frame::new(false, OpCode::Text, Some([1, 2, 3, 4]), vec![0u8; 65536]);
            assert_eq!(frame.fmt_head(&mut head), 14);
            assert_eq!(head[0], 0x01);
            assert_eq!(head[1], 0x80 | 127);
            assert_eq!(&head[2..10], &65536u64.to_be_bytes());
            assert_eq!(&head[10..14], &[1, 2, 3, 4]);
        }
    }
}
