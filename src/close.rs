//! Close status codes as defined in [RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4).
//!
//! Only the codes this client sends or reports are named; anything else received from the
//! server is kept as [`CloseCode::Other`].

/// Status code carried in the first two bytes of a close frame payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: the purpose of the connection has been fulfilled.
    Normal,
    /// 1001: the endpoint is going away (server shutdown, page navigation).
    Away,
    /// 1002: the endpoint saw a protocol error.
    Protocol,
    /// 1003: the endpoint received a data type it cannot accept.
    Unsupported,
    /// 1007: a message contained data inconsistent with its type (e.g. invalid UTF-8).
    Invalid,
    /// 1009: a message was too big to process.
    Size,
    /// 1011: the server hit an unexpected condition.
    Error,
    /// Any other code.
    Other(u16),
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1007 => Self::Invalid,
            1009 => Self::Size,
            1011 => Self::Error,
            other => Self::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Invalid => 1007,
            CloseCode::Size => 1009,
            CloseCode::Error => 1011,
            CloseCode::Other(other) => other,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}
