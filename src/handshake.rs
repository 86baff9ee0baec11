//! The HTTP/1.1 upgrade exchange that turns a raw stream into a WebSocket.
//!
//! The request is written by hand and only the status line of the response is interpreted,
//! so no HTTP client is involved. Bytes the server sends after the end of its headers already
//! belong to the frame stream and are returned to the caller.
use base64::prelude::*;
use bytes::BytesMut;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while_m_n},
    character::complete::{char, digit1, space1},
    combinator::map,
    IResult, Parser,
};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::{Options, Result, WebSocketError};

/// GUID appended to the key when computing `Sec-WebSocket-Accept`.
const ACCEPT_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Marks the end of the response headers.
const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Upper bound on the size of the response headers.
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// How much of a rejected response is kept in the error.
const DIAGNOSTIC_PREFIX: usize = 200;

const READ_CHUNK: usize = 1024;

/// Generates a `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
pub fn generate_key() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Computes the `Sec-WebSocket-Accept` value a server derives from `key`.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(ACCEPT_GUID);
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Builds the upgrade request for `url`.
///
/// The `Host` header includes the port only when the URL spells one out.
pub fn request(url: &Url, key: &str) -> Result<String> {
    let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut target = match url.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    };
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    Ok(format!(
        "GET {target} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    ))
}

/// Performs the client handshake over `io`.
///
/// Writes the upgrade request, reads until the end of the response headers and checks for a
/// `101` status. Returns the bytes received past the headers.
pub async fn negotiate<S>(io: &mut S, url: &Url, options: &Options) -> Result<BytesMut>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_key();
    let request = request(url, &key)?;

    #[cfg(feature = "logging")]
    log::debug!("sending upgrade request for {url}");

    io.write_all(request.as_bytes())
        .await
        .map_err(|err| WebSocketError::HandshakeFailed(format!("sending request: {err}")))?;
    io.flush()
        .await
        .map_err(|err| WebSocketError::HandshakeFailed(format!("sending request: {err}")))?;

    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let end = loop {
        if let Some(pos) = find_terminator(&buf) {
            break pos + TERMINATOR.len();
        }
        if buf.len() > MAX_RESPONSE_HEAD {
            return Err(WebSocketError::HandshakeFailed(format!(
                "response headers exceed {MAX_RESPONSE_HEAD} bytes: {}",
                diagnostic(&buf)
            )));
        }

        buf.reserve(READ_CHUNK);
        let read = io
            .read_buf(&mut buf)
            .await
            .map_err(|err| WebSocketError::HandshakeFailed(format!("reading response: {err}")))?;
        if read == 0 {
            return Err(WebSocketError::HandshakeFailed(
                "connection closed during handshake".to_string(),
            ));
        }
    };

    let leftover = buf.split_off(end);
    verify(&buf, &key, options)?;

    #[cfg(feature = "logging")]
    log::debug!(
        "upgrade accepted, {} bytes of frame data arrived with the response",
        leftover.len()
    );

    Ok(leftover)
}

/// Checks the status line and, if requested, the accept header.
fn verify(head: &[u8], key: &str, options: &Options) -> Result<()> {
    match status_code(head) {
        Ok((_, 101)) => {}
        _ => return Err(WebSocketError::HandshakeFailed(diagnostic(head))),
    }

    if options.verify_accept {
        let expected = accept_key(key);
        let head = String::from_utf8_lossy(head);
        if header_value(&head, "sec-websocket-accept") != Some(expected.as_str()) {
            return Err(WebSocketError::HandshakeFailed(format!(
                "Sec-WebSocket-Accept mismatch: {}",
                diagnostic(head.as_bytes())
            )));
        }
    }

    Ok(())
}

/// Parses `HTTP/<major>.<minor> <code>` followed by a reason phrase or the line end.
fn status_code(input: &[u8]) -> IResult<&[u8], u16> {
    let version = (tag(&b"HTTP/"[..]), digit1, char('.'), digit1);
    let code = map(
        take_while_m_n(3, 3, |b: u8| b.is_ascii_digit()),
        |digits: &[u8]| {
            digits
                .iter()
                .fold(0u16, |acc, digit| acc * 10 + u16::from(digit - b'0'))
        },
    );
    let after = alt((space1, tag(&b"\r\n"[..])));

    (version, space1, code, after)
        .parse(input)
        .map(|(rest, (_, _, code, _))| (rest, code))
}

fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.split("\r\n").skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}

fn diagnostic(head: &[u8]) -> String {
    String::from_utf8_lossy(&head[..head.len().min(DIAGNOSTIC_PREFIX)]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn url(s: &str) -> Url {
        s.parse().unwrap()
    }

    /// Reads the request from the server side of a duplex stream and returns it.
    async fn read_request(server: &mut tokio::io::DuplexStream) -> String {
        let mut buf = Vec::new();
        while find_terminator(&buf).is_none() {
            let mut chunk = [0u8; 256];
            let n = server.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client hung up");
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8(buf).unwrap()
    }

    fn request_key(request: &str) -> String {
        header_value(request, "sec-websocket-key").unwrap().to_string()
    }

    #[test]
    fn test_request_layout() {
        let url = url("ws://localhost:9029/ws/games/abc?playerId=p1");
        let request = request(&url, "dGhlIHNhbXBsZSBub25jZQ==").unwrap();

        assert_eq!(
            request,
            "GET /ws/games/abc?playerId=p1 HTTP/1.1\r\n\
             Host: localhost:9029\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n"
        );
    }

    #[test]
    fn test_request_default_port_and_path() {
        let request = request(&url("wss://chessmata.example.com"), "k").unwrap();
        assert!(request.starts_with("GET / HTTP/1.1\r\nHost: chessmata.example.com\r\n"));
    }

    #[test]
    fn test_generated_key() {
        let key = generate_key();
        let raw = BASE64_STANDARD.decode(&key).unwrap();
        assert_eq!(raw.len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_accept_key_rfc_sample() {
        // RFC 6455 section 1.3
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_status_code_parsing() {
        assert_eq!(
            status_code(b"HTTP/1.1 101 Switching Protocols\r\n").unwrap().1,
            101
        );
        assert_eq!(status_code(b"HTTP/1.1 101\r\n\r\n").unwrap().1, 101);
        assert_eq!(status_code(b"HTTP/1.0 404 Not Found\r\n").unwrap().1, 404);
        assert!(status_code(b"HTTP/1.1 1010 Nope\r\n").is_err());
        assert!(status_code(b"garbage 101\r\n").is_err());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let head = "HTTP/1.1 101 OK\r\nSec-WebSocket-Accept:  abc= \r\nUpgrade: websocket\r\n\r\n";
        assert_eq!(header_value(head, "sec-websocket-accept"), Some("abc="));
        assert_eq!(header_value(head, "connection"), None);
    }

    #[tokio::test]
    async fn test_negotiate_keeps_frame_bytes() {
        let (mut client, mut server) = duplex(4096);
        let url = url("ws://localhost/ws/games/s1?playerId=p1");

        let server_task = tokio::spawn(async move {
            let request = read_request(&mut server).await;
            assert!(request.starts_with("GET /ws/games/s1?playerId=p1 HTTP/1.1\r\n"));
            assert!(request.contains("\r\nSec-WebSocket-Version: 13\r\n"));

            // headers and the first frame in a single write
            server
                .write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n\x81\x02hi")
                .await
                .unwrap();
            server
        });

        let leftover = negotiate(&mut client, &url, &Options::default())
            .await
            .unwrap();
        assert_eq!(&leftover[..], b"\x81\x02hi");
        drop(server_task.await.unwrap());
    }

    #[tokio::test]
    async fn test_negotiate_rejects_404() {
        let (mut client, mut server) = duplex(4096);
        let url = url("ws://localhost/ws/games/s1");

        tokio::spawn(async move {
            read_request(&mut server).await;
            server
                .write_all(b"HTTP/1.1 404 Not Found\r\n\r\n")
                .await
                .unwrap();
        });

        match negotiate(&mut client, &url, &Options::default()).await {
            Err(WebSocketError::HandshakeFailed(prefix)) => {
                assert!(prefix.starts_with("HTTP/1.1 404 Not Found"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_negotiate_stream_closed_early() {
        let (mut client, mut server) = duplex(4096);
        let url = url("ws://localhost/");

        tokio::spawn(async move {
            read_request(&mut server).await;
            server.write_all(b"HTTP/1.1 101 Switch").await.unwrap();
        });

        assert!(matches!(
            negotiate(&mut client, &url, &Options::default()).await,
            Err(WebSocketError::HandshakeFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_negotiate_verifies_accept_when_asked() {
        let options = Options::default().with_accept_verification();

        let (mut client, mut server) = duplex(4096);
        tokio::spawn(async move {
            let request = read_request(&mut server).await;
            let accept = accept_key(&request_key(&request));
            let response = format!(
                "HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
            );
            server.write_all(response.as_bytes()).await.unwrap();
            server
        });
        assert!(negotiate(&mut client, &url("ws://localhost/"), &options)
            .await
            .is_ok());

        let (mut client, mut server) = duplex(4096);
        tokio::spawn(async move {
            read_request(&mut server).await;
            server
                .write_all(b"HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: bogus\r\n\r\n")
                .await
                .unwrap();
            server
        });
        assert!(matches!(
            negotiate(&mut client, &url("ws://localhost/"), &options).await,
            Err(WebSocketError::HandshakeFailed(_))
        ));
    }
}
