use std::time::Duration;

use bytes::BytesMut;
use chessmata_ws::{
    codec::{Encoder, Role},
    Frame, GameHandler, GameSocket, OpCode, Options, WebSocketError,
};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(5);

struct Recorder(mpsc::UnboundedSender<String>);

impl GameHandler for Recorder {
    fn on_game_update(&self, data: Value) {
        let _ = self.0.send(format!("game_update {data}"));
    }

    fn on_opponent_move(&self, data: Value) {
        let _ = self.0.send(format!("move {data}"));
    }

    fn on_player_joined(&self, data: Value) {
        let _ = self.0.send(format!("player_joined {data}"));
    }

    fn on_resignation(&self, data: Value) {
        let _ = self.0.send(format!("resignation {data}"));
    }

    fn on_error(&self, message: String) {
        let _ = self.0.send(format!("error {message}"));
    }
}

fn text(payload: Value) -> BytesMut {
    let mut dst = BytesMut::new();
    Encoder::new(Role::Server).encode_frame(
        Frame::new(true, OpCode::Text, None, payload.to_string()),
        &mut dst,
    );
    dst
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    while !buf.ends_with(b"\r\n\r\n") {
        buf.push(stream.read_u8().await.unwrap());
    }
    String::from_utf8(buf).unwrap()
}

async fn next(events: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(WAIT, events.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_game_events_over_tcp() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;

        let mut response = BytesMut::from(
            &b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n"[..],
        );
        response.extend_from_slice(&text(json!({"type": "player_joined", "playerId": "p2"})));
        stream.write_all(&response).await.unwrap();

        // several messages in one write are delivered in order
        let mut burst = text(json!({"type": "move", "from": "e7", "to": "e5"}));
        burst.extend_from_slice(&text(json!({"type": "chat"})));
        burst.extend_from_slice(&text(json!({"type": "error", "message": "Not your turn"})));
        burst.extend_from_slice(&text(json!({"type": "error"})));
        stream.write_all(&burst).await.unwrap();

        let mut frame = BytesMut::from(&b"\x81\x08not json"[..]);
        frame.extend_from_slice(&text(json!({"type": "resignation", "playerId": "p2"})));
        stream.write_all(&frame).await.unwrap();

        // hold the stream until the client goes away
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
        (request, rest)
    });

    let (tx, mut events) = mpsc::unbounded_channel();
    let socket = GameSocket::new(
        &format!("http://{addr}"),
        "session-1",
        "p1",
        Recorder(tx),
        Options::default(),
    )?;
    assert_eq!(socket.endpoint().scheme(), "ws");

    socket.connect().await?;
    assert!(socket.connected());

    assert_eq!(next(&mut events).await, r#"player_joined {"playerId":"p2","type":"player_joined"}"#);
    assert_eq!(next(&mut events).await, r#"move {"from":"e7","to":"e5","type":"move"}"#);
    assert_eq!(next(&mut events).await, "error Not your turn");
    assert_eq!(next(&mut events).await, "error Unknown error");
    assert_eq!(next(&mut events).await, "error Invalid message: not json");
    assert_eq!(next(&mut events).await, r#"resignation {"playerId":"p2","type":"resignation"}"#);

    socket.disconnect().await;
    assert!(!socket.connected());

    let (request, rest) = server.await?;
    assert!(request.starts_with("GET /ws/games/session-1?playerId=p1 HTTP/1.1\r\n"));
    assert!(request.contains(&format!("Host: {addr}\r\n")));
    // the close frame: FIN + close opcode, masked, 2 byte code
    assert_eq!(&rest[..2], &[0x88, 0x82]);

    Ok(())
}

#[tokio::test]
async fn test_connect_failure_leaves_socket_disconnected() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let (tx, _events) = mpsc::unbounded_channel();
    let socket = GameSocket::new(
        &format!("http://{addr}"),
        "session-1",
        "p1",
        Recorder(tx),
        Options::default(),
    )?;

    assert!(matches!(
        socket.connect().await,
        Err(WebSocketError::ConnectFailed(_))
    ));
    assert!(!socket.connected());
    Ok(())
}

#[tokio::test]
async fn test_server_rejects_upgrade() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request(&mut stream).await;
        stream
            .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 16\r\n\r\nMissing playerId")
            .await
            .unwrap();
    });

    let (tx, _events) = mpsc::unbounded_channel();
    let socket = GameSocket::new(
        &format!("http://{addr}"),
        "session-1",
        "",
        Recorder(tx),
        Options::default(),
    )?;

    match socket.connect().await {
        Err(WebSocketError::HandshakeFailed(reason)) => assert!(reason.starts_with("HTTP/1.1 400")),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!socket.connected());
    Ok(())
}
