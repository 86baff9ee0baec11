//! Follows a game session and logs every event.
//!
//! ```text
//! cargo run --example watch_game -- http://localhost:9029 <session-id> <player-id>
//! ```
use chessmata_ws::{ConnectionState, GameHandler, GameSocket, Options};
use serde_json::Value;

struct Logger;

impl GameHandler for Logger {
    fn on_game_update(&self, data: Value) {
        log::info!("game update: {data}");
    }

    fn on_opponent_move(&self, data: Value) {
        let from = data["from"].as_str().unwrap_or("?");
        let to = data["to"].as_str().unwrap_or("?");
        log::info!("opponent moved {from} -> {to}");
    }

    fn on_player_joined(&self, data: Value) {
        log::info!("player joined: {data}");
    }

    fn on_resignation(&self, data: Value) {
        log::info!("resignation: {data}");
    }

    fn on_error(&self, message: String) {
        log::error!("{message}");
    }
}

#[tokio::main]
async fn main() -> chessmata_ws::Result<()> {
    simple_logger::init_with_level(log::Level::Debug).expect("log");

    let mut args = std::env::args().skip(1);
    let server = args
        .next()
        .unwrap_or_else(|| "http://localhost:9029".to_string());
    let session = args.next().expect("session id");
    let player = args.next().expect("player id");

    let socket = GameSocket::new(&server, &session, &player, Logger, Options::default())?;
    socket.connect().await?;
    log::info!("watching {}", socket.endpoint());

    let mut states = socket.connection().subscribe();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted");
            socket.disconnect().await;
        }
        _ = states.wait_for(|state| *state == ConnectionState::Closed) => {
            log::info!("server closed the game channel");
        }
    }

    socket.connection().join().await;
    Ok(())
}
