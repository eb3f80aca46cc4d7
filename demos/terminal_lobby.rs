//! # Terminal Lobby Example
//!
//! A minimal line-oriented front-end for a Whisperers chat server:
//!
//! 1. Connect over TCP and wait for the room list
//! 2. Poll the lobby on a timer while typing commands
//! 3. Create or join a room and chat
//! 4. Quit cleanly on `/quit`, Ctrl+C or server shutdown
//!
//! ## Running
//!
//! ```sh
//! # Start the chat server on localhost:3000, then:
//! cargo run --example terminal_lobby -- alice
//!
//! # Override the server address:
//! WHISPERERS_ADDR=10.0.0.5:3000 cargo run --example terminal_lobby -- alice
//! ```
//!
//! Commands: `/rooms`, `/create <name> <capacity> [password]`,
//! `/join <name> [password]`, `/leave`, `/quit`. Anything else is sent as a
//! chat line while in a room.

use tokio::io::{AsyncBufReadExt, BufReader};
use whisperers_client::{
    ChatClient, ChatConfig, ChatError, ChatEvent, RoomDirectory, TcpTransport,
    DEFAULT_SERVER_ADDR,
};

fn print_directory(directory: &RoomDirectory) {
    if directory.is_empty() {
        println!("(no rooms yet, create one with /create)");
        return;
    }
    for room in directory {
        let lock = if room.is_locked { " [locked]" } else { "" };
        println!(
            "  {}{lock}  {}/{}",
            room.name, room.current_users, room.max_users
        );
    }
}

async fn handle_line(client: &mut ChatClient<TcpTransport>, line: &str) -> Result<bool, ChatError> {
    let mut words = line.split_whitespace();
    match words.next() {
        Some("/quit") => return Ok(false),
        Some("/rooms") => print_directory(&*client.directory().await),
        Some("/leave") => client.leave_room().await?,
        Some("/create") => {
            let (Some(name), Some(capacity)) = (words.next(), words.next()) else {
                println!("usage: /create <name> <capacity> [password]");
                return Ok(true);
            };
            let Ok(capacity) = capacity.parse() else {
                println!("capacity must be a number");
                return Ok(true);
            };
            let password = words.next().unwrap_or_default();
            let code = client.create_room(name, password, capacity).await?;
            println!("{code}");
        }
        Some("/join") => {
            let Some(name) = words.next() else {
                println!("usage: /join <name> [password]");
                return Ok(true);
            };
            let password = words.next().unwrap_or_default();
            let code = client.join_room(name, password).await?;
            println!("{code}");
        }
        Some(_) => client.send_chat(line.trim()).await?,
        None => {}
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for protocol-level output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let addr =
        std::env::var("WHISPERERS_ADDR").unwrap_or_else(|_| DEFAULT_SERVER_ADDR.to_string());
    let username = std::env::args().nth(1).unwrap_or_else(|| "guest".to_string());
    tracing::info!("Connecting to {addr} as {username}");

    // ── Connect ─────────────────────────────────────────────────────
    let (mut client, mut events) =
        ChatClient::connect(&addr, username, ChatConfig::default()).await?;
    let mut ticker = client.poll_ticker();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    // ── Main loop ───────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ChatEvent::Connected => println!("Connected. Type /rooms to list rooms."),
                    ChatEvent::DirectoryChanged(_) => {}
                    ChatEvent::Reply { .. } => {}
                    ChatEvent::RoomEntered { room } => println!("-- entered {room} --"),
                    ChatEvent::RoomLeft { room } => println!("-- left {room} --"),
                    ChatEvent::ChatMessage { username, text } => println!("{username}: {text}"),
                    ChatEvent::SessionEnded { reason } => {
                        println!("Session ended: {reason}");
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                if let Err(e) = client.poll_tick().await {
                    tracing::warn!("lobby poll failed: {e}");
                }
            }

            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                match handle_line(&mut client, &line).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) if e.is_session_ended() => break,
                    Err(e) => println!("error: {e}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received");
                break;
            }
        }
    }

    // ── Clean shutdown ──────────────────────────────────────────────
    client.quit().await;
    tracing::info!("Goodbye");
    Ok(())
}
