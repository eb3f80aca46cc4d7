//! # Loopback Server Example
//!
//! Runs a tiny stand-in for the chat server on a local port and drives a
//! [`ChatClient`] against it end to end:
//!
//! 1. The server greets with `NO_ROOMS`
//! 2. The client creates a room and chats with an echo bot
//! 3. The client leaves the room and quits
//!
//! Useful for trying the client without the real server, or as a starting
//! point for tests against a scripted peer.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_server
//! ```

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use whisperers_client::{ChatClient, ChatConfig, ChatEvent};

// ─────────────────────────────────────────────────────────────────────
// Step 1: A one-client fake server
// ─────────────────────────────────────────────────────────────────────

/// Serve one connection until the client disconnects.
///
/// Handles just enough of the protocol for the demo: room creation, chat
/// (answered by an echo bot), the two disconnect commands and hang-up.
async fn serve(mut socket: TcpStream) -> std::io::Result<()> {
    socket.write_all(b"NO_ROOMS").await?;

    let mut buf = [0u8; 1024];
    let mut room = String::new();
    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let command = String::from_utf8_lossy(buf.get(..n).unwrap_or_default()).into_owned();
        tracing::info!("server received: {command}");

        let fields: Vec<&str> = command.split(';').collect();
        match fields.first().copied() {
            Some("CREATE_ROOM") => {
                room = fields.get(1).copied().unwrap_or_default().to_string();
                socket.write_all(b"CREATE_SUCCESS").await?;
            }
            Some("MESSAGE_ROOM") => {
                let text = fields.get(2).copied().unwrap_or_default();
                let reply = format!("MESSAGE;echo-bot;you said: {text}");
                socket.write_all(reply.as_bytes()).await?;
            }
            Some("DISCONNECT_ROOM") => tracing::info!("server: client left {room}"),
            Some("DISCONNECT") => return Ok(()),
            _ => tracing::warn!("server ignoring: {command}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Drive a client against it
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    let server: tokio::task::JoinHandle<std::io::Result<()>> = tokio::spawn(async move {
        let (socket, peer) = listener.accept().await?;
        tracing::info!("server accepted {peer}");
        serve(socket).await
    });

    let (mut client, mut events) =
        ChatClient::connect(&addr, "alice", ChatConfig::default()).await?;

    let code = client.create_room("demo-room", "", 3).await?;
    tracing::info!("create_room: {code}");
    code.into_result()?;

    for line in ["hello", "is anyone here?"] {
        client.send_chat(line).await?;

        // Wait for the echo bot before sending the next line.
        loop {
            match events.recv().await {
                Some(ChatEvent::ChatMessage { username, text }) => {
                    tracing::info!("{username}: {text}");
                    if username == "echo-bot" {
                        break;
                    }
                }
                Some(ChatEvent::SessionEnded { reason }) => {
                    return Err(format!("session ended early: {reason}").into());
                }
                Some(other) => tracing::debug!("event: {other:?}"),
                None => return Err("event channel closed".into()),
            }
        }
    }

    client.leave_room().await?;
    client.quit().await;
    server.await??;

    tracing::info!("Done. Loopback session completed.");
    Ok(())
}
