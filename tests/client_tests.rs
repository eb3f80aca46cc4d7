//! Integration-style session tests for the Whisperers client.
//!
//! Uses the in-memory `MockTransport` from `tests/common` to play the server
//! side and verify state transitions, the commands written, and the events
//! delivered to the presentation layer.

mod common;

use whisperers_client::{
    ChatError, ChatEvent, EndReason, PendingReply, ReplyCode, SessionState,
};

use common::{
    drain_handshake, listing, mock_pair, next_event, start_session, test_config, wait_for,
};

// ════════════════════════════════════════════════════════════════════
// Handshake and lobby
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn handshake_with_no_rooms_enters_empty_lobby() {
    let (client, mut events, server) = start_session("alice", "NO_ROOMS").await;

    match next_event(&mut events).await {
        ChatEvent::DirectoryChanged(directory) => assert!(directory.is_empty()),
        other => panic!("expected DirectoryChanged, got {other:?}"),
    }
    assert!(matches!(next_event(&mut events).await, ChatEvent::Connected));

    assert_eq!(client.state().await, SessionState::Lobby);
    assert_eq!(client.username(), "alice");
    assert!(client.current_room().await.is_none());
    assert!(server.sent().is_empty());
}

#[tokio::test]
async fn handshake_listing_populates_directory() {
    let rows = listing(&[("lounge", "", 1, 4), ("vault", "s3cret", 2, 2)]);
    let (client, mut events, _server) = start_session("alice", &rows).await;
    drain_handshake(&mut events).await;

    let directory = client.directory().await;
    assert_eq!(directory.len(), 2);
    let lounge = directory.get("lounge").unwrap();
    assert!(!lounge.is_locked);
    assert_eq!((lounge.current_users, lounge.max_users), (1, 4));
    let vault = directory.get("vault").unwrap();
    assert!(vault.is_locked);
    assert!(vault.is_full());
}

#[tokio::test]
async fn handshake_times_out_without_listing() {
    let (transport, _server) = mock_pair();
    let config = test_config().with_handshake_timeout(Some(std::time::Duration::from_millis(30)));

    let err = whisperers_client::ChatClient::start(transport, "alice", config)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Timeout));
}

#[tokio::test]
async fn shutdown_during_handshake_ends_session() {
    let (transport, server) = mock_pair();
    server.push("SERVER_SHUTDOWN");

    let err = whisperers_client::ChatClient::start(transport, "alice", test_config())
        .await
        .unwrap_err();
    assert!(err.is_session_ended());
    assert!(server.sent().is_empty());
}

#[tokio::test]
async fn poll_tick_applies_directory_update() {
    let (mut client, mut events, server) = start_session("alice", "NO_ROOMS").await;
    drain_handshake(&mut events).await;

    assert!(!client.poll_tick().await.unwrap(), "nothing ready yet");

    server.push("UPDATE_DATA;lounge;;1;5\n");
    assert!(client.poll_tick().await.unwrap());

    match next_event(&mut events).await {
        ChatEvent::DirectoryChanged(directory) => {
            assert_eq!(directory.len(), 1);
            assert!(directory.get("lounge").is_some());
        }
        other => panic!("expected DirectoryChanged, got {other:?}"),
    }
    assert_eq!(client.directory().await.len(), 1);
}

#[tokio::test]
async fn poll_tick_reads_at_most_one_chunk() {
    let (mut client, mut events, server) = start_session("alice", "NO_ROOMS").await;
    drain_handshake(&mut events).await;

    server.push(&listing(&[("a", "", 0, 3)]));
    server.push(&listing(&[("a", "", 0, 3), ("b", "", 0, 3)]));

    assert!(client.poll_tick().await.unwrap());
    assert_eq!(client.directory().await.len(), 1);
    assert!(client.poll_tick().await.unwrap());
    assert_eq!(client.directory().await.len(), 2);
}

#[tokio::test]
async fn lobby_commands_outside_a_room_are_rejected_locally() {
    let (mut client, mut events, server) = start_session("alice", "NO_ROOMS").await;
    drain_handshake(&mut events).await;

    let err = client.leave_room().await.unwrap_err();
    assert!(matches!(
        err,
        ChatError::InvalidState {
            action: "leave_room",
            state: SessionState::Lobby
        }
    ));
    let err = client.send_chat("hello").await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidState { .. }));
    assert!(server.sent().is_empty());
}

// ════════════════════════════════════════════════════════════════════
// Create / join
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn create_room_writes_command_and_enters_room() {
    let (mut client, mut events, server) = start_session("alice", "NO_ROOMS").await;
    drain_handshake(&mut events).await;

    server.push("CREATE_SUCCESS");
    let code = client.create_room("den", "", 4).await.unwrap();

    assert_eq!(code, ReplyCode::CreateSuccess);
    assert_eq!(server.sent(), ["CREATE_ROOM;den;;1;4;alice"]);
    assert_eq!(
        client.state().await,
        SessionState::InRoom { room: "den".into() }
    );
    assert!(client.is_streaming());

    assert!(matches!(
        next_event(&mut events).await,
        ChatEvent::Reply {
            request: PendingReply::Create,
            code: ReplyCode::CreateSuccess
        }
    ));
    match next_event(&mut events).await {
        ChatEvent::RoomEntered { room } => assert_eq!(room, "den"),
        other => panic!("expected RoomEntered, got {other:?}"),
    }

    client.quit().await;
}

#[tokio::test]
async fn join_room_uses_no_password_marker() {
    let (mut client, mut events, server) =
        start_session("bob", &listing(&[("lounge", "", 1, 4)])).await;
    drain_handshake(&mut events).await;

    server.push("JOIN_SUCCESS");
    let code = client.join_room("lounge", "").await.unwrap();

    assert!(code.is_success());
    assert_eq!(server.sent(), ["JOIN_ROOM;lounge;NO_PASSWORD;bob"]);
    assert_eq!(client.current_room().await.as_deref(), Some("lounge"));

    client.quit().await;
}

#[tokio::test]
async fn join_room_full_returns_to_lobby_without_entering() {
    let (mut client, mut events, server) =
        start_session("bob", &listing(&[("tiny", "", 2, 2)])).await;
    drain_handshake(&mut events).await;

    server.push("ROOM_FULL");
    let code = client.join_room("tiny", "").await.unwrap();

    assert_eq!(code, ReplyCode::RoomFull);
    assert_eq!(client.state().await, SessionState::Lobby);
    assert!(client.current_room().await.is_none());
    assert!(!client.is_streaming());

    assert!(matches!(
        next_event(&mut events).await,
        ChatEvent::Reply {
            request: PendingReply::Join,
            code: ReplyCode::RoomFull
        }
    ));
    // No RoomEntered ever follows a refusal.
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn each_join_failure_code_is_reported() {
    let cases = [
        ("INVALID_PASSWORD", ReplyCode::InvalidPassword),
        ("NO_ROOM", ReplyCode::NoRoom),
        ("EXISTING_USER", ReplyCode::ExistingUser),
    ];

    for (wire, expected) in cases {
        let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
        drain_handshake(&mut events).await;

        server.push(wire);
        let code = client.join_room("lounge", "pw").await.unwrap();
        assert_eq!(code, expected, "reply {wire}");
        assert!(!code.description().is_empty());
        assert!(matches!(code.into_result(), Err(ChatError::Rejected(c)) if c == expected));
        assert_eq!(client.state().await, SessionState::Lobby);
    }
}

#[tokio::test]
async fn unexpected_reply_is_other_failure() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;

    server.push("SOMETHING_ODD");
    let code = client.create_room("den", "", 3).await.unwrap();

    assert_eq!(code, ReplyCode::OtherFailure);
    assert_eq!(client.state().await, SessionState::Lobby);
}

#[tokio::test]
async fn directory_updates_before_reply_are_applied() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;

    // Another client created a room while our join was in flight.
    server.push("UPDATE_DATA;");
    server.push(&listing(&[("lounge", "", 1, 4)]));
    server.push("JOIN_SUCCESS");

    let code = client.join_room("lounge", "").await.unwrap();
    assert_eq!(code, ReplyCode::JoinSuccess);
    assert!(client.directory().await.get("lounge").is_some());

    client.quit().await;
}

#[tokio::test]
async fn invalid_fields_are_rejected_before_sending() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;

    for result in [
        client.create_room("", "", 3).await,
        client.create_room("a;b", "", 3).await,
        client.create_room("den", "p\nw", 3).await,
        client.create_room("den", "", 1).await,
        client.join_room("", "").await,
    ] {
        assert!(matches!(result, Err(ChatError::InvalidInput(_))));
    }
    assert_eq!(client.state().await, SessionState::Lobby);
    assert!(server.sent().is_empty());
}

// ════════════════════════════════════════════════════════════════════
// In room
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn chat_lines_from_others_are_streamed() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;
    server.push("JOIN_SUCCESS");
    client.join_room("lounge", "").await.unwrap();

    server.push("MESSAGE;alice;hi;UPDATE_DATA;lounge;;2;4\n");

    match wait_for(&mut events, |e| matches!(e, ChatEvent::ChatMessage { .. })).await {
        ChatEvent::ChatMessage { username, text } => {
            assert_eq!(username, "alice");
            assert_eq!(text, "hi");
        }
        other => panic!("expected ChatMessage, got {other:?}"),
    }
    match next_event(&mut events).await {
        ChatEvent::DirectoryChanged(directory) => {
            assert_eq!(directory.get("lounge").unwrap().current_users, 2);
        }
        other => panic!("expected DirectoryChanged, got {other:?}"),
    }

    client.quit().await;
}

#[tokio::test]
async fn send_chat_writes_and_echoes_locally() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;
    server.push("JOIN_SUCCESS");
    client.join_room("lounge", "").await.unwrap();

    client.send_chat("hello there").await.unwrap();

    assert_eq!(
        server.sent().last().map(String::as_str),
        Some("MESSAGE_ROOM;lounge;hello there;bob")
    );
    match wait_for(&mut events, |e| matches!(e, ChatEvent::ChatMessage { .. })).await {
        ChatEvent::ChatMessage { username, text } => {
            assert_eq!(username, "bob");
            assert_eq!(text, "hello there");
        }
        other => panic!("expected ChatMessage, got {other:?}"),
    }

    client.quit().await;
}

#[tokio::test]
async fn join_notice_is_chat_and_keeps_directory() {
    let rows = listing(&[("lounge", "", 1, 4), ("den", "pw", 2, 3)]);
    let (mut client, mut events, server) = start_session("alice", &rows).await;
    drain_handshake(&mut events).await;
    server.push("JOIN_SUCCESS");
    client.join_room("lounge", "").await.unwrap();

    server.push("Server;bob has joined the chatroom.");

    match wait_for(&mut events, |e| {
        matches!(
            e,
            ChatEvent::ChatMessage { .. } | ChatEvent::DirectoryChanged(_)
        )
    })
    .await
    {
        ChatEvent::ChatMessage { username, text } => {
            assert_eq!(username, "Server");
            assert_eq!(text, "bob has joined the chatroom.");
        }
        other => panic!("expected the join notice, got {other:?}"),
    }
    let directory = client.directory().await;
    assert_eq!(directory.len(), 2);
    assert!(directory.get("den").is_some());

    client.quit().await;
}

#[tokio::test]
async fn reply_glued_after_update_completes_join() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;

    server.push("UPDATE_DATA;x;;1;3\nJOIN_SUCCESS");
    let code = tokio::time::timeout(common::WAIT, client.join_room("x", ""))
        .await
        .expect("join_room hung on a glued reply")
        .unwrap();

    assert_eq!(code, ReplyCode::JoinSuccess);
    assert_eq!(
        client.state().await,
        SessionState::InRoom { room: "x".into() }
    );
    let directory = client.directory().await;
    assert_eq!(directory.len(), 1);
    assert_eq!(directory.get("x").unwrap().current_users, 1);

    client.quit().await;
}

#[tokio::test]
async fn chat_with_delimiter_is_rejected() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;
    server.push("JOIN_SUCCESS");
    client.join_room("lounge", "").await.unwrap();
    let before = server.sent().len();

    let err = client.send_chat("a;b").await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(_)));
    assert_eq!(server.sent().len(), before);

    client.quit().await;
}

#[tokio::test]
async fn leave_room_sends_disconnect_room_only() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;
    server.push("JOIN_SUCCESS");
    client.join_room("lounge", "").await.unwrap();

    client.leave_room().await.unwrap();

    assert_eq!(
        server.sent(),
        ["JOIN_ROOM;lounge;NO_PASSWORD;bob", "DISCONNECT_ROOM;lounge;bob"]
    );
    assert!(!server.sent().iter().any(|c| c == "DISCONNECT"));
    assert_eq!(client.state().await, SessionState::Lobby);
    assert!(!client.is_streaming());
    assert!(!server.transport_closed());
    match wait_for(&mut events, |e| matches!(e, ChatEvent::RoomLeft { .. })).await {
        ChatEvent::RoomLeft { room } => assert_eq!(room, "lounge"),
        other => panic!("expected RoomLeft, got {other:?}"),
    }

    // Back in poll mode: ticks read again.
    server.push("UPDATE_DATA;lounge;;0;4\n");
    assert!(client.poll_tick().await.unwrap());
}

#[tokio::test]
async fn rejoin_after_leaving() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;

    for _ in 0..3 {
        server.push("JOIN_SUCCESS");
        assert!(client.join_room("lounge", "").await.unwrap().is_success());
        client.leave_room().await.unwrap();
    }

    assert_eq!(client.state().await, SessionState::Lobby);
    assert_eq!(server.sent().len(), 6);
    assert!(server.probe.peak() <= 1);
}

// ════════════════════════════════════════════════════════════════════
// Termination
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn server_shutdown_in_lobby_terminates() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;

    server.push("SERVER_SHUTDOWN");
    assert!(client.poll_tick().await.unwrap());

    assert!(client.state().await.is_terminated());
    assert!(!client.send_disconnect_on_close());
    assert!(server.transport_closed());
    assert!(matches!(
        next_event(&mut events).await,
        ChatEvent::SessionEnded {
            reason: EndReason::ServerShutdown
        }
    ));

    let err = client.poll_tick().await.unwrap_err();
    assert!(err.is_session_ended());
    let err = client.join_room("lounge", "").await.unwrap_err();
    assert!(err.is_session_ended());
    assert!(server.sent().is_empty());
}

#[tokio::test]
async fn server_shutdown_in_room_refuses_chat_without_writing() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;
    server.push("JOIN_SUCCESS");
    client.join_room("lounge", "").await.unwrap();
    let written = server.sent().len();

    server.push("SERVER_SHUTDOWN");
    wait_for(&mut events, |e| matches!(e, ChatEvent::SessionEnded { .. })).await;

    let err = client.send_chat("anyone?").await.unwrap_err();
    assert!(err.is_session_ended());
    assert_eq!(err.to_string(), "session ended: cannot send_chat");
    assert_eq!(server.sent().len(), written);
    assert!(client.state().await.is_terminated());
    assert!(client.current_room().await.is_none());

    // Quit after shutdown never notifies the server.
    client.quit().await;
    assert_eq!(server.sent().len(), written);
    assert!(server.transport_closed());
}

#[tokio::test]
async fn server_shutdown_while_awaiting_reply() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;

    server.push("SERVER_SHUTDOWN");
    let err = client.join_room("lounge", "").await.unwrap_err();

    assert!(err.is_session_ended());
    assert!(client.state().await.is_terminated());
    assert!(server.transport_closed());
}

#[tokio::test]
async fn quit_from_room_leaves_without_bare_disconnect() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;
    server.push("JOIN_SUCCESS");
    client.join_room("lounge", "").await.unwrap();

    client.quit().await;

    assert_eq!(
        server.sent(),
        ["JOIN_ROOM;lounge;NO_PASSWORD;bob", "DISCONNECT_ROOM;lounge;bob"]
    );
    assert!(server.transport_closed());
    assert!(client.state().await.is_terminated());

    let last = wait_for(&mut events, |e| matches!(e, ChatEvent::SessionEnded { .. })).await;
    assert!(matches!(
        last,
        ChatEvent::SessionEnded {
            reason: EndReason::ClientQuit
        }
    ));
}

#[tokio::test]
async fn quit_after_clean_leave_stays_silent() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;
    server.push("JOIN_SUCCESS");
    client.join_room("lounge", "").await.unwrap();
    assert!(client.send_disconnect_on_close());

    client.leave_room().await.unwrap();
    assert_eq!(client.state().await, SessionState::Lobby);
    assert!(!client.send_disconnect_on_close());

    client.quit().await;

    assert_eq!(
        server.sent(),
        ["JOIN_ROOM;lounge;NO_PASSWORD;bob", "DISCONNECT_ROOM;lounge;bob"]
    );
    assert!(server.transport_closed());
}

#[tokio::test]
async fn read_failure_in_room_is_a_disconnect() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;
    server.push("JOIN_SUCCESS");
    client.join_room("lounge", "").await.unwrap();

    server.fail(ChatError::TransportReceive("connection reset".into()));

    match wait_for(&mut events, |e| matches!(e, ChatEvent::SessionEnded { .. })).await {
        ChatEvent::SessionEnded {
            reason: EndReason::Disconnected(reason),
        } => assert!(reason.contains("connection reset")),
        other => panic!("expected a disconnect, got {other:?}"),
    }
    assert!(client.state().await.is_terminated());
    assert!(!client.send_disconnect_on_close());
    assert!(client.send_chat("hello").await.unwrap_err().is_session_ended());
}

#[tokio::test]
async fn server_hang_up_in_lobby_is_reported() {
    let (mut client, mut events, server) = start_session("bob", "NO_ROOMS").await;
    drain_handshake(&mut events).await;

    server.fail(ChatError::TransportClosed);
    let err = client.poll_tick().await.unwrap_err();

    assert!(err.is_disconnect());
    assert!(client.state().await.is_terminated());
    assert!(matches!(
        next_event(&mut events).await,
        ChatEvent::SessionEnded {
            reason: EndReason::Disconnected(_)
        }
    ));
}
