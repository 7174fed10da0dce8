//! Integration tests for TerminalClient against scripted mock terminals.
//!
//! Each mock accepts one connection, handles registration like a real
//! terminal and then misbehaves in one specific way.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use zvt_core::{ConnectionState, Error, constants::NACK_BUSY};
use zvt_network::{ClientConfig, TerminalClient};
use zvt_protocol::{CommandCode, Frame, TerminalMessage, ZvtCodec};

type Terminal = Framed<TcpStream, ZvtCodec>;

fn client_config(port: u16) -> ClientConfig {
    ClientConfig {
        port,
        connect_timeout_ms: 1_000,
        read_timeout_ms: 300,
        ack_timeout_ms: 200,
        ..Default::default()
    }
}

/// Accept one connection and answer its registration.
async fn accept_registered(listener: &TcpListener) -> Terminal {
    let (stream, _) = listener.accept().await.unwrap();
    let mut terminal = Framed::new(stream, ZvtCodec::new());

    let frame = terminal.next().await.unwrap().unwrap();
    assert_eq!(frame.command_code(), Some(CommandCode::Registration));
    terminal.send(Frame::Ack).await.unwrap();
    terminal
        .send(TerminalMessage::completion_with_code(0).to_frame().unwrap())
        .await
        .unwrap();
    assert_eq!(terminal.next().await.unwrap().unwrap(), Frame::Ack);
    terminal
}

async fn connected_client(listener: &TcpListener) -> (TerminalClient, Terminal) {
    let port = listener.local_addr().unwrap().port();
    let client = TerminalClient::new(client_config(port));
    client.connect().await.unwrap();
    let (registered, terminal) = tokio::join!(client.register(), accept_registered(listener));
    registered.unwrap();
    (client, terminal)
}

#[tokio::test]
async fn test_missing_ack_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (client, mut terminal) = connected_client(&listener).await;

    let mock = tokio::spawn(async move {
        // Read the command and stay silent.
        terminal.next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let err = client.authorize(100).await.unwrap_err();
    assert!(matches!(err, Error::Connection { .. }), "got {err:?}");
    assert_eq!(client.state(), ConnectionState::Error);
    mock.abort();

    // Error allows a fresh connect.
    let reconnect = tokio::spawn(async move { listener.accept().await.map(|_| ()) });
    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    reconnect.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_nack_is_a_terminal_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (client, mut terminal) = connected_client(&listener).await;

    tokio::spawn(async move {
        terminal.next().await.unwrap().unwrap();
        terminal.send(Frame::nack(NACK_BUSY)).await.unwrap();
        // Keep the socket open.
        terminal.next().await;
    });

    let err = client.authorize(100).await.unwrap_err();
    assert_eq!(err.result_code(), Some(NACK_BUSY));
    assert_eq!(client.state(), ConnectionState::Registered);
}

#[tokio::test]
async fn test_silence_inside_group_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (client, mut terminal) = connected_client(&listener).await;

    tokio::spawn(async move {
        terminal.next().await.unwrap().unwrap();
        terminal.send(Frame::Ack).await.unwrap();
        terminal
            .send(TerminalMessage::IntermediateStatus { code: 0x0A }.to_frame().unwrap())
            .await
            .unwrap();
        assert_eq!(terminal.next().await.unwrap().unwrap(), Frame::Ack);
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let err = client.authorize(100).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
    assert_eq!(client.state(), ConnectionState::Error);
    assert_eq!(client.statuses().history().len(), 1);
}

#[tokio::test]
async fn test_peer_closing_mid_group() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (client, mut terminal) = connected_client(&listener).await;

    tokio::spawn(async move {
        terminal.next().await.unwrap().unwrap();
        terminal.send(Frame::Ack).await.unwrap();
        drop(terminal);
    });

    let err = client.authorize(100).await.unwrap_err();
    assert!(matches!(err, Error::Connection { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_malformed_response_is_nacked() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (client, mut terminal) = connected_client(&listener).await;

    let mock = tokio::spawn(async move {
        terminal.next().await.unwrap().unwrap();
        terminal.send(Frame::Ack).await.unwrap();
        // Intermediate status without its status byte.
        terminal
            .send(Frame::apdu(CommandCode::IntermediateStatus, Vec::new()))
            .await
            .unwrap();
        terminal.next().await.unwrap().unwrap()
    });

    let err = client.authorize(100).await.unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }), "got {err:?}");
    assert!(matches!(mock.await.unwrap(), Frame::Nack { .. }));
}

#[tokio::test]
async fn test_disconnect_cancels_in_flight_command() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (client, mut terminal) = connected_client(&listener).await;
    let client = Arc::new(client);

    tokio::spawn(async move {
        terminal.next().await.unwrap().unwrap();
        terminal.send(Frame::Ack).await.unwrap();
        // Never finish the group.
        terminal.next().await;
    });

    let running = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.authorize(100).await })
    };
    // Well inside the 300ms read timeout.
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(1), client.disconnect())
        .await
        .expect("disconnect blocked on the running command");
    let err = running.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Connection { .. }), "got {err:?}");
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_state_changes_are_observable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = TerminalClient::new(client_config(port));
    let mut states = client.watch_state();

    client.connect().await.unwrap();
    states.changed().await.unwrap();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

    let (registered, _terminal) = tokio::join!(client.register(), accept_registered(&listener));
    registered.unwrap();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Registered);

    let messages: Vec<String> = client
        .logs()
        .history()
        .into_iter()
        .map(|entry| entry.message)
        .collect();
    assert!(messages.iter().any(|m| m.contains("Connected to")));
}

#[tokio::test]
async fn test_debug_mode_dumps_frames() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = TerminalClient::new(ClientConfig {
        debug: true,
        ..client_config(port)
    });

    client.connect().await.unwrap();
    let (registered, _terminal) = tokio::join!(client.register(), accept_registered(&listener));
    registered.unwrap();

    let messages: Vec<String> = client
        .logs()
        .history()
        .into_iter()
        .map(|entry| entry.message)
        .collect();
    assert!(messages.iter().any(|m| m.starts_with("-> 06 00")));
    assert!(messages.iter().any(|m| m.starts_with("<- 06 0F")));
}

#[tokio::test]
async fn test_unknown_completion_field_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (client, mut terminal) = connected_client(&listener).await;

    let mock = tokio::spawn(async move {
        terminal.next().await.unwrap().unwrap();
        terminal.send(Frame::Ack).await.unwrap();
        // Result code 00, then a tag no layout covers.
        terminal
            .send(Frame::apdu(
                CommandCode::Completion,
                vec![0x27, 0x00, 0xF7, 0x02, 0xAB, 0xCD],
            ))
            .await
            .unwrap();
        terminal.next().await.unwrap().unwrap()
    });

    let result = client.authorize(100).await.unwrap();
    assert!(result.success);
    assert_eq!(result.unknown_fields, vec![0xF7]);
    assert_eq!(mock.await.unwrap(), Frame::Ack);
    assert_eq!(client.state(), ConnectionState::Registered);
}
