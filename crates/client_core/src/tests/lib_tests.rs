use super::*;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};

const WAIT: Duration = Duration::from_secs(3);

fn test_config(addr: std::net::SocketAddr) -> ClientConfig {
    ClientConfig {
        connect_timeout: Duration::from_millis(500),
        ack_timeout: Duration::from_millis(500),
        backoff_initial: Duration::from_millis(20),
        backoff_max: Duration::from_millis(160),
        heartbeat_interval: None,
        ..ClientConfig::new(addr.to_string())
    }
}

async fn unused_addr() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn read_line(reader: &mut BufReader<TcpStream>) -> Option<String> {
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end().to_string()),
    }
}

/// Answers every line with `OK` (or `OK: PONG` for heartbeats) and records it.
async fn echo_ok(stream: TcpStream, seen: Arc<Mutex<Vec<String>>>) {
    let mut reader = BufReader::new(stream);
    while let Some(line) = read_line(&mut reader).await {
        let reply = if line == "PING" { "OK: PONG\n" } else { "OK\n" };
        seen.lock().await.push(line);
        if reader.get_mut().write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn next_state(
    events: &mut broadcast::Receiver<ClientEvent>,
    state: ConnectionState,
) -> ConnectionStatus {
    tokio::time::timeout(WAIT, async {
        loop {
            if let ClientEvent::StateChanged(status) = events.recv().await.unwrap() {
                if status.state == state {
                    return status;
                }
            }
        }
    })
    .await
    .unwrap()
}

#[test]
fn with_default_port_appends_missing_port() {
    assert_eq!(with_default_port("192.168.1.20".to_string()), "192.168.1.20:9999");
    assert_eq!(with_default_port(" deck.local ".to_string()), "deck.local:9999");
    assert_eq!(with_default_port("10.0.0.5:7000".to_string()), "10.0.0.5:7000");
    assert_eq!(with_default_port("::1".to_string()), "[::1]:9999");
    assert_eq!(with_default_port("[::1]:7000".to_string()), "[::1]:7000");
}

#[tokio::test]
async fn new_manager_starts_idle_and_rejects_sends_without_traffic() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let manager = ConnectionManager::new(test_config(listener.local_addr().unwrap()));

    assert_eq!(manager.state(), ConnectionState::Idle);
    assert_eq!(
        manager.send("OPEN_CHROME").await,
        Err(ChannelError::NotConnected)
    );

    let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(accepted.is_err(), "idle manager must not open a connection");
}

#[tokio::test]
async fn send_rejects_invalid_identifier_before_touching_the_connection() {
    let manager = ConnectionManager::new(test_config(unused_addr().await));

    let err = manager.send("open chrome").await.unwrap_err();

    assert!(matches!(err, ChannelError::InvalidCommand(_)));
    assert!(!err.is_transport());
}

#[tokio::test]
async fn start_connects_and_send_returns_exactly_one_ack() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let manager = ConnectionManager::new(test_config(listener.local_addr().unwrap()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let server_seen = Arc::clone(&seen);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        echo_ok(stream, server_seen).await;
    });
    let mut events = manager.subscribe_events();

    manager.start().await;
    assert!(manager.wait_for_state(ConnectionState::Connected, WAIT).await);

    let ack = manager.send("OPEN_CHROME").await.unwrap();
    assert_eq!(ack, Acknowledgement::ok());
    assert_eq!(*seen.lock().await, vec!["OPEN_CHROME".to_string()]);

    let mut acknowledged = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::Acknowledged { command, ack } = event {
            acknowledged.push((command.to_string(), ack));
        }
    }
    assert_eq!(
        acknowledged,
        vec![("OPEN_CHROME".to_string(), Acknowledgement::ok())]
    );

    manager.stop().await;
    assert_eq!(manager.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn error_acknowledgement_is_returned_not_treated_as_transport_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let manager = ConnectionManager::new(test_config(listener.local_addr().unwrap()));
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        while read_line(&mut reader).await.is_some() {
            reader
                .get_mut()
                .write_all(b"ERROR: unknown command\n")
                .await
                .unwrap();
        }
    });

    manager.start().await;
    assert!(manager.wait_for_state(ConnectionState::Connected, WAIT).await);

    let ack = manager.send("OPEN_FOO").await.unwrap();
    assert_eq!(ack, Acknowledgement::error("unknown command"));
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.stop().await;
}

#[tokio::test]
async fn unreachable_server_reconnects_with_growing_capped_backoff() {
    let manager = ConnectionManager::new(test_config(unused_addr().await));
    let mut status = manager.watch_status();

    manager.start().await;

    let mut delays = Vec::new();
    let mut attempts = Vec::new();
    tokio::time::timeout(WAIT, async {
        while delays.len() < 5 {
            status.changed().await.unwrap();
            let current = status.borrow_and_update().clone();
            if current.state == ConnectionState::Reconnecting {
                assert!(current.last_error.is_some());
                delays.push(current.retry_in.unwrap());
                attempts.push(current.attempt);
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(manager.send("OPEN_CHROME").await, Err(ChannelError::NotConnected));
    manager.stop().await;

    assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]), "{delays:?}");
    assert!(delays.iter().all(|delay| *delay <= Duration::from_millis(160)));
    assert!(attempts.windows(2).all(|pair| pair[0] < pair[1]), "{attempts:?}");
    assert_eq!(manager.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn dropped_connection_moves_to_reconnecting_then_recovers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let manager = ConnectionManager::new(test_config(listener.local_addr().unwrap()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let server_seen = Arc::clone(&seen);
    tokio::spawn(async move {
        let (first, _) = listener.accept().await.unwrap();
        drop(first);
        let (second, _) = listener.accept().await.unwrap();
        echo_ok(second, server_seen).await;
    });
    let mut events = manager.subscribe_events();

    manager.start().await;

    let mut states = Vec::new();
    tokio::time::timeout(WAIT, async {
        let mut connected = 0;
        while connected < 2 {
            if let ClientEvent::StateChanged(status) = events.recv().await.unwrap() {
                if status.state == ConnectionState::Connected {
                    connected += 1;
                }
                states.push(status.state);
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Connected,
        ]
    );
    assert_eq!(manager.status().attempt, 0);
    assert_eq!(manager.send("MEDIA_NEXT").await, Ok(Acknowledgement::ok()));
    assert_eq!(*seen.lock().await, vec!["MEDIA_NEXT".to_string()]);

    manager.stop().await;
}

#[tokio::test]
async fn missing_acknowledgement_times_out_and_triggers_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = test_config(listener.local_addr().unwrap());
    config.ack_timeout = Duration::from_millis(150);
    let manager = ConnectionManager::new(config);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        // Swallow everything, never acknowledge.
        while read_line(&mut reader).await.is_some() {}
    });

    let mut events = manager.subscribe_events();

    manager.start().await;
    next_state(&mut events, ConnectionState::Connected).await;

    let err = manager.send("MEDIA_PLAY_PAUSE").await.unwrap_err();
    assert_eq!(err, ChannelError::Timeout(Duration::from_millis(150)));
    let status = next_state(&mut events, ConnectionState::Reconnecting).await;
    assert_eq!(status.attempt, 1);

    manager.stop().await;
}

#[tokio::test]
async fn unrecognized_acknowledgement_is_a_protocol_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let manager = ConnectionManager::new(test_config(listener.local_addr().unwrap()));
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        if read_line(&mut reader).await.is_some() {
            reader.get_mut().write_all(b"HELLO\n").await.unwrap();
        }
        while read_line(&mut reader).await.is_some() {}
    });

    let mut events = manager.subscribe_events();

    manager.start().await;
    next_state(&mut events, ConnectionState::Connected).await;

    let err = manager.send("OPEN_SAFARI").await.unwrap_err();
    assert!(matches!(err, ChannelError::Protocol(_)), "{err:?}");
    next_state(&mut events, ConnectionState::Reconnecting).await;

    manager.stop().await;
}

#[tokio::test]
async fn stop_cancels_in_flight_send_and_returns_to_idle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = test_config(listener.local_addr().unwrap());
    config.ack_timeout = Duration::from_secs(10);
    let manager = Arc::new(ConnectionManager::new(config));
    let (received_tx, received_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        if let Some(line) = read_line(&mut reader).await {
            let _ = received_tx.send(line);
        }
        while read_line(&mut reader).await.is_some() {}
    });

    manager.start().await;
    assert!(manager.wait_for_state(ConnectionState::Connected, WAIT).await);

    let sender = Arc::clone(&manager);
    let pending = tokio::spawn(async move { sender.send("OPEN_TERMINAL").await });
    assert_eq!(received_rx.await.unwrap(), "OPEN_TERMINAL");

    manager.stop().await;

    let result = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap();
    assert_eq!(result, Err(ChannelError::Cancelled));
    assert_eq!(manager.state(), ConnectionState::Idle);
    assert_eq!(manager.send("OPEN_TERMINAL").await, Err(ChannelError::NotConnected));
}

#[tokio::test]
async fn stop_during_backoff_halts_retries() {
    let manager = ConnectionManager::new(ClientConfig {
        backoff_initial: Duration::from_secs(30),
        backoff_max: Duration::from_secs(30),
        ..test_config(unused_addr().await)
    });

    manager.start().await;
    assert!(manager.wait_for_state(ConnectionState::Reconnecting, WAIT).await);

    tokio::time::timeout(Duration::from_secs(1), manager.stop())
        .await
        .expect("stop must not wait out the backoff delay");
    assert_eq!(manager.status(), ConnectionStatus::idle());
}

#[tokio::test]
async fn start_after_stop_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let manager = ConnectionManager::new(test_config(listener.local_addr().unwrap()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let server_seen = Arc::clone(&seen);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(echo_ok(stream, Arc::clone(&server_seen)));
        }
    });

    manager.start().await;
    manager.start().await;
    assert!(manager.wait_for_state(ConnectionState::Connected, WAIT).await);
    manager.stop().await;
    assert_eq!(manager.state(), ConnectionState::Idle);

    manager.start().await;
    assert!(manager.wait_for_state(ConnectionState::Connected, WAIT).await);
    assert_eq!(manager.send("MEDIA_MUTE").await, Ok(Acknowledgement::ok()));
    assert_eq!(*seen.lock().await, vec!["MEDIA_MUTE".to_string()]);

    manager.stop().await;
}

#[tokio::test]
async fn heartbeat_pings_idle_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = test_config(listener.local_addr().unwrap());
    config.heartbeat_interval = Some(Duration::from_millis(50));
    let manager = ConnectionManager::new(config);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let server_seen = Arc::clone(&seen);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        echo_ok(stream, server_seen).await;
    });

    manager.start().await;
    assert!(manager.wait_for_state(ConnectionState::Connected, WAIT).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let pings = seen.lock().await.iter().filter(|line| *line == "PING").count();
    assert!(pings >= 2, "expected heartbeats, saw {pings}");
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.stop().await;
}

#[tokio::test]
async fn silent_server_is_detected_by_heartbeat() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = test_config(listener.local_addr().unwrap());
    config.heartbeat_interval = Some(Duration::from_millis(50));
    config.ack_timeout = Duration::from_millis(100);
    let manager = ConnectionManager::new(config);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        while read_line(&mut reader).await.is_some() {}
    });

    let mut events = manager.subscribe_events();

    manager.start().await;
    next_state(&mut events, ConnectionState::Connected).await;
    let status = next_state(&mut events, ConnectionState::Reconnecting).await;
    assert!(status
        .last_error
        .is_some_and(|reason| reason.contains("heartbeat")));

    manager.stop().await;
}
