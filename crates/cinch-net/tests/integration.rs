//! End-to-end tests over real localhost sockets.

use std::net::TcpListener;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cinch_core::{read_frame, Packet};
use cinch_crypto::{Handshake, RsaIdentity, BLOCK_SIZE};
use cinch_net::{ConnState, ConnectionConfig, Connection, DeliveryMode, DisconnectReason, NetError};

const TEST_BITS: usize = 2048;
const APP_TYPE: u32 = 100;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "cinch_net=debug".into()))
        .try_init();
}

fn test_identity() -> RsaIdentity {
    RsaIdentity::generate_with_bits(TEST_BITS).unwrap()
}

/// Spin up a connected pair over a loopback socket.
fn pair(config_a: ConnectionConfig, config_b: ConnectionConfig) -> (Connection, Connection) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        Connection::wrap(stream, test_identity(), config_b).unwrap()
    });

    let client = Connection::connect(addr, test_identity(), config_a).unwrap();
    (client, server.join().unwrap())
}

fn pull_config() -> ConnectionConfig {
    ConnectionConfig {
        delivery_mode: DeliveryMode::Pull,
        ..ConnectionConfig::default()
    }
}

#[test]
fn push_round_trip() {
    let (a, b) = pair(ConnectionConfig::default(), ConnectionConfig::default());

    let (tx, rx) = mpsc::channel();
    b.on_packet(move |packet, wire_len| {
        tx.send((packet, wire_len)).unwrap();
    });

    let sent = a.send(Packet::new(APP_TYPE, b"hello".to_vec())).unwrap();
    assert!(sent > 0);

    let (packet, wire_len) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(packet.type_id, APP_TYPE);
    assert_eq!(packet.data, b"hello");
    assert_eq!(wire_len, sent);

    a.close().unwrap();
    b.close().unwrap();
}

#[test]
fn pull_round_trip_both_directions() {
    let (a, b) = pair(pull_config(), pull_config());

    a.send(Packet::new(APP_TYPE, b"ping".to_vec())).unwrap();
    let (packet, _) = b.recv(Duration::from_secs(5)).unwrap();
    assert_eq!(packet.data, b"ping");

    b.send(Packet::new(APP_TYPE, b"pong".to_vec())).unwrap();
    let (packet, _) = a.recv(Duration::from_secs(5)).unwrap();
    assert_eq!(packet.data, b"pong");

    a.close().unwrap();
    b.close().unwrap();
}

#[test]
fn recv_requires_pull_mode() {
    let (a, b) = pair(ConnectionConfig::default(), ConnectionConfig::default());
    assert!(matches!(
        a.recv(Duration::from_millis(10)),
        Err(NetError::NotPullMode)
    ));
    a.close().unwrap();
    b.close().unwrap();
}

#[test]
fn backpressure_caps_queue_without_dropping() {
    let (a, b) = pair(pull_config(), pull_config());

    const TOTAL: u8 = 30;
    for n in 0..TOTAL {
        b.send(Packet::new(APP_TYPE, vec![n])).unwrap();
    }

    // Let the receiver buffer as much as it will; the queue must stop
    // at capacity while the rest waits in the socket.
    thread::sleep(Duration::from_millis(500));
    assert!(a.queued() <= 20, "queue grew to {}", a.queued());

    for n in 0..TOTAL {
        let (packet, _) = a.recv(Duration::from_secs(5)).unwrap();
        assert_eq!(packet.data, vec![n], "out of order at {n}");
    }

    a.close().unwrap();
    b.close().unwrap();
}

#[test]
fn mode_switch_preserves_arrival_order() {
    let (a, b) = pair(pull_config(), ConnectionConfig::default());

    for n in 0u8..5 {
        b.send(Packet::new(APP_TYPE, vec![n])).unwrap();
    }
    for n in 0u8..2 {
        let (packet, _) = a.recv(Duration::from_secs(5)).unwrap();
        assert_eq!(packet.data, vec![n]);
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        a.on_packet(move |packet, _| {
            seen.lock().unwrap().push(packet.data[0]);
        });
    }

    // Switching to push flushes the three still-queued packets first.
    a.set_delivery_mode(DeliveryMode::Push);
    for n in 5u8..10 {
        b.send(Packet::new(APP_TYPE, vec![n])).unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if seen.lock().unwrap().len() == 8 {
            break;
        }
        assert!(Instant::now() < deadline, "push delivery stalled");
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(*seen.lock().unwrap(), vec![2, 3, 4, 5, 6, 7, 8, 9]);

    a.close().unwrap();
    b.close().unwrap();
}

#[test]
fn ids_are_exchanged_after_connect() {
    let (a, b) = pair(ConnectionConfig::default(), ConnectionConfig::default());

    let deadline = Instant::now() + Duration::from_secs(5);
    while (a.remote_id().is_none() || b.remote_id().is_none()) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(a.remote_id(), Some(b.connection_id()));
    assert_eq!(b.remote_id(), Some(a.connection_id()));
    assert_ne!(a.connection_id(), b.connection_id());

    a.close().unwrap();
    b.close().unwrap();
}

#[test]
fn rekey_on_age_keeps_connection_alive() {
    let config = ConnectionConfig {
        max_key_age: Duration::from_millis(300),
        read_timeout: Duration::from_millis(50),
        ..ConnectionConfig::default()
    };
    let (a, b) = pair(config.clone(), config);

    let (tx, rx) = mpsc::channel();
    b.on_packet(move |packet, _| {
        tx.send(packet.data).unwrap();
    });

    // Outlive several key-age windows.
    thread::sleep(Duration::from_millis(1200));

    assert_eq!(a.state(), ConnState::Connected);
    assert_eq!(b.state(), ConnState::Connected);
    // At least one rotation happened.
    assert!(a.time_since_handshake() < Duration::from_millis(1200));

    // Traffic still flows on the rotated keys.
    a.send(Packet::new(APP_TYPE, b"after rekey".to_vec())).unwrap();
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        b"after rekey"
    );

    a.close().unwrap();
    b.close().unwrap();
}

#[test]
fn graceful_close_reaches_peer_as_disconnect() {
    let (a, b) = pair(ConnectionConfig::default(), ConnectionConfig::default());

    let (tx, rx) = mpsc::channel();
    b.on_disconnect(move |reason| {
        tx.send(reason).unwrap();
    });

    a.close().unwrap();

    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        DisconnectReason::Disconnect
    );
    let deadline = Instant::now() + Duration::from_secs(5);
    while b.state() == ConnState::Connected && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(b.state(), ConnState::Disconnected);
    b.close().unwrap();
}

#[test]
fn missed_rekey_window_force_closes() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    // Peer that completes the handshake, then never answers anything —
    // in particular not the re-key request.
    let silent_peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let identity = test_identity();
        let ciphers = Handshake::new(&mut stream, &identity).full().unwrap();
        // Consume the id advertisement so nothing backs up.
        let (ciphertext, _) = read_frame(&mut stream, BLOCK_SIZE).unwrap();
        ciphers.decryptor.decrypt(&ciphertext).unwrap();
        thread::sleep(Duration::from_secs(3));
    });

    let config = ConnectionConfig {
        max_key_age: Duration::from_millis(200),
        max_age_skew: Duration::from_millis(200),
        read_timeout: Duration::from_millis(50),
        ..ConnectionConfig::default()
    };
    let conn = Connection::connect(addr, test_identity(), config).unwrap();
    let established = Instant::now();

    let (tx, rx) = mpsc::channel();
    conn.on_disconnect(move |reason| {
        tx.send(reason).unwrap();
    });

    // Age-out at 200ms, request, then force-close 200ms later. Both
    // measured from the handshake, so the whole thing wraps up around
    // 400ms plus the 50ms read tick.
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        DisconnectReason::Error
    );
    let elapsed = established.elapsed();
    assert!(
        elapsed >= Duration::from_millis(350),
        "force-closed too early: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_millis(560),
        "force-close overshot the grace window: {elapsed:?}"
    );
    assert_eq!(conn.state(), ConnState::Disconnected);

    drop(conn);
    silent_peer.join().unwrap();
}
