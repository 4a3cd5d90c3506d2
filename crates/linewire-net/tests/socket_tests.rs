//! Integration tests for the socket manager over loopback.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use linewire_net::{
    ConnectionState, NetworkError, SocketConfig, SocketManager, SocketManagerBuilder,
    StaleBufferPolicy,
};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

/// Route library logs through the test harness. Set `RUST_LOG` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn test_config() -> SocketConfig {
    SocketConfig::new()
        .read_timeout(Duration::from_millis(200))
        .connect_timeout(Duration::from_secs(2))
        .stop_timeout(Duration::from_secs(2))
}

/// Everything a manager announced, in delivery order per category.
#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<bool>>,
    listen_states: Mutex<Vec<bool>>,
    receive_states: Mutex<Vec<bool>>,
    data: Mutex<Vec<String>>,
    messages: Mutex<Vec<(String, String)>>,
    errors: Mutex<Vec<NetworkError>>,
    clients: Mutex<Vec<Arc<SocketManager>>>,
    /// Errors and connect states interleaved, as delivered.
    connection_log: Mutex<Vec<String>>,
}

fn attach(recorder: &Arc<Recorder>, builder: SocketManagerBuilder) -> SocketManagerBuilder {
    let (r1, r2, r3, r4, r5, r6, r7) = (
        recorder.clone(),
        recorder.clone(),
        recorder.clone(),
        recorder.clone(),
        recorder.clone(),
        recorder.clone(),
        recorder.clone(),
    );
    builder
        .on_connect_state(move |connected| {
            r1.states.lock().push(connected);
            r1.connection_log.lock().push(format!("state:{connected}"));
        })
        .on_error(move |err| {
            r2.errors.lock().push(err.clone());
            r2.connection_log.lock().push(format!("error:{err}"));
        })
        .on_listen_state(move |listening| r3.listen_states.lock().push(listening))
        .on_receive_state(move |receiving| r4.receive_states.lock().push(receiving))
        .on_data_received(move |text| r5.data.lock().push(text.to_string()))
        .on_message_received(move |message, pattern| {
            r6.messages
                .lock()
                .push((message.to_string(), pattern.to_string()))
        })
        .on_client_connected(move |client| r7.clients.lock().push(client.clone()))
}

fn manager() -> (SocketManager, Arc<Recorder>) {
    manager_with(test_config())
}

fn manager_with(config: SocketConfig) -> (SocketManager, Arc<Recorder>) {
    init_tracing();
    let recorder = Arc::new(Recorder::default());
    let manager = attach(&recorder, SocketManager::builder().config(config)).build();
    (manager, recorder)
}

/// A plain std listener plus a connected manager.
fn connected_pair() -> (SocketManager, Arc<Recorder>, TcpStream) {
    connected_pair_with(test_config())
}

fn connected_pair_with(config: SocketConfig) -> (SocketManager, Arc<Recorder>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let (manager, recorder) = manager_with(config);
    assert!(manager.connect_to("127.0.0.1", port, Duration::from_secs(2)));
    let (peer, _) = listener.accept().unwrap();
    (manager, recorder, peer)
}

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn test_refused_connect_reports_once() {
    let (manager, recorder) = manager();
    let port = closed_port();

    let started = Instant::now();
    assert!(!manager.connect_to("127.0.0.1", port, Duration::from_millis(100)));
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(manager.wait_for_events(Duration::from_secs(2)));
    assert_eq!(*recorder.states.lock(), vec![false]);
    assert_eq!(recorder.errors.lock().len(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.has_error());
}

#[test]
fn test_unreachable_connect_returns_within_timeout() {
    let (manager, recorder) = manager();

    let started = Instant::now();
    assert!(!manager.connect_to("10.255.255.1", 9, Duration::from_millis(100)));
    assert!(started.elapsed() < Duration::from_millis(500));

    assert!(manager.wait_for_events(Duration::from_secs(2)));
    assert_eq!(*recorder.states.lock(), vec![false]);
}

#[test]
fn test_invalid_address_is_reported() {
    let (manager, recorder) = manager();

    assert!(!manager.connect_to("not-an-ip", 80, Duration::from_millis(100)));
    assert!(manager.wait_for_events(Duration::from_secs(2)));

    assert_eq!(
        *recorder.errors.lock(),
        vec![NetworkError::InvalidAddress("not-an-ip:80".into())]
    );
    assert_eq!(*recorder.states.lock(), vec![false]);
}

#[test]
fn test_connect_and_close() {
    let (manager, recorder, _peer) = connected_pair();
    assert!(manager.is_connected());
    assert!(manager.peer_addr().is_some());
    assert!(!manager.has_error());

    manager.close();
    manager.close();
    assert!(!manager.is_connected());

    assert!(manager.wait_for_events(Duration::from_secs(2)));
    assert_eq!(*recorder.states.lock(), vec![true, false, false]);
}

#[test]
fn test_close_without_connection_emits_once() {
    let (manager, recorder) = manager();
    manager.close();

    assert!(manager.wait_for_events(Duration::from_secs(2)));
    assert_eq!(*recorder.states.lock(), vec![false]);
    assert!(recorder.errors.lock().is_empty());
}

#[test]
fn test_terminator_frame_split_across_writes() {
    let (manager, recorder, mut peer) = connected_pair();
    assert!(manager.start_receive_async('\n'));

    peer.write_all(b"abc").unwrap();
    std::thread::sleep(Duration::from_millis(5));
    peer.write_all(b"\n").unwrap();

    assert!(wait_until(Duration::from_secs(2), || !recorder.data.lock().is_empty()));
    assert_eq!(*recorder.data.lock(), vec!["abc\n".to_string()]);
}

#[test]
fn test_pattern_messages() {
    let (manager, recorder, mut peer) = connected_pair();
    assert!(manager.start_receive_messages("[$]", "[*][A-Z0-9][A-Z0-9]"));

    peer.write_all(b"$12.5*0F").unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        !recorder.messages.lock().is_empty()
    }));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        *recorder.messages.lock(),
        vec![(
            "$12.5*0F".to_string(),
            "[$](?s)(.*?)[*][A-Z0-9][A-Z0-9]".to_string()
        )]
    );
}

/// Pattern session with the NMEA-style `$...*XX` framing, already running.
fn pattern_session(stale_buffer: StaleBufferPolicy) -> (SocketManager, Arc<Recorder>, TcpStream) {
    let (manager, recorder, peer) = connected_pair_with(test_config().stale_buffer(stale_buffer));
    assert!(manager.start_receive_messages("[$]", "[*][A-Z0-9][A-Z0-9]"));
    assert!(wait_until(Duration::from_secs(2), || {
        !recorder.receive_states.lock().is_empty()
    }));
    (manager, recorder, peer)
}

fn message_texts(recorder: &Recorder) -> Vec<String> {
    recorder
        .messages
        .lock()
        .iter()
        .map(|(message, _)| message.clone())
        .collect()
}

#[test]
fn test_pattern_message_with_character_split_across_writes() {
    let (_manager, recorder, mut peer) = pattern_session(StaleBufferPolicy::Keep);
    let bytes = "$\u{e9}*0F".as_bytes();

    // Split inside the two-byte "é".
    peer.write_all(&bytes[..2]).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    peer.write_all(&bytes[2..]).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        !recorder.messages.lock().is_empty()
    }));
    assert_eq!(message_texts(&recorder), vec!["$\u{e9}*0F".to_string()]);
}

#[test]
fn test_stale_partial_message_is_discarded() {
    let (_manager, recorder, mut peer) =
        pattern_session(StaleBufferPolicy::Discard(Duration::from_millis(100)));

    peer.write_all(b"$12.").unwrap();
    std::thread::sleep(Duration::from_millis(400));
    peer.write_all(b"5*0F$1*AB").unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        !recorder.messages.lock().is_empty()
    }));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(message_texts(&recorder), vec!["$1*AB".to_string()]);
}

#[test]
fn test_partial_message_is_kept_without_stale_window() {
    let (_manager, recorder, mut peer) = pattern_session(StaleBufferPolicy::Keep);

    peer.write_all(b"$12.").unwrap();
    std::thread::sleep(Duration::from_millis(400));
    peer.write_all(b"5*0F$1*AB").unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        recorder.messages.lock().len() == 2
    }));
    assert_eq!(
        message_texts(&recorder),
        vec!["$12.5*0F".to_string(), "$1*AB".to_string()]
    );
}

#[test]
fn test_invalid_pattern_is_rejected() {
    let (manager, recorder, _peer) = connected_pair();

    assert!(!manager.start_receive_messages("[", "x"));
    assert!(!manager.is_receiving());
    assert!(manager.wait_for_events(Duration::from_secs(2)));
    assert!(matches!(
        recorder.errors.lock().as_slice(),
        [NetworkError::InvalidPattern(_)]
    ));
}

#[test]
fn test_start_is_idempotent_and_restart_does_not_duplicate() {
    let (manager, recorder, mut peer) = connected_pair();

    assert!(manager.start_receive_async('\n'));
    assert!(manager.start_receive_async('\n'));
    assert!(wait_until(Duration::from_secs(2), || {
        !recorder.receive_states.lock().is_empty()
    }));
    manager.stop_receive_async(false);
    assert!(manager.start_receive_async('\n'));

    peer.write_all(b"one\n").unwrap();
    assert!(wait_until(Duration::from_secs(2), || recorder.data.lock().len() == 1));
    peer.write_all(b"two\n").unwrap();
    assert!(wait_until(Duration::from_secs(2), || recorder.data.lock().len() == 2));

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(
        *recorder.data.lock(),
        vec!["one\n".to_string(), "two\n".to_string()]
    );
    assert_eq!(*recorder.receive_states.lock(), vec![true, false, true]);
}

#[test]
fn test_peer_disconnect_is_detected() {
    let (manager, recorder, peer) = connected_pair();
    assert!(manager.start_receive_async('\n'));
    drop(peer);

    assert!(wait_until(Duration::from_secs(3), || {
        recorder.states.lock().len() == 2
    }));
    assert!(wait_until(Duration::from_secs(2), || !manager.is_receiving()));
    assert!(manager.wait_for_events(Duration::from_secs(2)));

    assert_eq!(*recorder.states.lock(), vec![true, false]);
    assert_eq!(
        *recorder.connection_log.lock(),
        vec![
            "state:true".to_string(),
            "error:Client disconnect detected internally".to_string(),
            "state:false".to_string(),
        ]
    );
    assert_eq!(manager.last_error(), Some(NetworkError::PeerDisconnected));
    assert_eq!(*recorder.receive_states.lock(), vec![true, false]);

    // The dead stream is gone: nothing to receive from or write to.
    assert!(!manager.is_connected());
    assert!(manager.local_addr().is_none());
    assert!(!manager.start_receive_async('\n'));
    assert!(!manager.write("late\n"));
    assert!(manager.wait_for_events(Duration::from_secs(2)));
    assert_eq!(recorder.errors.lock().len(), 1);
    assert_eq!(*recorder.receive_states.lock(), vec![true, false]);
}

#[test]
fn test_write_and_single_shot_reads() {
    let (manager, _recorder, mut peer) = connected_pair();

    assert!(manager.write("ping\n"));
    assert!(manager.write_bytes(&[0x01, 0x02]));
    let mut buf = [0u8; 7];
    peer.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping\n\x01\x02");

    peer.write_all(b"OK\r\nNEXT;").unwrap();
    assert_eq!(manager.read_until_str("\r\n"), "OK\r\n");
    assert_eq!(manager.read_until(';'), "NEXT;");

    peer.write_all(&[9, 8, 7, 0xFF]).unwrap();
    assert_eq!(manager.read_bytes_until(0xFF), vec![9, 8, 7, 0xFF]);
    peer.write_all(&[6]).unwrap();
    assert_eq!(manager.read_bytes(), vec![6]);

    peer.write_all(b"stale").unwrap();
    assert!(wait_until(Duration::from_secs(2), || manager.flush() > 0));
    assert!(manager.read().is_empty());
}

#[test]
fn test_reconnect_replaces_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (manager, recorder) = manager();

    assert!(manager.connect_to("127.0.0.1", port, Duration::from_secs(2)));
    let (mut first, _) = listener.accept().unwrap();
    assert!(manager.connect_to("127.0.0.1", port, Duration::from_secs(2)));
    let (mut second, _) = listener.accept().unwrap();

    // The first connection was shut down.
    let mut buf = [0u8; 1];
    first
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(first.read(&mut buf).unwrap(), 0);

    assert!(manager.write("x"));
    second.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"x");

    assert!(manager.wait_for_events(Duration::from_secs(2)));
    assert_eq!(*recorder.states.lock(), vec![true, true]);
}

#[test]
fn test_listen_accepts_clients() {
    let (server, server_events) = manager();
    assert!(server.listen_on("127.0.0.1", 0));
    assert!(wait_until(Duration::from_secs(2), || server.is_listening()));
    let port = server.listen_addr().unwrap().port();

    let (client, client_events) = manager();
    assert!(client.connect_to("127.0.0.1", port, Duration::from_secs(2)));
    assert!(client.start_receive_async('\n'));

    assert!(wait_until(Duration::from_secs(2), || {
        server_events.clients.lock().len() == 1
    }));
    let accepted = server_events.clients.lock()[0].clone();
    assert!(accepted.is_connected());
    assert_eq!(accepted.peer_addr(), client.local_addr());

    assert!(accepted.write("hello\n"));
    assert!(wait_until(Duration::from_secs(2), || {
        !client_events.data.lock().is_empty()
    }));
    assert_eq!(*client_events.data.lock(), vec!["hello\n".to_string()]);

    server.stop_listen();
    assert!(wait_until(Duration::from_secs(2), || {
        server_events.listen_states.lock().len() == 2
    }));
    assert_eq!(*server_events.listen_states.lock(), vec![true, false]);
    assert!(!server.is_listening());
}

#[test]
fn test_listen_on_busy_port_fails() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let (server, recorder) = manager();

    assert!(!server.listen_on("127.0.0.1", port));
    assert!(server.wait_for_events(Duration::from_secs(2)));
    assert!(matches!(
        recorder.errors.lock().as_slice(),
        [NetworkError::Listen(_)]
    ));
    assert_eq!(*recorder.listen_states.lock(), vec![false]);
    // Listen failures do not touch the connection state.
    assert!(recorder.states.lock().is_empty());
}

#[test]
fn test_settings_based_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let recorder = Arc::new(Recorder::default());
    let manager = attach(
        &recorder,
        SocketManager::builder()
            .config(test_config())
            .connection_string(format!("127.0.0.1:{port}")),
    )
    .build();

    assert!(manager.connect());
    let _peer = listener.accept().unwrap();
    assert_eq!(manager.settings().map(|s| s.port()), Some(port));

    assert!(!manager.set_connection_string("127.0.0.1:notaport"));
    assert_eq!(manager.settings().map(|s| s.port()), Some(port));
}
