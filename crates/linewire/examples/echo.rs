//! linewire echo demo
//!
//! Starts a line-echo server on an ephemeral loopback port, connects a
//! client to it, sends a few lines and prints what comes back.
//!
//! Run with: cargo run -p linewire --example echo
//! More detail: RUST_LOG=linewire_net=debug cargo run -p linewire --example echo

use std::sync::{Arc, Weak};
use std::time::Duration;

use linewire::net::{SocketConfig, SocketManager};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SocketConfig::new().read_timeout(Duration::from_millis(250));

    // Accepted clients must be kept alive; dropping one closes it.
    let sessions: Arc<Mutex<Vec<Arc<SocketManager>>>> = Arc::new(Mutex::new(Vec::new()));
    let server_sessions = sessions.clone();

    let server = SocketManager::builder()
        .config(config.clone())
        .on_listen_state(|listening| tracing::info!(listening, "server listen state"))
        .on_client_connected(move |client| {
            tracing::info!(peer = ?client.peer_addr(), "client connected");

            let echo: Weak<SocketManager> = Arc::downgrade(client);
            client.events().data_received.connect(move |line| {
                if let Some(client) = echo.upgrade() {
                    client.write(line);
                }
            });
            client.start_receive_async('\n');
            server_sessions.lock().push(client.clone());
        })
        .on_error(|err| tracing::warn!(%err, "server error"))
        .build();

    if !server.listen_on("127.0.0.1", 0) {
        eprintln!("failed to listen: {:?}", server.last_error());
        return;
    }
    let Some(addr) = wait_for_listen_addr(&server) else {
        eprintln!("listener never came up");
        return;
    };
    println!("echo server on {addr}");

    let client = SocketManager::builder()
        .config(config)
        .connection_string(addr.to_string())
        .on_connect_state(|connected| println!("client connected: {connected}"))
        .on_data_received(|line| print!("echo: {line}"))
        .on_error(|err| eprintln!("client error: {err}"))
        .build();

    if !client.connect() {
        eprintln!("failed to connect: {:?}", client.last_error());
        return;
    }
    client.start_receive_async('\n');

    for line in ["hello\n", "ordered\n", "events\n"] {
        client.write(line);
        std::thread::sleep(Duration::from_millis(50));
    }

    std::thread::sleep(Duration::from_millis(300));
    client.close();
    server.stop_listen();
    client.wait_for_events(Duration::from_secs(1));
    sessions.lock().clear();
}

fn wait_for_listen_addr(server: &SocketManager) -> Option<std::net::SocketAddr> {
    for _ in 0..100 {
        if server.is_listening() {
            return server.listen_addr();
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    None
}
