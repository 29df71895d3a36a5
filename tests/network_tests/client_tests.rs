//! Client Tests
//!
//! Tests verify:
//! - Connecting (and failing to connect)
//! - The background loop fills the message queue
//! - `close` only signals; the loop sends `exit` and closes the socket
//! - The `before_close` hook runs before the exit notice
//! - The loop ends when the server hangs up
//! - Configured receive and send timeouts bound the loop and sends

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use courier::network::{Client, ClientUpdate, Connection};
use courier::{Config, CourierError, Separator};

// =============================================================================
// Helpers
// =============================================================================

fn listener() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").unwrap()
}

fn config_for(listener: &TcpListener) -> Config {
    Config::builder()
        .host("127.0.0.1")
        .port(listener.local_addr().unwrap().port())
        .connect_timeout(Duration::from_secs(1))
        .build()
}

fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = listener.accept().unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
}

fn read_all(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}

// =============================================================================
// Connect Tests
// =============================================================================

#[test]
fn test_connect_and_send() {
    let listener = listener();
    let client = Client::connect(config_for(&listener)).unwrap();
    let mut server_side = accept(&listener);

    client.connection().send("hello").unwrap();

    let mut buf = [0u8; 6];
    server_side.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello+");
}

#[test]
fn test_connect_refused() {
    let config = {
        let listener = listener();
        config_for(&listener)
    };

    let result = Client::connect(config);
    assert!(matches!(result, Err(CourierError::Io(_))));
}

#[test]
fn test_connect_rejects_invalid_config() {
    let listener = listener();
    let mut config = config_for(&listener);
    config.host = String::new();

    assert!(matches!(Client::connect(config), Err(CourierError::Config(_))));
}

#[test]
fn test_custom_separator() {
    let listener = listener();
    let mut config = config_for(&listener);
    config.separator = Separator::new('\n');
    let client = Client::connect(config).unwrap();
    let mut server_side = accept(&listener);

    client.connection().send("line").unwrap();

    let mut buf = [0u8; 5];
    server_side.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"line\n");
}

// =============================================================================
// Loop Tests
// =============================================================================

#[test]
fn test_loop_queues_incoming_messages() {
    let listener = listener();
    let handle = Client::connect(config_for(&listener)).unwrap().spawn_default().unwrap();
    let mut server_side = accept(&listener);

    server_side.write_all(b"hi+there+").unwrap();

    let timeout = Duration::from_secs(2);
    assert_eq!(handle.next_message_timeout(timeout), Some("hi".to_string()));
    assert_eq!(handle.next_message_timeout(timeout), Some("there".to_string()));

    handle.close_and_join().unwrap();
}

#[test]
fn test_close_sends_exit_and_closes_socket() {
    let listener = listener();
    let handle = Client::connect(config_for(&listener)).unwrap().spawn_default().unwrap();
    let mut server_side = accept(&listener);

    handle.send("last").unwrap();
    let connection = std::sync::Arc::clone(handle.connection());
    handle.close_and_join().unwrap();

    assert_eq!(read_all(&mut server_side), "last+exit+");
    assert!(connection.is_closed());
}

#[test]
fn test_close_is_only_a_signal() {
    let listener = listener();
    let handle = Client::connect(config_for(&listener)).unwrap().spawn_default().unwrap();
    let _server_side = accept(&listener);

    handle.close();

    // The loop notices within one iteration
    let deadline = Instant::now() + Duration::from_secs(2);
    while !handle.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(handle.is_finished());
    assert!(handle.connection().is_closed());
    handle.join().unwrap();
}

#[test]
fn test_close_latency_follows_receive_timeout() {
    let listener = listener();
    let mut config = config_for(&listener);
    config.receive_timeout = Duration::from_millis(1500);
    let handle = Client::connect(config).unwrap().spawn_default().unwrap();
    let _server_side = accept(&listener);

    // Let the loop enter its blocking receive, then signal
    std::thread::sleep(Duration::from_millis(50));
    let signalled = Instant::now();
    handle.close();

    std::thread::sleep(Duration::from_millis(300));
    assert!(!handle.is_finished(), "loop ignored the configured receive timeout");

    let deadline = Instant::now() + Duration::from_secs(3);
    while !handle.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(handle.is_finished());
    assert!(signalled.elapsed() < Duration::from_secs(3));
    handle.join().unwrap();
}

#[test]
fn test_send_to_stalled_server_times_out() {
    let listener = listener();
    let mut config = config_for(&listener);
    config.send_timeout = Duration::from_millis(50);
    let client = Client::connect(config).unwrap();
    let _server_side = accept(&listener);

    // Nobody reads on the server side, so the socket buffers fill up
    let big = "x".repeat(1 << 20);
    let error = (0..64).find_map(|_| client.connection().send(&big).err());

    assert!(matches!(error, Some(CourierError::Io(_))), "unexpected: {:?}", error);
}

struct Logout;

impl ClientUpdate for Logout {
    fn before_close(&mut self, connection: &Connection) {
        connection.send("logout").unwrap();
    }
}

#[test]
fn test_before_close_runs_before_exit_notice() {
    let listener = listener();
    let handle = Client::connect(config_for(&listener)).unwrap().spawn(Logout).unwrap();
    let mut server_side = accept(&listener);

    handle.close_and_join().unwrap();

    assert_eq!(read_all(&mut server_side), "logout+exit+");
}

#[test]
fn test_loop_ends_when_server_hangs_up() {
    let listener = listener();
    let handle = Client::connect(config_for(&listener)).unwrap().spawn_default().unwrap();
    let server_side = accept(&listener);

    drop(server_side);

    let deadline = Instant::now() + Duration::from_secs(2);
    while !handle.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(handle.is_finished());
    handle.join().unwrap();
}

struct FailOnce;

impl ClientUpdate for FailOnce {
    fn update(&mut self, _connection: &Connection) -> courier::Result<()> {
        Err(CourierError::Handler("boom".to_string()))
    }
}

#[test]
fn test_update_error_ends_loop_and_closes() {
    let listener = listener();
    let handle = Client::connect(config_for(&listener)).unwrap().spawn(FailOnce).unwrap();
    let mut server_side = accept(&listener);

    assert_eq!(read_all(&mut server_side), "exit+");
    handle.join().unwrap();
}
