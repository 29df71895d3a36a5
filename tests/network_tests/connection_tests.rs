//! Connection Tests
//!
//! Tests verify:
//! - On-wire framing of sent messages
//! - Splitting of received bytes into queued messages
//! - Partial messages across receive calls
//! - End-of-stream handling
//! - Close semantics
//! - Concurrent senders never interleave frames

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use courier::network::{Connection, ReceiveReport};
use courier::{CourierError, ReceiveOptions, Separator};

// =============================================================================
// Helpers
// =============================================================================

fn pair_with(separator: Separator) -> (Connection, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let conn = Connection::connect(addr, separator, Duration::from_secs(2)).unwrap();
    let (peer, _) = listener.accept().unwrap();
    peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    (conn, peer)
}

fn pair() -> (Connection, TcpStream) {
    pair_with(Separator::default())
}

/// Receive (non-blocking) until `count` messages are queued or 2s pass
fn receive_until(conn: &Connection, count: usize) -> ReceiveReport {
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut last = ReceiveReport::default();
    while conn.queued() < count && Instant::now() < deadline {
        last = conn.receive(ReceiveOptions::default()).unwrap();
        if last.peer_closed {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    last
}

fn read_exact_string(peer: &mut TcpStream, len: usize) -> String {
    let mut buf = vec![0u8; len];
    peer.read_exact(&mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}

// =============================================================================
// Send Tests
// =============================================================================

#[test]
fn test_send_writes_separator_terminated_frames() {
    let (conn, mut peer) = pair();

    conn.send("hello").unwrap();
    conn.send("world").unwrap();

    assert_eq!(read_exact_string(&mut peer, 12), "hello+world+");
}

#[test]
fn test_send_rejects_separator_in_message() {
    let (conn, _peer) = pair();

    let result = conn.send("a+b");
    assert!(matches!(result, Err(CourierError::SeparatorInMessage)));
    assert!(!conn.try_send("a+b"));
}

#[test]
fn test_try_send_reports_success() {
    let (conn, mut peer) = pair();

    assert!(conn.try_send("ok"));
    assert_eq!(read_exact_string(&mut peer, 3), "ok+");
}

#[test]
fn test_send_to_closed_peer_eventually_fails() {
    let (conn, peer) = pair();
    drop(peer);

    let mut error = None;
    for _ in 0..200 {
        if let Err(e) = conn.send("ping") {
            error = Some(e);
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }

    let error = error.expect("send never failed");
    assert!(error.is_disconnect(), "unexpected error: {}", error);

    // The socket lock was released: further calls do not deadlock
    assert!(!conn.try_send("again"));
}

#[test]
fn test_concurrent_senders_do_not_interleave() {
    let (conn, mut peer) = pair();
    let conn = Arc::new(conn);

    let senders: Vec<_> = (0..4)
        .map(|t| {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                for i in 0..50 {
                    conn.send(&format!("t{}-{:03}", t, i)).unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    // Every frame is "tN-NNN+" (7 bytes)
    let wire = read_exact_string(&mut peer, 4 * 50 * 7);
    let frames: Vec<&str> = wire.split('+').filter(|f| !f.is_empty()).collect();
    assert_eq!(frames.len(), 200);

    for t in 0..4 {
        let prefix = format!("t{}-", t);
        let mine: Vec<&str> = frames.iter().copied().filter(|f| f.starts_with(&prefix)).collect();
        let expected: Vec<String> = (0..50).map(|i| format!("t{}-{:03}", t, i)).collect();
        assert_eq!(mine, expected);
    }
}

// =============================================================================
// Receive Tests
// =============================================================================

#[test]
fn test_receive_scenario_hello_world() {
    let (conn, mut peer) = pair();
    peer.write_all(b"hello+world+").unwrap();

    receive_until(&conn, 2);

    assert_eq!(conn.drain_messages(), vec!["hello", "world"]);
}

#[test]
fn test_round_trip_preserves_order() {
    let (a, mut peer) = pair();
    let messages: Vec<String> = (0..64).map(|i| format!("msg number {}", i)).collect();

    // Echo raw bytes back through the peer
    for message in &messages {
        a.send(message).unwrap();
    }
    let expected_len: usize = messages.iter().map(|m| m.len() + 1).sum();
    let mut wire = vec![0u8; expected_len];
    peer.read_exact(&mut wire).unwrap();
    peer.write_all(&wire).unwrap();

    receive_until(&a, messages.len());
    assert_eq!(a.drain_messages(), messages);
}

#[test]
fn test_receive_without_data_returns_nothing() {
    let (conn, _peer) = pair();

    let report = conn.receive(ReceiveOptions::default()).unwrap();

    assert_eq!(report.messages, 0);
    assert!(!report.peer_closed);
    assert_eq!(conn.try_next_message(), None);
}

#[test]
fn test_blocking_receive_waits_for_timeout() {
    let (conn, _peer) = pair();

    let started = Instant::now();
    let report = conn.receive(ReceiveOptions::blocking(Duration::from_millis(100))).unwrap();

    assert_eq!(report.messages, 0);
    assert!(started.elapsed() >= Duration::from_millis(80));
}

#[test]
fn test_blocking_receive_collects_data() {
    let (conn, mut peer) = pair();
    peer.write_all(b"one+two+").unwrap();

    let report = conn.receive(ReceiveOptions::blocking(Duration::from_millis(200))).unwrap();

    assert_eq!(report.messages, 2);
    assert_eq!(conn.drain_messages(), vec!["one", "two"]);
}

#[test]
fn test_small_buffer_size_still_frames_correctly() {
    let (conn, mut peer) = pair();
    peer.write_all(b"a-longer-message+short+").unwrap();

    let options = ReceiveOptions {
        buffer_size: 3,
        ..ReceiveOptions::blocking(Duration::from_millis(100))
    };
    conn.receive(options).unwrap();

    assert_eq!(conn.drain_messages(), vec!["a-longer-message", "short"]);
}

#[test]
fn test_partial_message_completed_by_next_receive() {
    let (conn, mut peer) = pair();

    peer.write_all(b"first+hel").unwrap();
    receive_until(&conn, 1);
    assert_eq!(conn.drain_messages(), vec!["first"]);

    peer.write_all(b"lo+").unwrap();
    receive_until(&conn, 1);
    assert_eq!(conn.drain_messages(), vec!["hello"]);
}

#[test]
fn test_partial_message_is_not_emitted_early() {
    let (conn, mut peer) = pair();
    peer.write_all(b"incomple").unwrap();
    thread::sleep(Duration::from_millis(50));

    let report = conn.receive(ReceiveOptions::default()).unwrap();

    assert_eq!(report.messages, 0);
    assert_eq!(conn.queued(), 0);
}

#[test]
fn test_empty_fragments_are_dropped() {
    let (conn, mut peer) = pair();
    peer.write_all(b"++x+++y+").unwrap();

    receive_until(&conn, 2);

    assert_eq!(conn.drain_messages(), vec!["x", "y"]);
}

#[test]
fn test_peer_close_flushes_trailing_fragment() {
    let (conn, mut peer) = pair();
    peer.write_all(b"full+tail").unwrap();
    drop(peer);

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut closed = false;
    while !closed && Instant::now() < deadline {
        closed = conn.receive(ReceiveOptions::default()).unwrap().peer_closed;
        thread::sleep(Duration::from_millis(5));
    }

    assert!(closed);
    assert_eq!(conn.drain_messages(), vec!["full", "tail"]);
}

#[test]
fn test_multi_byte_separator_round_trip() {
    let sep = Separator::new('§');
    let (conn, mut peer) = pair_with(sep);

    conn.send("alpha").unwrap();
    conn.send("beta").unwrap();

    let expected = "alpha§beta§";
    let wire = read_exact_string(&mut peer, expected.len());
    assert_eq!(wire, expected);

    peer.write_all(wire.as_bytes()).unwrap();
    receive_until(&conn, 2);
    assert_eq!(conn.drain_messages(), vec!["alpha", "beta"]);
}

#[test]
fn test_next_message_timeout() {
    let (conn, mut peer) = pair();
    assert_eq!(conn.next_message_timeout(Duration::from_millis(10)), None);

    peer.write_all(b"queued+").unwrap();
    receive_until(&conn, 1);

    assert_eq!(
        conn.next_message_timeout(Duration::from_millis(10)),
        Some("queued".to_string())
    );
}

// =============================================================================
// Close Tests
// =============================================================================

#[test]
fn test_close_sends_final_message() {
    let (conn, mut peer) = pair();

    conn.close(Some("bye")).unwrap();

    let mut rest = Vec::new();
    peer.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, b"bye+");
    assert!(conn.is_closed());
}

#[test]
fn test_close_without_message() {
    let (conn, mut peer) = pair();

    conn.close(None).unwrap();

    let mut rest = Vec::new();
    peer.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn test_operations_after_close() {
    let (conn, _peer) = pair();
    conn.close(None).unwrap();

    assert!(matches!(conn.send("x"), Err(CourierError::ConnectionClosed)));
    assert!(matches!(
        conn.receive(ReceiveOptions::default()),
        Err(CourierError::ConnectionClosed)
    ));
    // Closing twice is a no-op
    assert!(conn.close(Some("ignored")).is_ok());
}

#[test]
fn test_queued_messages_survive_close() {
    let (conn, mut peer) = pair();
    peer.write_all(b"kept+").unwrap();
    receive_until(&conn, 1);

    conn.close(None).unwrap();

    assert_eq!(conn.drain_messages(), vec!["kept"]);
}

// =============================================================================
// Construction Tests
// =============================================================================

#[test]
fn test_connect_refused() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let result = Connection::connect(addr, Separator::default(), Duration::from_secs(1));
    assert!(matches!(result, Err(CourierError::Io(_))));
}

#[test]
fn test_addresses_are_reported() {
    let (conn, peer) = pair();

    assert_eq!(conn.peer_addr(), peer.local_addr().unwrap());
    assert_eq!(conn.local_addr(), peer.peer_addr().unwrap());
    assert_eq!(conn.separator(), Separator::default());
}
