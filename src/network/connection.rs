//! Connection
//!
//! Frames a TCP byte stream into separator-delimited text messages.
//!
//! All direct socket I/O (send, the reads inside receive, close) happens under
//! one socket lock, so a send never interleaves with a receive at the byte
//! level. Decoded messages land in a thread-safe queue owned by the
//! connection, in arrival order.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::{ReceiveOptions, Separator};
use crate::error::{CourierError, Result};
use crate::protocol::{encode_message, FrameDecoder};

/// Pause between read attempts while a non-blocking receive waits for the
/// rest of a partially received message
const PARTIAL_RETRY_PAUSE: Duration = Duration::from_millis(1);

/// State guarded by the socket lock
struct Socket {
    /// `None` once the connection is closed
    stream: Option<TcpStream>,

    /// Bytes received but not yet split into complete messages
    decoder: FrameDecoder,
}

/// Outcome of one `receive` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceiveReport {
    /// Messages pushed onto the queue by this call
    pub messages: usize,

    /// The peer closed its side of the stream
    pub peer_closed: bool,
}

/// A framed, thread-safe text connection over one TCP stream
pub struct Connection {
    socket: Mutex<Socket>,
    separator: Separator,
    queue_tx: Sender<String>,
    queue_rx: Receiver<String>,
    closed: AtomicBool,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl Connection {
    /// Connect to `addr`, giving up after `timeout` per resolved address
    ///
    /// A zero timeout falls back to the OS connect timeout.
    pub fn connect<A: ToSocketAddrs>(addr: A, separator: Separator, timeout: Duration) -> Result<Self> {
        let mut last_err = None;

        for candidate in addr.to_socket_addrs()? {
            let attempt = if timeout.is_zero() {
                TcpStream::connect(candidate)
            } else {
                TcpStream::connect_timeout(&candidate, timeout)
            };
            match attempt {
                Ok(stream) => return Self::from_stream(stream, separator),
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", candidate, e);
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => CourierError::Io(e),
            None => CourierError::Network("address resolved to nothing".to_string()),
        })
    }

    /// Take ownership of an already connected stream
    pub fn from_stream(stream: TcpStream, separator: Separator) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;

        // Messages are small and latency matters more than batching
        stream.set_nodelay(true)?;

        let (queue_tx, queue_rx) = channel::unbounded();

        Ok(Self {
            socket: Mutex::new(Socket {
                stream: Some(stream),
                decoder: FrameDecoder::new(separator),
            }),
            separator,
            queue_tx,
            queue_rx,
            closed: AtomicBool::new(false),
            peer_addr,
            local_addr,
        })
    }

    /// Bound every frame write by `timeout` (zero waits forever)
    ///
    /// Without a bound, a peer that stops reading blocks `send` once the
    /// kernel buffers fill up.
    pub fn set_send_timeout(&self, timeout: Duration) -> Result<()> {
        let socket = self.socket.lock();
        let stream = socket.stream.as_ref().ok_or(CourierError::ConnectionClosed)?;
        stream.set_write_timeout((!timeout.is_zero()).then_some(timeout))?;
        Ok(())
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Send one message followed by the separator
    ///
    /// Transport faults (broken pipe, reset, other socket errors) are
    /// returned after the socket lock has been released. A write that
    /// exceeds the send timeout fails with `Io` (`WouldBlock` or
    /// `TimedOut`); part of the frame may already be on the wire.
    pub fn send(&self, message: &str) -> Result<()> {
        let bytes = encode_message(message, self.separator)?;

        let mut socket = self.socket.lock();
        let stream = socket.stream.as_mut().ok_or(CourierError::ConnectionClosed)?;

        if let Err(e) = write_frame(stream, &bytes) {
            drop(socket);
            tracing::debug!("Send to {} failed: {}", self.peer_addr, e);
            return Err(e.into());
        }

        tracing::trace!("Sent {} bytes to {}", bytes.len(), self.peer_addr);
        Ok(())
    }

    /// Like [`send`](Self::send), but reports failure as `false`
    pub fn try_send(&self, message: &str) -> bool {
        match self.send(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Dropping message for {}: {}", self.peer_addr, e);
                false
            }
        }
    }

    // =========================================================================
    // Receiving
    // =========================================================================

    /// Read whatever the peer has sent and queue every complete message
    ///
    /// Reads `buffer_size` bytes at a time until the peer closes the stream,
    /// or a read would block / times out while the buffer ends on a message
    /// boundary. If the buffer ends mid-message the read is retried up to
    /// `partial_retries` times; a fragment still incomplete after that stays
    /// buffered for the next call. On end-of-stream the leftover fragment is
    /// queued as a final message.
    pub fn receive(&self, options: ReceiveOptions) -> Result<ReceiveReport> {
        let mut chunk = vec![0u8; options.buffer_size.max(1)];

        let mut socket = self.socket.lock();
        let Socket { stream, decoder } = &mut *socket;
        let stream = stream.as_mut().ok_or(CourierError::ConnectionClosed)?;

        stream.set_nonblocking(!options.block)?;
        if options.block {
            let timeout = (!options.timeout.is_zero()).then_some(options.timeout);
            stream.set_read_timeout(timeout)?;
        }

        let mut retries = 0;
        let mut peer_closed = false;

        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    peer_closed = true;
                    break;
                }
                Ok(n) => decoder.extend(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if is_no_data(&e) => {
                    if decoder.ends_on_boundary() || retries >= options.partial_retries {
                        break;
                    }
                    retries += 1;
                    if !options.block {
                        std::thread::sleep(PARTIAL_RETRY_PAUSE);
                    }
                }
                Err(e) if is_reset(&e) => {
                    tracing::debug!("Connection reset by {}", self.peer_addr);
                    peer_closed = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut messages = decoder.drain_complete();
        if peer_closed {
            messages.extend(decoder.take_remainder());
        }
        if !decoder.is_empty() {
            tracing::trace!(
                "Holding {} bytes of a partial message from {}",
                decoder.pending_len(),
                self.peer_addr
            );
        }

        let count = messages.len();
        for message in messages {
            // The receiver lives in `self`, so the channel cannot be disconnected
            let _ = self.queue_tx.send(message);
        }
        drop(socket);

        if count > 0 {
            tracing::trace!("Queued {} messages from {}", count, self.peer_addr);
        }

        Ok(ReceiveReport {
            messages: count,
            peer_closed,
        })
    }

    /// Pop the oldest queued message, if any
    pub fn try_next_message(&self) -> Option<String> {
        self.queue_rx.try_recv().ok()
    }

    /// Wait up to `timeout` for a queued message
    ///
    /// Only waits on the queue; something else must be calling `receive`.
    pub fn next_message_timeout(&self, timeout: Duration) -> Option<String> {
        self.queue_rx.recv_timeout(timeout).ok()
    }

    /// Take every queued message, oldest first
    pub fn drain_messages(&self) -> Vec<String> {
        self.queue_rx.try_iter().collect()
    }

    /// Number of messages waiting in the queue
    pub fn queued(&self) -> usize {
        self.queue_rx.len()
    }

    /// The message queue itself, for `select!`-style consumers
    pub fn messages(&self) -> &Receiver<String> {
        &self.queue_rx
    }

    // =========================================================================
    // Closing
    // =========================================================================

    /// Optionally send a final message, then close the socket
    ///
    /// Both happen under a single hold of the socket lock. Closing an already
    /// closed connection is a no-op. The socket is closed even when the final
    /// message cannot be delivered; that failure is still returned.
    pub fn close(&self, message: Option<&str>) -> Result<()> {
        let mut socket = self.socket.lock();
        let Some(mut stream) = socket.stream.take() else {
            return Ok(());
        };
        self.closed.store(true, Ordering::Release);

        let result = match message {
            Some(message) => encode_message(message, self.separator)
                .and_then(|bytes| write_frame(&mut stream, &bytes).map_err(CourierError::from)),
            None => Ok(()),
        };

        if let Err(e) = stream.shutdown(Shutdown::Both) {
            // Already torn down by the peer
            tracing::trace!("Shutdown of {} reported: {}", self.peer_addr, e);
        }
        drop(stream);
        drop(socket);

        tracing::debug!("Closed connection to {}", self.peer_addr);
        result
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn separator(&self) -> Separator {
        self.separator
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .field("separator", &self.separator)
            .field("queued", &self.queued())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Write a whole frame in blocking mode, bounded by the socket's write timeout
///
/// A preceding non-blocking receive may have left the socket non-blocking.
fn write_frame(stream: &mut TcpStream, bytes: &[u8]) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.write_all(bytes)?;
    stream.flush()
}

/// Read timed out (blocking) or would block (non-blocking)
fn is_no_data(e: &std::io::Error) -> bool {
    // Windows reports a read timeout as TimedOut instead of WouldBlock
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn is_reset(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted)
}
