//! Configuration for Courier
//!
//! Centralized configuration with sensible defaults.

use std::fmt;
use std::time::Duration;

use crate::error::{CourierError, Result};

/// Main configuration shared by the server and the client
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Host to bind (server) or connect to (client)
    pub host: String,

    /// TCP port
    pub port: u16,

    /// Max simultaneously active client handlers
    pub max_connections: usize,

    /// Bound on a client's connect attempt
    pub connect_timeout: Duration,

    /// Bound on writing one frame; a peer that stops reading fails the send
    /// instead of stalling the caller
    pub send_timeout: Duration,

    // -------------------------------------------------------------------------
    // Framing Configuration
    // -------------------------------------------------------------------------
    /// Message separator, fixed for every connection built from this config
    pub separator: Separator,

    /// Bytes requested per read while receiving
    pub receive_buffer_size: usize,

    /// Read timeout of the client loop's blocking receive, which also bounds
    /// how long `ClientHandle::close` takes to be noticed
    pub receive_timeout: Duration,

    // -------------------------------------------------------------------------
    // Server Loop Configuration
    // -------------------------------------------------------------------------
    /// Pause at the end of each server cycle
    pub idle_sleep: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6380,
            max_connections: 8,
            connect_timeout: Duration::from_secs(4),
            send_timeout: Duration::from_secs(2),
            separator: Separator::default(),
            receive_buffer_size: 32,
            receive_timeout: Duration::from_millis(100),
            idle_sleep: Duration::from_millis(1),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// `host:port` as accepted by `ToSocketAddrs`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject values that can never produce a working endpoint
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(CourierError::Config("host must not be empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(CourierError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.receive_buffer_size == 0 {
            return Err(CourierError::Config(
                "receive_buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Non-blocking receive options used by server-side handlers
    pub fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            buffer_size: self.receive_buffer_size,
            ..ReceiveOptions::default()
        }
    }

    /// Blocking receive options used by the client loop
    pub fn client_receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            buffer_size: self.receive_buffer_size,
            ..ReceiveOptions::blocking(self.receive_timeout)
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the port (0 lets the OS pick one when binding)
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the maximum number of active handlers
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the client connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the per-frame send timeout (zero waits forever)
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout = timeout;
        self
    }

    /// Set the message separator
    pub fn separator(mut self, separator: Separator) -> Self {
        self.config.separator = separator;
        self
    }

    /// Set the receive buffer size (in bytes)
    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.config.receive_buffer_size = size;
        self
    }

    /// Set the blocking receive timeout
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.config.receive_timeout = timeout;
        self
    }

    /// Set the pause between server cycles
    pub fn idle_sleep(mut self, pause: Duration) -> Self {
        self.config.idle_sleep = pause;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

// =============================================================================
// Separator
// =============================================================================

/// A single character marking the end of every message on the wire
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Separator {
    ch: char,
    encoded: [u8; 4],
    len: usize,
}

impl Separator {
    /// Build a separator from one character
    pub fn new(ch: char) -> Self {
        let mut encoded = [0u8; 4];
        let len = ch.encode_utf8(&mut encoded).len();
        Self { ch, encoded, len }
    }

    /// Parse a separator from a string holding exactly one character
    pub fn parse(s: &str) -> Result<Self> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => Ok(Self::new(ch)),
            (None, _) => Err(CourierError::InvalidSeparator(
                "separator must not be empty".to_string(),
            )),
            (Some(_), Some(_)) => Err(CourierError::InvalidSeparator(format!(
                "separator must be a single character, got {:?}",
                s
            ))),
        }
    }

    pub fn as_char(&self) -> char {
        self.ch
    }

    /// UTF-8 encoding of the separator as it appears on the wire
    pub fn as_bytes(&self) -> &[u8] {
        &self.encoded[..self.len]
    }
}

impl Default for Separator {
    fn default() -> Self {
        Self::new('+')
    }
}

impl fmt::Debug for Separator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Separator({:?})", self.ch)
    }
}

impl fmt::Display for Separator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ch)
    }
}

impl std::str::FromStr for Separator {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// =============================================================================
// Receive Options
// =============================================================================

/// Knobs for a single `Connection::receive` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Block on reads (up to `timeout`) instead of returning at once
    pub block: bool,

    /// Read timeout while blocking; zero means wait indefinitely
    pub timeout: Duration,

    /// Bytes requested per read
    pub buffer_size: usize,

    /// Extra read attempts while the buffer ends mid-message
    pub partial_retries: u32,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            block: false,
            timeout: Duration::from_secs(2),
            buffer_size: 32,
            partial_retries: 3,
        }
    }
}

impl ReceiveOptions {
    /// Blocking receive with the given timeout
    pub fn blocking(timeout: Duration) -> Self {
        Self {
            block: true,
            timeout,
            ..Self::default()
        }
    }
}
