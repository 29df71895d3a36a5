//! Client
//!
//! Peer-side counterpart of a `ClientHandler`: a connection plus a background
//! loop that keeps calling `ClientUpdate::update` until closed.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{Config, ReceiveOptions};
use crate::error::{CourierError, Result};
use crate::protocol::EXIT_NOTICE;

use super::connection::Connection;
use super::shutdown::ShutdownToken;

/// Work done by the client loop on every iteration
///
/// Runs on the loop thread. Returning an error ends the loop.
pub trait ClientUpdate: Send + 'static {
    /// Default: receive into the message queue, stop when the server hangs up
    ///
    /// Uses the default config's receive timeout; `Client::spawn_default`
    /// honours the client's own config instead.
    fn update(&mut self, connection: &Connection) -> Result<()> {
        ReceiveLoop::default().update(connection)
    }

    /// Runs after the loop stops and before the final `exit` notice, e.g. to
    /// send a logout message
    fn before_close(&mut self, _connection: &Connection) {}
}

/// Update that only receives, with configurable options
#[derive(Debug, Clone, Copy)]
pub struct ReceiveLoop {
    options: ReceiveOptions,
}

impl ReceiveLoop {
    pub fn new(options: ReceiveOptions) -> Self {
        Self { options }
    }
}

impl Default for ReceiveLoop {
    fn default() -> Self {
        Self::new(Config::default().client_receive_options())
    }
}

impl ClientUpdate for ReceiveLoop {
    fn update(&mut self, connection: &Connection) -> Result<()> {
        let report = connection.receive(self.options)?;
        if report.peer_closed {
            return Err(CourierError::ConnectionClosed);
        }
        Ok(())
    }
}

/// A connected client that has not started its loop yet
#[derive(Debug)]
pub struct Client {
    connection: Arc<Connection>,
    config: Config,
}

impl Client {
    /// Connect to `config.host:config.port` within `config.connect_timeout`
    ///
    /// Sends are bounded by `config.send_timeout`.
    pub fn connect(config: Config) -> Result<Self> {
        config.validate()?;

        let connection = Connection::connect(
            config.listen_addr(),
            config.separator,
            config.connect_timeout,
        )?;
        connection.set_send_timeout(config.send_timeout)?;
        tracing::debug!(
            "Connected to {} from {}",
            connection.peer_addr(),
            connection.local_addr()
        );

        Ok(Self {
            connection: Arc::new(connection),
            config,
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start the loop with the default receive-only update
    ///
    /// Each iteration blocks for up to `config.receive_timeout`, which bounds
    /// how long `close` takes to be noticed.
    pub fn spawn_default(self) -> Result<ClientHandle> {
        let options = self.config.client_receive_options();
        self.spawn(ReceiveLoop::new(options))
    }

    /// Start the loop on a dedicated thread
    pub fn spawn<U: ClientUpdate>(self, updater: U) -> Result<ClientHandle> {
        let shutdown = ShutdownToken::new();
        let loop_shutdown = shutdown.clone();
        let connection = Arc::clone(&self.connection);

        let thread = thread::Builder::new()
            .name("courier-client".to_string())
            .spawn(move || run_loop(connection, loop_shutdown, updater))?;

        Ok(ClientHandle {
            connection: self.connection,
            shutdown,
            thread,
        })
    }
}

fn run_loop<U: ClientUpdate>(connection: Arc<Connection>, shutdown: ShutdownToken, mut updater: U) {
    while !shutdown.is_cancelled() {
        if let Err(e) = updater.update(&connection) {
            if e.is_disconnect() {
                tracing::debug!("Client loop stopping: {}", e);
            } else {
                tracing::warn!("Client loop stopping after error: {}", e);
            }
            break;
        }
    }

    updater.before_close(&connection);
    if let Err(e) = connection.close(Some(EXIT_NOTICE)) {
        tracing::debug!("Exit notice not delivered to {}: {}", connection.peer_addr(), e);
    }
}

/// Owner's view of a running client loop
#[derive(Debug)]
pub struct ClientHandle {
    connection: Arc<Connection>,
    shutdown: ShutdownToken,
    thread: JoinHandle<()>,
}

impl ClientHandle {
    /// Shared connection, for sending and reading the message queue
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn send(&self, message: &str) -> Result<()> {
        self.connection.send(message)
    }

    /// Wait up to `timeout` for the next received message
    pub fn next_message_timeout(&self, timeout: Duration) -> Option<String> {
        self.connection.next_message_timeout(timeout)
    }

    /// Signal the loop to stop
    ///
    /// The loop sends `exit` and closes the socket once it notices.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| CourierError::Network("client thread panicked".to_string()))
    }

    /// Signal the loop and wait for it to close the connection
    pub fn close_and_join(self) -> Result<()> {
        self.close();
        self.join()
    }
}
