//! Client Handler
//!
//! Server-side endpoint for one accepted peer, plus the `Session` hook that
//! application code implements on top of it.

use std::net::{SocketAddr, TcpStream};

use crossbeam::channel::Sender;

use crate::config::{Config, ReceiveOptions};
use crate::error::{CourierError, Result};
use crate::protocol::{HandlerId, ServerCommand};

use super::connection::{Connection, ReceiveReport};

/// Sending half of the server's command queue
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: Sender<(HandlerId, ServerCommand)>,
}

impl CommandSender {
    pub(crate) fn new(tx: Sender<(HandlerId, ServerCommand)>) -> Self {
        Self { tx }
    }

    /// Queue a command; the server applies it after the current dispatch phase
    pub fn post(&self, id: HandlerId, command: ServerCommand) -> Result<()> {
        self.tx
            .send((id, command))
            .map_err(|_| CourierError::Network("server command queue is closed".to_string()))
    }
}

/// One accepted peer as seen by the server
///
/// Runs on the server thread; nothing here may block.
#[derive(Debug)]
pub struct ClientHandler {
    id: HandlerId,
    connection: Connection,
    commands: CommandSender,
    receive_options: ReceiveOptions,
}

impl ClientHandler {
    pub(crate) fn new(
        id: HandlerId,
        stream: TcpStream,
        config: &Config,
        commands: CommandSender,
    ) -> Result<Self> {
        let connection = Connection::from_stream(stream, config.separator)?;
        connection.set_send_timeout(config.send_timeout)?;

        Ok(Self {
            id,
            connection,
            commands,
            receive_options: config.receive_options(),
        })
    }

    /// Pull whatever the peer sent into the message queue
    pub fn update(&mut self) -> Result<ReceiveReport> {
        self.connection.receive(self.receive_options)
    }

    pub fn send(&self, message: &str) -> Result<()> {
        self.connection.send(message)
    }

    pub fn try_send(&self, message: &str) -> bool {
        self.connection.try_send(message)
    }

    pub fn try_next_message(&self) -> Option<String> {
        self.connection.try_next_message()
    }

    pub fn drain_messages(&self) -> Vec<String> {
        self.connection.drain_messages()
    }

    pub fn close(&self, message: Option<&str>) -> Result<()> {
        self.connection.close(message)
    }

    // =========================================================================
    // Command escalation
    // =========================================================================

    /// Post a command about this handler to the server
    pub fn post(&self, command: impl Into<ServerCommand>) -> Result<()> {
        self.commands.post(self.id, command.into())
    }

    /// Ask the server to ban this peer's address
    pub fn ban(&self) -> Result<()> {
        self.post(ServerCommand::Ban)
    }

    /// Ask the server to drop this handler
    pub fn exit(&self) -> Result<()> {
        self.post(ServerCommand::Exit)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.connection.peer_addr()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn receive_options(&self) -> ReceiveOptions {
        self.receive_options
    }
}

/// Application logic attached to each handler
///
/// The server calls `update` once per cycle for every active handler, in
/// accept order. An error is logged and does not affect other handlers.
pub trait Session: Send {
    /// Receive and act on messages
    ///
    /// The default only receives, and asks to exit once the peer hangs up.
    fn update(&mut self, handler: &mut ClientHandler) -> Result<()> {
        let report = handler.update()?;
        if report.peer_closed {
            handler.exit()?;
        }
        Ok(())
    }

    /// Runs right before the server closes the handler
    fn on_close(&mut self, _handler: &mut ClientHandler) {}
}

/// Session that only fills the message queue
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiveOnly;

impl Session for ReceiveOnly {}
