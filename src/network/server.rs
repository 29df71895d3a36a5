//! TCP Server
//!
//! Single-threaded polling loop over a non-blocking listener.
//!
//! ## Cycle
//! 1. Stop if shutdown was requested
//! 2. Accept at most one pending connection (banned peers get `ban` and are closed)
//! 3. Stop if shutdown was requested meanwhile
//! 4. Call `Session::update` for every handler, in accept order
//! 5. Drain the command queue, applying `ban` / `exit`
//!
//! Commands posted during step 4 are applied in step 5 of the same cycle.
//! A session that returns an error or panics in step 4 is logged and keeps
//! its slot; it can still post `exit` for itself on a later update.

use std::any::Any;
use std::collections::HashSet;
use std::io::{ErrorKind, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};

use crate::config::Config;
use crate::error::{CourierError, Result};
use crate::protocol::{HandlerId, ServerCommand, BAN_NOTICE};

use super::handler::{ClientHandler, CommandSender, ReceiveOnly, Session};
use super::shutdown::ShutdownToken;

type SessionFactory<S> = Box<dyn FnMut(&ClientHandler) -> S + Send>;

/// An active handler and the application session driving it
struct Slot<S> {
    handler: ClientHandler,
    session: S,
}

/// Multi-client server
pub struct Server<S: Session> {
    config: Config,

    /// `None` once the loop has finished
    listener: Option<TcpListener>,
    local_addr: SocketAddr,

    handlers: Vec<Slot<S>>,
    banned: HashSet<IpAddr>,

    commands: CommandSender,
    command_rx: Receiver<(HandlerId, ServerCommand)>,

    shutdown: ShutdownToken,
    next_id: u64,
    factory: SessionFactory<S>,
}

impl Server<ReceiveOnly> {
    /// Bind a server whose handlers only receive
    pub fn bind_default(config: Config) -> Result<Self> {
        Self::bind(config, |_: &ClientHandler| ReceiveOnly)
    }
}

impl<S: Session + 'static> Server<S> {
    /// Bind and start listening
    ///
    /// `factory` builds the session for each accepted handler. Bind faults
    /// are returned unchanged.
    pub fn bind<F>(config: Config, factory: F) -> Result<Self>
    where
        F: FnMut(&ClientHandler) -> S + Send + 'static,
    {
        config.validate()?;

        let listener = TcpListener::bind(config.listen_addr())?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let (tx, command_rx) = channel::unbounded();

        tracing::info!("Server listening on {}", local_addr);

        Ok(Self {
            config,
            listener: Some(listener),
            local_addr,
            handlers: Vec::new(),
            banned: HashSet::new(),
            commands: CommandSender::new(tx),
            command_rx,
            shutdown: ShutdownToken::new(),
            next_id: 0,
            factory: Box::new(factory),
        })
    }

    /// Run the loop on the current thread until shutdown, then close everything
    pub fn run(&mut self) {
        while self.poll_once() {
            if !self.config.idle_sleep.is_zero() {
                thread::sleep(self.config.idle_sleep);
            }
        }
        tracing::debug!("Server is exiting loop");
        self.finish();
    }

    /// Run the loop on a dedicated thread
    pub fn spawn(mut self) -> Result<ServerHandle> {
        let shutdown = self.shutdown.clone();
        let commands = self.commands.clone();
        let local_addr = self.local_addr;

        let thread = thread::Builder::new()
            .name("courier-server".to_string())
            .spawn(move || self.run())?;

        Ok(ServerHandle {
            shutdown,
            commands,
            local_addr,
            thread,
        })
    }

    /// Run exactly one cycle
    ///
    /// Returns `false` once shutdown has been observed (or the loop already
    /// finished); the caller should then stop polling.
    pub fn poll_once(&mut self) -> bool {
        if self.shutdown.is_cancelled() || self.listener.is_none() {
            return false;
        }

        self.accept_pending();

        if self.shutdown.is_cancelled() {
            return false;
        }

        self.dispatch_updates();
        self.drain_commands();
        true
    }

    // =========================================================================
    // Cycle phases
    // =========================================================================

    /// Accept at most one pending connection
    fn accept_pending(&mut self) {
        if self.handlers.len() >= self.config.max_connections {
            // Leave it in the OS backlog until a slot frees up
            return;
        }
        let Some(listener) = &self.listener else {
            return;
        };

        match listener.accept() {
            Ok((stream, addr)) => self.admit(stream, addr),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => tracing::warn!("Failed to accept connection: {}", e),
        }
    }

    fn admit(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.banned.contains(&addr.ip()) {
            tracing::info!("Rejecting banned peer {}", addr);
            reject(stream, addr);
            return;
        }

        let id = HandlerId(self.next_id);
        self.next_id += 1;

        let handler = match ClientHandler::new(id, stream, &self.config, self.commands.clone()) {
            Ok(handler) => handler,
            Err(e) => {
                tracing::warn!("Failed to set up handler for {}: {}", addr, e);
                return;
            }
        };

        let session = (self.factory)(&handler);
        self.handlers.push(Slot { handler, session });
        tracing::info!("Accepted {} as {}", addr, id);
    }

    /// Update every handler; one handler's error or panic never stops the others
    fn dispatch_updates(&mut self) {
        for slot in &mut self.handlers {
            let Slot { handler, session } = slot;
            match panic::catch_unwind(AssertUnwindSafe(|| session.update(&mut *handler))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(
                    "Error occurred while updating handler for {}: {}",
                    handler.peer_addr(),
                    e
                ),
                Err(payload) => tracing::error!(
                    "Handler for {} panicked during update: {}",
                    handler.peer_addr(),
                    panic_message(payload.as_ref())
                ),
            }
        }
    }

    /// Apply every queued command before the next cycle starts
    fn drain_commands(&mut self) {
        while let Ok((id, command)) = self.command_rx.try_recv() {
            tracing::debug!("Received command in server queue: {} from {}", command, id);
            self.apply(id, command);
        }
    }

    fn apply(&mut self, id: HandlerId, command: ServerCommand) {
        match command {
            ServerCommand::Ban => match self.position(id) {
                // The handler closes itself, if desired, with a separate exit
                Some(index) => {
                    let ip = self.handlers[index].handler.peer_addr().ip();
                    tracing::info!("Banning {}", ip);
                    self.banned.insert(ip);
                }
                None => tracing::warn!("Ban requested for unknown handler {}", id),
            },
            ServerCommand::Exit => match self.position(id) {
                Some(index) => {
                    let mut slot = self.handlers.remove(index);
                    close_slot(&mut slot);
                    tracing::debug!("Removed {}", id);
                }
                None => tracing::warn!("Exit requested for unknown handler {}", id),
            },
            ServerCommand::Other(other) => {
                tracing::error!("Unsupported command found in server queue: {}", other);
            }
        }
    }

    fn position(&self, id: HandlerId) -> Option<usize> {
        self.handlers.iter().position(|slot| slot.handler.id() == id)
    }

    /// Close every handler, then release the listening socket
    fn finish(&mut self) {
        tracing::info!("Server closing {} handlers", self.handlers.len());
        for mut slot in self.handlers.drain(..) {
            close_slot(&mut slot);
        }
        self.listener = None;
        tracing::debug!("Server released {}", self.local_addr);
    }

    // =========================================================================
    // Control and introspection
    // =========================================================================

    /// Ban an IP address directly
    pub fn ban(&mut self, ip: IpAddr) {
        self.banned.insert(ip);
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.banned.contains(&ip)
    }

    pub fn banned(&self) -> impl Iterator<Item = &IpAddr> {
        self.banned.iter()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Ids of the active handlers, in accept order
    pub fn handler_ids(&self) -> Vec<HandlerId> {
        self.handlers.iter().map(|slot| slot.handler.id()).collect()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A sender that posts into this server's command queue
    pub fn commands(&self) -> CommandSender {
        self.commands.clone()
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Request shutdown; takes effect at the next check point
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn close_slot<S: Session>(slot: &mut Slot<S>) {
    slot.session.on_close(&mut slot.handler);
    if let Err(e) = slot.handler.close(None) {
        tracing::debug!("Error closing {}: {}", slot.handler.id(), e);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Tell a banned peer why and hang up
fn reject(mut stream: TcpStream, addr: SocketAddr) {
    // Accepted sockets may inherit the listener's non-blocking mode
    let sent = stream
        .set_nonblocking(false)
        .and_then(|_| stream.write_all(BAN_NOTICE))
        .and_then(|_| stream.flush());
    if let Err(e) = sent {
        tracing::debug!("Could not deliver ban notice to {}: {}", addr, e);
    }
    let _ = stream.shutdown(Shutdown::Both);
}

/// Owner's view of a server running on its own thread
#[derive(Debug)]
pub struct ServerHandle {
    shutdown: ShutdownToken,
    commands: CommandSender,
    local_addr: SocketAddr,
    thread: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn commands(&self) -> CommandSender {
        self.commands.clone()
    }

    /// Request shutdown without waiting
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the loop to finish
    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| CourierError::Network("server thread panicked".to_string()))
    }

    /// Request shutdown and wait for the loop to finish
    pub fn stop(self) -> Result<()> {
        self.shutdown();
        self.join()
    }
}
