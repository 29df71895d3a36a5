//! Network Module
//!
//! Framed connections, the polling server and the client loop.
//!
//! ## Architecture
//! - `Connection`: socket lock + message queue, shared by both sides
//! - `Server`: one thread polling accept, handler updates and commands
//! - `ClientHandler`: server-side endpoint, updated on the server thread
//! - `Client`: peer-side endpoint with its own loop thread

mod client;
mod connection;
mod handler;
mod server;
mod shutdown;

pub use client::{Client, ClientHandle, ClientUpdate, ReceiveLoop};
pub use connection::{Connection, ReceiveReport};
pub use handler::{ClientHandler, CommandSender, ReceiveOnly, Session};
pub use server::{Server, ServerHandle};
pub use shutdown::ShutdownToken;
