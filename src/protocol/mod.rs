//! Protocol Module
//!
//! Defines the wire protocol for client-server communication.
//!
//! ## Protocol Format
//!
//! ### Messages
//! ```text
//! hello+world+
//! ```
//! UTF-8 text terminated by a single configurable separator character
//! (`+` by default). No length prefix, no escaping, no size limit.
//!
//! ### Rejection
//! A banned peer receives the raw bytes `ban` (no separator) right after
//! connecting, then the server closes the socket.
//!
//! ### Server Commands (in-process only)
//! - `ban`:  ban the handler's peer IP
//! - `exit`: drop the handler from the active list

mod command;
mod codec;

pub use command::{HandlerId, ServerCommand};
pub use codec::{encode_message, FrameDecoder};

/// Bytes written to a banned peer before its socket is closed
pub const BAN_NOTICE: &[u8] = b"ban";

/// Final message a client sends when its loop shuts down
pub const EXIT_NOTICE: &str = "exit";
