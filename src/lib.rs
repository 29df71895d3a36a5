//! # Courier
//!
//! Separator-delimited text messaging over TCP:
//! - `Connection`: frames a byte stream into messages, safe under concurrent send/receive
//! - `Server`: single-threaded polling loop over many client handlers
//! - Command escalation: handlers post `ban` / `exit` for the server to apply
//! - `Client`: peer-side endpoint with its own background loop
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐   hello+world+   ┌─────────────────────────────────────┐
//! │    Client    │ ───────────────▶ │               Server                │
//! │ (loop thread)│ ◀─────────────── │            (poll thread)            │
//! └──────────────┘                  │                                     │
//!                                   │  accept ─▶ update all ─▶ drain cmds │
//!                                   │              │              ▲       │
//!                                   │              ▼              │       │
//!                                   │      ┌───────────────┐      │       │
//!                                   │      │ ClientHandler │──────┘       │
//!                                   │      │  + Session    │ (id, ban)    │
//!                                   │      └───────────────┘ (id, exit)   │
//!                                   └─────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod logging;

pub mod protocol;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CourierError, Result};
pub use config::{Config, ReceiveOptions, Separator};
pub use network::{Client, ClientHandler, Connection, Server, Session};
pub use protocol::{HandlerId, ServerCommand};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Courier
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
