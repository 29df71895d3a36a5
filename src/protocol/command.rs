//! Command definitions
//!
//! Decisions a handler escalates to the server through the command queue.

use std::fmt;

/// Identifies one accepted connection for the lifetime of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// A command posted to the server's command queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    /// Add the handler's peer address to the banned set
    Ban,

    /// Remove the handler from the active list
    Exit,

    /// Anything else; logged and dropped by the server
    Other(String),
}

impl ServerCommand {
    /// Parse the textual command names `ban` and `exit`
    pub fn parse(s: &str) -> Self {
        match s {
            "ban" => ServerCommand::Ban,
            "exit" => ServerCommand::Exit,
            other => ServerCommand::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ServerCommand::Ban => "ban",
            ServerCommand::Exit => "exit",
            ServerCommand::Other(s) => s,
        }
    }
}

impl From<&str> for ServerCommand {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
