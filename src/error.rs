//! Error taxonomy for the protocol engine.
//!
//! Only conditions that end an operation are errors. Protocol oddities that
//! the engine tolerates (unrecognized lines, replies for unknown sequence ids,
//! broadcasts dropped for a slow subscriber) are counted as anomalies in
//! [`SessionStats`](crate::session::SessionStats) instead.

use std::time::Duration;

/// Errors produced by discovery, framing and the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// No valid beacon arrived before the deadline. Callers may retry.
    DiscoveryTimeout(Duration),
    /// Socket-level failure on the UDP or TCP path.
    Transport(String),
    /// A line grew past the framer's limit without a terminator.
    MalformedStream {
        /// Bytes buffered when the limit tripped.
        len: usize,
        /// Configured maximum line length.
        max: usize,
    },
    /// A single command got no reply in time. Other commands are unaffected.
    TimedOut {
        /// Sequence id of the abandoned command.
        sequence: u32,
    },
    /// The session is closing or closed.
    SessionClosed,
    /// Command text cannot be put on the wire as a single line.
    InvalidCommand(String),
    /// Every sequence id has been used in this session.
    SequenceExhausted,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DiscoveryTimeout(after) => {
                write!(f, "No discovery beacon received within {after:?}")
            }
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
            Self::MalformedStream { len, max } => {
                write!(f, "Malformed stream: line of {len} bytes exceeds {max}")
            }
            Self::TimedOut { sequence } => write!(f, "Command {sequence} timed out"),
            Self::SessionClosed => write!(f, "Session closed"),
            Self::InvalidCommand(msg) => write!(f, "Invalid command: {msg}"),
            Self::SequenceExhausted => write!(f, "Sequence ids exhausted"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl ProtocolError {
    /// Returns `true` for failures that end the whole session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::MalformedStream { .. } | Self::SessionClosed
        )
    }
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, ProtocolError>;
