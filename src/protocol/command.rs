//! Outbound command lines.
//!
//! ```text
//! C<seq>|<command text>     normal
//! CD<seq>|<command text>    debug (radio answers with fuller detail)
//! ```

use crate::error::{ProtocolError, Result};

/// Per-command verbosity flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Plain `C` prefix.
    #[default]
    Normal,
    /// `CD` prefix, asks the radio for verbose replies.
    Debug,
}

impl Verbosity {
    /// Wire prefix for this verbosity.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Normal => "C",
            Self::Debug => "CD",
        }
    }

    /// Pick `Debug` when `debug` is true.
    pub fn from_debug(debug: bool) -> Self {
        if debug {
            Self::Debug
        } else {
            Self::Normal
        }
    }
}

/// Format a command line without its terminator.
pub fn encode_command(sequence: u32, verbosity: Verbosity, text: &str) -> String {
    format!("{}{}|{}", verbosity.prefix(), sequence, text)
}

/// Trim command text and check it fits on one line.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidCommand`] for empty text or text that
/// contains a line terminator (which would smuggle a second command onto
/// the wire under a sequence id the registry never issued).
pub fn validate_command(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ProtocolError::InvalidCommand("empty command".to_string()));
    }
    if text.contains(['\n', '\r']) {
        return Err(ProtocolError::InvalidCommand(format!(
            "command contains a line break: {text:?}"
        )));
    }
    Ok(text)
}
