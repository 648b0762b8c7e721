//! SmartSDR TCP API wire protocol.
//!
//! Everything here is pure and synchronous: bytes in, typed values out. The
//! [`session`](crate::session) module drives these pieces from its read loop.
//!
//! # Wire Protocol
//!
//! Newline-terminated ASCII lines in both directions:
//!
//! ```text
//! client -> radio   C<seq>|<command>          CD<seq>|<command>
//! radio -> client   R<seq>|<hex code>|<msg>   S<handle>|<path> <k=v> ...
//! ```
//!
//! - [`framing`] - byte stream to lines
//! - [`message`] - line to [`ClassifiedLine`]
//! - [`command`] - command text to outbound line

pub mod command;
pub mod framing;
pub mod message;

pub use command::{encode_command, Verbosity};
pub use framing::LineFramer;
pub use message::{classify, ClassifiedLine, Reply, StatusBroadcast};
