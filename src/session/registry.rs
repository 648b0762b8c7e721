//! Command/reply correlation.
//!
//! Each outgoing command gets a fresh sequence id and a oneshot channel. The
//! read loop hands every `R` line to [`TransactionRegistry::resolve`], which
//! completes the matching [`PendingCommand`] no matter what order replies
//! arrive in.
//!
//! ```text
//! caller                      registry                     read loop
//!   allocate("info") ───────▶ 7 => Outstanding
//!   C7|info ─────────────────────────────────────────────▶ wire
//!                             7 removed ◀──── resolve(R7|0|...)
//!   wait() ◀── Ok(CommandResponse)
//! ```
//!
//! Ids are never reused within a session, so a reply that shows up after its
//! caller timed out or cancelled finds no entry and is discarded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{ProtocolError, Result};
use crate::protocol::command::validate_command;
use crate::protocol::{encode_command, Reply, Verbosity};

/// Completed command: what was sent and what the radio said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    /// Sequence id the command went out with.
    pub sequence: u32,
    /// Command text (without the `C<seq>|` prefix).
    pub command: String,
    /// Verbosity the command was sent with.
    pub verbosity: Verbosity,
    /// Radio error code, `0` on success.
    pub code: u32,
    /// Reply message, possibly empty.
    pub message: String,
}

impl CommandResponse {
    /// Returns `true` when the radio reported success.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

impl std::fmt::Display for CommandResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {} -> {:08X}", self.sequence, self.command, self.code)?;
        if !self.message.is_empty() {
            write!(f, " {}", self.message)?;
        }
        Ok(())
    }
}

/// A command that is on the wire and not yet answered.
struct Outstanding {
    command: String,
    verbosity: Verbosity,
    reply_tx: oneshot::Sender<Result<CommandResponse>>,
}

#[derive(Default)]
struct RegistryState {
    /// Next id to hand out; `None` once the id space is used up.
    next_sequence: Option<u32>,
    outstanding: HashMap<u32, Outstanding>,
    closed: bool,
}

/// Shared table of outstanding commands.
///
/// Cheap to clone; all clones see the same table behind one mutex.
#[derive(Clone)]
pub struct TransactionRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl std::fmt::Debug for TransactionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("TransactionRegistry")
            .field("next_sequence", &state.next_sequence)
            .field("outstanding", &state.outstanding.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl TransactionRegistry {
    /// Create a registry whose first id is `first_sequence`.
    pub fn new(first_sequence: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                next_sequence: Some(first_sequence),
                ..RegistryState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve the next id for `command` and record it as outstanding.
    ///
    /// Returns the pending handle and the exact line to transmit (without
    /// the trailing newline).
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::SessionClosed`] once [`close`](Self::close) ran
    /// - [`ProtocolError::InvalidCommand`] for empty or multi-line text
    /// - [`ProtocolError::SequenceExhausted`] when no ids remain
    pub fn allocate(
        &self,
        command: &str,
        verbosity: Verbosity,
    ) -> Result<(PendingCommand, String)> {
        let command = validate_command(command)?;
        let mut state = self.lock();
        if state.closed {
            return Err(ProtocolError::SessionClosed);
        }

        let sequence = state.next_sequence.ok_or(ProtocolError::SequenceExhausted)?;
        state.next_sequence = sequence.checked_add(1);

        let (reply_tx, reply_rx) = oneshot::channel();
        state.outstanding.insert(
            sequence,
            Outstanding {
                command: command.to_string(),
                verbosity,
                reply_tx,
            },
        );
        drop(state);

        let pending = PendingCommand {
            sequence,
            command: command.to_string(),
            verbosity,
            reply_rx,
            registry: self.clone(),
        };
        Ok((pending, encode_command(sequence, verbosity, command)))
    }

    /// Take an id without registering a transaction.
    ///
    /// Used for the fire-and-forget disconnect notice, which still needs an
    /// id nobody else has. Works after close.
    pub fn reserve_sequence(&self) -> Option<u32> {
        let mut state = self.lock();
        let sequence = state.next_sequence?;
        state.next_sequence = sequence.checked_add(1);
        Some(sequence)
    }

    /// Complete the transaction `reply` answers.
    ///
    /// Returns `false` if no outstanding transaction has that id (never
    /// sent, already answered, timed out or cancelled). The caller counts
    /// that as an anomaly.
    pub fn resolve(&self, reply: Reply) -> bool {
        let Some(entry) = self.lock().outstanding.remove(&reply.sequence) else {
            return false;
        };

        let response = CommandResponse {
            sequence: reply.sequence,
            command: entry.command,
            verbosity: entry.verbosity,
            code: reply.code,
            message: reply.message,
        };
        // The waiter may have been dropped a moment ago
        let _ = entry.reply_tx.send(Ok(response));
        true
    }

    /// Forget `sequence` without completing it. Returns whether it was
    /// still outstanding.
    pub fn abandon(&self, sequence: u32) -> bool {
        self.lock().outstanding.remove(&sequence).is_some()
    }

    /// Refuse new commands and fail every outstanding one with
    /// [`ProtocolError::SessionClosed`]. Returns how many were failed.
    ///
    /// Idempotent.
    pub fn close(&self) -> usize {
        let drained: Vec<Outstanding> = {
            let mut state = self.lock();
            state.closed = true;
            state.outstanding.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        for entry in drained {
            let _ = entry.reply_tx.send(Err(ProtocolError::SessionClosed));
        }
        count
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of commands awaiting a reply.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding.len()
    }

    /// Returns `true` if `sequence` is awaiting a reply.
    pub fn is_outstanding(&self, sequence: u32) -> bool {
        self.lock().outstanding.contains_key(&sequence)
    }
}

/// Caller-side handle to one outstanding command.
///
/// Await it with [`wait`](Self::wait), or give up with
/// [`cancel`](Self::cancel). Dropping the handle also cancels, so a caller
/// whose future is dropped leaves nothing behind in the registry.
pub struct PendingCommand {
    sequence: u32,
    command: String,
    verbosity: Verbosity,
    reply_rx: oneshot::Receiver<Result<CommandResponse>>,
    registry: TransactionRegistry,
}

impl std::fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCommand")
            .field("sequence", &self.sequence)
            .field("command", &self.command)
            .field("verbosity", &self.verbosity)
            .finish_non_exhaustive()
    }
}

impl PendingCommand {
    /// Sequence id this command went out with.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Command text.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Verbosity the command was sent with.
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Wait up to `timeout` for the reply.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::TimedOut`] if no reply arrived in time; the
    ///   transaction is removed and a late reply is discarded
    /// - [`ProtocolError::SessionClosed`] if the session ended first
    pub async fn wait(mut self, timeout: Duration) -> Result<CommandResponse> {
        match tokio::time::timeout(timeout, &mut self.reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_dropped)) => Err(ProtocolError::SessionClosed),
            Err(_elapsed) => {
                if self.registry.abandon(self.sequence) {
                    log::debug!(
                        "[Registry] Command {} ({}) timed out after {:?}",
                        self.sequence,
                        self.command,
                        timeout
                    );
                    return Err(ProtocolError::TimedOut {
                        sequence: self.sequence,
                    });
                }
                // Resolved or closed between the deadline and the abandon
                match self.reply_rx.try_recv() {
                    Ok(result) => result,
                    Err(_) => Err(ProtocolError::TimedOut {
                        sequence: self.sequence,
                    }),
                }
            }
        }
    }

    /// Stop waiting. Other outstanding commands are unaffected.
    ///
    /// Returns `true` if the command was still outstanding.
    pub fn cancel(self) -> bool {
        self.registry.abandon(self.sequence)
    }
}

impl Drop for PendingCommand {
    fn drop(&mut self) {
        self.registry.abandon(self.sequence);
    }
}
