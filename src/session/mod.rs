//! TCP session with a radio.
//!
//! A [`Session`] owns the connection. It spawns two tasks:
//!
//! - **Read loop**: the only reader of the socket. Bytes go through the
//!   [`LineFramer`], each line through [`classify`], then to the
//!   [`TransactionRegistry`] (replies), the status subscribers (broadcasts) or
//!   the diagnostic queue (everything else).
//! - **Write loop**: drains queued command lines onto the socket and sends the
//!   disconnect notice on the way out.
//!
//! ```text
//! SessionHandle::send_command ─▶ registry.allocate ─▶ outbound queue ─▶ write loop ─▶ radio
//! radio ─▶ read loop ─▶ framer ─▶ classify ─┬─▶ Reply  ─▶ registry.resolve ─▶ PendingCommand
//!                                           ├─▶ Status ─▶ StatusSubscription queues
//!                                           └─▶ other  ─▶ diagnostics queue
//! ```
//!
//! # Lifecycle
//!
//! `Connected` ─(close / transport error / malformed stream / EOF)─▶ `Closing`
//! ─(disconnect notice sent)─▶ `Closed`. Entering `Closing` fails every
//! waiting command with [`ProtocolError::SessionClosed`] and ends every
//! subscription. A transport failure is reported once, by [`Session::wait`].

mod registry;
mod stats;
mod subscription;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use registry::{CommandResponse, PendingCommand, TransactionRegistry};
pub use stats::{SessionStats, StatsSnapshot};
pub use subscription::{StatusFilter, StatusSubscription};

use subscription::SubscriberList;

use crate::config::Config;
use crate::constants::{DISCONNECT_NOTICE_TIMEOUT, READ_BUFFER_SIZE};
use crate::error::{ProtocolError, Result};
use crate::protocol::{classify, encode_command, ClassifiedLine, LineFramer, Verbosity};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Read loop running, commands accepted.
    Connected,
    /// Shutting down; new commands fail with `SessionClosed`.
    Closing,
    /// Connection released. Terminal.
    Closed,
}

/// State shared by the session tasks and every handle.
#[derive(Debug)]
struct Shared {
    remote: SocketAddr,
    registry: TransactionRegistry,
    subscribers: Mutex<SubscriberList>,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
    state: watch::Sender<SessionState>,
    /// First fatal error, reported by `Session::wait`.
    failure: Mutex<Option<ProtocolError>>,
    stats: SessionStats,
    command_timeout: Duration,
    subscriber_capacity: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Enter `Closing`: fail waiters, end subscriptions, stop both loops.
    ///
    /// Idempotent. Only the first `reason` is kept.
    fn shut_down(&self, reason: Option<ProtocolError>) {
        if let Some(reason) = reason {
            let mut failure = lock(&self.failure);
            if failure.is_none() {
                log::error!("[Session] {}: {reason}", self.remote);
                *failure = Some(reason);
            }
        }

        let first = self.state.send_if_modified(|state| {
            if *state == SessionState::Connected {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        });
        if first {
            log::info!("[Session] Closing connection to {}", self.remote);
        }

        let failed = self.registry.close();
        if failed > 0 {
            log::debug!("[Session] Failed {failed} outstanding command(s) with SessionClosed");
        }
        lock(&self.subscribers).close();
        self.shutdown.cancel();
    }

    /// Route one framed line.
    fn dispatch(&self, line: &str, diagnostics: &mpsc::Sender<String>) {
        self.stats.line_received();
        match classify(line) {
            ClassifiedLine::Reply(reply) => {
                let sequence = reply.sequence;
                let matched = self.registry.resolve(reply);
                if !matched {
                    log::debug!(
                        "[Session] Discarding reply for unknown sequence {sequence}: {line}"
                    );
                }
                self.stats.reply(matched);
            }
            ClassifiedLine::Status(status) => {
                let missed = lock(&self.subscribers).publish(&status);
                self.stats.status(missed);
            }
            ClassifiedLine::Unrecognized(raw) => {
                log::debug!("[Session] Unrecognized line: {raw}");
                self.stats.unrecognized(diagnostics.try_send(raw).is_ok());
            }
        }
    }
}

/// Owner of a live session.
///
/// Hand out [`SessionHandle`]s to callers that send commands or subscribe.
/// Dropping the `Session` closes it.
#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    diagnostics: Option<mpsc::Receiver<String>>,
    read_task: Option<JoinHandle<()>>,
    write_task: Option<JoinHandle<()>>,
}

impl Session {
    /// Connect to a radio and start the read and write loops.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Transport`] if the TCP connection fails.
    pub async fn connect(addr: SocketAddr, config: &Config) -> Result<Self> {
        log::info!("[Session] Connecting to {addr}");
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::start(stream, addr, config))
    }

    fn start(stream: TcpStream, remote: SocketAddr, config: &Config) -> Self {
        let (reader, writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (diagnostics_tx, diagnostics_rx) =
            mpsc::channel::<String>(config.diagnostic_queue_capacity.max(1));
        let (state_tx, _) = watch::channel(SessionState::Connected);

        let shared = Arc::new(Shared {
            remote,
            registry: TransactionRegistry::new(config.first_sequence),
            subscribers: Mutex::new(SubscriberList::default()),
            outbound: outbound_tx,
            shutdown: CancellationToken::new(),
            state: state_tx,
            failure: Mutex::new(None),
            stats: SessionStats::default(),
            command_timeout: config.command_timeout(),
            subscriber_capacity: config.subscriber_queue_capacity,
        });

        let read_task = tokio::spawn(read_loop(
            Arc::clone(&shared),
            reader,
            LineFramer::new(config.max_line_len),
            diagnostics_tx,
        ));
        let write_task = tokio::spawn(write_loop(
            Arc::clone(&shared),
            writer,
            outbound_rx,
            config.disconnect_command.clone(),
        ));

        log::info!("[Session] Connected to {remote}");
        Self {
            handle: SessionHandle { shared },
            diagnostics: Some(diagnostics_rx),
            read_task: Some(read_task),
            write_task: Some(write_task),
        }
    }

    /// A cloneable handle for sending commands and subscribing.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Take the queue of unrecognized lines. Only the first call gets it.
    pub fn take_diagnostics(&mut self) -> Option<mpsc::Receiver<String>> {
        self.diagnostics.take()
    }

    /// Close the session. See [`SessionHandle::close`].
    pub fn close(&self) {
        self.handle.close();
    }

    /// Wait for the session to end.
    ///
    /// Returns `Ok(())` after an explicit close, or the transport / framing
    /// error that ended it.
    pub async fn wait(mut self) -> Result<()> {
        for task in [self.read_task.take(), self.write_task.take()].into_iter().flatten() {
            if let Err(e) = task.await {
                log::error!("[Session] Session task failed: {e}");
            }
        }
        let failure = lock(&self.handle.shared.failure).take();
        failure.map_or(Ok(()), Err)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.handle.close();
    }
}

/// Cloneable access to a session for concurrent callers.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Queue a command and return its pending handle.
    ///
    /// Only allocation and queueing happen here; the caller then awaits
    /// [`PendingCommand::wait`] without holding up other callers.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::SessionClosed`] immediately if the session is closing
    /// or closed, [`ProtocolError::InvalidCommand`] for multi-line text.
    pub fn send_command(&self, command: &str, verbosity: Verbosity) -> Result<PendingCommand> {
        let (pending, line) = self.shared.registry.allocate(command, verbosity)?;
        log::debug!("[Session] -> {line}");
        if self.shared.outbound.send(line + "\n").is_err() {
            pending.cancel();
            return Err(ProtocolError::SessionClosed);
        }
        Ok(pending)
    }

    /// Send a command and wait for its reply using the configured timeout.
    pub async fn command(&self, command: &str, verbosity: Verbosity) -> Result<CommandResponse> {
        self.send_command(command, verbosity)?
            .wait(self.shared.command_timeout)
            .await
    }

    /// Subscribe to status broadcasts matching `filter`.
    ///
    /// Broadcasts that arrived before this call are not replayed.
    pub fn subscribe(&self, filter: StatusFilter) -> StatusSubscription {
        lock(&self.shared.subscribers).add(filter, self.shared.subscriber_capacity)
    }

    /// Close the session.
    ///
    /// Idempotent and safe from any context. Every waiting command resolves
    /// to [`ProtocolError::SessionClosed`] and later sends fail immediately.
    pub fn close(&self) {
        self.shared.shut_down(None);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Returns `true` once the session left `Connected`.
    pub fn is_closed(&self) -> bool {
        self.state() != SessionState::Connected
    }

    /// Wait until the connection is fully released.
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        // The sender lives in `shared`, which we hold, so this can't fail
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }

    /// Address of the radio.
    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote
    }

    /// Commands awaiting a reply.
    pub fn outstanding(&self) -> usize {
        self.shared.registry.outstanding()
    }

    /// Snapshot of the anomaly counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Default reply timeout used by [`command`](Self::command).
    pub fn command_timeout(&self) -> Duration {
        self.shared.command_timeout
    }
}

/// Read loop: decodes lines from the socket and routes them.
async fn read_loop(
    shared: Arc<Shared>,
    mut reader: OwnedReadHalf,
    mut framer: LineFramer,
    diagnostics: mpsc::Sender<String>,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut lines = Vec::new();

    let failure = loop {
        let read = tokio::select! {
            () = shared.shutdown.cancelled() => break None,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                log::info!("[Session] Radio {} closed the connection", shared.remote);
                break Some(ProtocolError::Transport(
                    "connection closed by radio".to_string(),
                ));
            }
            Ok(n) => {
                // Lines ahead of a malformed one in the same chunk still count
                let framed = framer.feed(&buf[..n], &mut lines);
                for line in lines.drain(..) {
                    shared.dispatch(&line, &diagnostics);
                }
                if let Err(e) = framed {
                    break Some(e);
                }
            }
            Err(e) => break Some(e.into()),
        }
    };

    shared.shut_down(failure);
}

/// Write loop: sends queued lines, then the disconnect notice.
async fn write_loop(
    shared: Arc<Shared>,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<String>,
    disconnect_command: String,
) {
    loop {
        tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => break,
            line = outbound.recv() => {
                let Some(line) = line else { break };
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    shared.shut_down(Some(e.into()));
                    break;
                }
            }
        }
    }

    // Best-effort: the radio may already be gone
    if let Some(sequence) = shared.registry.reserve_sequence() {
        let notice = encode_command(sequence, Verbosity::Normal, &disconnect_command) + "\n";
        match tokio::time::timeout(DISCONNECT_NOTICE_TIMEOUT, writer.write_all(notice.as_bytes()))
            .await
        {
            Ok(Ok(())) => log::debug!("[Session] -> {}", notice.trim_end()),
            Ok(Err(e)) => log::debug!("[Session] Disconnect notice not sent: {e}"),
            Err(_elapsed) => log::debug!("[Session] Disconnect notice timed out"),
        }
    }
    let _ = writer.shutdown().await;

    shared.state.send_replace(SessionState::Closed);
    log::info!("[Session] Connection to {} closed", shared.remote);
}
