//! Protocol and tuning constants for flexprobe.
//!
//! Wire-level numbers (ports, header sizes) sit next to the defaults used by
//! [`Config`](crate::Config), so every magic number has a single home.
//!
//! # Categories
//!
//! - **Network**: ports and datagram layout
//! - **Timeouts**: discovery, command and shutdown deadlines
//! - **Limits**: buffer and queue bounds

use std::time::Duration;

// ============================================================================
// Network
// ============================================================================

/// UDP port the radio broadcasts its discovery beacon on.
pub const DISCOVERY_PORT: u16 = 4992;

/// TCP port of the SmartSDR command API.
pub const SESSION_PORT: u16 = 4992;

/// Size of the binary (VITA-49) header that precedes the beacon text.
pub const DISCOVERY_HEADER_LEN: usize = 28;

/// Receive buffer for a single discovery datagram.
pub const DISCOVERY_DATAGRAM_MAX: usize = 1500;

/// Key whose presence marks a datagram payload as a discovery beacon.
pub const DISCOVERY_VERSION_KEY: &str = "discovery_protocol_version";

/// Command sent (best-effort) when a session shuts down.
pub const DISCONNECT_COMMAND: &str = "client disconnect";

/// Commands the probe sends when given none: radio info plus the
/// subscriptions that make status traffic flow. Wire style, so they go out
/// as `CD` whatever `--debug` says.
pub const DEFAULT_COMMANDS: &str = "\
CD0 | info
CD2 | sub client all
CD9 | sub pan all
CD11 | sub radio all
CD13 | sub slice all
CD16 | sub tx all
";

// ============================================================================
// Timeouts
// ============================================================================

/// How long discovery listens before giving up.
///
/// Radios beacon roughly once per second, so a few seconds covers
/// a missed packet or two.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for a reply to a single command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on the disconnect notice write during shutdown.
pub const DISCONNECT_NOTICE_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Limits
// ============================================================================

/// Socket read buffer for the session read loop.
pub const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Longest line the framer accepts before declaring the stream malformed.
///
/// Status lines for meters and profiles can run to a few kilobytes;
/// 64KB leaves plenty of headroom.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Consecutive UDP receive errors tolerated during discovery.
pub const MAX_DISCOVERY_ERRORS: u32 = 10;

/// Sequence id of the first command in a session.
pub const FIRST_SEQUENCE: u32 = 1;

/// Per-subscriber queue depth for status broadcasts.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Queue depth for unrecognized lines forwarded to the diagnostic sink.
pub const DIAGNOSTIC_QUEUE_CAPACITY: usize = 64;
