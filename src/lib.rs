//! flexprobe - client for the FlexRadio SmartSDR TCP API.
//!
//! Finds a radio on the LAN, opens a command session, and sorts everything
//! the radio says into replies, status broadcasts and unrecognized lines.
//!
//! # Architecture
//!
//! - **Discovery** - UDP listener that returns the first valid beacon
//! - **Protocol** - line framing, line classification, command encoding
//! - **Session** - TCP connection, read loop, command/reply correlation,
//!   status fan-out
//!
//! # Modules
//!
//! - [`discovery`] - beacon parsing and the UDP listener
//! - [`protocol`] - wire format, pure and synchronous
//! - [`session`] - connection lifecycle and concurrency
//! - [`script`] - command lists for the probe harness
//! - [`config`] - configuration loading
//!
//! # Example
//!
//! ```no_run
//! use flexprobe::{discovery, Config, Session, StatusFilter, Verbosity};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let beacon = discovery::discover(&config).await?;
//! let session = Session::connect(beacon.session_address(config.session_port), &config).await?;
//!
//! let radio = session.handle();
//! let mut tx = radio.subscribe(StatusFilter::topic("transmit"));
//! radio.command("sub tx all", Verbosity::Debug).await?;
//!
//! while let Some(status) = tx.recv().await {
//!     println!("{:?}", status.attributes);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod script;
pub mod session;

// Re-export commonly used types
pub use config::Config;
pub use discovery::{DiscoveryBeacon, DiscoveryListener};
pub use error::ProtocolError;
pub use protocol::{ClassifiedLine, Reply, StatusBroadcast, Verbosity};
pub use session::{
    CommandResponse, PendingCommand, Session, SessionHandle, SessionState, StatusFilter,
    StatusSubscription,
};
