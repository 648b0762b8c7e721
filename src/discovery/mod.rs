//! Radio discovery over UDP broadcast.
//!
//! Radios announce themselves roughly once a second on UDP port 4992. The
//! listener binds with `SO_REUSEADDR` so it can share the port with SmartSDR
//! or another copy of this tool, then waits for the first datagram that
//! parses as a [`DiscoveryBeacon`]. Other traffic on the port (VITA-49
//! meter streams, foreign beacons) is skipped.
//!
//! ```ignore
//! let beacon = discovery::discover(&config).await?;
//! let session = Session::connect(beacon.session_address(config.session_port), &config).await?;
//! ```

mod beacon;

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Instant;

pub use beacon::DiscoveryBeacon;

use crate::config::Config;
use crate::constants::{DISCOVERY_DATAGRAM_MAX, MAX_DISCOVERY_ERRORS};
use crate::error::{ProtocolError, Result};

/// UDP receiver for discovery beacons.
#[derive(Debug)]
pub struct DiscoveryListener {
    socket: UdpSocket,
    /// Consecutive receive errors tolerated before giving up.
    max_errors: u32,
}

impl DiscoveryListener {
    /// Bind to `addr` with address reuse and broadcast enabled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        Self::bind_with_limit(addr, MAX_DISCOVERY_ERRORS)
    }

    /// Bind with a custom consecutive-error limit.
    pub fn bind_with_limit(addr: SocketAddr, max_errors: u32) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        let socket = UdpSocket::from_std(socket.into())?;
        log::debug!("[Discovery] Listening on {}", socket.local_addr()?);
        Ok(Self { socket, max_errors })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Wait for the first valid beacon.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::DiscoveryTimeout`] if nothing valid arrives in time
    /// - [`ProtocolError::Transport`] after more than `max_errors`
    ///   consecutive receive failures
    pub async fn find_first_beacon(&self, timeout: Duration) -> Result<DiscoveryBeacon> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; DISCOVERY_DATAGRAM_MAX];
        let mut errors: u32 = 0;

        loop {
            let received =
                match tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                    Ok(received) => received,
                    Err(_elapsed) => return Err(ProtocolError::DiscoveryTimeout(timeout)),
                };

            match received {
                Ok((n, from)) => {
                    errors = 0;
                    if let Some(beacon) = DiscoveryBeacon::parse(from.ip(), &buf[..n]) {
                        log::info!("[Discovery] Found {beacon}");
                        return Ok(beacon);
                    }
                    log::trace!("[Discovery] Skipping {n}-byte datagram from {from}");
                }
                Err(e) => {
                    errors += 1;
                    log::warn!("[Discovery] recv_from failed ({errors}/{}): {e}", self.max_errors);
                    if errors > self.max_errors {
                        return Err(ProtocolError::Transport(format!(
                            "discovery socket failed {errors} times in a row: {e}"
                        )));
                    }
                }
            }
        }
    }
}

/// Listen on the configured discovery port and return the first beacon.
pub async fn discover(config: &Config) -> Result<DiscoveryBeacon> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.discovery_port));
    let listener = DiscoveryListener::bind_with_limit(addr, config.max_discovery_errors)?;
    log::info!("[Discovery] Looking for a radio on UDP {}...", config.discovery_port);
    listener.find_first_beacon(config.discovery_timeout()).await
}

#[cfg(test)]
mod tests {
    use super::beacon::datagram;
    use super::*;

    fn loopback() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
    }

    #[tokio::test]
    async fn test_skips_junk_then_returns_first_beacon() {
        let listener = DiscoveryListener::bind(loopback()).unwrap();
        let target = listener.local_addr().unwrap();

        let radio = UdpSocket::bind(loopback()).await.unwrap();
        radio.send_to(b"not a beacon", target).await.unwrap();
        radio
            .send_to(&datagram("model=FLEX-6600 serial=1"), target)
            .await
            .unwrap();
        radio
            .send_to(&datagram("discovery_protocol_version=3 model=FLEX-6600 serial=2"), target)
            .await
            .unwrap();
        radio
            .send_to(&datagram("discovery_protocol_version=3 model=FLEX-6400 serial=3"), target)
            .await
            .unwrap();

        let beacon = listener
            .find_first_beacon(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(beacon.serial(), Some("2"));
        assert_eq!(beacon.sender, radio.local_addr().unwrap().ip());
    }

    #[tokio::test]
    async fn test_times_out_without_beacon() {
        let listener = DiscoveryListener::bind(loopback()).unwrap();
        let target = listener.local_addr().unwrap();

        let radio = UdpSocket::bind(loopback()).await.unwrap();
        radio.send_to(&datagram("model=FLEX-6600"), target).await.unwrap();

        let started = std::time::Instant::now();
        let err = listener
            .find_first_beacon(Duration::from_millis(150))
            .await
            .unwrap_err();
        assert_eq!(err, ProtocolError::DiscoveryTimeout(Duration::from_millis(150)));
        assert!(started.elapsed() >= Duration::from_millis(140));
    }
}
