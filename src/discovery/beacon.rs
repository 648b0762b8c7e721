//! Discovery beacon parsing.
//!
//! A beacon datagram is a 28-byte VITA-49 header followed by NUL-terminated
//! ASCII text:
//!
//! ```text
//! [28 bytes header] discovery_protocol_version=3.0.0.1 model=FLEX-6600 serial=1234-5678 ... \0
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use crate::constants::{DISCOVERY_HEADER_LEN, DISCOVERY_VERSION_KEY};

/// A validated discovery beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryBeacon {
    /// Address the datagram came from.
    pub sender: IpAddr,
    /// `key=value` pairs from the beacon text.
    pub payload: HashMap<String, String>,
}

impl DiscoveryBeacon {
    /// Parse a raw datagram.
    ///
    /// Returns `None` for anything that isn't a beacon: too short, not
    /// UTF-8, or missing `discovery_protocol_version`. Tokens without `=`
    /// are ignored.
    pub fn parse(sender: IpAddr, datagram: &[u8]) -> Option<Self> {
        let text = datagram.get(DISCOVERY_HEADER_LEN..)?;
        let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        let text = std::str::from_utf8(&text[..end]).ok()?;
        if !text.is_ascii() {
            return None;
        }

        let payload: HashMap<String, String> = text
            .split_whitespace()
            .filter_map(|token| token.split_once('='))
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        if !payload.contains_key(DISCOVERY_VERSION_KEY) {
            return None;
        }

        Some(Self { sender, payload })
    }

    /// Look up a payload value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }

    /// Advertised discovery protocol version (always present).
    pub fn protocol_version(&self) -> &str {
        self.get(DISCOVERY_VERSION_KEY).unwrap_or_default()
    }

    /// Radio model, e.g. `FLEX-6600`.
    pub fn model(&self) -> Option<&str> {
        self.get("model")
    }

    /// Serial number.
    pub fn serial(&self) -> Option<&str> {
        self.get("serial")
    }

    /// User-assigned nickname. Spaces are sent as `_`.
    pub fn nickname(&self) -> Option<&str> {
        self.get("nickname")
    }

    /// Address the radio advertises for itself. Kept as text; the session
    /// connects to the datagram's sender.
    pub fn ip(&self) -> Option<&str> {
        self.get("ip")
    }

    /// Firmware version.
    pub fn version(&self) -> Option<&str> {
        self.get("version")
    }

    /// Advertised TCP API port, if present and numeric.
    pub fn port(&self) -> Option<u16> {
        self.get("port").and_then(|p| p.parse().ok())
    }

    /// Address to open a session against.
    ///
    /// Uses the datagram's sender and the advertised port, falling back to
    /// `default_port`.
    pub fn session_address(&self, default_port: u16) -> SocketAddr {
        SocketAddr::new(self.sender, self.port().unwrap_or(default_port))
    }
}

impl std::fmt::Display for DiscoveryBeacon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {} (serial {}, nickname {}, firmware {}, discovery v{})",
            self.model().unwrap_or("unknown radio"),
            self.sender,
            self.serial().unwrap_or("?"),
            self.nickname().unwrap_or("?"),
            self.version().unwrap_or("?"),
            self.protocol_version(),
        )
    }
}

/// Build a datagram the way a radio would. Test helper.
#[cfg(test)]
pub(crate) fn datagram(text: &str) -> Vec<u8> {
    let mut buf = vec![0x38u8; DISCOVERY_HEADER_LEN];
    buf.extend_from_slice(text.as_bytes());
    buf.push(0);
    buf
}
