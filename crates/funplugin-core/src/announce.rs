//! Port selection and the handshake line.
//!
//! A plugin process picks a free loopback port, starts listening on it, and
//! only then prints one line to stdout that the host parses to connect:
//!
//! ```text
//! CORE|APP|tcp|127.0.0.1:PORT|grpc
//! ```

use crate::config::{PluginProtocol, PortRange, PortSelection, ProtocolConfig};
use crate::{PluginError, Result};
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::net::{SocketAddr, SocketAddrV4, TcpListener};
use std::str::FromStr;
use tracing::debug;

/// Pick the port the listener will bind to.
///
/// In random mode, candidates are drawn uniformly from the range and checked
/// with a throwaway bind. That socket is released before returning, so another
/// process can still take the port before the real listener binds it.
pub fn select_port(selection: &PortSelection) -> Result<u16> {
    match selection {
        PortSelection::Fixed(port) => Ok(*port),
        PortSelection::Random(range) => select_random_port(*range),
    }
}

fn select_random_port(range: PortRange) -> Result<u16> {
    let exhausted = PluginError::PortExhausted {
        start: range.start,
        end: range.end,
    };
    if range.is_empty() {
        return Err(exhausted);
    }

    let mut rng = rand::rng();
    let mut tried = HashSet::new();

    while tried.len() < range.len() {
        let candidate = rng.random_range(range.start..=range.end);
        if !tried.insert(candidate) {
            continue;
        }
        if is_port_available(candidate) {
            return Ok(candidate);
        }
        debug!("port {} is in use, retrying", candidate);
    }

    Err(exhausted)
}

/// Whether a loopback listener can currently bind `port`.
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(SocketAddrV4::new(ProtocolConfig::LOOPBACK, port)).is_ok()
}

/// The discovery line announced on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub core_version: u32,
    pub app_version: u32,
    pub network: String,
    pub addr: SocketAddr,
    pub protocol: PluginProtocol,
}

impl Handshake {
    /// Handshake for a tcp listener at `addr` with the current protocol versions.
    pub fn new(addr: SocketAddr, protocol: PluginProtocol) -> Self {
        Self {
            core_version: ProtocolConfig::CORE_PROTOCOL_VERSION,
            app_version: ProtocolConfig::APP_PROTOCOL_VERSION,
            network: ProtocolConfig::NETWORK.to_string(),
            addr,
            protocol,
        }
    }
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.core_version, self.app_version, self.network, self.addr, self.protocol
        )
    }
}

impl FromStr for Handshake {
    type Err = PluginError;

    fn from_str(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('|').collect();
        let [core, app, network, addr, protocol] = fields.as_slice() else {
            return Err(PluginError::Handshake {
                message: format!("expected 5 fields, got {}: {:?}", fields.len(), line),
            });
        };

        let parse_version = |field: &str, what: &str| {
            field.parse::<u32>().map_err(|e| PluginError::Handshake {
                message: format!("invalid {} version {:?}: {}", what, field, e),
            })
        };

        Ok(Self {
            core_version: parse_version(*core, "core")?,
            app_version: parse_version(*app, "app")?,
            network: network.to_string(),
            addr: addr.parse().map_err(|e| PluginError::Handshake {
                message: format!("invalid address {:?}: {}", addr, e),
            })?,
            protocol: protocol.parse().map_err(|_| PluginError::Handshake {
                message: format!("unknown protocol {:?}", protocol),
            })?,
        })
    }
}

/// Write the handshake line and flush.
pub fn announce<W: Write>(handshake: &Handshake, mut out: W) -> Result<()> {
    writeln!(out, "{}", handshake)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn local(port: u16) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    #[test]
    fn test_handshake_format() {
        let handshake = Handshake::new(local(34567), PluginProtocol::Grpc);
        assert_eq!(handshake.to_string(), "1|1|tcp|127.0.0.1:34567|grpc");
    }

    #[test]
    fn test_handshake_parse() {
        let parsed: Handshake = "1|1|tcp|127.0.0.1:34567|grpc\n".parse().unwrap();
        assert_eq!(parsed, Handshake::new(local(34567), PluginProtocol::Grpc));

        let parsed: Handshake = "1|1|tcp|127.0.0.1:20000|netrpc".parse().unwrap();
        assert_eq!(parsed.protocol, PluginProtocol::NetRpc);
    }

    #[test]
    fn test_handshake_parse_rejects_malformed() {
        for line in [
            "",
            "1|1|tcp|127.0.0.1:1",
            "1|1|tcp|127.0.0.1:1|grpc|extra",
            "x|1|tcp|127.0.0.1:1|grpc",
            "1|1|tcp|localhost|grpc",
            "1|1|tcp|127.0.0.1:1|soap",
        ] {
            assert!(line.parse::<Handshake>().is_err(), "accepted {:?}", line);
        }
    }

    #[test]
    fn test_announce_writes_single_flushed_line() {
        let mut out = Vec::new();
        announce(&Handshake::new(local(40000), PluginProtocol::Grpc), &mut out).unwrap();
        assert_eq!(out, b"1|1|tcp|127.0.0.1:40000|grpc\n");
    }

    #[test]
    fn test_select_port_fixed() {
        assert_eq!(select_port(&PortSelection::Fixed(50051)).unwrap(), 50051);
    }

    #[test]
    fn test_select_port_random_in_range() {
        let range = PortRange::new(20000, 60000);
        let port = select_port(&PortSelection::Random(range)).unwrap();
        assert!(range.contains(port));
        assert!(is_port_available(port));
    }

    #[test]
    fn test_select_port_skips_occupied() {
        let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let err = select_port(&PortSelection::Random(PortRange::new(port, port))).unwrap_err();
        match err {
            PluginError::PortExhausted { start, end } => {
                assert_eq!(start, port);
                assert_eq!(end, port);
            }
            other => panic!("Expected PortExhausted, got: {:?}", other),
        }
    }

    #[test]
    fn test_select_port_empty_range() {
        let err = select_port(&PortSelection::Random(PortRange::new(10, 1))).unwrap_err();
        assert!(matches!(err, PluginError::PortExhausted { .. }));
    }
}
