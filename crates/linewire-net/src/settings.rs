//! Connection string handling.
//!
//! A connection string is `"<ipv4-address>:<port>"`. Both halves are checked
//! against fixed grammars: each address octet must be 0–255 written without
//! leading zeros (a lone `0` is fine) and the port must be 0–65535.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{NetworkError, Result};

static IPV4_GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^((0|1[0-9]{0,2}|2[0-9]?|2[0-4][0-9]|25[0-5]|[3-9][0-9]?)\.){3}(0|1[0-9]{0,2}|2[0-9]?|2[0-4][0-9]|25[0-5]|[3-9][0-9]?)$",
    )
    .expect("IPv4 grammar is a valid regex")
});

static PORT_GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([0-9]{1,4}|[1-5][0-9]{4}|6[0-4][0-9]{3}|65[0-4][0-9]{2}|655[0-2][0-9]|6553[0-5])$",
    )
    .expect("port grammar is a valid regex")
});

/// A validated `"<ipv4-address>:<port>"` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionSettings {
    address: Ipv4Addr,
    port: u16,
}

impl ConnectionSettings {
    /// Settings for `address:port`.
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }

    /// Parse and validate a connection string.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let invalid = || NetworkError::InvalidAddress(connection_string.to_string());

        let (address, port) = connection_string.split_once(':').ok_or_else(invalid)?;
        if !is_valid_address(address) || !is_valid_port(port) {
            return Err(invalid());
        }

        Ok(Self {
            address: address.parse().map_err(|_| invalid())?,
            port: port.parse().map_err(|_| invalid())?,
        })
    }

    /// Whether `connection_string` would be accepted by [`parse`](Self::parse).
    pub fn validate(connection_string: &str) -> bool {
        Self::parse(connection_string).is_ok()
    }

    /// Build the connection string for `address` and `port`.
    pub fn generate(address: Ipv4Addr, port: u16) -> String {
        format!("{address}:{port}")
    }

    /// The connection string for these settings.
    pub fn connection_string(&self) -> String {
        Self::generate(self.address, self.port)
    }

    pub fn ip_address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port))
    }
}

impl std::str::FromStr for ConnectionSettings {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Check a dotted-quad address against the IPv4 grammar.
pub fn is_valid_address(address: &str) -> bool {
    IPV4_GRAMMAR.is_match(address)
}

/// Check a decimal port against the port grammar.
pub fn is_valid_port(port: &str) -> bool {
    PORT_GRAMMAR.is_match(port)
}
