//! Transport endpoints (spec §3: "Address").
//!
//! An [`Address`] is the textual `host:port` exactly as bound or configured.
//! Equality and hashing are on that exact byte string, never on a resolved
//! [`std::net::SocketAddr`]: two addresses that would resolve to the same
//! socket but are spelled differently are *not* equal here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::error::{Error, Result};

/// A `host:port` transport endpoint, compared as an exact string.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Wraps an already-formatted `host:port` string.
    pub fn new(host_port: impl Into<String>) -> Self {
        Address(host_port.into())
    }

    /// The exact textual form, as it appears on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolves to a socket address only at the point a datagram is
    /// actually sent; never cached back onto `self`.
    pub fn to_socket_addr(&self) -> Result<SocketAddr> {
        self.0
            .parse()
            .map_err(|_| Error::DecodeError(format!("invalid address {:?}", self.0)))
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address(addr.to_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_spellings_are_not_equal() {
        let a = Address::new("127.0.0.1:9000");
        let b = Address::new("localhost:9000");
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_socket_addr() {
        let addr = Address::new("127.0.0.1:9000");
        let socket: SocketAddr = addr.to_socket_addr().unwrap();
        assert_eq!(socket.port(), 9000);
    }
}
