//! Peer and transport addresses.
//!
//! - `peer:<fingerprint>` names a peer by key; it must be resolved.
//! - `relay:<fingerprint>` names a peer able to forward objects.
//! - anything else is `<scheme>:<target>` for a concrete transport, e.g.
//!   `tcps:127.0.0.1:4000` or `mem:alice`.

use std::fmt;
use std::str::FromStr;

use objnet_core::PublicKey;

use crate::error::ExchangeError;

pub const PEER_SCHEME: &str = "peer";
pub const RELAY_SCHEME: &str = "relay";

/// A parsed address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Peer(PublicKey),
    Relay(PublicKey),
    Transport { scheme: String, target: String },
}

impl Address {
    pub fn parse(s: &str) -> Result<Self, ExchangeError> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| ExchangeError::InvalidAddress(s.to_string()))?;
        if scheme.is_empty() || rest.is_empty() {
            return Err(ExchangeError::InvalidAddress(s.to_string()));
        }
        let key = || {
            PublicKey::from_fingerprint(rest)
                .map_err(|_| ExchangeError::InvalidAddress(s.to_string()))
        };
        match scheme {
            PEER_SCHEME => Ok(Address::Peer(key()?)),
            RELAY_SCHEME => Ok(Address::Relay(key()?)),
            _ => Ok(Address::Transport {
                scheme: scheme.to_string(),
                target: rest.to_string(),
            }),
        }
    }

    /// The `peer:` address for a key.
    pub fn peer(key: &PublicKey) -> String {
        format!("{}:{}", PEER_SCHEME, key.fingerprint())
    }

    /// The `relay:` address for a key.
    pub fn relay(key: &PublicKey) -> String {
        format!("{}:{}", RELAY_SCHEME, key.fingerprint())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Peer(key) => write!(f, "{}:{}", PEER_SCHEME, key),
            Address::Relay(key) => write!(f, "{}:{}", RELAY_SCHEME, key),
            Address::Transport { scheme, target } => write!(f, "{}:{}", scheme, target),
        }
    }
}

impl FromStr for Address {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
