//! Listener protocols.
//!
//! The remote API reports listener protocols as strings. They are parsed
//! once, at the boundary, into [`ListenerProtocol`], which separates
//! layer-4 listeners (targets hang off the listener) from layer-7 listeners
//! (targets hang off forwarding rules).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SyncError;

/// Layer-4 listener protocols.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum L4Protocol {
    /// Plain TCP.
    Tcp,
    /// UDP.
    Udp,
    /// TCP with TLS termination at the load balancer.
    TcpSsl,
}

/// Layer-7 listener protocols.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum L7Protocol {
    /// HTTP.
    Http,
    /// HTTPS.
    Https,
}

/// A listener protocol tagged with its layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ListenerProtocol {
    /// TCP, UDP or TCP_SSL.
    Layer4(L4Protocol),
    /// HTTP or HTTPS.
    Layer7(L7Protocol),
}

impl ListenerProtocol {
    /// Plain TCP.
    pub const TCP: Self = Self::Layer4(L4Protocol::Tcp);
    /// UDP.
    pub const UDP: Self = Self::Layer4(L4Protocol::Udp);
    /// HTTP.
    pub const HTTP: Self = Self::Layer7(L7Protocol::Http);
    /// HTTPS.
    pub const HTTPS: Self = Self::Layer7(L7Protocol::Https);

    /// The protocol as the remote API spells it.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Layer4(L4Protocol::Tcp) => "TCP",
            Self::Layer4(L4Protocol::Udp) => "UDP",
            Self::Layer4(L4Protocol::TcpSsl) => "TCP_SSL",
            Self::Layer7(L7Protocol::Http) => "HTTP",
            Self::Layer7(L7Protocol::Https) => "HTTPS",
        }
    }

    /// Whether this is a layer-7 protocol.
    #[must_use]
    pub fn is_layer7(&self) -> bool {
        matches!(self, Self::Layer7(_))
    }
}

impl fmt::Display for ListenerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListenerProtocol {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(Self::Layer4(L4Protocol::Tcp)),
            "UDP" => Ok(Self::Layer4(L4Protocol::Udp)),
            "TCP_SSL" => Ok(Self::Layer4(L4Protocol::TcpSsl)),
            "HTTP" => Ok(Self::Layer7(L7Protocol::Http)),
            "HTTPS" => Ok(Self::Layer7(L7Protocol::Https)),
            other => Err(SyncError::InvalidRequest {
                field: "protocol".to_string(),
                reason: format!("unsupported listener protocol {other:?}"),
            }),
        }
    }
}

impl TryFrom<String> for ListenerProtocol {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ListenerProtocol> for String {
    fn from(p: ListenerProtocol) -> Self {
        p.as_str().to_string()
    }
}
