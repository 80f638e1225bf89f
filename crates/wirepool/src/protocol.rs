//! Wire protocols served by the pool.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// A wire protocol with its own adapter and pool instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain TCP / HTTP/1.1.
    Http,
    /// HTTP/1.1 over TLS.
    Https,
    /// HTTP/2 sessions.
    Http2,
    /// HTTP/3 over QUIC.
    Http3,
    /// WebSocket connections.
    WebSocket,
    /// gRPC calls.
    Grpc,
}

impl Protocol {
    /// Every supported protocol.
    pub const ALL: [Protocol; 6] = [
        Protocol::Http,
        Protocol::Https,
        Protocol::Http2,
        Protocol::Http3,
        Protocol::WebSocket,
        Protocol::Grpc,
    ];

    /// Canonical lowercase name, used as the factory registry key.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Http2 => "http2",
            Self::Http3 => "http3",
            Self::WebSocket => "websocket",
            Self::Grpc => "grpc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "http1" | "http/1.1" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "http2" | "h2" | "http/2" => Ok(Self::Http2),
            "http3" | "h3" | "http/3" => Ok(Self::Http3),
            "websocket" | "ws" | "wss" => Ok(Self::WebSocket),
            "grpc" => Ok(Self::Grpc),
            _ => Err(PoolError::UnknownProtocol(s.to_string())),
        }
    }
}
