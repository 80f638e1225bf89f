//! Pool configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;
use crate::protocol::Protocol;

/// Configuration for a connection pool.
///
/// A config is an immutable snapshot once handed to a pool. It can only be
/// replaced through [`ConnectionPoolManager::update_config`], which validates
/// the merged result first.
///
/// [`ConnectionPoolManager::update_config`]: crate::pool::ConnectionPoolManager::update_config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of stored connections before acquisitions are refused.
    pub max_connections: u32,

    /// Idle time after which an available connection is swept.
    #[serde(with = "duration_ms")]
    pub connection_timeout: Duration,

    /// Keep-alive budget used by the protocol health predicates.
    #[serde(with = "duration_ms")]
    pub keep_alive_timeout: Duration,

    /// Default time a queued acquisition may wait.
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,

    /// Time allowed for a peer to finish sending request headers.
    #[serde(with = "duration_ms")]
    pub headers_timeout: Duration,

    /// Protocol-specific tuning values.
    #[serde(default)]
    pub protocol_specific: BTreeMap<String, serde_json::Value>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            connection_timeout: Duration::from_secs(30),
            keep_alive_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            headers_timeout: Duration::from_secs(60),
            protocol_specific: BTreeMap::new(),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default (HTTP) values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults tuned for plain HTTP/1.1 listeners.
    #[must_use]
    pub fn http() -> Self {
        Self::default()
    }

    /// Defaults tuned for HTTPS listeners.
    #[must_use]
    pub fn https() -> Self {
        Self::default().protocol_value("tls_grace_period_ms", 1000)
    }

    /// Defaults tuned for HTTP/2 sessions.
    #[must_use]
    pub fn http2() -> Self {
        Self {
            max_connections: 100,
            keep_alive_timeout: Duration::from_secs(30),
            ..Self::default()
        }
        .protocol_value("max_concurrent_streams", 100)
    }

    /// Defaults tuned for HTTP/3 sessions.
    #[must_use]
    pub fn http3() -> Self {
        Self::http2().protocol_value("max_rtt_ms", 5000)
    }

    /// Defaults tuned for WebSocket servers.
    #[must_use]
    pub fn websocket() -> Self {
        Self {
            max_connections: 10_000,
            keep_alive_timeout: Duration::from_secs(30),
            ..Self::default()
        }
        .protocol_value("ping_interval_ms", 30_000)
        .protocol_value("pong_timeout_ms", 5000)
    }

    /// Defaults tuned for gRPC servers.
    #[must_use]
    pub fn grpc() -> Self {
        Self {
            connection_timeout: Duration::from_secs(60),
            keep_alive_timeout: Duration::from_secs(20),
            ..Self::default()
        }
    }

    /// Protocol-tuned defaults.
    #[must_use]
    pub fn for_protocol(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Http => Self::http(),
            Protocol::Https => Self::https(),
            Protocol::Http2 => Self::http2(),
            Protocol::Http3 => Self::http3(),
            Protocol::WebSocket => Self::websocket(),
            Protocol::Grpc => Self::grpc(),
        }
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the keep-alive timeout.
    #[must_use]
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    /// Set the default acquisition timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the headers timeout.
    #[must_use]
    pub fn headers_timeout(mut self, timeout: Duration) -> Self {
        self.headers_timeout = timeout;
        self
    }

    /// Set a protocol-specific value.
    #[must_use]
    pub fn protocol_value(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.protocol_specific.insert(key.into(), value.into());
        self
    }

    /// Read a protocol-specific unsigned integer.
    #[must_use]
    pub fn protocol_u64(&self, key: &str) -> Option<u64> {
        self.protocol_specific.get(key).and_then(serde_json::Value::as_u64)
    }

    /// Read a protocol-specific millisecond value as a duration.
    #[must_use]
    pub fn protocol_duration_ms(&self, key: &str) -> Option<Duration> {
        self.protocol_u64(key).map(Duration::from_millis)
    }

    /// Validate the configuration.
    ///
    /// Every numeric field must be positive.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::InvalidConfig(
                "max_connections must be greater than 0".into(),
            ));
        }

        let durations = [
            ("connection_timeout", self.connection_timeout),
            ("keep_alive_timeout", self.keep_alive_timeout),
            ("request_timeout", self.request_timeout),
            ("headers_timeout", self.headers_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(PoolError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        Ok(())
    }

    /// Apply a partial update, returning the merged configuration.
    ///
    /// The result is not validated; callers decide whether to accept it.
    #[must_use]
    pub fn merged(&self, update: &PoolConfigUpdate) -> Self {
        let mut merged = self.clone();
        if let Some(max) = update.max_connections {
            merged.max_connections = max;
        }
        if let Some(timeout) = update.connection_timeout {
            merged.connection_timeout = timeout;
        }
        if let Some(timeout) = update.keep_alive_timeout {
            merged.keep_alive_timeout = timeout;
        }
        if let Some(timeout) = update.request_timeout {
            merged.request_timeout = timeout;
        }
        if let Some(timeout) = update.headers_timeout {
            merged.headers_timeout = timeout;
        }
        for (key, value) in &update.protocol_specific {
            merged.protocol_specific.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Serialized form used to memoize pool instances.
    ///
    /// Fields serialize in declaration order and `protocol_specific` in key
    /// order, so two configs with equal contents produce the same key.
    #[must_use]
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// A partial configuration change for [`PoolConfig::merged`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolConfigUpdate {
    /// New maximum connection count.
    pub max_connections: Option<u32>,
    /// New idle timeout.
    pub connection_timeout: Option<Duration>,
    /// New keep-alive timeout.
    pub keep_alive_timeout: Option<Duration>,
    /// New acquisition timeout.
    pub request_timeout: Option<Duration>,
    /// New headers timeout.
    pub headers_timeout: Option<Duration>,
    /// Protocol-specific values to insert or overwrite.
    pub protocol_specific: BTreeMap<String, serde_json::Value>,
}

impl PoolConfigUpdate {
    /// An update that changes nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Change the maximum connection count.
    #[must_use]
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Change the idle timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Change the keep-alive timeout.
    #[must_use]
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = Some(timeout);
        self
    }

    /// Change the acquisition timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
