//! Client and server configuration.
//!
//! Both config structs have `Default` values taken from the `DEFAULT_*`
//! constants and can be embedded in an application's own config file
//! (durations are in milliseconds there).
//!
//! ```
//! use rmq_rpc::config::ClientConfig;
//!
//! let cfg: ClientConfig = serde_json::from_str(
//!     r#"{"endpoint": "amqp://localhost", "queue": "billing", "expiry_ms": 500}"#,
//! ).unwrap();
//! assert_eq!(cfg.timeout.as_millis(), 3000);
//! assert_eq!(cfg.expiry.unwrap().as_millis(), 500);
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Default time a caller waits for a reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default supervisor tick.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Default prefetch (one in-flight request per channel).
pub const DEFAULT_PREFETCH: u16 = 1;

/// Default size of the per-connection worker pool.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// Default broker endpoint.
pub const DEFAULT_ENDPOINT: &str = "amqp://127.0.0.1:5672/%2f";

/// Configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Broker endpoint.
    pub endpoint: String,
    /// Request queue the server consumes.
    pub queue: String,
    /// How long `call` waits for a reply.
    #[serde(rename = "timeout_ms", deserialize_with = "millis")]
    pub timeout: Duration,
    /// Per-message expiration. `None` keeps requests queued indefinitely.
    #[serde(rename = "expiry_ms", deserialize_with = "optional_millis")]
    pub expiry: Option<Duration>,
    /// Worker pool size for this client's connection.
    pub pool_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            queue: String::new(),
            timeout: DEFAULT_TIMEOUT,
            expiry: None,
            pool_size: DEFAULT_WORKER_POOL_SIZE,
        }
    }
}

/// Configuration for a [`Server`](crate::server::Server).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Broker endpoint.
    pub endpoint: String,
    /// Queue to consume requests from.
    pub queue: String,
    /// Worker pool size for the server's connection.
    pub worker_pool_size: usize,
    /// Supervisor tick, which doubles as the reconnect backoff.
    #[serde(rename = "tick_interval_ms", deserialize_with = "millis")]
    pub tick_interval: Duration,
    /// Unacknowledged deliveries allowed per channel.
    pub prefetch: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            queue: String::new(),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            tick_interval: DEFAULT_TICK_INTERVAL,
            prefetch: DEFAULT_PREFETCH,
        }
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_millis(u64::deserialize(deserializer)?))
}

fn optional_millis<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.timeout, Duration::from_millis(3000));
        assert_eq!(cfg.expiry, None);
        assert_eq!(cfg.pool_size, DEFAULT_WORKER_POOL_SIZE);
    }

    #[test]
    fn test_server_defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.tick_interval, Duration::from_millis(100));
        assert_eq!(cfg.prefetch, 1);
    }

    #[test]
    fn test_server_from_json() {
        let cfg: ServerConfig = serde_json::from_str(
            r#"{"queue": "jobs", "worker_pool_size": 2, "tick_interval_ms": 250}"#,
        )
        .unwrap();
        assert_eq!(cfg.queue, "jobs");
        assert_eq!(cfg.worker_pool_size, 2);
        assert_eq!(cfg.tick_interval, Duration::from_millis(250));
        assert_eq!(cfg.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_client_null_expiry() {
        let cfg: ClientConfig = serde_json::from_str(r#"{"expiry_ms": null}"#).unwrap();
        assert_eq!(cfg.expiry, None);
    }
}
