//! Transport module - the broker client capability.
//!
//! The RPC layers never talk to a broker library directly. They go through
//! three object-safe traits:
//!
//! - [`Broker`] opens connections to an endpoint
//! - [`BrokerConnection`] opens channels and reports liveness
//! - [`BrokerChannel`] declares queues, publishes, consumes and acks
//!
//! Inbound messages are pushed to a [`DeliveryHandler`]; a channel calls its
//! handlers one delivery at a time on the connection's worker pool.
//!
//! Backends:
//! - [`MemoryBroker`] - in-process broker for tests and single-process setups
//! - `AmqpBroker` - AMQP 0-9-1 via `lapin` (feature `amqp`)

#[cfg(feature = "amqp")]
mod amqp;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::connection::WorkerPool;
use crate::error::Result;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use memory::MemoryBroker;

/// The backend used when neither a broker nor a connection manager is
/// configured.
pub(crate) fn default_broker() -> Result<Arc<dyn Broker>> {
    #[cfg(feature = "amqp")]
    {
        Ok(Arc::new(AmqpBroker::new()))
    }
    #[cfg(not(feature = "amqp"))]
    {
        Err(crate::error::RpcError::Transport(
            "no broker configured; pass one explicitly or enable the `amqp` feature".into(),
        ))
    }
}

/// Run connection or channel teardown work to completion.
///
/// The work goes to the caller's runtime when there is one, otherwise to a
/// short-lived thread. It never goes to the connection's worker pool: the
/// pool is shut down right after an abort and would drop the close midway.
pub(crate) fn spawn_teardown<F>(teardown: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(teardown);
        }
        Err(_) => {
            let spawned = std::thread::Builder::new()
                .name("rmq-teardown".into())
                .spawn(move || futures::executor::block_on(teardown));
            if let Err(e) = spawned {
                tracing::warn!("Could not start teardown thread: {}", e);
            }
        }
    }
}

/// Transport metadata attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// Token matching a reply to its request.
    pub correlation_id: Option<String>,
    /// Queue the reply should be published to.
    pub reply_to: Option<String>,
    /// Time after which the broker drops the message if undelivered.
    pub expiration: Option<Duration>,
}

impl MessageProperties {
    /// Properties for a reply: only the correlation id is carried over.
    pub fn reply_to(request: &MessageProperties) -> Self {
        Self {
            correlation_id: request.correlation_id.clone(),
            ..Self::default()
        }
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Channel-scoped tag used to acknowledge this delivery.
    pub delivery_tag: u64,
    pub properties: MessageProperties,
    pub body: Bytes,
}

/// Queue declaration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    /// Queue name, empty for a broker-generated name.
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueSpec {
    /// A named request queue: non-durable, non-exclusive, non-auto-delete.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
            exclusive: false,
            auto_delete: false,
        }
    }

    /// A private reply queue named by the broker, removed once its consumer
    /// goes away.
    pub fn reply() -> Self {
        Self {
            name: String::new(),
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// Receives deliveries from a consumer.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    /// Handle one delivery. The next delivery for the same consumer is not
    /// handed over until this returns.
    async fn handle(&self, delivery: Delivery);
}

/// Entry point of a broker backend.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Open a connection. The pool runs the connection's delivery work.
    async fn connect(&self, endpoint: &str, pool: &WorkerPool)
        -> Result<Arc<dyn BrokerConnection>>;
}

/// An open broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Whether the connection is still usable.
    fn is_alive(&self) -> bool;

    /// Open a new channel on this connection.
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>>;

    /// Tear the connection down without a graceful handshake. Never blocks
    /// on the broker and never fails. Asynchronous close work must outlive
    /// the worker pool, which is shut down right after.
    fn abort(&self);
}

/// A channel multiplexed over a connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Whether the channel (and its connection) is still usable.
    fn is_alive(&self) -> bool;

    /// Declare a queue, returning its (possibly broker-generated) name.
    async fn declare_queue(&self, spec: QueueSpec) -> Result<String>;

    /// Limit unacknowledged deliveries on this channel.
    async fn set_prefetch(&self, count: u16) -> Result<()>;

    /// Publish directly to a queue.
    async fn publish(&self, queue: &str, properties: MessageProperties, body: Bytes)
        -> Result<()>;

    /// Start consuming, returning the consumer tag.
    async fn consume(
        &self,
        queue: &str,
        auto_ack: bool,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<String>;

    /// Delete a queue and drop any messages left in it. Deleting a queue
    /// that does not exist succeeds.
    async fn delete_queue(&self, queue: &str) -> Result<()>;

    /// Stop a consumer.
    async fn cancel(&self, consumer_tag: &str) -> Result<()>;

    /// Acknowledge a delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Tear the channel down without a graceful handshake.
    fn abort(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_specs() {
        let named = QueueSpec::named("jobs");
        assert_eq!(named.name, "jobs");
        assert!(!named.durable && !named.exclusive && !named.auto_delete);

        let reply = QueueSpec::reply();
        assert!(reply.name.is_empty());
        assert!(reply.exclusive && reply.auto_delete);
    }

    #[tokio::test]
    async fn test_teardown_runs_inside_runtime() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        spawn_teardown(async move {
            tokio::task::yield_now().await;
            let _ = tx.send(());
        });
        assert!(rx.await.is_ok());
    }

    #[test]
    fn test_teardown_runs_outside_runtime() {
        let (tx, rx) = std::sync::mpsc::channel();
        spawn_teardown(async move {
            let _ = tx.send(());
        });
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_reply_properties_keep_only_correlation() {
        let request = MessageProperties {
            correlation_id: Some("c-1".into()),
            reply_to: Some("amq.gen-1".into()),
            expiration: Some(Duration::from_millis(50)),
        };
        let reply = MessageProperties::reply_to(&request);
        assert_eq!(reply.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(reply.reply_to, None);
        assert_eq!(reply.expiration, None);
    }
}
