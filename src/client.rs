//! Client builder and call path.
//!
//! A [`Client`] targets one request queue. Each [`call`](Client::call):
//! 1. Acquires the shared channel for `(endpoint, queue)`
//! 2. Declares a private reply queue and subscribes to it
//! 3. Publishes the request with `reply_to` and a fresh correlation id
//! 4. Waits for the matching reply, up to the configured timeout
//! 5. Cancels the subscription, whatever the outcome
//!
//! Replies with a foreign correlation id are ignored; only the first
//! matching reply is used.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rmq_rpc::transport::MemoryBroker;
//! use rmq_rpc::Client;
//!
//! # async fn run() -> rmq_rpc::Result<()> {
//! let client = Client::builder("memory://", "billing")
//!     .broker(Arc::new(MemoryBroker::new()))
//!     .timeout(Duration::from_millis(500))
//!     .build()?;
//!
//! let joined: String = client.call("concat", ("a", "b")).await?;
//! assert_eq!(joined, "ab");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::codec::JsonCodec;
use crate::config::ClientConfig;
use crate::connection::{ConnectionKey, ConnectionManager};
use crate::error::{Result, RpcError, Unavailable};
use crate::exception::ApplicationError;
use crate::protocol::{CallRequest, CallResponse};
use crate::transport::{
    self, Broker, BrokerChannel, Delivery, DeliveryHandler, MessageProperties, QueueSpec,
};

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    broker: Option<Arc<dyn Broker>>,
    manager: Option<Arc<ConnectionManager>>,
}

impl ClientBuilder {
    /// Start from a full configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            broker: None,
            manager: None,
        }
    }

    /// How long a call waits for its reply.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Per-message expiration for requests.
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.config.expiry = Some(expiry);
        self
    }

    /// Worker threads for this client's connection.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.config.pool_size = size;
        self
    }

    /// Broker backend. Ignored when a connection manager is given.
    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Share a connection manager with other clients and servers.
    pub fn connection_manager(mut self, manager: Arc<ConnectionManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Build the client. No connection is opened until the first call.
    pub fn build(self) -> Result<Client> {
        if self.config.queue.is_empty() {
            return Err(RpcError::Client("client queue name is empty".into()));
        }
        let manager = match (self.manager, self.broker) {
            (Some(manager), _) => manager,
            (None, Some(broker)) => Arc::new(ConnectionManager::new(broker)),
            (None, None) => Arc::new(ConnectionManager::new(transport::default_broker()?)),
        };
        Ok(Client {
            key: ConnectionKey::new(&self.config.endpoint, &self.config.queue),
            manager,
            config: self.config,
        })
    }
}

/// Calls capabilities exposed on one request queue.
pub struct Client {
    manager: Arc<ConnectionManager>,
    key: ConnectionKey,
    config: ClientConfig,
}

impl Client {
    /// Start configuring a client for `queue` on `endpoint`.
    pub fn builder(endpoint: impl Into<String>, queue: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(ClientConfig {
            endpoint: endpoint.into(),
            queue: queue.into(),
            ..ClientConfig::default()
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Change the reply timeout for subsequent calls.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout;
    }

    /// Change the request expiration for subsequent calls. `None` disables
    /// expiration.
    pub fn set_expiry(&mut self, expiry: Option<Duration>) {
        self.config.expiry = expiry;
    }

    /// Invoke `method` with positional `params` and decode its result.
    ///
    /// `params` is `()` for no parameters, a tuple for several, or any other
    /// serializable value for exactly one. A remote application exception
    /// arrives as [`RpcError::Remote`]; see [`call_checked`](Self::call_checked)
    /// to rebuild it as a concrete type.
    pub async fn call<R, P>(&self, method: &str, params: P) -> Result<R>
    where
        R: DeserializeOwned + 'static,
        P: Serialize,
    {
        let params = JsonCodec::encode_params(&params)?;
        let request = CallRequest::new(Uuid::new_v4().to_string(), method, params);
        let response = self.exchange(&request).await?;
        Self::into_result(response)
    }

    /// Like [`call`](Self::call), but rebuilds a remote `E` as a typed value.
    ///
    /// Exceptions of any other type fail with [`RpcError::Client`].
    pub async fn call_checked<R, E, P>(
        &self,
        method: &str,
        params: P,
    ) -> Result<std::result::Result<R, E>>
    where
        R: DeserializeOwned + 'static,
        E: ApplicationError,
        P: Serialize,
    {
        match self.call::<R, P>(method, params).await {
            Ok(value) => Ok(Ok(value)),
            Err(RpcError::Remote(remote)) => remote.downcast::<E>().map(Err),
            Err(e) => Err(e),
        }
    }

    /// Release this client's connection entry.
    pub async fn close(self) {
        self.manager.release(&self.key).await;
    }

    async fn exchange(&self, request: &CallRequest) -> Result<CallResponse> {
        let body = JsonCodec::encode(request)?;
        let channel = self
            .manager
            .acquire(&self.key, self.config.pool_size)
            .await?;
        let reply_queue = channel.declare_queue(QueueSpec::reply()).await?;

        let correlation_id = Uuid::new_v4().to_string();
        let (slot, mut rendezvous) = mpsc::channel(1);
        let filter = Arc::new(ReplyFilter {
            correlation_id: correlation_id.clone(),
            slot,
        });
        let consumer_tag = match channel.consume(&reply_queue, true, filter).await {
            Ok(tag) => tag,
            Err(e) => {
                // Without a consumer the queue never auto-deletes.
                if let Err(cleanup) = channel.delete_queue(&reply_queue).await {
                    tracing::debug!("Failed to delete reply queue {}: {}", reply_queue, cleanup);
                }
                return Err(e);
            }
        };

        let outcome = self
            .await_reply(channel.as_ref(), &reply_queue, correlation_id, body, &mut rendezvous)
            .await;

        if let Err(e) = channel.cancel(&consumer_tag).await {
            tracing::debug!("Failed to cancel reply consumer {}: {}", consumer_tag, e);
        }

        let raw = outcome?;
        JsonCodec::decode::<CallResponse>(&raw).map_err(|_| {
            RpcError::Client(format!(
                "Invalid RPC response: \"{}\"",
                String::from_utf8_lossy(&raw)
            ))
        })
    }

    async fn await_reply(
        &self,
        channel: &dyn BrokerChannel,
        reply_queue: &str,
        correlation_id: String,
        body: Bytes,
        rendezvous: &mut mpsc::Receiver<Bytes>,
    ) -> Result<Bytes> {
        let properties = MessageProperties {
            correlation_id: Some(correlation_id),
            reply_to: Some(reply_queue.to_string()),
            expiration: self.config.expiry,
        };
        channel.publish(&self.key.queue, properties, body).await?;

        match tokio::time::timeout(self.config.timeout, rendezvous.recv()).await {
            Ok(Some(raw)) => Ok(raw),
            Ok(None) => Err(RpcError::Transport(
                "reply subscription ended before a reply arrived".into(),
            )),
            Err(_) => {
                let reason = if self.config.expiry.is_some() {
                    Unavailable::Expired
                } else {
                    Unavailable::InQueue
                };
                tracing::debug!(
                    "No reply from {} within {:?} (may still run: {})",
                    self.key,
                    self.config.timeout,
                    reason.may_still_run()
                );
                Err(RpcError::ServiceUnavailable(reason))
            }
        }
    }

    fn into_result<R: DeserializeOwned + 'static>(response: CallResponse) -> Result<R> {
        match (response.result, response.error) {
            (_, Some(error)) => Err(error.into_rpc_error()),
            (Some(value), None) => JsonCodec::decode_result(value)
                .map_err(|e| RpcError::Client(format!("Could not decode result: {}", e))),
            (None, None) => Err(RpcError::Client(
                "Invalid RPC response: neither result nor error".into(),
            )),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("key", &self.key)
            .field("config", &self.config)
            .finish()
    }
}

/// Hands the first reply carrying our correlation id to the waiting call.
struct ReplyFilter {
    correlation_id: String,
    slot: mpsc::Sender<Bytes>,
}

#[async_trait]
impl DeliveryHandler for ReplyFilter {
    async fn handle(&self, delivery: Delivery) {
        if delivery.properties.correlation_id.as_deref() != Some(self.correlation_id.as_str()) {
            tracing::debug!(
                "Ignoring reply for {:?}, waiting for {}",
                delivery.properties.correlation_id,
                self.correlation_id
            );
            return;
        }
        if self.slot.try_send(delivery.body).is_err() {
            tracing::debug!("Dropping extra reply for {}", self.correlation_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::WorkerPool;
    use crate::protocol::{CallError, Reason};
    use crate::transport::MemoryBroker;
    use serde_json::json;

    fn client(broker: &MemoryBroker, queue: &str) -> Client {
        Client::builder("memory://", queue)
            .broker(Arc::new(broker.clone()))
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap()
    }

    /// Answer every request on `queue` with `respond(request)`, echoing the
    /// correlation id.
    struct Responder<F> {
        channel: Arc<dyn BrokerChannel>,
        respond: F,
    }

    #[async_trait]
    impl<F> DeliveryHandler for Responder<F>
    where
        F: Fn(CallRequest) -> Vec<u8> + Send + Sync + 'static,
    {
        async fn handle(&self, delivery: Delivery) {
            let request: CallRequest = serde_json::from_slice(&delivery.body).unwrap();
            let body = (self.respond)(request);
            let reply_to = delivery.properties.reply_to.clone().unwrap();
            self.channel
                .publish(
                    &reply_to,
                    MessageProperties::reply_to(&delivery.properties),
                    Bytes::from(body),
                )
                .await
                .unwrap();
        }
    }

    async fn responder<F>(broker: &MemoryBroker, pool: &WorkerPool, queue: &str, respond: F)
    where
        F: Fn(CallRequest) -> Vec<u8> + Send + Sync + 'static,
    {
        let conn = broker.connect("memory://", pool).await.unwrap();
        let channel = conn.open_channel().await.unwrap();
        channel.declare_queue(QueueSpec::named(queue)).await.unwrap();
        let handler = Arc::new(Responder {
            channel: channel.clone(),
            respond,
        });
        channel.consume(queue, true, handler).await.unwrap();
    }

    #[tokio::test]
    async fn test_call_decodes_result() {
        let broker = MemoryBroker::new();
        let pool = WorkerPool::new("responder", 1).unwrap();
        responder(&broker, &pool, "svc", |req| {
            assert_eq!(req.method, "concat");
            assert_eq!(req.params, vec![json!("a"), json!("b")]);
            serde_json::to_vec(&CallResponse::success(req.id, json!("ab"))).unwrap()
        })
        .await;

        let client = client(&broker, "svc");
        let joined: String = client.call("concat", ("a", "b")).await.unwrap();
        assert_eq!(joined, "ab");
    }

    #[tokio::test]
    async fn test_protocol_error_surfaces() {
        let broker = MemoryBroker::new();
        let pool = WorkerPool::new("responder", 1).unwrap();
        responder(&broker, &pool, "svc", |req| {
            let error = CallError::from_reason(Reason::NoSuchMethod);
            serde_json::to_vec(&CallResponse::failure(req.id, error)).unwrap()
        })
        .await;

        let client = client(&broker, "svc");
        match client.call::<String, _>("nope", ()).await {
            Err(RpcError::Protocol { code, reason, .. }) => {
                assert_eq!(code, 404);
                assert_eq!(reason, "No such method");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_response_is_client_error() {
        let broker = MemoryBroker::new();
        let pool = WorkerPool::new("responder", 1).unwrap();
        responder(&broker, &pool, "svc", |_req| b"not json".to_vec()).await;

        let client = client(&broker, "svc");
        match client.call::<String, _>("ping", ()).await {
            Err(RpcError::Client(msg)) => assert!(msg.contains("not json"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_without_server() {
        let broker = MemoryBroker::new();
        let client = client(&broker, "nobody");
        assert!(matches!(
            client.call::<String, _>("ping", ()).await,
            Err(RpcError::ServiceUnavailable(Unavailable::InQueue))
        ));
    }

    #[tokio::test]
    async fn test_reply_subscription_is_cancelled() {
        let broker = MemoryBroker::new();
        let pool = WorkerPool::new("responder", 1).unwrap();
        responder(&broker, &pool, "svc", |req| {
            serde_json::to_vec(&CallResponse::success(req.id, json!(1))).unwrap()
        })
        .await;

        let client = client(&broker, "svc");
        let before = broker.queue_count();
        for _ in 0..3 {
            let _: i32 = client.call("one", ()).await.unwrap();
        }
        // Reply queues auto-delete once their consumer is cancelled.
        assert_eq!(broker.queue_count(), before);
    }

    #[tokio::test]
    async fn test_failed_subscribe_removes_reply_queue() {
        let broker = MemoryBroker::new();
        let client = client(&broker, "svc");
        // Open the connection first so the only queue left would be a reply queue.
        client
            .manager
            .acquire(&client.key, client.config.pool_size)
            .await
            .unwrap();
        let before = broker.queue_count();

        broker.refuse_consumers(true);
        for _ in 0..3 {
            assert!(matches!(
                client.call::<String, _>("ping", ()).await,
                Err(RpcError::Transport(_))
            ));
        }
        assert_eq!(broker.queue_count(), before);

        broker.refuse_consumers(false);
        assert!(matches!(
            client.call::<String, _>("ping", ()).await,
            Err(RpcError::ServiceUnavailable(Unavailable::InQueue))
        ));
    }

    #[test]
    fn test_empty_queue_rejected() {
        let result = Client::builder("memory://", "")
            .broker(Arc::new(MemoryBroker::new()))
            .build();
        assert!(matches!(result, Err(RpcError::Client(_))));
    }
}
