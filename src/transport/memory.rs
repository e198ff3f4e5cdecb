//! In-process broker.
//!
//! Speaks the same model as an AMQP broker's default exchange: messages are
//! published straight to a queue by name, consumers on a channel are bounded
//! by that channel's prefetch, and unacknowledged messages go back to the
//! head of their queue when the channel dies.
//!
//! Also supports:
//! - broker-named queues (`amq.gen-*`), exclusive and auto-delete queues
//! - per-message expiration (expired messages are dropped, never delivered)
//! - fault injection: [`set_reachable`](MemoryBroker::set_reachable),
//!   [`refuse_consumers`](MemoryBroker::refuse_consumers),
//!   [`drop_connections`](MemoryBroker::drop_connections) and
//!   [`restart`](MemoryBroker::restart)
//!
//! # Example
//!
//! ```
//! use rmq_rpc::transport::{Broker, MemoryBroker, QueueSpec};
//! use rmq_rpc::connection::WorkerPool;
//!
//! # futures::executor::block_on(async {
//! let broker = MemoryBroker::new();
//! let pool = WorkerPool::new("doc", 1).unwrap();
//! let conn = broker.connect("memory://", &pool).await.unwrap();
//! let channel = conn.open_channel().await.unwrap();
//! let name = channel.declare_queue(QueueSpec::reply()).await.unwrap();
//! assert!(name.starts_with("amq.gen-"));
//! # });
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::{
    Broker, BrokerChannel, BrokerConnection, Delivery, DeliveryHandler, MessageProperties,
    QueueSpec,
};
use crate::connection::WorkerPool;
use crate::error::{Result, RpcError};

/// An in-process message broker. Cloning shares the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
}

struct State {
    reachable: bool,
    refuse_consumers: bool,
    next_id: u64,
    connections: HashMap<u64, ConnectionState>,
    channels: HashMap<u64, ChannelState>,
    queues: HashMap<String, QueueState>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            reachable: true,
            refuse_consumers: false,
            next_id: 0,
            connections: HashMap::new(),
            channels: HashMap::new(),
            queues: HashMap::new(),
        }
    }
}

struct ConnectionState {
    alive: Arc<AtomicBool>,
}

struct ChannelState {
    connection_id: u64,
    alive: Arc<AtomicBool>,
    pool: Handle,
    /// 0 means unlimited.
    prefetch: u16,
    next_delivery_tag: u64,
    unacked: HashMap<u64, (String, StoredMessage)>,
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    consumers: Vec<ConsumerState>,
    auto_delete: bool,
    exclusive_owner: Option<u64>,
    cursor: usize,
}

struct ConsumerState {
    tag: String,
    channel_id: u64,
    auto_ack: bool,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct StoredMessage {
    properties: MessageProperties,
    body: Bytes,
    deadline: Option<Instant>,
}

impl StoredMessage {
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Hand queued messages to consumers with spare prefetch capacity.
    fn dispatch(&mut self, queue_name: &str) {
        let State {
            queues, channels, ..
        } = self;
        let Some(queue) = queues.get_mut(queue_name) else {
            return;
        };

        loop {
            let now = Instant::now();
            while queue.messages.front().is_some_and(|m| m.is_expired(now)) {
                queue.messages.pop_front();
                tracing::debug!("Dropped expired message on {}", queue_name);
            }
            if queue.messages.is_empty() || queue.consumers.is_empty() {
                return;
            }

            let count = queue.consumers.len();
            let picked = (0..count)
                .map(|offset| (queue.cursor + offset) % count)
                .find(|&idx| {
                    let consumer = &queue.consumers[idx];
                    channels.get(&consumer.channel_id).is_some_and(|channel| {
                        consumer.auto_ack
                            || channel.prefetch == 0
                            || channel.unacked.len() < channel.prefetch as usize
                    })
                });
            let Some(idx) = picked else {
                return;
            };
            queue.cursor = (idx + 1) % count;

            let Some(message) = queue.messages.pop_front() else {
                return;
            };
            let consumer = &queue.consumers[idx];
            let Some(channel) = channels.get_mut(&consumer.channel_id) else {
                queue.messages.push_front(message);
                return;
            };

            channel.next_delivery_tag += 1;
            let delivery = Delivery {
                delivery_tag: channel.next_delivery_tag,
                properties: message.properties.clone(),
                body: message.body.clone(),
            };
            if consumer.tx.send(delivery).is_err() {
                // Consumer task is gone; put the message back and forget it.
                queue.messages.push_front(message);
                queue.consumers.remove(idx);
                queue.cursor = 0;
                continue;
            }
            if !consumer.auto_ack {
                channel
                    .unacked
                    .insert(channel.next_delivery_tag, (queue_name.to_string(), message));
            }
        }
    }

    /// Remove a consumer, deleting its queue if it was the last one on an
    /// auto-delete queue.
    fn remove_consumer(&mut self, queue_name: &str, tag: &str) -> bool {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return false;
        };
        let before = queue.consumers.len();
        queue.consumers.retain(|c| c.tag != tag);
        let removed = queue.consumers.len() != before;
        queue.cursor = 0;
        if removed && queue.auto_delete && queue.consumers.is_empty() {
            self.queues.remove(queue_name);
            tracing::debug!("Auto-deleted queue {}", queue_name);
        }
        removed
    }

    fn kill_channel(&mut self, channel_id: u64) {
        let Some(channel) = self.channels.remove(&channel_id) else {
            return;
        };
        channel.alive.store(false, Ordering::Release);

        let mut touched: Vec<String> = Vec::new();
        let owned: Vec<(String, String)> = self
            .queues
            .iter()
            .flat_map(|(name, queue)| {
                queue
                    .consumers
                    .iter()
                    .filter(|c| c.channel_id == channel_id)
                    .map(|c| (name.clone(), c.tag.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (queue_name, tag) in owned {
            self.remove_consumer(&queue_name, &tag);
            touched.push(queue_name);
        }

        // Requeue in delivery order, newest first onto the head.
        let mut unacked: Vec<(u64, (String, StoredMessage))> = channel.unacked.into_iter().collect();
        unacked.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));
        for (_, (queue_name, message)) in unacked {
            if let Some(queue) = self.queues.get_mut(&queue_name) {
                queue.messages.push_front(message);
                touched.push(queue_name);
            }
        }

        touched.dedup();
        for queue_name in touched {
            self.dispatch(&queue_name);
        }
    }

    fn kill_connection(&mut self, connection_id: u64) {
        let Some(connection) = self.connections.remove(&connection_id) else {
            return;
        };
        connection.alive.store(false, Ordering::Release);

        let channel_ids: Vec<u64> = self
            .channels
            .iter()
            .filter(|(_, c)| c.connection_id == connection_id)
            .map(|(id, _)| *id)
            .collect();
        for id in channel_ids {
            self.kill_channel(id);
        }
        self.queues
            .retain(|_, queue| queue.exclusive_owner != Some(connection_id));
    }
}

impl MemoryBroker {
    /// Create a new, empty, reachable broker.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock_state(&self.inner)
    }

    /// Make the broker refuse (or accept again) new connections.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Make `consume` fail (or succeed again) on every channel.
    pub fn refuse_consumers(&self, refuse: bool) {
        self.lock().refuse_consumers = refuse;
    }

    /// Kill every open connection and channel. Queues and their messages
    /// survive; unacknowledged messages are requeued.
    pub fn drop_connections(&self) {
        let mut state = self.lock();
        let ids: Vec<u64> = state.connections.keys().copied().collect();
        for id in ids {
            state.kill_connection(id);
        }
    }

    /// Simulate a broker restart: every connection dies and, since nothing
    /// is durable, every queue is lost.
    pub fn restart(&self) {
        self.drop_connections();
        self.lock().queues.clear();
        tracing::info!("Memory broker restarted");
    }

    /// Number of messages waiting in a queue, `None` if it does not exist.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.lock().queues.get(queue).map(|q| q.messages.len())
    }

    /// Number of consumers on a queue, `None` if it does not exist.
    pub fn consumer_count(&self, queue: &str) -> Option<usize> {
        self.lock().queues.get(queue).map(|q| q.consumers.len())
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Number of queues currently declared.
    pub fn queue_count(&self) -> usize {
        self.lock().queues.len()
    }
}

fn lock_state(inner: &Inner) -> MutexGuard<'_, State> {
    inner
        .state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(
        &self,
        endpoint: &str,
        pool: &WorkerPool,
    ) -> Result<Arc<dyn BrokerConnection>> {
        let mut state = self.lock();
        if !state.reachable {
            return Err(RpcError::Transport(format!(
                "connection refused: {endpoint}"
            )));
        }

        let id = state.next_id();
        let alive = Arc::new(AtomicBool::new(true));
        state.connections.insert(
            id,
            ConnectionState {
                alive: alive.clone(),
            },
        );
        tracing::debug!("Memory broker accepted connection {} for {}", id, endpoint);

        Ok(Arc::new(MemoryConnection {
            inner: self.inner.clone(),
            id,
            alive,
            pool: pool.handle().clone(),
        }))
    }
}

struct MemoryConnection {
    inner: Arc<Inner>,
    id: u64,
    alive: Arc<AtomicBool>,
    pool: Handle,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        let mut state = lock_state(&self.inner);
        if !self.is_alive() {
            return Err(RpcError::Transport("connection closed".into()));
        }

        let id = state.next_id();
        let alive = Arc::new(AtomicBool::new(true));
        state.channels.insert(
            id,
            ChannelState {
                connection_id: self.id,
                alive: alive.clone(),
                pool: self.pool.clone(),
                prefetch: 0,
                next_delivery_tag: 0,
                unacked: HashMap::new(),
            },
        );

        Ok(Arc::new(MemoryChannel {
            inner: self.inner.clone(),
            id,
            connection_id: self.id,
            alive,
            connection_alive: self.alive.clone(),
        }))
    }

    fn abort(&self) {
        lock_state(&self.inner).kill_connection(self.id);
    }
}

struct MemoryChannel {
    inner: Arc<Inner>,
    id: u64,
    connection_id: u64,
    alive: Arc<AtomicBool>,
    connection_alive: Arc<AtomicBool>,
}

impl MemoryChannel {
    /// Lock the broker, failing if this channel is already closed.
    fn live_state(&self) -> Result<MutexGuard<'_, State>> {
        let state = lock_state(&self.inner);
        if !self.is_alive() {
            return Err(RpcError::Transport("channel closed".into()));
        }
        Ok(state)
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.connection_alive.load(Ordering::Acquire)
    }

    async fn declare_queue(&self, spec: QueueSpec) -> Result<String> {
        let mut state = self.live_state()?;
        let name = if spec.name.is_empty() {
            format!("amq.gen-{}", uuid::Uuid::new_v4().simple())
        } else {
            spec.name
        };

        if let Some(existing) = state.queues.get(&name) {
            if existing
                .exclusive_owner
                .is_some_and(|owner| owner != self.connection_id)
            {
                return Err(RpcError::Transport(format!(
                    "queue {name} is exclusive to another connection"
                )));
            }
            return Ok(name);
        }

        state.queues.insert(
            name.clone(),
            QueueState {
                auto_delete: spec.auto_delete,
                exclusive_owner: spec.exclusive.then_some(self.connection_id),
                ..QueueState::default()
            },
        );
        Ok(name)
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        let mut state = self.live_state()?;
        if let Some(channel) = state.channels.get_mut(&self.id) {
            channel.prefetch = count;
        }
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        properties: MessageProperties,
        body: Bytes,
    ) -> Result<()> {
        let mut state = self.live_state()?;
        let deadline = properties.expiration.map(|ttl| Instant::now() + ttl);
        match state.queues.get_mut(queue) {
            Some(q) => q.messages.push_back(StoredMessage {
                properties,
                body,
                deadline,
            }),
            None => {
                // Unroutable on the default exchange: silently dropped.
                tracing::debug!("Dropped message for missing queue {}", queue);
                return Ok(());
            }
        }
        state.dispatch(queue);
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        auto_ack: bool,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<String> {
        let mut state = self.live_state()?;
        if state.refuse_consumers {
            return Err(RpcError::Transport(format!("consume refused on '{queue}'")));
        }
        if !state.queues.contains_key(queue) {
            return Err(RpcError::Transport(format!("no queue '{queue}'")));
        }
        let pool = match state.channels.get(&self.id) {
            Some(channel) => channel.pool.clone(),
            None => return Err(RpcError::Transport("channel closed".into())),
        };

        let tag = format!("ctag-{}", state.next_id());
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        if let Some(q) = state.queues.get_mut(queue) {
            q.consumers.push(ConsumerState {
                tag: tag.clone(),
                channel_id: self.id,
                auto_ack,
                tx,
            });
        }

        let alive = self.alive.clone();
        pool.spawn(async move {
            while let Some(delivery) = rx.recv().await {
                // Deliveries buffered before the channel died were requeued.
                if !auto_ack && !alive.load(Ordering::Acquire) {
                    break;
                }
                handler.handle(delivery).await;
            }
        });

        state.dispatch(queue);
        Ok(tag)
    }

    async fn delete_queue(&self, queue: &str) -> Result<()> {
        let mut state = self.live_state()?;
        let Some(existing) = state.queues.get(queue) else {
            return Ok(());
        };
        if existing
            .exclusive_owner
            .is_some_and(|owner| owner != self.connection_id)
        {
            return Err(RpcError::Transport(format!(
                "queue {queue} is exclusive to another connection"
            )));
        }
        // Dropping the consumers closes their delivery streams.
        state.queues.remove(queue);
        tracing::debug!("Deleted queue {}", queue);
        Ok(())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        let mut state = self.live_state()?;
        let queue = state
            .queues
            .iter()
            .find(|(_, q)| {
                q.consumers
                    .iter()
                    .any(|c| c.tag == consumer_tag && c.channel_id == self.id)
            })
            .map(|(name, _)| name.clone());
        if let Some(queue) = queue {
            state.remove_consumer(&queue, consumer_tag);
        }
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        let mut state = self.live_state()?;
        let acked = state
            .channels
            .get_mut(&self.id)
            .and_then(|channel| channel.unacked.remove(&delivery_tag));
        match acked {
            Some((queue, _)) => {
                state.dispatch(&queue);
                Ok(())
            }
            None => Err(RpcError::Transport(format!(
                "unknown delivery tag {delivery_tag}"
            ))),
        }
    }

    fn abort(&self) {
        lock_state(&self.inner).kill_channel(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Collects deliveries, optionally acking them.
    struct Collect {
        tx: mpsc::UnboundedSender<Delivery>,
    }

    #[async_trait]
    impl DeliveryHandler for Collect {
        async fn handle(&self, delivery: Delivery) {
            let _ = self.tx.send(delivery);
        }
    }

    fn collector() -> (Arc<dyn DeliveryHandler>, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Collect { tx }), rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Option<Delivery> {
        tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .ok()
            .flatten()
    }

    async fn open(broker: &MemoryBroker, pool: &WorkerPool) -> Arc<dyn BrokerChannel> {
        let conn = broker.connect("memory://", pool).await.unwrap();
        conn.open_channel().await.unwrap()
    }

    #[tokio::test]
    async fn test_publish_then_consume() {
        let broker = MemoryBroker::new();
        let pool = WorkerPool::new("mem-test", 1).unwrap();
        let channel = open(&broker, &pool).await;

        channel.declare_queue(QueueSpec::named("jobs")).await.unwrap();
        channel
            .publish("jobs", MessageProperties::default(), Bytes::from_static(b"one"))
            .await
            .unwrap();
        assert_eq!(broker.queue_depth("jobs"), Some(1));

        let (handler, mut rx) = collector();
        channel.consume("jobs", true, handler).await.unwrap();
        let delivery = recv(&mut rx).await.unwrap();
        assert_eq!(&delivery.body[..], b"one");
        assert_eq!(broker.queue_depth("jobs"), Some(0));
    }

    #[tokio::test]
    async fn test_prefetch_holds_back_until_ack() {
        let broker = MemoryBroker::new();
        let pool = WorkerPool::new("mem-test", 1).unwrap();
        let channel = open(&broker, &pool).await;
        channel.declare_queue(QueueSpec::named("jobs")).await.unwrap();
        channel.set_prefetch(1).await.unwrap();

        for body in [&b"a"[..], &b"b"[..]] {
            channel
                .publish("jobs", MessageProperties::default(), Bytes::copy_from_slice(body))
                .await
                .unwrap();
        }

        let (handler, mut rx) = collector();
        channel.consume("jobs", false, handler).await.unwrap();
        let first = recv(&mut rx).await.unwrap();
        assert_eq!(&first.body[..], b"a");
        assert_eq!(broker.queue_depth("jobs"), Some(1));

        channel.ack(first.delivery_tag).await.unwrap();
        let second = recv(&mut rx).await.unwrap();
        assert_eq!(&second.body[..], b"b");
    }

    #[tokio::test]
    async fn test_unacked_requeued_when_channel_dies() {
        let broker = MemoryBroker::new();
        let pool = WorkerPool::new("mem-test", 1).unwrap();
        let channel = open(&broker, &pool).await;
        channel.declare_queue(QueueSpec::named("jobs")).await.unwrap();
        channel.set_prefetch(1).await.unwrap();
        channel
            .publish("jobs", MessageProperties::default(), Bytes::from_static(b"a"))
            .await
            .unwrap();

        let (handler, mut rx) = collector();
        channel.consume("jobs", false, handler).await.unwrap();
        recv(&mut rx).await.unwrap();
        assert_eq!(broker.queue_depth("jobs"), Some(0));

        channel.abort();
        assert!(!channel.is_alive());
        assert_eq!(broker.queue_depth("jobs"), Some(1));
        assert!(channel.ack(1).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_messages_are_dropped() {
        let broker = MemoryBroker::new();
        let pool = WorkerPool::new("mem-test", 1).unwrap();
        let channel = open(&broker, &pool).await;
        channel.declare_queue(QueueSpec::named("jobs")).await.unwrap();

        let props = MessageProperties {
            expiration: Some(Duration::from_millis(10)),
            ..MessageProperties::default()
        };
        channel
            .publish("jobs", props, Bytes::from_static(b"stale"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let (handler, mut rx) = collector();
        channel.consume("jobs", true, handler).await.unwrap();
        assert!(recv(&mut rx).await.is_none());
        assert_eq!(broker.queue_depth("jobs"), Some(0));
    }

    #[tokio::test]
    async fn test_reply_queue_auto_deletes_on_cancel() {
        let broker = MemoryBroker::new();
        let pool = WorkerPool::new("mem-test", 1).unwrap();
        let channel = open(&broker, &pool).await;

        let name = channel.declare_queue(QueueSpec::reply()).await.unwrap();
        let (handler, _rx) = collector();
        let tag = channel.consume(&name, true, handler).await.unwrap();
        assert_eq!(broker.consumer_count(&name), Some(1));

        channel.cancel(&tag).await.unwrap();
        assert_eq!(broker.consumer_count(&name), None);
    }

    #[tokio::test]
    async fn test_delete_queue_drops_messages_and_consumers() {
        let broker = MemoryBroker::new();
        let pool = WorkerPool::new("mem-test", 1).unwrap();
        let channel = open(&broker, &pool).await;

        channel.declare_queue(QueueSpec::named("jobs")).await.unwrap();
        channel
            .publish("jobs", MessageProperties::default(), Bytes::from_static(b"x"))
            .await
            .unwrap();
        channel.delete_queue("jobs").await.unwrap();
        assert_eq!(broker.queue_depth("jobs"), None);

        // Deleting again is fine.
        channel.delete_queue("jobs").await.unwrap();

        let name = channel.declare_queue(QueueSpec::reply()).await.unwrap();
        let (handler, mut rx) = collector();
        channel.consume(&name, true, handler).await.unwrap();
        channel.delete_queue(&name).await.unwrap();
        assert!(recv(&mut rx).await.is_none());
        assert_eq!(broker.queue_count(), 0);
    }

    #[tokio::test]
    async fn test_refused_consumers() {
        let broker = MemoryBroker::new();
        let pool = WorkerPool::new("mem-test", 1).unwrap();
        let channel = open(&broker, &pool).await;
        channel.declare_queue(QueueSpec::named("jobs")).await.unwrap();

        broker.refuse_consumers(true);
        let (handler, _rx) = collector();
        assert!(matches!(
            channel.consume("jobs", true, handler.clone()).await,
            Err(RpcError::Transport(_))
        ));
        assert_eq!(broker.consumer_count("jobs"), Some(0));

        broker.refuse_consumers(false);
        assert!(channel.consume("jobs", true, handler).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_and_restart() {
        let broker = MemoryBroker::new();
        let pool = WorkerPool::new("mem-test", 1).unwrap();

        broker.set_reachable(false);
        assert!(matches!(
            broker.connect("memory://", &pool).await,
            Err(RpcError::Transport(_))
        ));
        broker.set_reachable(true);

        let conn = broker.connect("memory://", &pool).await.unwrap();
        let channel = conn.open_channel().await.unwrap();
        channel.declare_queue(QueueSpec::named("jobs")).await.unwrap();
        assert_eq!(broker.connection_count(), 1);

        broker.restart();
        assert!(!conn.is_alive());
        assert!(!channel.is_alive());
        assert_eq!(broker.queue_count(), 0);
        assert!(conn.open_channel().await.is_err());
    }

    #[tokio::test]
    async fn test_publish_to_missing_queue_is_dropped() {
        let broker = MemoryBroker::new();
        let pool = WorkerPool::new("mem-test", 1).unwrap();
        let channel = open(&broker, &pool).await;
        channel
            .publish("nowhere", MessageProperties::default(), Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(broker.queue_depth("nowhere"), None);
    }
}
