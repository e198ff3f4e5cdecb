//! AMQP 0-9-1 backend over `lapin`.
//!
//! Requests go through the default exchange (`""`) with the queue name as
//! routing key, which is what "publish directly to a queue" means in AMQP.
//! `abort` issues a close in the background without waiting for the broker,
//! so a dead broker can never stall the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    BasicQosOptions, QueueDeclareOptions, QueueDeleteOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::runtime::Handle;

use super::{
    spawn_teardown, Broker, BrokerChannel, BrokerConnection, Delivery, DeliveryHandler,
    MessageProperties, QueueSpec,
};
use crate::connection::WorkerPool;
use crate::error::{Result, RpcError};

/// Reply code sent when tearing down without a graceful shutdown.
const ABORT_REPLY_CODE: u16 = 320;

/// Broker backend for a real AMQP server.
#[derive(Debug, Clone, Default)]
pub struct AmqpBroker;

impl AmqpBroker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(
        &self,
        endpoint: &str,
        pool: &WorkerPool,
    ) -> Result<Arc<dyn BrokerConnection>> {
        let uri = endpoint.to_string();
        let connection = pool
            .spawn(async move { Connection::connect(&uri, ConnectionProperties::default()).await })
            .await
            .map_err(RpcError::transport)?
            .map_err(RpcError::transport)?;
        tracing::info!("Connected to {}", endpoint);

        Ok(Arc::new(AmqpConnection {
            connection: Arc::new(connection),
            pool: pool.handle().clone(),
        }))
    }
}

struct AmqpConnection {
    connection: Arc<Connection>,
    pool: Handle,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    fn is_alive(&self) -> bool {
        self.connection.status().connected()
    }

    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(RpcError::transport)?;
        Ok(Arc::new(AmqpChannel {
            channel,
            pool: self.pool.clone(),
        }))
    }

    fn abort(&self) {
        let connection = self.connection.clone();
        spawn_teardown(async move {
            if let Err(e) = connection.close(ABORT_REPLY_CODE, "connection aborted").await {
                tracing::debug!("Ignoring error while aborting connection: {}", e);
            }
        });
    }
}

struct AmqpChannel {
    channel: Channel,
    pool: Handle,
}

fn to_amqp_properties(properties: MessageProperties) -> BasicProperties {
    let mut amqp = BasicProperties::default();
    if let Some(correlation_id) = properties.correlation_id {
        amqp = amqp.with_correlation_id(ShortString::from(correlation_id));
    }
    if let Some(reply_to) = properties.reply_to {
        amqp = amqp.with_reply_to(ShortString::from(reply_to));
    }
    if let Some(expiration) = properties.expiration {
        amqp = amqp.with_expiration(ShortString::from(expiration.as_millis().to_string()));
    }
    amqp
}

fn from_amqp_properties(amqp: &BasicProperties) -> MessageProperties {
    MessageProperties {
        correlation_id: amqp
            .correlation_id()
            .as_ref()
            .map(|s| s.as_str().to_string()),
        reply_to: amqp.reply_to().as_ref().map(|s| s.as_str().to_string()),
        expiration: amqp
            .expiration()
            .as_ref()
            .and_then(|s| s.as_str().parse::<u64>().ok())
            .map(Duration::from_millis),
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    fn is_alive(&self) -> bool {
        self.channel.status().connected()
    }

    async fn declare_queue(&self, spec: QueueSpec) -> Result<String> {
        let options = QueueDeclareOptions {
            durable: spec.durable,
            exclusive: spec.exclusive,
            auto_delete: spec.auto_delete,
            ..QueueDeclareOptions::default()
        };
        let queue = self
            .channel
            .queue_declare(&spec.name, options, FieldTable::default())
            .await
            .map_err(RpcError::transport)?;
        Ok(queue.name().as_str().to_string())
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(RpcError::transport)
    }

    async fn publish(
        &self,
        queue: &str,
        properties: MessageProperties,
        body: Bytes,
    ) -> Result<()> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body[..],
                to_amqp_properties(properties),
            )
            .await
            .map_err(RpcError::transport)?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        auto_ack: bool,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<String> {
        let tag = format!("rmq-rpc-{}", uuid::Uuid::new_v4().simple());
        let options = BasicConsumeOptions {
            no_ack: auto_ack,
            ..BasicConsumeOptions::default()
        };
        let mut consumer = self
            .channel
            .basic_consume(queue, &tag, options, FieldTable::default())
            .await
            .map_err(RpcError::transport)?;

        let consumer_tag = tag.clone();
        self.pool.spawn(async move {
            while let Some(next) = consumer.next().await {
                match next {
                    Ok(delivery) => {
                        handler
                            .handle(Delivery {
                                delivery_tag: delivery.delivery_tag,
                                properties: from_amqp_properties(&delivery.properties),
                                body: Bytes::from(delivery.data),
                            })
                            .await
                    }
                    Err(e) => {
                        tracing::warn!("Consumer {} stopped: {}", consumer_tag, e);
                        break;
                    }
                }
            }
        });
        Ok(tag)
    }

    async fn delete_queue(&self, queue: &str) -> Result<()> {
        self.channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await
            .map_err(RpcError::transport)?;
        Ok(())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(RpcError::transport)
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(RpcError::transport)
    }

    fn abort(&self) {
        let channel = self.channel.clone();
        spawn_teardown(async move {
            if let Err(e) = channel.close(ABORT_REPLY_CODE, "channel aborted").await {
                tracing::debug!("Ignoring error while aborting channel: {}", e);
            }
        });
    }
}
