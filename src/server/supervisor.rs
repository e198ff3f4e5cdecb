//! Keeps a server consuming its request queue.
//!
//! On every tick the supervisor checks the channel it consumes on. A live
//! channel means nothing to do; otherwise it re-acquires one from the
//! connection manager and re-establishes the consumer. Failures are logged
//! and retried on the next tick, forever.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::dispatcher::{DispatchConsumer, Dispatcher};
use crate::config::ServerConfig;
use crate::connection::{ConnectionKey, ConnectionManager};
use crate::error::Result;
use crate::transport::{BrokerChannel, QueueSpec};

/// Consumer lifecycle as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No consumer; the next tick will try to establish one.
    Disconnected,
    /// Establishing a consumer.
    Connecting,
    /// Consuming the request queue.
    Consuming,
}

struct Consumer {
    channel: Arc<dyn BrokerChannel>,
    tag: String,
}

pub(crate) struct Supervisor<A> {
    manager: Arc<ConnectionManager>,
    key: ConnectionKey,
    config: ServerConfig,
    dispatcher: Arc<Dispatcher<A>>,
    consumer: Option<Consumer>,
    state: watch::Sender<ServerState>,
}

impl<A: Send + Sync + 'static> Supervisor<A> {
    pub(crate) fn new(
        manager: Arc<ConnectionManager>,
        config: ServerConfig,
        dispatcher: Arc<Dispatcher<A>>,
        state: watch::Sender<ServerState>,
    ) -> Self {
        Self {
            key: ConnectionKey::new(&config.endpoint, &config.queue),
            manager,
            config,
            dispatcher,
            consumer: None,
            state,
        }
    }

    fn set_state(&self, state: ServerState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    async fn tick(&mut self) {
        if let Some(consumer) = &self.consumer {
            if consumer.channel.is_alive() {
                return;
            }
            tracing::warn!("Lost consumer on {}, re-establishing", self.key);
            self.consumer = None;
        }

        self.set_state(ServerState::Connecting);
        match self.establish().await {
            Ok(consumer) => {
                tracing::info!("Consuming {} as {}", self.key, consumer.tag);
                self.consumer = Some(consumer);
                self.set_state(ServerState::Consuming);
            }
            Err(e) => {
                tracing::warn!("Could not consume {}, will retry: {}", self.key, e);
                self.set_state(ServerState::Disconnected);
            }
        }
    }

    async fn establish(&self) -> Result<Consumer> {
        let channel = self
            .manager
            .acquire(&self.key, self.config.worker_pool_size)
            .await?;
        channel
            .declare_queue(QueueSpec::named(&self.config.queue))
            .await?;
        channel.set_prefetch(self.config.prefetch).await?;

        let handler = Arc::new(DispatchConsumer::new(
            self.dispatcher.clone(),
            channel.clone(),
        ));
        let tag = channel.consume(&self.config.queue, false, handler).await?;
        Ok(Consumer { channel, tag })
    }

    /// Tick until `shutdown` fires, then stop consuming and release the
    /// connection.
    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.tick().await,
            }
        }

        if let Some(consumer) = self.consumer.take() {
            if let Err(e) = consumer.channel.cancel(&consumer.tag).await {
                tracing::debug!("Ignoring cancel failure on shutdown: {}", e);
            }
        }
        self.manager.release(&self.key).await;
        self.set_state(ServerState::Disconnected);
        tracing::info!("Server on {} stopped", self.key);
    }
}
