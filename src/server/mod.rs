//! Server side: expose an application's capabilities on a request queue.
//!
//! - [`CapabilityRegistry`] - the name-indexed capabilities of a [`Contract`]
//! - [`Dispatcher`] - turns one request body into one response
//! - [`Server`] / [`ServerBuilder`] - start consuming, supervised
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rmq_rpc::server::{Api, Contract, Server};
//! use rmq_rpc::transport::MemoryBroker;
//! use rmq_rpc::Fault;
//!
//! struct Echo;
//!
//! impl Contract for Echo {
//!     fn describe(api: &mut Api<Self>) {
//!         api.method("echo", |_app: Arc<Echo>, (s,): (String,)| async move {
//!             Ok::<_, Fault>(s)
//!         });
//!     }
//! }
//!
//! # async fn run() -> rmq_rpc::Result<()> {
//! let handle = Server::builder("memory://", "echo")
//!     .broker(Arc::new(MemoryBroker::new()))
//!     .start(Echo)?;
//! handle.wait().await;
//! # Ok(())
//! # }
//! ```

mod dispatcher;
mod registry;
mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use dispatcher::Dispatcher;
pub use registry::{
    Api, BoxFuture, Capability, CapabilityRegistry, Contract, Handler, Invocation, ParamType,
    Params, TypedHandler,
};
pub use supervisor::ServerState;

use crate::config::ServerConfig;
use crate::connection::ConnectionManager;
use crate::error::{Result, RpcError};
use crate::transport::{self, Broker};
use supervisor::Supervisor;

/// Entry point for starting servers.
pub struct Server;

impl Server {
    /// Start configuring a server for `queue` on `endpoint`.
    pub fn builder(endpoint: impl Into<String>, queue: impl Into<String>) -> ServerBuilder {
        ServerBuilder::new(ServerConfig {
            endpoint: endpoint.into(),
            queue: queue.into(),
            ..ServerConfig::default()
        })
    }

    /// Start a server with the default broker backend and run it forever.
    ///
    /// Returns only if startup fails.
    pub async fn run<A: Contract>(
        endpoint: impl Into<String>,
        queue: impl Into<String>,
        app: A,
        worker_pool_size: usize,
    ) -> Result<()> {
        let handle = Self::builder(endpoint, queue)
            .worker_pool_size(worker_pool_size)
            .start(app)?;
        handle.wait().await;
        Ok(())
    }
}

/// Builder for a server.
pub struct ServerBuilder {
    config: ServerConfig,
    broker: Option<Arc<dyn Broker>>,
    manager: Option<Arc<ConnectionManager>>,
}

impl ServerBuilder {
    /// Start from a full configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            broker: None,
            manager: None,
        }
    }

    /// Worker threads for the server's connection.
    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.config.worker_pool_size = size;
        self
    }

    /// How often the consumer's health is checked.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    /// Maximum requests in flight on the consuming channel.
    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.config.prefetch = prefetch;
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

    fn resolve_manager(&mut self) -> Result<Arc<ConnectionManager>> {
        if let Some(manager) = self.manager.take() {
            return Ok(manager);
        }
        let broker = match self.broker.take() {
            Some(broker) => broker,
            None => transport::default_broker()?,
        };
        Ok(Arc::new(ConnectionManager::new(broker)))
    }

    /// Validate the contract and start serving `app`.
    ///
    /// Fails before touching the broker if the contract registers a name
    /// twice. Broker failures never fail startup: the server keeps retrying
    /// in the background. Must be called within a Tokio runtime.
    pub fn start<A: Contract>(self, app: A) -> Result<ServerHandle> {
        let registry = CapabilityRegistry::<A>::build()?;
        self.start_with(app, registry)
    }

    /// Like [`start`](Self::start), with capabilities collected outside a
    /// [`Contract`].
    pub fn start_with<A: Send + Sync + 'static>(
        mut self,
        app: A,
        registry: CapabilityRegistry<A>,
    ) -> Result<ServerHandle> {
        if self.config.queue.is_empty() {
            return Err(RpcError::Client("server queue name is empty".into()));
        }
        let manager = self.resolve_manager()?;
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(app), Arc::new(registry)));

        let (state_tx, state_rx) = watch::channel(ServerState::Disconnected);
        let shutdown = CancellationToken::new();
        tracing::info!(
            "Starting server on {} [{}]",
            self.config.endpoint,
            self.config.queue
        );
        let supervisor = Supervisor::new(manager, self.config, dispatcher, state_tx);
        let task = tokio::spawn(supervisor.run(shutdown.clone()));

        Ok(ServerHandle {
            shutdown,
            task,
            state: state_rx,
        })
    }
}

/// A running server.
pub struct ServerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
    state: watch::Receiver<ServerState>,
}

impl ServerHandle {
    /// Current consumer state.
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Wait until the server is consuming its queue, up to `timeout`.
    pub async fn wait_until_consuming(&mut self, timeout: Duration) -> bool {
        let consuming = self.state.wait_for(|s| *s == ServerState::Consuming);
        matches!(tokio::time::timeout(timeout, consuming).await, Ok(Ok(_)))
    }

    /// Stop consuming and release the server's connection.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!("Server supervisor ended abnormally: {}", e);
        }
    }

    /// Serve until the supervisor ends: after the token from
    /// [`shutdown_token`](Self::shutdown_token) is cancelled, or the runtime
    /// shuts down.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            tracing::warn!("Server supervisor ended abnormally: {}", e);
        }
    }

    /// A token that stops this server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("state", &self.state())
            .finish()
    }
}
