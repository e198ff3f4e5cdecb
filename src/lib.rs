//! # rmq-rpc
//!
//! Remote procedure calls over a message broker.
//!
//! A server exposes the capabilities of an application object on a named
//! request queue; clients call them by name with positional parameters and
//! get typed results, protocol errors or typed application exceptions back.
//! Messages are JSON-RPC 2.0 envelopes.
//!
//! ## Architecture
//!
//! - **Transport** ([`transport`]): broker traits, an in-process
//!   [`MemoryBroker`](transport::MemoryBroker) and an AMQP backend (feature `amqp`)
//! - **Connections** ([`connection`]): one health-checked connection and
//!   channel per `(endpoint, queue)`, each with its own worker pool
//! - **Server** ([`server`]): capability registry, dispatcher and a
//!   supervisor that keeps the queue consumed across broker outages
//! - **Client** ([`Client`]): request/reply with correlation ids, timeouts
//!   and per-message expiration
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rmq_rpc::server::{Api, Contract, Server};
//! use rmq_rpc::transport::MemoryBroker;
//! use rmq_rpc::{Client, Fault};
//!
//! struct Strings;
//!
//! impl Contract for Strings {
//!     fn describe(api: &mut Api<Self>) {
//!         api.method("concat", |_app: Arc<Strings>, (a, b): (String, String)| async move {
//!             Ok::<_, Fault>(a + &b)
//!         });
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> rmq_rpc::Result<()> {
//! let broker = Arc::new(MemoryBroker::new());
//! let mut server = Server::builder("memory://", "strings")
//!     .broker(broker.clone())
//!     .start(Strings)?;
//! server.wait_until_consuming(Duration::from_secs(1)).await;
//!
//! let client = Client::builder("memory://", "strings").broker(broker).build()?;
//! let joined: String = client.call("concat", ("a", "b")).await?;
//! assert_eq!(joined, "ab");
//!
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod exception;
pub mod protocol;
pub mod server;
pub mod transport;

mod client;

pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, ServerConfig};
pub use connection::ConnectionManager;
pub use error::{Result, RpcError, Unavailable};
pub use exception::{ApplicationError, Fault, RemoteException};
pub use server::{Server, ServerBuilder, ServerHandle};
