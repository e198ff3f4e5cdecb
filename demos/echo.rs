//! Echo service - client and server in one process.
//!
//! This example demonstrates:
//! - Describing a contract with typed capabilities
//! - Declaring an application exception and catching it on the client
//! - Running both sides against the in-process broker
//!
//! ```text
//! cargo run --example echo
//! RUST_LOG=rmq_rpc=debug cargo run --example echo
//! ```

use std::sync::Arc;
use std::time::Duration;

use rmq_rpc::server::{Api, Contract, Server};
use rmq_rpc::transport::MemoryBroker;
use rmq_rpc::{ApplicationError, Client, Fault};
use serde::{Deserialize, Serialize};

/// Raised when a message is longer than the service accepts.
#[derive(Debug, Serialize, Deserialize, thiserror::Error)]
#[error("message of {len} bytes exceeds {max}")]
struct TooLong {
    len: usize,
    max: usize,
}

impl ApplicationError for TooLong {
    const NAME: &'static str = "TooLong";
}

struct Echo {
    max_len: usize,
}

impl Contract for Echo {
    fn describe(api: &mut Api<Self>) {
        api.method("echo", |app: Arc<Echo>, (message,): (String,)| async move {
            if message.len() > app.max_len {
                return Err(Fault::from(TooLong {
                    len: message.len(),
                    max: app.max_len,
                }));
            }
            Ok(message)
        })
        .throws::<TooLong>();

        api.method("shout", |_app: Arc<Echo>, (message, times): (String, usize)| async move {
            Ok::<_, Fault>(message.to_uppercase().repeat(times))
        });
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let broker = Arc::new(MemoryBroker::new());

    let mut server = Server::builder("memory://", "echo")
        .broker(broker.clone())
        .start(Echo { max_len: 16 })?;
    server.wait_until_consuming(Duration::from_secs(1)).await;

    let client = Client::builder("memory://", "echo")
        .broker(broker)
        .timeout(Duration::from_secs(1))
        .build()?;

    let echoed: String = client.call("echo", ("hello",)).await?;
    println!("echo      -> {}", echoed);

    let shouted: String = client.call("shout", ("hey", 3)).await?;
    println!("shout     -> {}", shouted);

    let refused: Result<String, TooLong> = client
        .call_checked("echo", ("this message is far too long",))
        .await?;
    match refused {
        Ok(s) => println!("echo      -> {}", s),
        Err(e) => println!("echo      -> refused: {}", e),
    }

    if let Err(e) = client.call::<String, _>("whisper", ("psst",)).await {
        println!("whisper   -> {}", e);
    }

    client.close().await;
    server.shutdown().await;
    Ok(())
}
