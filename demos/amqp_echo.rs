//! Echo service against a real AMQP broker.
//!
//! Start a broker first (for example `docker run -p 5672:5672 rabbitmq`),
//! then run the server and a client in two terminals:
//!
//! ```text
//! cargo run --features amqp --example amqp_echo -- serve
//! cargo run --features amqp --example amqp_echo -- call hello
//! ```
//!
//! `RMQ_RPC_ENDPOINT` overrides the broker address.

use std::sync::Arc;
use std::time::Duration;

use rmq_rpc::config::DEFAULT_ENDPOINT;
use rmq_rpc::server::{Api, Contract, Server};
use rmq_rpc::{Client, Fault};

const QUEUE: &str = "rmq-rpc-echo";

struct Echo;

impl Contract for Echo {
    fn describe(api: &mut Api<Self>) {
        api.method("echo", |_app: Arc<Echo>, (message,): (String,)| async move {
            tracing::info!("echo({:?})", message);
            Ok::<_, Fault>(message)
        });
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let endpoint =
        std::env::var("RMQ_RPC_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
    let mut args = std::env::args().skip(1);

    match args.next().as_deref() {
        Some("serve") => {
            Server::run(endpoint, QUEUE, Echo, 4).await?;
        }
        Some("call") => {
            let message = args.next().unwrap_or_else(|| "hello".to_string());
            let client = Client::builder(endpoint, QUEUE)
                .timeout(Duration::from_secs(5))
                .expiry(Duration::from_secs(5))
                .build()?;
            let echoed: String = client.call("echo", (message,)).await?;
            println!("{}", echoed);
            client.close().await;
        }
        _ => {
            eprintln!("usage: amqp_echo serve | call [message]");
            std::process::exit(2);
        }
    }
    Ok(())
}
