//! Invoke a method on a JSON-RPC WebSocket server and print progress updates.
//!
//! ```text
//! cargo run --example progress -- localhost:8200 long-task
//! ```

use std::time::Duration;

use wsrpc_client::{Client, Result};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| "localhost:8200".to_string());
    let method = args.next().unwrap_or_else(|| "long-task".to_string());

    let client = Client::new(&url);
    println!("connecting to {}", client.url());
    client.connect().await?;

    let handle = client
        .call_with_progress(&method, None, |event| {
            println!("[{:>5.1}%] {}", event.amount * 100.0, event.operation);
        })
        .await?;

    match handle.wait_timeout(Duration::from_secs(30)).await {
        Ok(result) => println!("done: {result}"),
        Err(e) => eprintln!("failed: {e}"),
    }

    client.disconnect().await
}
