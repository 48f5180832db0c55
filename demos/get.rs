use std::time::Duration;

use netter::{Client, RetryPolicy};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("netter=debug")),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:9595".to_owned());

    let client = Client::new().with_policy(RetryPolicy {
        max_retries: 2,
        min_wait: Duration::from_secs(1),
        max_wait: Duration::from_secs(10),
    });

    match client.get(&url).await {
        Ok(response) => {
            println!("status: {}", response.status());
            println!("{}", response.text().await?);
        }
        Err(err) => eprintln!("{err}"),
    }

    Ok(())
}
