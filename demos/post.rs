use netter::{Body, Client, Request};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::var("NETTER_DEMO_URL")?;
    let client = Client::from_env().map_err(anyhow::Error::msg)?;

    let body = Body::json(&serde_json::json!({ "name": "Kit" }))?;
    let mut request = Request::new("POST", &url, Some(body))?;
    request.set_header("content-type", "application/json")?;

    let response = client.execute(&request).await?;
    println!("{} {}", response.status(), response.text().await?);

    Ok(())
}
