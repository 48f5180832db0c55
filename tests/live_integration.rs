use std::time::Duration;

use netter::{Body, Client, NetterError, Request, RetryPolicy};

fn load_live_url() -> Result<String, String> {
    let url = std::env::var("NETTER_LIVE_URL")
        .map_err(|_| "NETTER_LIVE_URL env is required".to_owned())?;
    if url.trim().is_empty() {
        return Err("NETTER_LIVE_URL is set but empty".to_owned());
    }
    Ok(url.trim_end_matches('/').to_owned())
}

#[tokio::test]
async fn live_get_and_replayed_post() {
    let base_url = match load_live_url() {
        Ok(value) => value,
        Err(_) => {
            eprintln!("skipping live test: NETTER_LIVE_URL not set");
            return;
        }
    };

    let client = Client::from_env()
        .expect("NETTER_* retry variables must be valid")
        .with_policy(RetryPolicy {
            max_retries: 2,
            min_wait: Duration::from_millis(200),
            max_wait: Duration::from_secs(2),
        });

    let response = client
        .get(&format!("{base_url}/get"))
        .await
        .expect("live get must succeed");
    assert!(response.status() < 500, "status {}", response.status());

    let request = Request::new(
        "POST",
        &format!("{base_url}/post"),
        Some(Body::reader(std::io::Cursor::new(b"live payload".to_vec()))),
    )
    .expect("request must build")
    .with_timeout(Duration::from_secs(30));
    assert_eq!(request.content_length(), 12);

    match client.execute(&request).await {
        Ok(response) => {
            let text = response.text().await.expect("body must be readable");
            assert!(!text.is_empty());
        }
        Err(NetterError::ExhaustedRetries { attempts, .. }) => {
            panic!("live server kept failing after {attempts} attempts")
        }
        Err(err) => panic!("live post failed: {err}"),
    }
}
