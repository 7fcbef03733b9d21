use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("unexpected response body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (1 << (attempt.saturating_sub(1)).min(6))
    }
}

pub fn build_http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
        .build()
}

/// GET `url` with `query` and decode the JSON body. Network errors and 5xx
/// responses are retried with exponential backoff; 4xx fail immediately.
pub async fn fetch_data(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
    retry: RetryPolicy,
) -> Result<serde_json::Value, MarketDataError> {
    let attempts = retry.attempts.max(1);
    let mut attempt = 1;

    loop {
        let outcome = client.get(url).query(query).send().await;

        match outcome {
            Ok(response) if response.status().is_success() => {
                let body = response.bytes().await.map_err(|source| MarketDataError::Http {
                    url: url.to_string(),
                    source,
                })?;
                return serde_json::from_slice(&body).map_err(|source| MarketDataError::Decode {
                    url: url.to_string(),
                    source,
                });
            }
            Ok(response) => {
                let status = response.status();
                if status.is_server_error() && attempt < attempts {
                    let delay = retry.delay_for(attempt);
                    warn!(%status, attempt, attempts, ?delay, url, "HTTP error, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(MarketDataError::Status {
                    url: url.to_string(),
                    status,
                });
            }
            Err(e) => {
                let is_network_error = e.is_timeout() || e.is_connect() || e.is_request();
                if is_network_error && attempt < attempts {
                    let delay = retry.delay_for(attempt);
                    warn!(error = %e, attempt, attempts, ?delay, url, "network error, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(MarketDataError::Http {
                    url: url.to_string(),
                    source: e,
                });
            }
        }
    }
}

/// Minimal HTTP server answering with canned responses, one per connection.
#[cfg(test)]
pub(crate) mod canned {
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Returns the base URL and the request lines received so far.
    pub async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut head = Vec::new();
                let mut chunk = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&chunk[..n]),
                    }
                }
                let request_line = String::from_utf8_lossy(&head).lines().next().unwrap_or_default().to_string();
                seen.lock().unwrap().push(request_line);

                let response = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), requests)
    }
}
