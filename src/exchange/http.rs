//! Retrying HTTP core shared by every adapter.
//!
//! Wraps a `reqwest::Client` with the exponential-backoff policy all
//! upstream APIs get: HTTP 429 waits `2^(attempt+1)` seconds, any other
//! transport or status failure waits `2^attempt` seconds, three attempts
//! total. Exhausted retries degrade to `None` — callers must treat an
//! empty result as "try again later", not confirmed absence of data.

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

const MAX_ATTEMPTS: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "funding-matrix/0.1";

/// Why a single request attempt failed. Retry decisions branch on the
/// variant instead of exception control flow.
#[derive(Debug, Error)]
pub enum HttpFailure {
    #[error("rate limited (HTTP 429)")]
    RateLimited,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("response decode failed: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Shared request executor with backoff.
#[derive(Debug, Clone)]
pub struct HttpCore {
    client: Client,
    backoff_unit: Duration,
}

impl HttpCore {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            backoff_unit: Duration::from_secs(1),
        })
    }

    /// Shrink the backoff unit so retry paths are testable without
    /// multi-second sleeps.
    #[cfg(test)]
    pub(crate) fn with_backoff_unit(unit: Duration) -> Result<Self> {
        let mut core = Self::new()?;
        core.backoff_unit = unit;
        Ok(core)
    }

    /// GET a JSON body, retrying per the shared policy.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        source: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Option<T> {
        debug!("[{}] GET {} params={:?}", source, url, query);
        self.send_with_retry(source, self.client.get(url).query(query))
            .await
    }

    /// POST a JSON body and decode a JSON response, retrying per the
    /// shared policy.
    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        source: &str,
        url: &str,
        body: &B,
    ) -> Option<T> {
        debug!("[{}] POST {}", source, url);
        self.send_with_retry(source, self.client.post(url).json(body))
            .await
    }

    async fn send_with_retry<T: DeserializeOwned>(
        &self,
        source: &str,
        request: RequestBuilder,
    ) -> Option<T> {
        for attempt in 0..MAX_ATTEMPTS {
            let Some(req) = request.try_clone() else {
                error!("[{}] request body is not replayable", source);
                return None;
            };

            match Self::dispatch(req).await {
                Ok(body) => return Some(body),
                Err(HttpFailure::RateLimited) => {
                    let wait = self.backoff_unit * 2u32.pow(attempt + 1);
                    warn!("[{}] Rate limited, waiting {:?}", source, wait);
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    error!("[{}] Request error (attempt {}): {}", source, attempt + 1, e);
                    if attempt + 1 < MAX_ATTEMPTS {
                        let wait = self.backoff_unit * 2u32.pow(attempt);
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        error!("[{}] Retries exhausted, treating as no data", source);
        None
    }

    async fn dispatch<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, HttpFailure> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(HttpFailure::RateLimited);
        }
        if !status.is_success() {
            return Err(HttpFailure::Status(status));
        }
        response.json().await.map_err(HttpFailure::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pong {
        ok: bool,
    }

    #[tokio::test]
    async fn retries_through_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let core = HttpCore::with_backoff_unit(Duration::from_millis(1)).unwrap();
        let url = format!("{}/ping", server.uri());
        let body: Option<Pong> = core.get_json("test", &url, &[]).await;
        assert_eq!(body, Some(Pong { ok: true }));
    }

    #[tokio::test]
    async fn exhausted_retries_return_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let core = HttpCore::with_backoff_unit(Duration::from_millis(1)).unwrap();
        let url = format!("{}/down", server.uri());
        let body: Option<Pong> = core.get_json("test", &url, &[]).await;
        assert!(body.is_none());
    }
}
