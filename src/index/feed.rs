// 9.3: feed sources. anything that can be polled for readings: an http fetcher that
// already normalizes upstream data, or a local random walk.

use super::aggregator::Reading;
use crate::types::{Price, Timestamp};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("could not decode feed response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait FeedSource: Send {
    fn name(&self) -> &str;

    async fn poll(&mut self) -> Result<Vec<Reading>, FeedError>;
}

#[derive(Debug, Deserialize)]
struct FeedDocument {
    readings: Vec<Reading>,
}

/// Polls a JSON document of the form `{"readings": [...]}`.
#[derive(Debug, Clone)]
pub struct HttpFeed {
    client: Client,
    url: String,
}

impl HttpFeed {
    pub fn new(url: impl Into<String>) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FeedError::Upstream(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    fn name(&self) -> &str {
        &self.url
    }

    async fn poll(&mut self) -> Result<Vec<Reading>, FeedError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FeedError::Upstream(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FeedError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Upstream(format!("{status}: {body}")));
        }

        let document: FeedDocument = response
            .json()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))?;
        Ok(document.readings)
    }
}

/// Seeded random walk inside `[min, max]`. Each poll moves by at most `max_step`.
#[derive(Debug)]
pub struct RandomWalkFeed {
    rng: StdRng,
    source: String,
    value: Price,
    min: Price,
    max: Price,
    max_step: Price,
    last_timestamp: Option<Timestamp>,
}

impl RandomWalkFeed {
    pub fn new(seed: u64, start: Price, min: Price, max: Price, max_step: Price) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            source: format!("random-walk-{seed}"),
            value: start.max(min).min(max),
            min,
            max,
            max_step,
            last_timestamp: None,
        }
    }

    pub fn value(&self) -> Price {
        self.value
    }

    pub fn step(&mut self) -> Price {
        let span = self.max_step.raw();
        let moved = if span > 0 {
            self.rng.gen_range(-span..=span)
        } else {
            0
        };
        let raw = (self.value.raw() + moved).clamp(self.min.raw(), self.max.raw());
        self.value = Price::from_raw_unchecked(raw);
        self.value
    }

    // absolute readings need strictly increasing timestamps to get past the cursor
    fn next_timestamp(&mut self) -> Timestamp {
        let now = Timestamp::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last.plus_secs(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }
}

#[async_trait]
impl FeedSource for RandomWalkFeed {
    fn name(&self) -> &str {
        &self.source
    }

    async fn poll(&mut self) -> Result<Vec<Reading>, FeedError> {
        let value = self.step();
        let timestamp = self.next_timestamp();
        Ok(vec![Reading::Absolute {
            source: self.source.clone(),
            value,
            timestamp,
            meta: None,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderMap, HeaderValue, StatusCode as HttpStatus};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    fn walk(seed: u64) -> RandomWalkFeed {
        RandomWalkFeed::new(
            seed,
            Price::from_units(50),
            Price::from_units(40),
            Price::from_units(60),
            Price::from_units(3),
        )
    }

    #[test]
    fn random_walk_is_seeded_and_bounded() {
        let mut a = walk(7);
        let mut b = walk(7);
        for _ in 0..1_000 {
            let v = a.step();
            assert_eq!(v, b.step());
            assert!(v >= Price::from_units(40) && v <= Price::from_units(60));
        }
    }

    #[tokio::test]
    async fn random_walk_timestamps_increase() {
        let mut feed = walk(1);
        let first = feed.poll().await.unwrap();
        let second = feed.poll().await.unwrap();
        assert!(second[0].timestamp() > first[0].timestamp());
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/feed")
    }

    #[tokio::test]
    async fn http_feed_decodes_readings() {
        let router = Router::new().route(
            "/feed",
            get(|| async {
                Json(json!({
                    "readings": [
                        {"kind": "delta", "source": "nba", "event_id": 1, "delta": 3, "timestamp": 10}
                    ]
                }))
            }),
        );
        let mut feed = HttpFeed::new(serve(router).await).unwrap();
        let readings = feed.poll().await.unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].source(), "nba");
    }

    #[tokio::test]
    async fn http_feed_maps_rate_limit() {
        let router = Router::new().route(
            "/feed",
            get(|| async {
                let mut headers = HeaderMap::new();
                headers.insert(header::RETRY_AFTER, HeaderValue::from_static("42"));
                (HttpStatus::TOO_MANY_REQUESTS, headers, "slow down")
            }),
        );
        let mut feed = HttpFeed::new(serve(router).await).unwrap();
        assert_eq!(
            feed.poll().await.unwrap_err(),
            FeedError::RateLimited {
                retry_after: Some(Duration::from_secs(42))
            }
        );
    }

    #[tokio::test]
    async fn http_feed_maps_server_errors() {
        let router = Router::new().route(
            "/feed",
            get(|| async { (HttpStatus::BAD_GATEWAY, "down") }),
        );
        let mut feed = HttpFeed::new(serve(router).await).unwrap();
        assert!(matches!(feed.poll().await, Err(FeedError::Upstream(_))));
    }
}
