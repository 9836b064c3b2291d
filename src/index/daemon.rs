// 9.4: one polling task per market. poll the feed, hand readings to the aggregator,
// sleep for whatever the backoff says. a watch channel stops it between iterations.

use super::aggregator::{Aggregator, PublishOutcome};
use super::backoff::Backoff;
use super::feed::{FeedError, FeedSource};
use super::store::IndexStore;
use super::IndexError;
use crate::config::AggregatorConfig;
use crate::types::Timestamp;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct AggregatorDaemon {
    aggregator: Aggregator,
    feed: Box<dyn FeedSource>,
    store: Arc<IndexStore>,
    backoff: Backoff,
}

impl AggregatorDaemon {
    pub fn new(
        mut aggregator: Aggregator,
        feed: Box<dyn FeedSource>,
        store: Arc<IndexStore>,
        config: &AggregatorConfig,
    ) -> Result<Self, IndexError> {
        aggregator.attach(&store)?;
        Ok(Self {
            aggregator,
            feed,
            store,
            backoff: Backoff::new(config.poll_interval, config.max_backoff, config.rate_limit_factor),
        })
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Runs one poll and returns how long to wait before the next.
    pub async fn poll_once(&mut self, now: Timestamp) -> Duration {
        let market = self.aggregator.market().clone();

        let readings = match self.feed.poll().await {
            Ok(readings) => readings,
            Err(FeedError::RateLimited { retry_after }) => {
                let delay = self.backoff.on_rate_limited(retry_after);
                tracing::warn!(%market, feed = self.feed.name(), ?delay, "feed rate limited, backing off");
                return delay;
            }
            Err(e) => {
                let delay = self.backoff.on_failure();
                tracing::warn!(%market, feed = self.feed.name(), error = %e, ?delay, "feed poll failed, backing off");
                return delay;
            }
        };

        match self.aggregator.poll(&self.store, &readings, now) {
            Ok(outcome) => {
                if let PublishOutcome::Published(tick) = &outcome {
                    tracing::debug!(%market, value = %tick.value, kind = ?tick.kind, "poll published");
                }
                self.backoff.reset()
            }
            Err(e) => {
                let delay = self.backoff.on_failure();
                tracing::warn!(%market, error = %e, ?delay, "publish failed, backing off");
                delay
            }
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let market = self.aggregator.market().clone();
        tracing::info!(%market, feed = self.feed.name(), "aggregator started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let delay = self.poll_once(Timestamp::now()).await;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(%market, "aggregator stopped");
    }
}
