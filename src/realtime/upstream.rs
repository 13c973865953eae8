//! # Upstream Change Source
//!
//! Subscribes to the application's Redis pub/sub channels
//! (`<app_id>afterSave`, `<app_id>afterDelete`) and feeds every decoded
//! message into the [`ChangeFeed`]. The connection is re-established with
//! exponential backoff whenever it drops.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::dispatcher::ChangeFeed;
use super::errors::{RealtimeError, RealtimeResult};
use super::event::{ChangeEvent, ChangeKind};
use crate::observability::LiveQueryMetrics;

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Decodes one pub/sub message into a change event.
///
/// The channel must belong to `app_id`; the payload is the same JSON
/// document the HTTP ingest endpoints accept.
pub fn decode_message(app_id: &str, channel: &str, payload: &str) -> RealtimeResult<ChangeEvent> {
    let kind = ChangeKind::from_channel(app_id, channel)
        .ok_or_else(|| RealtimeError::InvalidEvent(format!("unexpected channel {}", channel)))?;
    let message: Value =
        serde_json::from_str(payload).map_err(|e| RealtimeError::InvalidEvent(e.to_string()))?;
    ChangeEvent::from_upstream(kind, &message)
}

/// Reconnect delay, doubling per failed attempt up to [`MAX_DELAY`]
#[derive(Debug)]
struct Backoff {
    current: Duration,
    attempt: u32,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: INITIAL_DELAY,
            attempt: 0,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.attempt += 1;
        self.current = (self.current * 2).min(MAX_DELAY);
        delay
    }

    fn reset(&mut self) {
        self.current = INITIAL_DELAY;
        self.attempt = 0;
    }
}

/// Why a subscription session ended
enum Ended {
    /// Redis closed the stream
    Disconnected,
    /// Nobody is left to dispatch events
    FeedClosed,
}

/// Redis pub/sub consumer feeding the change feed
pub struct RedisChangeSource {
    client: redis::Client,
    app_id: String,
    feed: ChangeFeed,
    metrics: Arc<LiveQueryMetrics>,
}

impl RedisChangeSource {
    /// Parses `uri`; no connection is made until [`spawn`](Self::spawn).
    pub fn new(
        uri: &str,
        app_id: impl Into<String>,
        feed: ChangeFeed,
        metrics: Arc<LiveQueryMetrics>,
    ) -> RealtimeResult<Self> {
        let client = redis::Client::open(uri)
            .map_err(|e| RealtimeError::Upstream(format!("invalid redis uri: {}", e)))?;
        Ok(Self {
            client,
            app_id: app_id.into(),
            feed,
            metrics,
        })
    }

    pub fn channels(&self) -> Vec<String> {
        [ChangeKind::Save, ChangeKind::Delete]
            .iter()
            .map(|kind| kind.channel(&self.app_id))
            .collect()
    }

    /// Runs the consumer until the change feed closes.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let mut backoff = Backoff::new();
        loop {
            match self.consume(&mut backoff).await {
                Ok(Ended::FeedClosed) => {
                    info!("Change feed closed; stopping redis subscriber");
                    return;
                }
                Ok(Ended::Disconnected) => warn!("Redis subscription stream ended"),
                Err(e) => warn!(error = %e, "Redis subscription failed"),
            }

            let delay = backoff.next_delay();
            warn!(
                attempt = backoff.attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to redis"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn consume(&self, backoff: &mut Backoff) -> redis::RedisResult<Ended> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        let channels = self.channels();
        pubsub.subscribe(channels.clone()).await?;
        backoff.reset();
        info!(channels = ?channels, "Subscribed to redis change channels");

        let mut messages = std::pin::pin!(pubsub.on_message());
        while let Some(msg) = messages.next().await {
            let channel = msg.get_channel_name();
            let event = msg
                .get_payload::<String>()
                .map_err(|e| RealtimeError::InvalidEvent(e.to_string()))
                .and_then(|payload| decode_message(&self.app_id, channel, &payload));

            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    self.metrics.increment_rejected();
                    warn!(channel, error = %e, "Rejected upstream message");
                    continue;
                }
            };

            debug!(channel, class_name = %event.class_name, object_id = %event.object_id, "Queued upstream message");
            if self.feed.publish(event).await.is_err() {
                return Ok(Ended::FeedClosed);
            }
        }
        Ok(Ended::Disconnected)
    }
}
