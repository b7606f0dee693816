//! # Redis Event Bus
//!
//! Change events travel as JSON on a Redis channel named after the key, so
//! every instance subscribed to that key sees commits made by any instance.
//! Publishing goes through the shared `ConnectionManager`; each subscription
//! opens its own pub/sub connection and forwards decoded events through a
//! bounded channel.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::Client;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backends::{EventBus, Subscription};
use crate::error::{QuoteError, QuoteResult};
use crate::model::ChangeEvent;

const CHANNEL_CAPACITY: usize = 1024;

/// Pub/sub over Redis, one channel per key.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisBus {
    /// `client` opens subscriber connections, `conn` carries publishes.
    pub fn new(client: Client, conn: ConnectionManager, op_timeout: Duration) -> Self {
        Self {
            client,
            conn,
            op_timeout,
        }
    }
}

fn bus_error(e: redis::RedisError) -> QuoteError {
    QuoteError::BusUnavailable(e.to_string())
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, event: &ChangeEvent) -> QuoteResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| QuoteError::BusUnavailable(format!("encode: {}", e)))?;
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("PUBLISH").arg(&event.key).arg(payload).to_owned();

        let receivers: i64 = tokio::time::timeout(self.op_timeout, cmd.query_async(&mut conn))
            .await
            .map_err(|_| QuoteError::BusUnavailable(format!("no reply within {:?}", self.op_timeout)))?
            .map_err(bus_error)?;
        debug!("Published on '{}' to {} subscribers", event.key, receivers);
        Ok(())
    }

    async fn subscribe(&self, keys: &[String]) -> QuoteResult<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(bus_error)?;
        for key in keys {
            pubsub.subscribe(key).await.map_err(bus_error)?;
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Unreadable payload on '{}': {}", msg.get_channel_name(), e);
                        continue;
                    }
                };
                match serde_json::from_str::<ChangeEvent>(&payload) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("Malformed event on '{}': {}", msg.get_channel_name(), e),
                }
            }
            warn!("Redis pub/sub stream closed");
        });

        Ok(Subscription::new(rx, vec![task]))
    }
}
