//! Domain event publishing.
//!
//! Events are appended to Redis streams as `{type, data}` entries. Publishing
//! is fire-and-forget from the caller's point of view: a failure is logged
//! and never turns a completed mutation into an error.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde_json::Value;
use std::time::Duration;

/// Stream for user lifecycle events.
pub const USER_EVENTS: &str = "user_events";

/// Stream for role and permission events.
pub const ROLE_EVENTS: &str = "role_events";

pub const USER_CREATED: &str = "USER_CREATED";
pub const USER_INVITED: &str = "USER_INVITED";
pub const USER_CONFIRMED: &str = "USER_CONFIRMED";
pub const USER_UPDATED: &str = "USER_UPDATED";
pub const USER_PASSWORD_CHANGED: &str = "USER_PASSWORD_CHANGED";
pub const USER_DELETED: &str = "USER_DELETED";
pub const USER_PERMISSIONS_CHANGED: &str = "USER_PERMISSIONS_CHANGED";
pub const ROLE_CREATED: &str = "ROLE_CREATED";
pub const ROLE_UPDATED: &str = "ROLE_UPDATED";
pub const ROLE_DELETED: &str = "ROLE_DELETED";
pub const PERMISSION_CREATED: &str = "PERMISSION_CREATED";
pub const PERMISSION_DELETED: &str = "PERMISSION_DELETED";

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Append an event to `stream`. Never fails from the caller's view.
    async fn publish(&self, stream: &str, event_type: &str, data: Value);
}

/// Appends events with `XADD <stream> * type <event_type> data <json>`.
#[derive(Clone)]
pub struct RedisEventPublisher {
    connection: MultiplexedConnection,
    timeout: Duration,
}

impl RedisEventPublisher {
    pub fn new(connection: MultiplexedConnection, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
        }
    }
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish(&self, stream: &str, event_type: &str, data: Value) {
        let mut conn = self.connection.clone();
        let payload = data.to_string();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream)
            .arg("*")
            .arg("type")
            .arg(event_type)
            .arg("data")
            .arg(payload);

        let result: Result<redis::RedisResult<String>, _> =
            tokio::time::timeout(self.timeout, cmd.query_async(&mut conn)).await;

        match result {
            Ok(Ok(entry_id)) => {
                tracing::debug!(
                    target: "um.services.events",
                    stream,
                    event_type,
                    entry_id = %entry_id,
                    "Event published"
                );
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    target: "um.services.events",
                    stream,
                    event_type,
                    error = %e,
                    "Failed to publish event"
                );
            }
            Err(_) => {
                tracing::warn!(
                    target: "um.services.events",
                    stream,
                    event_type,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Event publish timed out"
                );
            }
        }
    }
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, stream: &str, event_type: &str, _data: Value) {
        tracing::trace!(target: "um.services.events", stream, event_type, "Event dropped");
    }
}
