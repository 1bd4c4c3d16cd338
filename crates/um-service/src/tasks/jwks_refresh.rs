//! Background signing key refresh.
//!
//! Keeps the key set fresh ahead of lookups so no request waits on a fetch.
//! A failed fetch leaves the previous snapshot in place; lookups keep
//! working from it until the next successful refresh.

use crate::auth::KeySetCache;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run the refresh loop until `cancel_token` fires.
///
/// The first tick fires immediately, so the cache is warm right after startup.
pub async fn start_jwks_refresh(
    keys: Arc<KeySetCache>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "um.task.jwks_refresh",
        interval_seconds = interval.as_secs(),
        "Starting JWKS refresh task"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match keys.refresh().await {
                    Ok(count) => {
                        tracing::debug!(target: "um.task.jwks_refresh", key_count = count, "JWKS refreshed");
                    }
                    Err(e) => {
                        warn!(target: "um.task.jwks_refresh", error = %e, "JWKS refresh failed, keeping cached keys");
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!(target: "um.task.jwks_refresh", "JWKS refresh task received shutdown signal, exiting");
                break;
            }
        }
    }
}
