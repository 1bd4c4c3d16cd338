//! User Management Service
//!
//! Entry point. Wires configuration, storage, token validation and the
//! HTTP router, then serves until SIGINT or SIGTERM.

use common::secret::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use um_service::auth::{AuthorizationGate, KeySetCache, RedisReplayLedger, TokenValidator};
use um_service::config::{Config, JwksRefreshMode};
use um_service::observability::metrics::init_metrics_recorder;
use um_service::routes::{self, AppState};
use um_service::services::email::LogEmailSender;
use um_service::services::events::RedisEventPublisher;
use um_service::services::otp::RedisOtpStore;
use um_service::services::ServiceContext;
use um_service::tasks;

/// Per-statement timeout applied to every pooled connection.
const STATEMENT_TIMEOUT_SECONDS: u32 = 5;

/// Upper bound on Redis calls made for OTPs and domain events.
const REDIS_CALL_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting User Management Service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        service_name = %config.service_name,
        environment = %config.environment,
        bind_address = %config.bind_address,
        jwks_url = %config.jwks_url,
        jwks_refresh_mode = ?config.jwks_refresh_mode,
        replay_protection = ?config.replay_protection,
        jwt_clock_skew_seconds = config.jwt_clock_skew.as_secs(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    info!("Connecting to database...");
    let db_url = add_query_timeout(config.database_url.expose_secret(), STATEMENT_TIMEOUT_SECONDS);
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&db_url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| {
            error!("Failed to run database migrations: {}", e);
            e
        })?;
    info!("Database connection established, migrations applied");

    info!("Connecting to Redis...");
    let redis_conn = redis::Client::open(config.redis_url.expose_secret())
        .map_err(|e| {
            error!(error = %e, "Invalid Redis URL");
            e
        })?
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to Redis");
            e
        })?;
    info!("Redis connection established");

    let keys = Arc::new(KeySetCache::with_settings(
        config.jwks_url.clone(),
        config.jwks_cache_ttl,
        config.jwks_fetch_timeout,
        config.jwks_min_refresh_interval,
    ));
    let validator = TokenValidator::new(Arc::clone(&keys), config.jwt_clock_skew)
        .with_issuer(config.jwt_issuer.clone())
        .with_audience(config.jwt_audience.clone())
        .with_replay_protection(
            config.replay_protection,
            Arc::new(RedisReplayLedger::new(
                redis_conn.clone(),
                config.replay_ledger_timeout,
            )),
        );
    let gate = AuthorizationGate::new(Arc::new(validator));

    let services = ServiceContext::new(
        db_pool.clone(),
        &config,
        Arc::new(RedisOtpStore::new(redis_conn.clone(), REDIS_CALL_TIMEOUT)),
        Arc::new(LogEmailSender),
        Arc::new(RedisEventPublisher::new(redis_conn, REDIS_CALL_TIMEOUT)),
    );

    let shutdown_token = CancellationToken::new();

    if config.jwks_refresh_mode == JwksRefreshMode::Background {
        let interval = background_refresh_interval(config.jwks_cache_ttl);
        tokio::spawn(tasks::start_jwks_refresh(
            Arc::clone(&keys),
            interval,
            shutdown_token.child_token(),
        ));
    }

    tokio::spawn(tasks::start_retention_sweep(
        db_pool.clone(),
        config.soft_delete_retention_days,
        config.retention_sweep_interval,
        shutdown_token.child_token(),
    ));

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState {
        pool: db_pool,
        config,
        gate,
        services,
    });
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("User Management Service listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown_token.cancel();
    info!("User Management Service shutdown complete");

    Ok(())
}

/// Structured logs. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "um_service=info,um=info,tower_http=info".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Refresh at half the TTL so lookups never find the snapshot stale.
fn background_refresh_interval(cache_ttl: Duration) -> Duration {
    (cache_ttl / 2).max(Duration::from_secs(1))
}

/// Resolves on SIGINT or SIGTERM, after the drain period
/// (`UM_DRAIN_SECONDS`, default 30) has elapsed.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "SIGINT handler unavailable");
            std::future::pending::<()>().await;
        }
        "SIGINT"
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    let received = tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    };
    info!(signal = received, "Shutdown requested");

    let drain = drain_period(std::env::var("UM_DRAIN_SECONDS").ok().as_deref());
    if !drain.is_zero() {
        warn!(drain_secs = drain.as_secs(), "Draining in-flight requests");
        tokio::time::sleep(drain).await;
    }
}

fn drain_period(raw: Option<&str>) -> Duration {
    Duration::from_secs(raw.and_then(|s| s.trim().parse().ok()).unwrap_or(30))
}

/// Adds statement_timeout to the database URL.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}
