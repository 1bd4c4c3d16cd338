//! Test server harness for E2E testing
//!
//! Provides `TestUmServer` for spawning real UM server instances in tests.
//! Redis-backed collaborators are replaced with in-process ones so tests
//! only need Postgres and a mock JWKS endpoint.

use crate::recorders::{RecordingEmailSender, RecordingEventPublisher};
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::PgPool;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use um_service::auth::{AuthorizationGate, InMemoryReplayLedger, KeySetCache, TokenValidator};
use um_service::config::Config;
use um_service::routes::{self, AppState};
use um_service::services::otp::InMemoryOtpStore;
use um_service::services::ServiceContext;

/// Test harness for spawning the User Management server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[sqlx::test(migrations = "../../migrations")]
/// async fn test_health_flow_e2e(pool: PgPool) -> Result<()> {
///     let jwks = wiremock::MockServer::start().await;
///     mount_jwks(&jwks, &[&TestSigningKey::primary()]).await;
///     let server = TestUmServer::spawn(pool, &jwks_url(&jwks)).await?;
///
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestUmServer {
    addr: SocketAddr,
    pool: PgPool,
    config: Config,
    otp_store: Arc<InMemoryOtpStore>,
    emails: Arc<RecordingEmailSender>,
    events: Arc<RecordingEventPublisher>,
    _handle: JoinHandle<()>,
}

impl TestUmServer {
    /// Spawn a server that verifies tokens against `jwks_url`.
    pub async fn spawn(pool: PgPool, jwks_url: &str) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(pool, jwks_url, HashMap::new()).await
    }

    /// Spawn with extra configuration variables (e.g. `REPLAY_PROTECTION`).
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Hash passwords at the lowest bcrypt cost
    /// - Use an in-memory replay ledger when replay protection is enabled
    pub async fn spawn_with_vars(
        pool: PgPool,
        jwks_url: &str,
        extra_vars: HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://test/test".to_string(),
            ),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("JWKS_URL".to_string(), jwks_url.to_string()),
            ("JWKS_MIN_REFRESH_INTERVAL_SECONDS".to_string(), "0".to_string()),
            ("BCRYPT_COST".to_string(), "4".to_string()),
            ("ENVIRONMENT".to_string(), "test".to_string()),
        ]);
        vars.extend(extra_vars);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let keys = Arc::new(KeySetCache::with_settings(
            config.jwks_url.clone(),
            config.jwks_cache_ttl,
            config.jwks_fetch_timeout,
            config.jwks_min_refresh_interval,
        ));
        let validator = TokenValidator::new(keys, config.jwt_clock_skew)
            .with_issuer(config.jwt_issuer.clone())
            .with_audience(config.jwt_audience.clone())
            .with_replay_protection(
                config.replay_protection,
                Arc::new(InMemoryReplayLedger::new()),
            );
        let gate = AuthorizationGate::new(Arc::new(validator));

        let otp_store = Arc::new(InMemoryOtpStore::new());
        let emails = Arc::new(RecordingEmailSender::new());
        let events = Arc::new(RecordingEventPublisher::new());
        let services = ServiceContext::new(
            pool.clone(),
            &config,
            otp_store.clone(),
            emails.clone(),
            events.clone(),
        );

        let state = Arc::new(AppState {
            pool: pool.clone(),
            config: config.clone(),
            gate,
            services,
        });

        // Handle without a global recorder, so many servers can coexist
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            pool,
            config,
            otp_store,
            emails,
            events,
            _handle: handle,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn otp_store(&self) -> &InMemoryOtpStore {
        &self.otp_store
    }

    /// Passcode emails sent so far.
    pub fn emails(&self) -> &RecordingEmailSender {
        &self.emails
    }

    /// Domain events published so far.
    pub fn events(&self) -> &RecordingEventPublisher {
        &self.events
    }
}

impl Drop for TestUmServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
