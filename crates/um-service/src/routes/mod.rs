//! HTTP routes for the User Management service.
//!
//! Defines the Axum router and application state.

use crate::auth::{AuthorizationGate, RoleRequirement};
use crate::config::Config;
use crate::handlers::{self, admin, hierarchy, users};
use crate::middleware::{http_metrics_middleware, require_auth, require_role, AuthState, RoleState};
use crate::services::ServiceContext;
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Role required on every `/admin` route.
pub const ADMIN_ROLE: &str = "ROLE_ADMIN";

/// Request timeout applied to every route.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: PgPool,

    /// Service configuration.
    pub config: Config,

    /// Token verification and role checks.
    pub gate: AuthorizationGate,

    pub services: ServiceContext,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health`, `/ready`, `/metrics` - operational endpoints, public
/// - `/user/register|confirm|forget|reset` - self-service, public
/// - `/api/v1/me`, `/user/password`, `/hierarchy/...` - require a valid token
/// - `/admin/...` - require a valid token carrying `ROLE_ADMIN`
/// - CORS for the configured origins, TraceLayer, 30 second timeout
/// - HTTP metrics middleware (outermost)
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        gate: state.gate.clone(),
    });
    let admin_state = Arc::new(RoleState {
        gate: state.gate.clone(),
        requirement: RoleRequirement::role(ADMIN_ROLE),
    });

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/user/register", post(users::register))
        .route("/user/confirm", put(users::confirm))
        .route("/user/forget", post(users::forgot_password))
        .route("/user/reset", post(users::reset_password))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let authenticated_routes = Router::new()
        .route("/api/v1/me", get(handlers::get_me))
        .route("/user/password", put(users::change_password))
        .route(
            "/hierarchy/tenant/:tenant_id/users",
            get(hierarchy::tenant_users),
        )
        .route(
            "/hierarchy/tenant/:tenant_id/users/:role_name",
            get(hierarchy::tenant_users_by_role),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/admin/users", post(admin::create_user))
        .route("/admin/users/invite", post(admin::invite_user))
        .route("/admin/users/search", post(admin::search_users))
        .route(
            "/admin/users/:id",
            get(admin::get_user)
                .put(admin::update_user)
                .delete(admin::delete_user),
        )
        .route("/admin/users/:id/password", post(admin::set_user_password))
        .route(
            "/admin/users/:id/permissions",
            post(admin::add_user_permission),
        )
        .route(
            "/admin/users/:id/permissions/:permission_id",
            delete(admin::remove_user_permission),
        )
        .route(
            "/admin/roles",
            get(admin::list_roles).post(admin::create_role),
        )
        .route(
            "/admin/roles/:id/permissions",
            put(admin::add_role_permission),
        )
        .route("/admin/roles/:id", delete(admin::delete_role))
        .route(
            "/admin/permissions",
            get(admin::list_permissions).post(admin::create_permission),
        )
        .route("/admin/permissions/:id", delete(admin::delete_permission))
        .route_layer(middleware::from_fn_with_state(admin_state, require_role))
        .with_state(state.clone());

    let cors = cors_layer(&state.config.cors_origins);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. CorsLayer - Answer preflights before auth runs
    // 4. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(authenticated_routes)
        .merge(admin_routes)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn(http_metrics_middleware))
}

/// CORS for the configured origins. Unparseable origins are skipped; an empty
/// list allows no cross-origin requests.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(target: "um.routes", origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::{KeySetCache, TokenValidator};
    use crate::services::test_support;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use sqlx::postgres::PgPoolOptions;
    use std::collections::HashMap;
    use tower::ServiceExt;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    fn test_router(cors_origins: &str) -> Router {
        let vars = HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgres://um:um@127.0.0.1:1/um".to_string(),
            ),
            ("CORS_ORIGINS".to_string(), cors_origins.to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://um:um@127.0.0.1:1/um")
            .unwrap();
        let keys = Arc::new(KeySetCache::new(
            "http://127.0.0.1:1/oauth2/jwks".to_string(),
        ));
        let gate = AuthorizationGate::new(Arc::new(TokenValidator::with_default_skew(keys)));
        let (services, _otp) = test_support::context(pool.clone());

        let state = Arc::new(AppState {
            pool,
            config,
            gate,
            services,
        });
        let handle = PrometheusBuilder::new().build_recorder().handle();
        build_routes(state, handle)
    }

    async fn status_of(router: Router, request: Request<Body>) -> StatusCode {
        router.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let request = Request::get("/health").body(Body::empty()).unwrap();
        assert_eq!(status_of(test_router(""), request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        for (method, uri) in [
            ("GET", "/api/v1/me"),
            ("PUT", "/user/password"),
            ("GET", "/hierarchy/tenant/acme/users"),
            ("GET", "/admin/roles"),
            ("POST", "/admin/users/search"),
            ("DELETE", "/admin/permissions/7f1c1d8e-6a55-4f55-9a0e-6b1f0d9b2c11"),
        ] {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            assert_eq!(
                status_of(test_router(""), request).await,
                StatusCode::UNAUTHORIZED,
                "{method} {uri}"
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let request = Request::get("/nope").body(Body::empty()).unwrap();
        assert_eq!(
            status_of(test_router(""), request).await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_singular_admin_paths_are_not_routed() {
        for (method, uri) in [
            ("POST", "/admins/create-user"),
            ("GET", "/admins/7f1c1d8e-6a55-4f55-9a0e-6b1f0d9b2c11"),
            ("POST", "/admin/user"),
            ("PUT", "/admin/user/7f1c1d8e-6a55-4f55-9a0e-6b1f0d9b2c11"),
            ("DELETE", "/admin/permission"),
            ("PUT", "/admin/role"),
        ] {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            assert_eq!(
                status_of(test_router(""), request).await,
                StatusCode::NOT_FOUND,
                "{method} {uri}"
            );
        }
    }

    #[tokio::test]
    async fn test_cors_preflight_for_configured_origin() {
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/admin/roles")
            .header("origin", "https://console.example.com")
            .header("access-control-request-method", "GET")
            .body(Body::empty())
            .unwrap();

        let response = test_router("https://console.example.com, not a header\u{7f}")
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "https://console.example.com"
        );
    }

    #[tokio::test]
    async fn test_cors_unlisted_origin_gets_no_allow_header() {
        let request = Request::get("/health")
            .header("origin", "https://evil.example.com")
            .body(Body::empty())
            .unwrap();

        let response = test_router("https://console.example.com")
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get("access-control-allow-origin")
            .is_none());
    }
}
