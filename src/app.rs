use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    handler::Handler,
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{PasswordHasher, PermissionEvaluator, TokenService};
use crate::config::{AppConfig, SecurityConfig};
use crate::database::Store;
use crate::handlers::{auth, logs, permissions, products, roles, users};
use crate::middleware::{
    audit_recorder, authentication_gate, authorization_gate, AuditRecorder, PermissionGuard,
};
use crate::types::{PageRequest, Pagination};

/// Shared handles injected into every handler and gate
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub tokens: Arc<TokenService>,
    pub hasher: PasswordHasher,
    pub evaluator: PermissionEvaluator,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, tokens: Arc<TokenService>, config: AppConfig) -> Self {
        Self {
            evaluator: PermissionEvaluator::new(store.clone()),
            hasher: PasswordHasher::new(config.security.bcrypt_cost),
            store,
            tokens,
            config: Arc::new(config),
        }
    }

    /// Build state from config alone, signing with the system clock
    pub fn from_config(store: Arc<dyn Store>, config: AppConfig) -> Self {
        let tokens = Arc::new(TokenService::from_config(&config.security));
        Self::new(store, tokens, config)
    }

    pub fn page(&self, pagination: &Pagination) -> PageRequest {
        pagination.resolve(self.config.api.default_page_size, self.config.api.max_page_size)
    }
}

/// Full application router.
///
/// Layer order, outermost first: trace, CORS, audit, authentication (on
/// gated routes only), per-route authorization, handler.
pub fn router(state: AppState) -> Router {
    let perm = |code: &'static str| {
        middleware::from_fn_with_state(
            PermissionGuard::new(state.evaluator.clone(), code),
            authorization_gate,
        )
    };

    let gated = Router::new()
        .route("/user/info", get(auth::user_info))
        // Users
        .route(
            "/users",
            get(users::list.layer(perm("user:list"))).post(users::create.layer(perm("user:create"))),
        )
        .route(
            "/users/:id",
            get(users::show.layer(perm("user:list")))
                .put(users::update.layer(perm("user:update")))
                .delete(users::delete.layer(perm("user:delete"))),
        )
        // Roles
        .route(
            "/roles",
            get(roles::list.layer(perm("role:list"))).post(roles::create.layer(perm("role:create"))),
        )
        .route(
            "/roles/:id",
            put(roles::update.layer(perm("role:update"))).delete(roles::delete.layer(perm("role:delete"))),
        )
        .route(
            "/roles/:id/permissions",
            get(roles::permissions.layer(perm("role:list")))
                .put(roles::replace_permissions.layer(perm("role:update"))),
        )
        // Permissions are administered under the role codes
        .route(
            "/permissions",
            get(permissions::list.layer(perm("role:list")))
                .post(permissions::create.layer(perm("role:create"))),
        )
        .route(
            "/permissions/:id",
            put(permissions::update.layer(perm("role:update")))
                .delete(permissions::delete.layer(perm("role:delete"))),
        )
        // Logs
        .route("/logs", get(logs::list.layer(perm("log:list"))))
        .route("/logs/types", get(logs::types.layer(perm("log:list"))))
        .route("/logs/stats", get(logs::stats.layer(perm("log:list"))))
        // Products
        .route(
            "/products",
            get(products::list.layer(perm("product:list")))
                .post(products::create.layer(perm("product:create"))),
        )
        .route(
            "/products/:id",
            get(products::show.layer(perm("product:list")))
                .put(products::update.layer(perm("product:update")))
                .delete(products::delete.layer(perm("product:delete"))),
        )
        .route(
            "/products/:id/status",
            put(products::set_status.layer(perm("product:status"))),
        )
        .route_layer(middleware::from_fn_with_state(
            state.tokens.clone(),
            authentication_gate,
        ));

    let api = Router::new()
        .route("/login", post(auth::login))
        .merge(gated);

    let recorder = AuditRecorder::new(
        state.store.clone(),
        state.config.audit.clone(),
        state.config.api.max_request_size_bytes,
    );

    Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(recorder, audit_recorder))
        // Not audited
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.security)),
        )
        .with_state(state)
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
        ])
        .max_age(Duration::from_secs(12 * 60 * 60));

    if security.cors_origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

/// GET /health - 200 while the store answers, 503 otherwise
async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let (status, label) = match state.store.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };

    let body = json!({
        "success": status.is_success(),
        "data": {
            "status": label,
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now(),
        }
    });
    (status, Json(body))
}
