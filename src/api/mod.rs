//! Reference notification service.
//!
//! Serves the two endpoints the engine consumes over an in-memory
//! [`NotificationStore`], behind optional bearer auth and rate limiting.

mod handlers;
pub mod middleware;

use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::store::NotificationStore;
use middleware::{auth_middleware, rate_limit_middleware, SecurityConfig};

pub fn create_router(store: NotificationStore, security: SecurityConfig) -> Router {
    let mut notifications = Router::new()
        .route("/notifications", get(handlers::list_notifications))
        .route("/notifications/{id}/read", put(handlers::mark_read))
        .route_layer(from_fn_with_state(security.clone(), auth_middleware));

    // Added last so it runs first: throttled clients never reach auth.
    if let Some(budget) = security.budget.clone() {
        notifications =
            notifications.route_layer(from_fn_with_state(budget, rate_limit_middleware));
    }

    let api = notifications.route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&security)),
        )
        .with_state(store)
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    match &security.allowed_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new().allow_origin(AllowOrigin::list(origins))
        }
        None => CorsLayer::permissive(),
    }
}
