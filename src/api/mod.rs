mod handlers;
pub mod middleware;

use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::service::PointsService;
use crate::store::Store;

pub use middleware::SecurityConfig;

pub fn create_router<S: Store>(service: PointsService<S>, security: SecurityConfig) -> Router {
    let api = Router::new()
        // Task catalog
        .route("/tasks", get(handlers::list_tasks::<S>))
        .route("/tasks", post(handlers::define_task::<S>))
        .route("/tasks/{id}", get(handlers::get_task::<S>))
        .route("/tasks/{id}", put(handlers::update_task::<S>))
        .route("/tasks/{id}/activate", post(handlers::activate_task::<S>))
        .route("/tasks/{id}/deactivate", post(handlers::deactivate_task::<S>))
        // Ledger
        .route("/awards", post(handlers::award::<S>))
        .route("/users/{user_id}/awards", post(handlers::award_to::<S>))
        .route("/entries/{id}", get(handlers::get_entry::<S>))
        .route("/entries/{id}/reverse", post(handlers::reverse_entry::<S>))
        .route("/users/{user_id}/total", get(handlers::user_total::<S>))
        .route("/users/{user_id}/history", get(handlers::user_history::<S>))
        // Leveling & ranking
        .route("/users/{user_id}/summary", get(handlers::user_summary::<S>))
        .route("/users/{user_id}/profile", put(handlers::upsert_profile::<S>))
        .route("/leaderboard", get(handlers::leaderboard::<S>))
        .route("/levels/{points}", get(handlers::level_for::<S>))
        // Health
        .route("/health", get(handlers::health));

    let mut router = Router::new()
        .nest("/api/v1", api)
        .layer(from_fn_with_state(
            security.clone(),
            middleware::auth_middleware,
        ));

    if let Some(limiter) = security.rate_limiter.clone() {
        router = router.layer(from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&security)),
        )
        .with_state(service)
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    match &security.cors_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(origin, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    }
}
