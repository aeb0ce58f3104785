pub mod auth;
pub mod error;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::CorsConfig;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Local login routes (public)
    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout));

    // Routes behind the session cookie
    let protected_routes = Router::new()
        .route("/protected", get(auth::protected))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::session_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/auth/local", auth_routes)
        .merge(protected_routes)
        .layer(cors_layer(&state.config.cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Credentialed CORS for the configured frontend origin
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true);

    match config.allowed_origin.parse::<HeaderValue>() {
        // A list only echoes origins it contains; other origins get no CORS headers
        Ok(origin) => layer.allow_origin(AllowOrigin::list([origin])),
        Err(_) => {
            tracing::warn!(
                origin = %config.allowed_origin,
                "Invalid CORS origin, cross-origin requests will be refused"
            );
            layer
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
