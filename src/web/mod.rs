//! # Web API Module
//!
//! Axum-based HTTP API that drives bulk runs.
//!
//! ## Core Components
//!
//! - [`routes`] - Route definitions: public health routes and the `/v1` API
//! - [`handlers`] - Request handlers per endpoint group
//! - [`middleware`] - Request id and optional API key authentication
//! - [`state`] - Shared application state
//! - [`errors`] - `ApiError` and its HTTP mapping

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::Router;

pub use errors::ApiError;
pub use state::AppState;

/// Create the application with all routes and middleware
pub fn create_app(app_state: AppState) -> Router {
    let request_timeout = app_state.web_config().request_timeout();

    // Public routes - never require the API key
    let public_routes = Router::new().merge(routes::health_routes());

    let protected_routes = Router::new()
        .nest("/v1", routes::api_v1_routes())
        .layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            middleware::auth::conditional_api_key,
        ));

    let mut app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(axum::middleware::from_fn(
            middleware::request_id::add_request_id,
        ))
        .layer(tower_http::timeout::TimeoutLayer::new(request_timeout));

    if app_state.web_config().cors_enabled {
        app = app.layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );
    }

    app.layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app_state)
}
