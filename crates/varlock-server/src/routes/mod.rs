//! API route handlers.
//!
//! All routes are nested under `/v1`. The device-code and refresh
//! endpoints are unauthenticated (they are the login flow); everything
//! else requires a bearer token. Mutating calls additionally pass through
//! the request-integrity perimeter, applied as an outer layer in
//! [`build_router`].

pub mod admin;
pub mod auth;
pub mod device;
pub mod projects;
pub mod secrets;
pub mod tokens;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::middleware as axum_mw;
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::integrity::integrity_middleware;
use crate::state::AppState;

/// Build the complete application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Unauthenticated login surface, concurrency-limited against abuse.
    let public = Router::new()
        .merge(device::public_router())
        .merge(auth::public_router())
        .layer(tower::limit::ConcurrencyLimitLayer::new(32));

    // Everything else requires a bearer token.
    let authenticated = Router::new()
        .merge(device::approval_router())
        .merge(auth::router())
        .merge(projects::router())
        .merge(secrets::router())
        .merge(tokens::router())
        .route_layer(axum_mw::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    let v1 = Router::new()
        .merge(public)
        .merge(authenticated)
        .merge(admin::router());

    Router::new()
        .nest("/v1", v1)
        // Integrity perimeter wraps the whole API. Applied outside the
        // nest so it sees full request paths; it exempts non-mutating
        // methods and the pre-credential allow-list itself.
        .layer(axum_mw::from_fn_with_state(
            Arc::clone(&state),
            integrity_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}
