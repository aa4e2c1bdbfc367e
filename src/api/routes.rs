//! Query route definitions

use axum::routing::get;
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the query router.
///
/// `/proxy-{CODE}` is matched through the catch-all segment since path parameters
/// must span a whole segment.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::usage))
        .route("/region", get(handlers::regions))
        .route("/proxy", get(handlers::random_proxy))
        .route("/:resource", get(handlers::resource))
        .fallback(handlers::not_found)
        .with_state(state)
}
