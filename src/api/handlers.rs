//! Query handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;
use tracing::warn;

use crate::error::{HarvestError, Result};
use crate::proxy::models::{Catalog, CountryDirectory, ProxyRecord};

use super::server::AppState;

const NOT_FOUND_MESSAGE: &str =
    "Endpoint not found. Visit '/' for available API endpoints and usage instructions.";

/// Usage text
pub async fn usage(State(state): State<AppState>) -> impl IntoResponse {
    let port = state.port;
    let message = format!(
        "
Available endpoints:
1. GET /region
   Returns a list of all countries with their proxy counts
   Example: curl http://localhost:{port}/region

2. GET /proxy
   Returns a random proxy from all available proxies across all countries
   Example: curl http://localhost:{port}/proxy

3. GET /proxy-{{countryCode}}
   Returns a random proxy from the specified country. The country code is case-insensitive
   Example: curl http://localhost:{port}/proxy-CN (get a proxy from China)
   Example: curl http://localhost:{port}/proxy-US (get a proxy from United States)
"
    );
    Json(json!({ "message": message }))
}

/// The country directory as stored
pub async fn regions(State(state): State<AppState>) -> Result<Json<CountryDirectory>> {
    let catalog = load(&state)?;
    Ok(Json(catalog.directory))
}

/// A random record across all countries
pub async fn random_proxy(State(state): State<AppState>) -> Result<Json<ProxyRecord>> {
    let catalog = load(&state)?;
    let all: Vec<&ProxyRecord> = catalog.all_records();

    pick_random(&all, &mut rand::thread_rng())
        .map(|record| Json((*record).clone()))
        .ok_or(HarvestError::NoProxiesAvailable(None))
}

/// `/proxy-{CODE}`; any other single segment is unknown
pub async fn resource(State(state): State<AppState>, Path(resource): Path<String>) -> Response {
    match resource.strip_prefix("proxy-") {
        Some(code) if !code.is_empty() => match country_proxy(&state, code) {
            Ok(record) => Json(record).into_response(),
            Err(e) => e.into_response(),
        },
        _ => not_found().await.into_response(),
    }
}

/// Fallback for unmatched routes
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": NOT_FOUND_MESSAGE })),
    )
}

fn country_proxy(state: &AppState, code: &str) -> Result<ProxyRecord> {
    let code = code.to_uppercase();
    let catalog = load(state)?;

    pick_random(catalog.records(&code), &mut rand::thread_rng())
        .cloned()
        .ok_or(HarvestError::NoProxiesAvailable(Some(code)))
}

fn load(state: &AppState) -> Result<Catalog> {
    state.store.load().map_err(|e| {
        warn!(error = %e, "Failed to read proxy data");
        e
    })
}

/// Uniform pick, `None` when empty
pub fn pick_random<'a, T, R: Rng + ?Sized>(items: &'a [T], rng: &mut R) -> Option<&'a T> {
    items.choose(rng)
}
