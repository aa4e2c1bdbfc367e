//! Error types shared by the harvest, verification and storage layers

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for harvesting, verifying and storing proxies
#[derive(Error, Debug)]
pub enum HarvestError {
    /// Transport failure while fetching a listing page
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Transport failure while probing through a proxy
    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Failed to read snapshot {path}: {source}")]
    StorageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write snapshot {path}: {source}")]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot {path} is not valid JSON: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No snapshot found at {0}")]
    NotFound(PathBuf),

    #[error("No existing snapshot to back up at {0}")]
    NoExistingSnapshot(PathBuf),

    #[error("No proxies available{}", .0.as_ref().map(|c| format!(" for country: {c}")).unwrap_or_default())]
    NoProxiesAvailable(Option<String>),

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for library operations
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Get the HTTP status code the query layer reports for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            HarvestError::NoProxiesAvailable(_) => StatusCode::NOT_FOUND,
            HarvestError::InvalidProxyAddress(_) | HarvestError::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }
            HarvestError::Fetch { .. } | HarvestError::Probe(_) => StatusCode::BAD_GATEWAY,
            // A missing snapshot is unreadable storage as far as clients are concerned
            HarvestError::NotFound(_)
            | HarvestError::StorageRead { .. }
            | HarvestError::StorageWrite { .. }
            | HarvestError::Decode { .. }
            | HarvestError::NoExistingSnapshot(_)
            | HarvestError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the snapshot could not be read (missing, unreadable or corrupt)
    pub fn is_storage_unreadable(&self) -> bool {
        matches!(
            self,
            HarvestError::NotFound(_) | HarvestError::StorageRead { .. } | HarvestError::Decode { .. }
        )
    }
}

impl IntoResponse for HarvestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Clients never see paths or parser details
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Failed to read proxy data".to_string()
        } else {
            self.to_string()
        };
        let body = json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
