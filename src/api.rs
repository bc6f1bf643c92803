//! HTTP API for the builder service.
//!
//! One operation: `POST /build_website` runs the whole pipeline
//! synchronously and returns the issue, pull request, and hosted site URLs.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::github;
use crate::pipeline::{self, BuildRequest};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub config: Config,
}

pub type SharedState = Arc<AppState>;

// ── Request/response payloads ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BuildWebsiteRequest {
    pub repo_url: String,
    pub website_description: String,
    #[serde(default)]
    pub public_access: bool,
}

#[derive(Debug, Serialize)]
pub struct BuildWebsiteResponse {
    pub success: bool,
    pub message: String,
    pub issue_url: String,
    pub pr_url: String,
    pub website_url: String,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/build_website", post(build_website))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn build_website(
    State(state): State<SharedState>,
    Json(req): Json<BuildWebsiteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Reject obviously bad input before any network call.
    github::parse_repo_url(&req.repo_url).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if req.website_description.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "website_description must not be empty".to_string(),
        ));
    }

    let request = BuildRequest {
        repo_url: req.repo_url,
        description: req.website_description,
        public_access: req.public_access,
    };

    let outcome = pipeline::run_build(&state.config, &request)
        .await
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;

    Ok(Json(BuildWebsiteResponse {
        success: true,
        message: "Successfully created MVP website".to_string(),
        issue_url: outcome.issue_url,
        pr_url: outcome.pr_url,
        website_url: outcome.website_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_defaults_public_access_false() {
        let json = r#"{"repo_url": "https://github.com/o/r", "website_description": "a site"}"#;
        let req: BuildWebsiteRequest = serde_json::from_str(json).unwrap();
        assert!(!req.public_access);
    }

    #[test]
    fn test_build_request_explicit_public_access() {
        let json = r#"{
            "repo_url": "https://github.com/o/r",
            "website_description": "a site",
            "public_access": true
        }"#;
        let req: BuildWebsiteRequest = serde_json::from_str(json).unwrap();
        assert!(req.public_access);
    }

    #[test]
    fn test_build_response_serializes() {
        let resp = BuildWebsiteResponse {
            success: true,
            message: "Successfully created MVP website".to_string(),
            issue_url: "https://github.com/o/r/issues/1".to_string(),
            pr_url: "https://github.com/o/r/pull/2".to_string(),
            website_url: "https://5000-sbx.sandbox.dev".to_string(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["website_url"], "https://5000-sbx.sandbox.dev");
    }

    #[test]
    fn test_api_error_status_mapping() {
        let bad = ApiError::BadRequest("nope".to_string()).into_response();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        let internal = ApiError::Internal("boom".to_string()).into_response();
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
