//! HTTP routes
//!
//! Thin JSON transport over the book and annotation repositories.

pub mod annotations;
pub mod books;
pub mod health;

use axum::Router;
use serde::Deserialize;

use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Build the API router without middleware layers
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest("/api/v1/health", health::router())
        .nest("/api/v1/books", books::router())
        .nest("/api/v1/annotations", annotations::router())
        .with_state(state)
}
