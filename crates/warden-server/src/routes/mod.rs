//! API route registration.

use axum::Router;

use crate::AppState;

pub mod turns;

/// Build the `/api` router.
pub fn api_router() -> Router<AppState> {
    Router::new().nest("/turns", turns::router())
}
